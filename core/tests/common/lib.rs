//! Fake appliance shells for integration tests.
//!
//! A [`ScriptedAppliance`] answers every command by prefix match, records
//! what it was asked, and can be told to refuse logins or drop shells.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use async_trait::async_trait;
use opsdesk_core::credentials::Credentials;
use opsdesk_core::remote_shell::PtyRequest;
use opsdesk_core::remote_shell::RemoteShellError;
use opsdesk_core::remote_shell::ShellConnector;
use opsdesk_core::remote_shell::ShellSession;
use opsdesk_core::remote_shell::ShellStreams;
use opsdesk_core::remote_shell::ShellTiming;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::DuplexStream;
use tokio::io::duplex;

pub const BANNER: &str = "Welcome to the appliance\r\n> ";
pub const PROMPT: &str = "\r\n> ";

/// Short windows so tests finish quickly; the fake closes its streams after
/// each reply anyway.
pub fn fast_timing() -> ShellTiming {
    ShellTiming {
        banner_quiet_ms: 30,
        banner_cap_ms: 300,
        response_quiet_ms: 100,
        response_cap_ms: 2_000,
        ..ShellTiming::default()
    }
}

#[derive(Default)]
struct State {
    replies: Vec<(String, String)>,
    commands: Vec<String>,
    logins: Vec<String>,
    refuse_logins: usize,
    drop_shells: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedAppliance {
    state: Arc<Mutex<State>>,
}

impl ScriptedAppliance {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commands starting with `prefix` are answered with `reply`. The first
    /// registered match wins; unmatched commands get an empty reply.
    pub fn reply(self, prefix: &str, reply: &str) -> Self {
        self.state()
            .replies
            .push((prefix.to_string(), reply.to_string()));
        self
    }

    /// Refuse the next `n` logins.
    pub fn refuse_logins(self, n: usize) -> Self {
        self.state().refuse_logins = n;
        self
    }

    /// Fail the next `n` shell requests as if the session had dropped.
    pub fn drop_shells(self, n: usize) -> Self {
        self.state().drop_shells = n;
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Account name of every successful login, in order.
    pub fn logins(&self) -> Vec<String> {
        self.state().logins.clone()
    }

    fn answer(&self, command: &str) -> String {
        let mut state = self.state();
        state.commands.push(command.to_string());
        state
            .replies
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ShellConnector for ScriptedAppliance {
    async fn connect(
        &self,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ShellSession>, RemoteShellError> {
        let mut state = self.state();
        if state.refuse_logins > 0 {
            state.refuse_logins -= 1;
            return Err(RemoteShellError::AuthRejected {
                account: credentials.account().to_string(),
            });
        }
        state.logins.push(credentials.account().to_string());
        Ok(Arc::new(ScriptedSession {
            appliance: self.clone(),
        }))
    }
}

struct ScriptedSession {
    appliance: ScriptedAppliance,
}

#[async_trait]
impl ShellSession for ScriptedSession {
    async fn open_shell(&self, _pty: &PtyRequest) -> Result<ShellStreams, RemoteShellError> {
        {
            let mut state = self.appliance.state();
            if state.drop_shells > 0 {
                state.drop_shells -= 1;
                return Err(RemoteShellError::OpenShell {
                    message: "session closed by peer".to_string(),
                });
            }
        }
        let (local_in, remote_in) = duplex(64 * 1024);
        let (local_out, remote_out) = duplex(64 * 1024);
        let (local_err, remote_err) = duplex(64 * 1024);
        tokio::spawn(serve_command(self.appliance.clone(), remote_in, remote_out, remote_err));
        Ok(ShellStreams {
            stdin: Box::new(local_in),
            stdout: Box::new(local_out),
            stderr: Box::new(local_err),
        })
    }
}

async fn serve_command(
    appliance: ScriptedAppliance,
    mut stdin: DuplexStream,
    mut stdout: DuplexStream,
    stderr: DuplexStream,
) {
    if stdout.write_all(BANNER.as_bytes()).await.is_err() {
        return;
    }
    let Some(command) = read_line(&mut stdin).await else {
        return;
    };
    let reply = appliance.answer(command.trim_end_matches('\r'));
    let _ = stdout.write_all(format!("{reply}{PROMPT}").as_bytes()).await;
    // Give the driver a moment to see the reply before the streams close.
    tokio::time::sleep(Duration::from_millis(10)).await;
    drop(stderr);
    drop(stdout);
}

async fn read_line(stdin: &mut DuplexStream) -> Option<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stdin.read(&mut byte).await {
            Ok(1) if byte[0] == b'\n' => break,
            Ok(1) => line.push(byte[0]),
            _ if line.is_empty() => return None,
            _ => break,
        }
    }
    Some(String::from_utf8_lossy(&line).into_owned())
}

/// Poll `id` until the job is done, or panic after `limit`.
pub async fn wait_for_done(
    service: &opsdesk_core::AutomationService,
    id: &opsdesk_core::JobId,
    owner: &opsdesk_core::JobOwner,
    limit: Duration,
) -> opsdesk_core::JobView {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        match service.poll(id, owner) {
            Some(view) if view.done => return view,
            Some(_) => {}
            None => panic!("job {id} disappeared"),
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job {id} did not finish within {limit:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
