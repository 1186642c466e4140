use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::ChannelMsg;
use russh::Disconnect;
use russh::client;
use russh::keys::ssh_key::PublicKey;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::DuplexStream;
use tokio::io::duplex;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::PtyRequest;
use super::RemoteShellError;
use super::ShellConnector;
use super::ShellSession;
use super::ShellStreams;
use crate::credentials::Credentials;

const PIPE_CAPACITY: usize = 64 * 1024;
const STDIN_CHUNK_SIZE: usize = 4096;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Appliances are addressed by configured host; their keys are not pinned.
struct AcceptAnyHostKey;

impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Opens password-authenticated SSH sessions against one host.
#[derive(Debug, Clone)]
pub struct SshConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl SshConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn handshake(
        &self,
        credentials: &Credentials,
    ) -> Result<client::Handle<AcceptAnyHostKey>, RemoteShellError> {
        let config = Arc::new(client::Config {
            inactivity_timeout: None,
            ..client::Config::default()
        });
        let mut handle = client::connect(config, (self.host.as_str(), self.port), AcceptAnyHostKey)
            .await
            .map_err(|err| RemoteShellError::Connect {
                addr: self.addr(),
                message: err.to_string(),
            })?;

        let auth = handle
            .authenticate_password(credentials.account(), credentials.secret())
            .await
            .map_err(|err| RemoteShellError::Connect {
                addr: self.addr(),
                message: err.to_string(),
            })?;
        if !auth.success() {
            return Err(RemoteShellError::AuthRejected {
                account: credentials.account().to_string(),
            });
        }
        Ok(handle)
    }
}

#[async_trait]
impl ShellConnector for SshConnector {
    async fn connect(
        &self,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ShellSession>, RemoteShellError> {
        let handle = tokio::time::timeout(self.connect_timeout, self.handshake(credentials))
            .await
            .map_err(|_| RemoteShellError::ConnectTimeout { addr: self.addr() })??;
        info!(addr = %self.addr(), account = credentials.account(), "ssh session established");
        Ok(Arc::new(SshSession {
            handle: Mutex::new(handle),
        }))
    }
}

/// One authenticated SSH connection. Each shell gets its own channel.
pub struct SshSession {
    handle: Mutex<client::Handle<AcceptAnyHostKey>>,
}

#[async_trait]
impl ShellSession for SshSession {
    async fn open_shell(&self, pty: &PtyRequest) -> Result<ShellStreams, RemoteShellError> {
        let channel = {
            let handle = self.handle.lock().await;
            handle
                .channel_open_session()
                .await
                .map_err(RemoteShellError::open_shell)?
        };
        channel
            .request_pty(false, &pty.term, pty.cols, pty.rows, 0, 0, &[])
            .await
            .map_err(RemoteShellError::open_shell)?;
        channel
            .request_shell(false)
            .await
            .map_err(RemoteShellError::open_shell)?;

        let (local_stdin, remote_stdin) = duplex(PIPE_CAPACITY);
        let (local_stdout, remote_stdout) = duplex(PIPE_CAPACITY);
        let (local_stderr, remote_stderr) = duplex(PIPE_CAPACITY);
        tokio::spawn(pump_channel(channel, remote_stdin, remote_stdout, remote_stderr));

        Ok(ShellStreams {
            stdin: Box::new(local_stdin),
            stdout: Box::new(local_stdout),
            stderr: Box::new(local_stderr),
        })
    }

    async fn close(&self) {
        let handle = self.handle.lock().await;
        if let Err(err) = handle
            .disconnect(Disconnect::ByApplication, "session closed", "en")
            .await
        {
            debug!(error = %err, "ssh disconnect failed");
        }
    }
}

/// Moves bytes between one SSH channel and the local pipe ends until either
/// side goes away. Dropping the pipe ends is what signals EOF to the readers.
async fn pump_channel(
    mut channel: russh::Channel<client::Msg>,
    mut stdin: DuplexStream,
    mut stdout: DuplexStream,
    mut stderr: DuplexStream,
) {
    let mut buf = vec![0u8; STDIN_CHUNK_SIZE];
    let mut stdin_open = true;
    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if stdout.write_all(&data).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    if stderr.write_all(&data).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
            read = stdin.read(&mut buf), if stdin_open => match read {
                Ok(0) | Err(_) => {
                    stdin_open = false;
                    let _ = channel.eof().await;
                }
                Ok(n) => {
                    if let Err(err) = channel.data(&buf[..n]).await {
                        warn!(error = %err, "failed to forward stdin to ssh channel");
                        break;
                    }
                }
            },
        }
    }
    let _ = channel.close().await;
    debug!("ssh channel pump finished");
}
