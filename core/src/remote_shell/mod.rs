//! Interactive session driver for line-oriented appliance shells.
//!
//! Every [`RemoteShell::run`] opens a fresh interactive shell on an already
//! authenticated session, discards the login banner, writes one command and
//! collects the response until the remote goes quiet. The remote never tells
//! us when a response is complete, so completion is inferred from silence.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;

use crate::credentials::Credentials;
use crate::decode::decode_output;

mod collector;
mod errors;
mod ssh;

use collector::OUTPUT_QUEUE_CAPACITY;
use collector::QuietCollector;
use collector::QuietWindow;
use collector::StreamKind;
use collector::spawn_drain;
pub use errors::RemoteShellError;
pub use ssh::SshConnector;
pub use ssh::SshSession;

pub const DEFAULT_PAGER_MARKER: &str = "--More--";

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The three standard streams of one interactive shell.
pub struct ShellStreams {
    pub stdin: BoxedWriter,
    pub stdout: BoxedReader,
    pub stderr: BoxedReader,
}

/// An authenticated remote session that can start interactive shells.
#[async_trait]
pub trait ShellSession: Send + Sync {
    /// Request a pseudo-terminal and start an interactive shell.
    async fn open_shell(&self, pty: &PtyRequest) -> Result<ShellStreams, RemoteShellError>;

    async fn close(&self) {}
}

/// Produces authenticated sessions; used to reconnect after a dropped session.
#[async_trait]
pub trait ShellConnector: Send + Sync {
    async fn connect(
        &self,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ShellSession>, RemoteShellError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

/// Pacing parameters of the quiet-window collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellTiming {
    pub banner_quiet_ms: u64,
    pub banner_cap_ms: u64,
    pub response_quiet_ms: u64,
    pub response_cap_ms: u64,
    pub pager_marker: String,
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

impl Default for ShellTiming {
    fn default() -> Self {
        Self {
            banner_quiet_ms: 200,
            banner_cap_ms: 1_500,
            response_quiet_ms: 1_200,
            response_cap_ms: 20_000,
            pager_marker: DEFAULT_PAGER_MARKER.to_string(),
            term: "vt100".to_string(),
            cols: 120,
            rows: 40,
        }
    }
}

impl ShellTiming {
    fn banner_window(&self) -> QuietWindow {
        QuietWindow {
            quiet: Duration::from_millis(self.banner_quiet_ms),
            cap: Duration::from_millis(self.banner_cap_ms),
        }
    }

    fn response_window(&self) -> QuietWindow {
        QuietWindow {
            quiet: Duration::from_millis(self.response_quiet_ms),
            cap: Duration::from_millis(self.response_cap_ms),
        }
    }

    fn pty(&self) -> PtyRequest {
        PtyRequest {
            term: self.term.clone(),
            cols: self.cols,
            rows: self.rows,
        }
    }
}

/// Runs commands on one authenticated session. Performs no retries.
#[derive(Clone)]
pub struct RemoteShell {
    session: Arc<dyn ShellSession>,
    timing: ShellTiming,
}

impl RemoteShell {
    pub fn new(session: Arc<dyn ShellSession>, timing: ShellTiming) -> Self {
        Self { session, timing }
    }

    pub async fn close(&self) {
        self.session.close().await;
    }

    /// Execute `command` and return its decoded output.
    ///
    /// A transport failure is only surfaced when nothing was captured; partial
    /// output wins otherwise, and callers judge success from the text.
    pub async fn run(&self, command: &str) -> Result<String, RemoteShellError> {
        let ShellStreams {
            mut stdin,
            stdout,
            stderr,
        } = self.session.open_shell(&self.timing.pty()).await?;

        let (tx, mut rx) = mpsc::channel(OUTPUT_QUEUE_CAPACITY);
        let readers = [
            spawn_drain(StreamKind::Stdout, stdout, tx.clone()),
            spawn_drain(StreamKind::Stderr, stderr, tx),
        ];
        let mut collector = QuietCollector::new(&mut rx, readers.len());

        let banner = collector
            .collect::<dyn AsyncWrite + Send + Unpin>(self.timing.banner_window(), None)
            .await;
        debug!(bytes = banner.bytes.len(), "discarded remote banner");

        let result = if let Err(err) = write_command(&mut stdin, command).await {
            Err(RemoteShellError::write_to_stdin(err))
        } else {
            let marker = self.timing.pager_marker.as_str();
            let collected = collector
                .collect(self.timing.response_window(), Some((&mut *stdin, marker)))
                .await;
            if collected.pages_advanced > 0 {
                debug!(pages = collected.pages_advanced, "advanced remote pager");
            }
            // A stream that died while the banner was drained still counts.
            match collected.error.or(banner.error) {
                Some(err) if collected.bytes.is_empty() => Err(RemoteShellError::read_output(err)),
                Some(err) => {
                    warn!(error = %err, bytes = collected.bytes.len(), "returning partial remote output");
                    Ok(decode_output(&collected.bytes))
                }
                None => Ok(decode_output(&collected.bytes)),
            }
        };

        let _ = stdin.shutdown().await;
        drop(stdin);
        drop(rx);
        for reader in readers {
            reader.abort();
        }
        result
    }
}

async fn write_command<W>(stdin: &mut W, command: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut line = Vec::with_capacity(command.len() + 1);
    line.extend_from_slice(command.as_bytes());
    line.push(b'\n');
    stdin.write_all(&line).await?;
    stdin.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;
    use tokio::io::DuplexStream;
    use tokio::io::duplex;

    fn fast_timing() -> ShellTiming {
        ShellTiming {
            banner_quiet_ms: 50,
            banner_cap_ms: 300,
            response_quiet_ms: 150,
            response_cap_ms: 3_000,
            ..ShellTiming::default()
        }
    }

    type Script = Arc<dyn Fn(DuplexStream, DuplexStream, DuplexStream) + Send + Sync>;

    /// Hands the remote ends of fresh duplex pipes to a scripted appliance.
    struct DuplexSession {
        script: Script,
        opened: Mutex<usize>,
    }

    impl DuplexSession {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                opened: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl ShellSession for DuplexSession {
        async fn open_shell(&self, _pty: &PtyRequest) -> Result<ShellStreams, RemoteShellError> {
            if let Ok(mut opened) = self.opened.lock() {
                *opened += 1;
            }
            let (local_in, remote_in) = duplex(4096);
            let (local_out, remote_out) = duplex(4096);
            let (local_err, remote_err) = duplex(4096);
            (self.script)(remote_in, remote_out, remote_err);
            Ok(ShellStreams {
                stdin: Box::new(local_in),
                stdout: Box::new(local_out),
                stderr: Box::new(local_err),
            })
        }
    }

    async fn read_line(stdin: &mut DuplexStream) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        while let Ok(1) = stdin.read(&mut byte).await {
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
        String::from_utf8_lossy(&line).into_owned()
    }

    #[tokio::test]
    async fn pager_markers_are_stripped_and_advanced() {
        let spaces = Arc::new(Mutex::new(0usize));
        let counted = Arc::clone(&spaces);
        let session = DuplexSession::new(Arc::new(
            move |mut stdin: DuplexStream, mut stdout: DuplexStream, _stderr: DuplexStream| {
            let counted = Arc::clone(&counted);
            tokio::spawn(async move {
                let _ = stdout.write_all(b"Welcome to the appliance\r\n> ").await;
                let command = read_line(&mut stdin).await;
                assert_eq!(command, "show users");
                for page in 1..=3 {
                    let chunk = format!("page {page}\r\n--More--");
                    let _ = stdout.write_all(chunk.as_bytes()).await;
                    let mut key = [0u8; 1];
                    if stdin.read_exact(&mut key).await.is_err() {
                        return;
                    }
                    if key[0] == b' '
                        && let Ok(mut n) = counted.lock()
                    {
                        *n += 1;
                    }
                }
                let _ = stdout.write_all(b"page 4\r\n> ").await;
                // Keep the streams open; completion must come from silence.
                tokio::time::sleep(Duration::from_secs(10)).await;
            });
        }));
        let shell = RemoteShell::new(session, fast_timing());

        let output = match shell.run("show users").await {
            Ok(output) => output,
            Err(err) => panic!("run failed: {err}"),
        };

        assert_eq!(spaces.lock().map(|n| *n).unwrap_or_default(), 3);
        assert!(!output.contains("--More--"));
        assert!(!output.contains("Welcome"));
        for page in 1..=4 {
            assert!(output.contains(&format!("page {page}")), "missing page {page}: {output}");
        }
    }

    #[tokio::test]
    async fn stderr_output_is_captured_too() {
        let session = DuplexSession::new(Arc::new(
            |mut stdin: DuplexStream, stdout: DuplexStream, mut stderr: DuplexStream| {
            tokio::spawn(async move {
                let _ = read_line(&mut stdin).await;
                let _ = stderr.write_all(b"% error -24501\r\n").await;
                tokio::time::sleep(Duration::from_secs(10)).await;
                drop(stdout);
            });
        }));
        let shell = RemoteShell::new(session, fast_timing());

        let output = shell.run("delete bob").await.unwrap_or_default();

        assert!(output.contains("-24501"), "{output}");
    }

    /// Reader that fails on first use, as a dropped transport would.
    struct BrokenReader;

    impl AsyncRead for BrokenReader {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )))
        }
    }

    struct BrokenSession;

    #[async_trait]
    impl ShellSession for BrokenSession {
        async fn open_shell(&self, _pty: &PtyRequest) -> Result<ShellStreams, RemoteShellError> {
            Ok(ShellStreams {
                stdin: Box::new(tokio::io::sink()),
                stdout: Box::new(BrokenReader),
                stderr: Box::new(tokio::io::empty()),
            })
        }
    }

    #[tokio::test]
    async fn transport_error_without_output_is_surfaced() {
        let shell = RemoteShell::new(Arc::new(BrokenSession), fast_timing());

        let result = tokio::time::timeout(Duration::from_secs(5), shell.run("show users"))
            .await
            .unwrap_or_else(|_| panic!("run hung"));

        match result {
            Err(RemoteShellError::ReadOutput { .. }) => {}
            other => panic!("expected read error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_streams_end_collection_early() {
        let session = DuplexSession::new(Arc::new(
            |mut stdin: DuplexStream, mut stdout: DuplexStream, stderr: DuplexStream| {
                tokio::spawn(async move {
                    let _ = read_line(&mut stdin).await;
                    let _ = stdout.write_all(b"name alice invalid no").await;
                    drop(stdout);
                    drop(stderr);
                });
            },
        ));
        let timing = ShellTiming {
            response_quiet_ms: 5_000,
            ..fast_timing()
        };
        let shell = RemoteShell::new(session, timing);

        let started = tokio::time::Instant::now();
        let output = match shell.run("search alice").await {
            Ok(output) => output,
            Err(err) => panic!("unexpected error: {err}"),
        };
        assert_eq!(output, "name alice invalid no");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    /// Delivers whatever the script writes, then fails like a reset transport.
    struct FlakySession;

    #[async_trait]
    impl ShellSession for FlakySession {
        async fn open_shell(&self, _pty: &PtyRequest) -> Result<ShellStreams, RemoteShellError> {
            let (local_in, mut remote_in) = duplex(4096);
            let (local_out, mut remote_out) = duplex(4096);
            tokio::spawn(async move {
                let _ = read_line(&mut remote_in).await;
                let _ = remote_out.write_all(b"user bob deleted").await;
            });
            Ok(ShellStreams {
                stdin: Box::new(local_in),
                stdout: Box::new(local_out.chain(BrokenReader)),
                stderr: Box::new(tokio::io::empty()),
            })
        }
    }

    #[tokio::test]
    async fn partial_output_wins_over_late_transport_error() {
        let shell = RemoteShell::new(Arc::new(FlakySession), fast_timing());

        let output = match shell.run("delete bob").await {
            Ok(output) => output,
            Err(err) => panic!("unexpected error: {err}"),
        };
        assert_eq!(output, "user bob deleted");
    }

    #[tokio::test]
    async fn every_run_opens_a_fresh_shell() {
        let session = DuplexSession::new(Arc::new(
            |mut stdin: DuplexStream, mut stdout: DuplexStream, _stderr: DuplexStream| {
            tokio::spawn(async move {
                let command = read_line(&mut stdin).await;
                let _ = stdout.write_all(format!("ok {command}").as_bytes()).await;
            });
        }));
        let shell = RemoteShell::new(Arc::clone(&session) as Arc<dyn ShellSession>, fast_timing());

        let first = shell.run("one").await.unwrap_or_default();
        let second = shell.run("two").await.unwrap_or_default();

        assert_eq!(first, "ok one");
        assert_eq!(second, "ok two");
        assert_eq!(session.opened.lock().map(|n| *n).unwrap_or_default(), 2);
    }
}
