use std::io;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;
use tracing::warn;

const READ_CHUNK_SIZE: usize = 4096;
pub(crate) const OUTPUT_QUEUE_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug)]
pub(crate) enum StreamEvent {
    Chunk(Vec<u8>),
    Closed {
        stream: StreamKind,
        error: Option<io::Error>,
    },
}

/// Copy `reader` into `tx` until the stream closes, errors, or nobody is
/// listening any more.
pub(crate) fn spawn_drain<R>(
    stream: StreamKind,
    mut reader: R,
    tx: mpsc::Sender<StreamEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    let _ = tx.send(StreamEvent::Closed { stream, error: None }).await;
                    break;
                }
                Ok(n) => {
                    if tx.send(StreamEvent::Chunk(buf[..n].to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx
                        .send(StreamEvent::Closed {
                            stream,
                            error: Some(err),
                        })
                        .await;
                    break;
                }
            }
        }
        trace!(?stream, "remote stream drain finished");
    })
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct QuietWindow {
    pub quiet: Duration,
    pub cap: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct Collected {
    pub bytes: Vec<u8>,
    pub error: Option<io::Error>,
    pub pages_advanced: usize,
    pub streams_closed: bool,
}

/// Reads queued output until nothing arrives for `window.quiet`, the overall
/// `window.cap` elapses, or every stream has closed.
pub(crate) struct QuietCollector<'a> {
    rx: &'a mut mpsc::Receiver<StreamEvent>,
    open_streams: usize,
}

impl<'a> QuietCollector<'a> {
    pub(crate) fn new(rx: &'a mut mpsc::Receiver<StreamEvent>, open_streams: usize) -> Self {
        Self { rx, open_streams }
    }

    /// When `pager` is set, every chunk carrying `marker` has the marker
    /// stripped and a single space written back so the remote keeps paging.
    pub(crate) async fn collect<W>(
        &mut self,
        window: QuietWindow,
        mut pager: Option<(&mut W, &str)>,
    ) -> Collected
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut out = Collected::default();
        let deadline = Instant::now() + window.cap;

        while self.open_streams > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let wait = window.quiet.min(remaining);
            let event = match tokio::time::timeout(wait, self.rx.recv()).await {
                Err(_) => break,
                Ok(None) => {
                    self.open_streams = 0;
                    break;
                }
                Ok(Some(event)) => event,
            };

            match event {
                StreamEvent::Chunk(mut chunk) => {
                    if let Some((stdin, marker)) = pager.as_mut()
                        && !marker.is_empty()
                        && contains(&chunk, marker.as_bytes())
                    {
                        chunk = strip(&chunk, marker.as_bytes());
                        match advance_pager(&mut **stdin).await {
                            Ok(()) => out.pages_advanced += 1,
                            Err(err) => warn!(error = %err, "failed to advance remote pager"),
                        }
                    }
                    out.bytes.extend_from_slice(&chunk);
                }
                StreamEvent::Closed { stream, error } => {
                    self.open_streams = self.open_streams.saturating_sub(1);
                    if let Some(err) = error {
                        warn!(?stream, error = %err, "remote stream closed with error");
                        out.error = Some(err);
                    }
                }
            }
        }

        out.streams_closed = self.open_streams == 0;
        out
    }
}

async fn advance_pager<W>(stdin: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    stdin.write_all(b" ").await?;
    stdin.flush().await
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

fn strip(haystack: &[u8], needle: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(needle) {
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}
