//! Camera abstraction.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CameraFacing, DecodeEvent};
use crate::error::{Error, Result};

/// A device that decodes QR payloads.
///
/// Implementations push every decoded payload, duplicates included, into the
/// sender passed to `start`. Changing the facing requires `stop` then `start`.
pub trait ScanSource: Send + fmt::Debug {
    /// The name of this source (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Start decoding with the given camera.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is already running or the device cannot
    /// be opened.
    fn start(&mut self, facing: CameraFacing, sender: mpsc::Sender<DecodeEvent>) -> Result<()>;

    /// Release the device. Stopping a stopped source is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the device fails to stop cleanly.
    fn stop(&mut self) -> Result<()>;

    /// Whether the source is currently decoding.
    fn is_running(&self) -> bool;
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type ReaderFactory = Box<dyn FnMut() -> BoxedReader + Send>;

struct Reader {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    // Owned per reader so a stopped task can only clear its own flag.
    running: Arc<AtomicBool>,
}

/// Reads one decoded payload per line from an async reader.
///
/// Stands in for an optical decoder: a handheld scanner in keyboard mode or a
/// piped decoder both produce lines. Blank lines are skipped and trailing
/// whitespace is trimmed. The reader factory is called on every `start`, so a
/// camera switch reopens the stream.
pub struct LineSource {
    open: ReaderFactory,
    reader: Option<Reader>,
    facing: Option<CameraFacing>,
}

impl fmt::Debug for LineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineSource")
            .field("running", &self.is_running())
            .field("facing", &self.facing)
            .finish_non_exhaustive()
    }
}

impl LineSource {
    /// Read lines from whatever `open` returns.
    pub fn new<R, F>(mut open: F) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        F: FnMut() -> R + Send + 'static,
    {
        Self {
            open: Box::new(move || Box::new(open()) as BoxedReader),
            reader: None,
            facing: None,
        }
    }

    /// Read lines from standard input.
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin)
    }

    /// The facing passed to the last `start`.
    #[must_use]
    pub fn facing(&self) -> Option<CameraFacing> {
        self.facing
    }
}

impl ScanSource for LineSource {
    fn name(&self) -> &'static str {
        "lines"
    }

    fn start(&mut self, facing: CameraFacing, sender: mpsc::Sender<DecodeEvent>) -> Result<()> {
        if self.is_running() {
            return Err(Error::capture_source_start(self.name(), "already running"));
        }
        // A reader that hit end of input leaves its handle behind.
        self.reader = None;

        let lines = BufReader::new((self.open)()).lines();
        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(read_lines(
            lines,
            sender,
            cancel.clone(),
            Arc::clone(&running),
        ));
        self.reader = Some(Reader {
            cancel,
            task,
            running,
        });
        self.facing = Some(facing);

        info!(source = self.name(), %facing, "Scan source started");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };
        reader.cancel.cancel();
        reader.task.abort();
        reader.running.store(false, Ordering::SeqCst);
        info!(source = self.name(), "Scan source stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.reader
            .as_ref()
            .is_some_and(|reader| reader.running.load(Ordering::SeqCst))
    }
}

impl Drop for LineSource {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.cancel.cancel();
            reader.task.abort();
        }
    }
}

async fn read_lines(
    mut lines: tokio::io::Lines<BufReader<BoxedReader>>,
    sender: mpsc::Sender<DecodeEvent>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let payload = line.trim();
                    if payload.is_empty() {
                        continue;
                    }
                    if sender.send(DecodeEvent::new(payload)).await.is_err() {
                        debug!("Decode receiver dropped");
                        break;
                    }
                }
                Ok(None) => {
                    debug!("End of scan input");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read scan input");
                    break;
                }
            },
        }
    }
    running.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::io::DuplexStream;

    use super::*;

    fn source_from(text: &'static str) -> LineSource {
        LineSource::new(move || Cursor::new(text.as_bytes()))
    }

    #[tokio::test]
    async fn test_emits_trimmed_non_blank_lines() {
        let mut source = source_from("s1\n\n  s2  \r\ns1\n");
        let (tx, mut rx) = mpsc::channel(8);

        source.start(CameraFacing::Back, tx).unwrap();

        let mut payloads = Vec::new();
        while let Some(event) = rx.recv().await {
            payloads.push(event.payload);
        }
        assert_eq!(payloads, vec!["s1", "s2", "s1"]);
        assert!(!source.is_running());
        assert_eq!(source.facing(), Some(CameraFacing::Back));
    }

    #[tokio::test]
    async fn test_stop_when_never_started_is_noop() {
        let mut source = source_from("");
        assert!(!source.is_running());
        assert!(source.stop().is_ok());
        assert!(source.stop().is_ok());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let (_client, server) = tokio::io::duplex(64);
        let mut server = Some(server);
        let mut source = LineSource::new(move || {
            server
                .take()
                .unwrap_or_else(|| tokio::io::duplex(64).1)
        });

        let (tx, _rx) = mpsc::channel(8);
        source.start(CameraFacing::Front, tx.clone()).unwrap();
        assert!(source.is_running());

        let err = source.start(CameraFacing::Front, tx).unwrap_err();
        assert!(matches!(err, Error::CaptureSourceStart { .. }));

        source.stop().unwrap();
        assert!(!source.is_running());
    }

    #[tokio::test]
    async fn test_restart_reopens_reader() {
        let mut source = source_from("s1\n");

        for facing in [CameraFacing::Back, CameraFacing::Front] {
            let (tx, mut rx) = mpsc::channel(8);
            source.start(facing, tx).unwrap();
            assert_eq!(rx.recv().await.unwrap().payload, "s1");
            assert!(rx.recv().await.is_none());
            source.stop().unwrap();
        }
        assert_eq!(source.facing(), Some(CameraFacing::Front));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stopped_reader_does_not_clear_restarted_one() {
        let clients: Arc<Mutex<Vec<DuplexStream>>> = Arc::default();
        let held = Arc::clone(&clients);
        let mut source = LineSource::new(move || {
            let (client, server) = tokio::io::duplex(64);
            held.lock().expect("failed to lock clients").push(client);
            server
        });

        for _ in 0..50 {
            let (tx, _rx) = mpsc::channel(8);
            source.start(CameraFacing::Back, tx).unwrap();
            tokio::task::yield_now().await;
            source.stop().unwrap();

            let (tx, _rx) = mpsc::channel(8);
            source.start(CameraFacing::Front, tx).unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
            assert!(source.is_running());
            source.stop().unwrap();
            assert!(!source.is_running());
        }
        assert_eq!(clients.lock().expect("failed to lock clients").len(), 100);
    }
}
