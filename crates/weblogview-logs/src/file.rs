//! Local file tailing
//!
//! A file is scanned once for its snapshot, then followed from the offset
//! the scan stopped at. Filesystem notifications drive reads; a polling
//! timer covers filesystems (network mounts, some containers) where
//! notifications never arrive.

use std::fs::Metadata;
use std::io::{self, BufRead, BufReader, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::BoxFuture;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::SnapshotRing;
use crate::source::{Emitter, LiveEmitter, LogSource, Stopper};
use crate::TailError;

/// Pending notifications beyond this are coalesced; one read catches up
/// with everything written so far.
const NOTIFY_CHANNEL_CAPACITY: usize = 16;

/// Limits and timings for file tailing
#[derive(Clone, Debug)]
pub struct FileTailerConfig {
    /// Files larger than this are refused at open
    pub max_file_size: u64,
    /// Longest accepted line in bytes, excluding the newline
    pub max_line_length: usize,
    /// How long without a notification before the file is polled
    pub poll_interval: Duration,
    /// Read buffer size for both the snapshot scan and live reads
    pub read_buffer_size: usize,
    /// A live batch is flushed once it holds this many lines
    pub batch_lines: usize,
}

impl Default for FileTailerConfig {
    fn default() -> Self {
        Self {
            max_file_size: 1 << 30,
            max_line_length: 10 * 1024 * 1024,
            poll_interval: Duration::from_millis(500),
            read_buffer_size: 64 * 1024,
            batch_lines: 5000,
        }
    }
}

/// Device and inode the tail was opened on, so a replacement file at the
/// same path is recognised
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FileIdentity {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(_meta: &Metadata) -> Self {
        Self {}
    }

    fn matches(&self, meta: &Metadata) -> bool {
        *self == Self::of(meta)
    }
}

/// Splits a byte stream into lines, holding back an unterminated tail
#[derive(Debug)]
struct LineSplitter {
    partial: Vec<u8>,
    max_line_length: usize,
}

impl LineSplitter {
    fn new(max_line_length: usize) -> Self {
        Self {
            partial: Vec::new(),
            max_line_length,
        }
    }

    fn feed(&mut self, mut bytes: &[u8], mut on_line: impl FnMut(String)) -> Result<(), TailError> {
        while let Some(pos) = bytes.iter().position(|&b| b == b'\n') {
            self.append(&bytes[..pos])?;
            on_line(self.take_line());
            bytes = &bytes[pos + 1..];
        }
        self.append(bytes)
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), TailError> {
        if self.partial.len() + bytes.len() > self.max_line_length {
            return Err(TailError::LineTooLong {
                limit: self.max_line_length,
            });
        }
        self.partial.extend_from_slice(bytes);
        Ok(())
    }

    fn take_line(&mut self) -> String {
        let mut raw = std::mem::take(&mut self.partial);
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        match String::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }

    fn pending(&self) -> usize {
        self.partial.len()
    }

    fn reset(&mut self) {
        self.partial.clear();
    }
}

/// Read position and bookkeeping, touched only by the tailer's own task
#[derive(Debug)]
struct TailState {
    offset: u64,
    last_event: Instant,
}

/// Tails a single local file
pub struct FileTailer {
    path: PathBuf,
    config: FileTailerConfig,
    file: tokio::fs::File,
    identity: FileIdentity,
    snapshot: Vec<String>,
    splitter: LineSplitter,
    state: TailState,
    stopper: Stopper,
}

impl FileTailer {
    /// Open `path` and capture its last `snapshot_lines` complete lines
    ///
    /// The scan runs on the blocking pool.
    pub async fn open(
        path: impl Into<PathBuf>,
        snapshot_lines: usize,
        config: FileTailerConfig,
    ) -> Result<Self, TailError> {
        let path = path.into();
        tokio::task::spawn_blocking(move || Self::open_blocking(path, snapshot_lines, config))
            .await
            .map_err(|e| TailError::InternalIo(format!("snapshot scan failed: {}", e)))?
    }

    fn open_blocking(
        path: PathBuf,
        snapshot_lines: usize,
        config: FileTailerConfig,
    ) -> Result<Self, TailError> {
        let file = std::fs::File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => TailError::NotFound(format!("file {}", path.display())),
            _ => TailError::InternalIo(format!("failed to open {}: {}", path.display(), e)),
        })?;

        let meta = file.metadata()?;
        if !meta.is_file() {
            return Err(TailError::InternalIo(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let size = meta.len();
        if size > config.max_file_size {
            return Err(TailError::SizeLimitExceeded {
                size,
                limit: config.max_file_size,
            });
        }

        // Scan only the bytes present at open; anything appended meanwhile
        // is picked up by the first live read.
        let mut ring = SnapshotRing::new(snapshot_lines);
        let mut splitter = LineSplitter::new(config.max_line_length);
        let mut reader = BufReader::with_capacity(config.read_buffer_size, file);
        let mut offset = 0u64;

        while offset < size {
            let chunk = reader.fill_buf()?;
            if chunk.is_empty() {
                break;
            }
            let take = chunk.len().min(usize::try_from(size - offset).unwrap_or(usize::MAX));
            splitter.feed(&chunk[..take], |line| ring.push(line))?;
            reader.consume(take);
            offset += take as u64;
        }

        debug!(
            path = %path.display(),
            scanned = ring.seen(),
            kept = ring.len(),
            pending = splitter.pending(),
            "Snapshot scan complete"
        );

        Ok(Self {
            path,
            config,
            file: tokio::fs::File::from_std(reader.into_inner()),
            identity: FileIdentity::of(&meta),
            snapshot: ring.into_lines(),
            splitter,
            state: TailState {
                offset,
                last_event: Instant::now(),
            },
            stopper: Stopper::new(),
        })
    }

    /// Lines captured at open, oldest first
    pub fn snapshot(&self) -> &[String] {
        &self.snapshot
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset the next live read starts from
    pub fn offset(&self) -> u64 {
        self.state.offset
    }

    async fn follow(mut self, emitter: Emitter) -> Result<(), TailError> {
        let cancel = self.stopper.token().clone();
        if cancel.is_cancelled() {
            return Err(TailError::Cancelled);
        }

        let mut live = emitter.snapshot(std::mem::take(&mut self.snapshot));

        // The sender half stays alive in this frame so the channel never
        // reports closed, even when no watcher could be installed.
        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(NOTIFY_CHANNEL_CAPACITY);
        let _watcher = match watch_file(&self.path, notify_tx.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "File watch unavailable, polling only"
                );
                None
            }
        };

        info!(path = %self.path.display(), offset = self.state.offset, "Following file");

        let result = self.watch(&mut live, &cancel, &mut notify_rx).await;
        debug!(
            path = %self.path.display(),
            lines = live.lines_emitted(),
            "Stopped following file"
        );
        result
    }

    async fn watch(
        &mut self,
        live: &mut LiveEmitter,
        cancel: &CancellationToken,
        notify_rx: &mut mpsc::Receiver<()>,
    ) -> Result<(), TailError> {
        // Catch anything written between the snapshot scan and the watch
        self.sync(live).await?;

        let poll_interval = self.config.poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(TailError::Cancelled),

                Some(()) = notify_rx.recv() => {
                    while notify_rx.try_recv().is_ok() {}
                    self.state.last_event = Instant::now();
                    self.sync(live).await?;
                }

                _ = ticker.tick() => {
                    if self.state.last_event.elapsed() >= poll_interval {
                        self.sync(live).await?;
                    }
                }
            }
        }
    }

    /// Stat the path and read whatever was appended since the last read
    async fn sync(&mut self, live: &mut LiveEmitter) -> Result<(), TailError> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TailError::SourceEnded(format!(
                    "file {} was removed",
                    self.path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        if !self.identity.matches(&meta) {
            return Err(TailError::SourceEnded(format!(
                "file {} was renamed or replaced",
                self.path.display()
            )));
        }

        let size = meta.len();
        if size < self.state.offset {
            info!(
                path = %self.path.display(),
                offset = self.state.offset,
                size,
                "File truncated, reading from start"
            );
            self.state.offset = 0;
            self.splitter.reset();
        }

        if size > self.state.offset {
            self.read_to(size, live).await?;
        }
        Ok(())
    }

    async fn read_to(&mut self, end: u64, live: &mut LiveEmitter) -> Result<(), TailError> {
        self.file.seek(SeekFrom::Start(self.state.offset)).await?;

        let mut buf = vec![0u8; self.config.read_buffer_size];
        let mut lines = Vec::new();

        while self.state.offset < end {
            if self.stopper.is_stopped() {
                return Err(TailError::Cancelled);
            }

            let want = buf
                .len()
                .min(usize::try_from(end - self.state.offset).unwrap_or(usize::MAX));
            let n = self.file.read(&mut buf[..want]).await?;
            if n == 0 {
                // Shrunk underneath us; the next sync sees the truncation
                break;
            }
            self.state.offset += n as u64;

            if let Err(e) = self.splitter.feed(&buf[..n], |line| lines.push(line)) {
                live.live(lines);
                return Err(e);
            }
            if lines.len() >= self.config.batch_lines {
                live.live(std::mem::take(&mut lines));
            }
        }

        debug!(
            path = %self.path.display(),
            offset = self.state.offset,
            lines = lines.len(),
            "Read appended data"
        );
        live.live(lines);
        Ok(())
    }
}

impl LogSource for FileTailer {
    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    fn stopper(&self) -> Stopper {
        self.stopper.clone()
    }

    fn run(self: Box<Self>, emitter: Emitter) -> BoxFuture<'static, Result<(), TailError>> {
        Box::pin((*self).follow(emitter))
    }
}

/// Forward change notifications for `path` into `tx`
fn watch_file(path: &Path, tx: mpsc::Sender<()>) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        // Our own reads show up as access events
        Ok(event) if matches!(event.kind, EventKind::Access(_)) => {}
        Ok(_) => {
            let _ = tx.try_send(());
        }
        Err(e) => warn!(error = %e, "File watcher error"),
    })?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}
