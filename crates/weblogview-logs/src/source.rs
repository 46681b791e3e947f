use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use weblogview_types::{LineBatch, SourceSpec};

use crate::TailError;

type BatchSink = Box<dyn FnMut(LineBatch) + Send>;

/// Entry point for a source's output
///
/// The only way to obtain a [`LiveEmitter`] is to hand over the snapshot,
/// so a source cannot emit a live line before its snapshot or emit two
/// snapshots.
pub struct Emitter {
    sink: BatchSink,
}

impl Emitter {
    pub fn new<F>(sink: F) -> Self
    where
        F: FnMut(LineBatch) + Send + 'static,
    {
        Self {
            sink: Box::new(sink),
        }
    }

    /// Emit the snapshot batch (possibly empty) and switch to the live phase
    pub fn snapshot(mut self, lines: Vec<String>) -> LiveEmitter {
        (self.sink)(LineBatch::snapshot(lines));
        LiveEmitter {
            sink: self.sink,
            lines_emitted: 0,
        }
    }
}

/// Emits live batches once the snapshot has gone out
pub struct LiveEmitter {
    sink: BatchSink,
    lines_emitted: u64,
}

impl LiveEmitter {
    /// Emit a batch of live lines; empty batches are skipped
    pub fn live(&mut self, lines: Vec<String>) {
        if lines.is_empty() {
            return;
        }
        self.lines_emitted += lines.len() as u64;
        (self.sink)(LineBatch::live(lines));
    }

    /// Emit a single live line as its own batch
    pub fn line(&mut self, line: String) {
        self.live(vec![line]);
    }

    pub fn lines_emitted(&self) -> u64 {
        self.lines_emitted
    }
}

/// Handle that stops a source from any task
///
/// Stopping is idempotent and may happen before the source starts running.
#[derive(Clone, Debug, Default)]
pub struct Stopper {
    cancel: CancellationToken,
}

impl Stopper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// A tailable log source
///
/// `run` emits exactly one snapshot batch followed by live batches until
/// the source ends or is stopped. A stopped source returns
/// [`TailError::Cancelled`].
pub trait LogSource: Send {
    /// Human readable identity, used in logs
    fn describe(&self) -> String;

    fn stopper(&self) -> Stopper;

    fn stop(&self) {
        self.stopper().stop();
    }

    fn run(self: Box<Self>, emitter: Emitter) -> BoxFuture<'static, Result<(), TailError>>;
}

/// Opens the source a client asked for
pub trait SourceFactory: Send + Sync {
    fn open(&self, spec: SourceSpec) -> BoxFuture<'static, Result<Box<dyn LogSource>, TailError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use weblogview_types::Phase;

    fn recording() -> (Emitter, Arc<Mutex<Vec<LineBatch>>>) {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        let emitter = Emitter::new(move |batch| sink.lock().unwrap().push(batch));
        (emitter, batches)
    }

    #[test]
    fn test_snapshot_precedes_live() {
        let (emitter, batches) = recording();
        let mut live = emitter.snapshot(vec!["a".into(), "b".into()]);
        live.line("c".into());
        live.live(vec!["d".into(), "e".into()]);

        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].phase, Phase::Snapshot);
        assert_eq!(batches[0].lines, vec!["a", "b"]);
        assert!(batches[1..].iter().all(|b| b.phase == Phase::Live));
        assert_eq!(live.lines_emitted(), 3);
    }

    #[test]
    fn test_empty_snapshot_is_emitted_empty_live_is_not() {
        let (emitter, batches) = recording();
        let mut live = emitter.snapshot(Vec::new());
        live.live(Vec::new());

        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], LineBatch::snapshot(Vec::new()));
    }

    #[test]
    fn test_stopper_is_idempotent_and_shared() {
        let stopper = Stopper::new();
        let other = stopper.clone();
        assert!(!other.is_stopped());

        stopper.stop();
        stopper.stop();
        assert!(other.is_stopped());
    }
}
