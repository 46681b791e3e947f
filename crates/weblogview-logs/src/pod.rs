//! Kubernetes pod log streaming

use std::io;
use std::pin::pin;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{AsyncBufReadExt, Stream, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::LogParams;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use weblogview_types::PodTarget;

use crate::source::{Emitter, LogSource, Stopper};
use crate::TailError;

const STREAM_ENDED: &str = "log stream ended - pod may have terminated or authentication expired";

/// Upper bound on up-front allocation for the snapshot batch
const MAX_PREALLOCATED: usize = 4096;

#[derive(Clone, Debug)]
pub struct PodTailerConfig {
    /// How long to wait for `tail_lines` lines before flushing what arrived
    pub snapshot_timeout: Duration,
}

impl Default for PodTailerConfig {
    fn default() -> Self {
        Self {
            snapshot_timeout: Duration::from_secs(1),
        }
    }
}

/// Follows the log of one pod container
///
/// The API server replays up to `tail_lines` historical lines before the
/// stream turns live, but never says where the replay ends. Lines are
/// collected until the count is reached or the snapshot timeout passes,
/// whichever comes first.
pub struct PodLogTailer {
    client: kube::Client,
    target: PodTarget,
    tail_lines: usize,
    config: PodTailerConfig,
    stopper: Stopper,
}

impl PodLogTailer {
    pub fn new(
        client: kube::Client,
        target: PodTarget,
        tail_lines: usize,
        config: PodTailerConfig,
    ) -> Self {
        Self {
            client,
            target,
            tail_lines,
            config,
            stopper: Stopper::new(),
        }
    }

    pub fn target(&self) -> &PodTarget {
        &self.target
    }

    async fn follow(self, emitter: Emitter) -> Result<(), TailError> {
        let cancel = self.stopper.token().clone();
        if cancel.is_cancelled() {
            return Err(TailError::Cancelled);
        }

        let params = LogParams {
            follow: true,
            container: self.target.container.clone(),
            tail_lines: Some(i64::try_from(self.tail_lines).unwrap_or(i64::MAX)),
            ..Default::default()
        };
        let api: Api<Pod> = Api::namespaced(self.client, &self.target.namespace);

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TailError::Cancelled),
            result = api.log_stream(&self.target.pod, &params) => {
                result.map_err(|e| TailError::from_kube(e, &self.target))?
            }
        };

        info!(pod = %self.target, tail_lines = self.tail_lines, "Streaming pod logs");

        let result = pump_lines(
            stream.lines(),
            self.tail_lines,
            self.config.snapshot_timeout,
            &cancel,
            emitter,
        )
        .await;

        match &result {
            Err(TailError::Cancelled) => debug!(pod = %self.target, "Pod log stream stopped"),
            Err(e) => info!(pod = %self.target, error = %e, "Pod log stream ended"),
            Ok(()) => {}
        }
        result
    }
}

impl LogSource for PodLogTailer {
    fn describe(&self) -> String {
        format!("pod {}", self.target)
    }

    fn stopper(&self) -> Stopper {
        self.stopper.clone()
    }

    fn run(self: Box<Self>, emitter: Emitter) -> BoxFuture<'static, Result<(), TailError>> {
        Box::pin((*self).follow(emitter))
    }
}

/// Split a line stream into one snapshot batch and single-line live batches
///
/// Only returns with an error: the stream ending is [`TailError::SourceEnded`].
/// Whatever was collected before the stream ends or fails is still flushed
/// as the snapshot.
async fn pump_lines<S>(
    lines: S,
    tail_lines: usize,
    snapshot_timeout: Duration,
    cancel: &CancellationToken,
    emitter: Emitter,
) -> Result<(), TailError>
where
    S: Stream<Item = io::Result<String>>,
{
    let mut lines = pin!(lines);
    let mut deadline = pin!(tokio::time::sleep(snapshot_timeout));
    let mut collected = Vec::with_capacity(tail_lines.min(MAX_PREALLOCATED));

    let mut live = loop {
        if collected.len() >= tail_lines {
            break emitter.snapshot(collected);
        }

        tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(TailError::Cancelled),

            _ = &mut deadline => {
                debug!(lines = collected.len(), "Snapshot timeout, switching to live");
                break emitter.snapshot(collected);
            }

            next = lines.try_next() => match next {
                Ok(Some(line)) => collected.push(line),
                Ok(None) => {
                    emitter.snapshot(collected);
                    return Err(TailError::SourceEnded(STREAM_ENDED.to_string()));
                }
                Err(e) => {
                    emitter.snapshot(collected);
                    return Err(TailError::from_stream_io(e));
                }
            }
        }
    };

    let ended = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break TailError::Cancelled,

            next = lines.try_next() => match next {
                Ok(Some(line)) => live.line(line),
                Ok(None) => break TailError::SourceEnded(STREAM_ENDED.to_string()),
                Err(e) => break TailError::from_stream_io(e),
            }
        }
    };

    debug!(lines = live.lines_emitted(), "Live pod stream finished");
    Err(ended)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc::{UnboundedSender, unbounded};
    use tokio::sync::mpsc::UnboundedReceiver;
    use weblogview_types::{LineBatch, Phase};

    type LineTx = UnboundedSender<io::Result<String>>;

    fn channel_emitter() -> (Emitter, UnboundedReceiver<LineBatch>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let emitter = Emitter::new(move |batch| {
            let _ = tx.send(batch);
        });
        (emitter, rx)
    }

    fn send(tx: &LineTx, line: &str) {
        tx.unbounded_send(Ok(line.to_string())).unwrap();
    }

    fn spawn_pump(
        tail_lines: usize,
    ) -> (
        LineTx,
        CancellationToken,
        UnboundedReceiver<LineBatch>,
        tokio::task::JoinHandle<Result<(), TailError>>,
    ) {
        let (line_tx, line_rx) = unbounded();
        let cancel = CancellationToken::new();
        let (emitter, batch_rx) = channel_emitter();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            pump_lines(line_rx, tail_lines, Duration::from_secs(1), &token, emitter).await
        });
        (line_tx, cancel, batch_rx, task)
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_history_flushes_after_timeout() {
        let (tx, cancel, mut rx, task) = spawn_pump(5);
        send(&tx, "one");
        send(&tx, "two");

        let started = tokio::time::Instant::now();
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot, LineBatch::snapshot(vec!["one".into(), "two".into()]));
        assert!(started.elapsed() >= Duration::from_secs(1));

        send(&tx, "three");
        send(&tx, "four");
        assert_eq!(rx.recv().await.unwrap(), LineBatch::live(vec!["three".into()]));
        assert_eq!(rx.recv().await.unwrap(), LineBatch::live(vec!["four".into()]));

        cancel.cancel();
        assert!(matches!(task.await.unwrap(), Err(TailError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_history_flushes_without_waiting() {
        let (tx, cancel, mut rx, task) = spawn_pump(3);
        for line in ["a", "b", "c", "d"] {
            send(&tx, line);
        }

        let started = tokio::time::Instant::now();
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.phase, Phase::Snapshot);
        assert_eq!(snapshot.lines, vec!["a", "b", "c"]);
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(rx.recv().await.unwrap(), LineBatch::live(vec!["d".into()]));

        cancel.cancel();
        let _ = task.await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_pod_gets_empty_snapshot() {
        let (_tx, cancel, mut rx, task) = spawn_pump(100);

        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot, LineBatch::snapshot(Vec::new()));

        cancel.cancel();
        assert!(matches!(task.await.unwrap(), Err(TailError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_unblocks_pending_read() {
        let (_tx, cancel, mut rx, task) = spawn_pump(100);
        cancel.cancel();

        assert!(matches!(task.await.unwrap(), Err(TailError::Cancelled)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_end_flushes_partial_snapshot() {
        let (tx, _cancel, mut rx, task) = spawn_pump(10);
        send(&tx, "only");
        drop(tx);

        let result = task.await.unwrap();
        assert!(matches!(result, Err(TailError::SourceEnded(_))));
        assert_eq!(rx.recv().await.unwrap(), LineBatch::snapshot(vec!["only".into()]));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_mid_stream() {
        let (tx, _cancel, mut rx, task) = spawn_pump(1);
        send(&tx, "history");
        send(&tx, "live");
        tx.unbounded_send(Err(io::Error::other("error from server: Unauthorized")))
            .unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(TailError::AuthExpired(_))));
        assert_eq!(rx.recv().await.unwrap().phase, Phase::Snapshot);
        assert_eq!(rx.recv().await.unwrap(), LineBatch::live(vec!["live".into()]));
    }
}
