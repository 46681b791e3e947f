//! Per-connection tailing state machine
//!
//! A session owns at most one active source. Opening a new source first
//! stops the previous one and waits for its task to finish, so two sources
//! never feed the same connection.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use weblogview_logs::{Emitter, LogSource, SourceFactory, TailError};
use weblogview_types::{PodTarget, SourceSpec};

use crate::outbound::OutboundSender;
use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};
use crate::settings::SettingsStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// No source
    Idle,
    /// Waiting for the factory to open a source
    Opening,
    /// A source is running
    Live,
    /// Terminal; further commands are ignored
    Closed,
}

/// Bounds for the snapshot size a client may ask for
#[derive(Clone, Copy, Debug)]
pub struct TailLimits {
    /// Used when neither the client nor the settings give a size
    pub fallback: usize,
    pub max: usize,
}

struct Activation {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Session {
    id: Uuid,
    factory: Arc<dyn SourceFactory>,
    settings: Arc<SettingsStore>,
    limits: TailLimits,
    outbound: OutboundSender,
    phase: Arc<watch::Sender<SessionPhase>>,
    active: Option<Activation>,
}

impl Session {
    pub fn new(
        id: Uuid,
        factory: Arc<dyn SourceFactory>,
        settings: Arc<SettingsStore>,
        limits: TailLimits,
        outbound: OutboundSender,
    ) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Idle);
        Self {
            id,
            factory,
            settings,
            limits,
            outbound,
            phase: Arc::new(phase),
            active: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Outbound messages dropped because the client fell behind
    pub fn outbound_dropped(&self) -> u64 {
        self.outbound.dropped()
    }

    /// Watch phase transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    /// Decode and act on one text frame from the client
    pub async fn handle_text(&mut self, text: &str) {
        match ClientMessage::decode(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => self.reject(e).await,
        }
    }

    pub async fn handle(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Open { path, tail } => {
                let spec = SourceSpec::File {
                    path: PathBuf::from(path),
                    tail_lines: self.resolve_tail(tail),
                };
                self.open(spec).await;
            }
            ClientMessage::OpenK8s {
                namespace,
                pod_name,
                container_name,
                tail,
            } => {
                let spec = SourceSpec::Pod {
                    target: PodTarget::new(namespace, pod_name).with_container(container_name),
                    tail_lines: self.resolve_tail(tail),
                };
                self.open(spec).await;
            }
            ClientMessage::Close => self.close().await,
        }
    }

    /// Report a bad client message; the active source keeps running
    pub async fn reject(&self, error: ProtocolError) {
        debug!(session = %self.id, error = ?error, "Rejected client message");
        self.outbound.deliver(ServerMessage::error(error.to_string())).await;
    }

    /// Stop any active source and start tailing `spec`
    pub async fn open(&mut self, spec: SourceSpec) {
        self.stop_active().await;
        if self.phase() == SessionPhase::Closed {
            return;
        }

        debug!(session = %self.id, source = %spec, "Opening source");
        self.phase.send_replace(SessionPhase::Opening);

        let cancel = CancellationToken::new();
        let activation = ActivationContext {
            session: self.id,
            settings: Arc::clone(&self.settings),
            outbound: self.outbound.clone(),
            phase: Arc::clone(&self.phase),
            cancel: cancel.clone(),
        };
        let opening = self.factory.open(spec.clone());
        let task = tokio::spawn(activation.run(spec, opening));

        self.active = Some(Activation { cancel, task });
    }

    /// Stop the active source; the connection stays usable
    pub async fn close(&mut self) {
        self.stop_active().await;
        if self.phase() != SessionPhase::Closed {
            self.phase.send_replace(SessionPhase::Idle);
        }
        debug!(session = %self.id, "Session idle");
    }

    /// Stop the active source and refuse further commands
    pub async fn shutdown(&mut self) {
        self.stop_active().await;
        self.phase.send_replace(SessionPhase::Closed);
        debug!(
            session = %self.id,
            dropped = self.outbound.dropped(),
            "Session closed"
        );
    }

    async fn stop_active(&mut self) {
        let Some(activation) = self.active.take() else {
            return;
        };
        activation.cancel.cancel();
        if let Err(e) = activation.task.await {
            if e.is_panic() {
                warn!(session = %self.id, "Source task panicked");
            }
        }
    }

    /// Requested size, else the settings default, capped at the maximum
    fn resolve_tail(&self, requested: Option<i64>) -> usize {
        let requested = requested
            .filter(|n| *n > 0)
            .map(|n| usize::try_from(n).unwrap_or(usize::MAX));
        let lines = requested
            .or_else(|| Some(self.settings.tail_lines_default()).filter(|n| *n > 0))
            .unwrap_or(self.limits.fallback);
        lines.min(self.limits.max)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(activation) = &self.active {
            activation.cancel.cancel();
        }
        self.phase.send_replace(SessionPhase::Closed);
    }
}

#[derive(Clone, Copy, Debug)]
enum Stage {
    Open,
    Run,
}

/// Everything a source task needs from its session
struct ActivationContext {
    session: Uuid,
    settings: Arc<SettingsStore>,
    outbound: OutboundSender,
    phase: Arc<watch::Sender<SessionPhase>>,
    cancel: CancellationToken,
}

impl ActivationContext {
    async fn run(
        self,
        spec: SourceSpec,
        opening: BoxFuture<'static, Result<Box<dyn LogSource>, TailError>>,
    ) {
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            result = opening => result,
        };

        let source = match opened {
            Ok(source) => source,
            Err(e) => return self.finish(&spec, Stage::Open, e).await,
        };

        // Live lines may be dropped under load, the snapshot may not
        let slot = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            slot = self.outbound.reserve() => slot,
        };
        let Some(slot) = slot else {
            warn!(
                session = %self.session,
                source = %spec,
                "Client not reading, source abandoned"
            );
            let error = TailError::InternalIo("client is not reading messages".to_string());
            return self.finish(&spec, Stage::Run, error).await;
        };

        self.record_recent(&spec);
        self.phase.send_replace(SessionPhase::Live);
        info!(
            session = %self.session,
            source = %source.describe(),
            tail_lines = spec.tail_lines(),
            "Source opened"
        );

        let stopper = source.stopper();
        let sink = self.outbound.clone();
        let mut slot = Some(slot);
        // The first batch is always the snapshot
        let emitter = Emitter::new(move |batch| {
            let message = ServerMessage::from(batch);
            match slot.take() {
                Some(permit) => {
                    permit.send(message);
                }
                None => {
                    sink.offer(message);
                }
            }
        });

        // Dropping the run future releases the file handle, watcher or stream
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                stopper.stop();
                Err(TailError::Cancelled)
            }
            result = source.run(emitter) => result,
        };

        match result {
            Ok(()) => {
                debug!(session = %self.session, source = %spec, "Source finished");
                if !self.cancel.is_cancelled() {
                    self.phase.send_replace(SessionPhase::Idle);
                }
            }
            Err(e) => self.finish(&spec, Stage::Run, e).await,
        }
    }

    /// Report a terminal error once and go idle
    async fn finish(&self, spec: &SourceSpec, stage: Stage, error: TailError) {
        if !error.is_reportable() || self.cancel.is_cancelled() {
            return;
        }

        info!(session = %self.session, source = %spec, error = %error, "Source ended");
        let message = ServerMessage::error(failure_message(spec, stage, &error));
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            _ = self.outbound.deliver(message) => {}
        }
        self.phase.send_replace(SessionPhase::Idle);
    }

    fn record_recent(&self, spec: &SourceSpec) {
        let result = match spec {
            SourceSpec::File { path, .. } => self.settings.add_recent_file(&path.to_string_lossy()),
            SourceSpec::Pod { target, .. } => self.settings.add_recent_namespace(&target.namespace),
        };
        if let Err(e) = result {
            warn!(session = %self.session, error = %e, "Failed to record recent item");
        }
    }
}

fn failure_message(spec: &SourceSpec, stage: Stage, error: &TailError) -> String {
    match (spec, stage) {
        (SourceSpec::File { .. }, Stage::Open) => format!("Failed to open file: {}", error),
        (SourceSpec::File { .. }, Stage::Run) => format!("Failed to watch file: {}", error),
        (SourceSpec::Pod { .. }, Stage::Open) => error.to_string(),
        (SourceSpec::Pod { .. }, Stage::Run) => format!("Kubernetes watch error: {}", error),
    }
}
