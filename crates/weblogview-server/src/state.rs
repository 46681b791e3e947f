//! Shared server state.

use std::sync::Arc;

use uuid::Uuid;
use weblogview_k8s::KubeClient;
use weblogview_logs::{DefaultSourceFactory, SourceFactory};

use crate::config::ServerConfig;
use crate::outbound::OutboundSender;
use crate::registry::ConnectionRegistry;
use crate::session::{Session, TailLimits};
use crate::settings::SettingsStore;

/// State shared by every handler and connection
pub struct AppState {
    config: ServerConfig,
    settings: Arc<SettingsStore>,
    kube: Arc<KubeClient>,
    factory: Arc<dyn SourceFactory>,
    registry: Arc<ConnectionRegistry>,
}

impl AppState {
    pub fn new(config: ServerConfig, settings: Arc<SettingsStore>) -> Self {
        let kube = Arc::new(KubeClient::new());
        let factory = DefaultSourceFactory::new(Arc::clone(&kube))
            .with_file_config(config.file.clone())
            .with_pod_config(config.pod.clone());

        Self {
            config,
            settings,
            kube,
            factory: Arc::new(factory),
            registry: Arc::new(ConnectionRegistry::new()),
        }
    }

    /// Replace the source factory
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn SourceFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn kube(&self) -> &KubeClient {
        &self.kube
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Build the session for a newly registered connection
    pub fn new_session(&self, id: Uuid, outbound: OutboundSender) -> Session {
        Session::new(
            id,
            Arc::clone(&self.factory),
            Arc::clone(&self.settings),
            TailLimits {
                fallback: self.config.default_tail_lines,
                max: self.config.max_tail_lines,
            },
            outbound,
        )
    }
}
