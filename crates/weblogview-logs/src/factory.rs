use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use weblogview_k8s::KubeClient;
use weblogview_types::SourceSpec;

use crate::file::{FileTailer, FileTailerConfig};
use crate::pod::{PodLogTailer, PodTailerConfig};
use crate::source::{LogSource, SourceFactory};
use crate::TailError;

/// Opens file and pod sources with shared limits
pub struct DefaultSourceFactory {
    kube: Arc<KubeClient>,
    file: FileTailerConfig,
    pod: PodTailerConfig,
}

impl DefaultSourceFactory {
    pub fn new(kube: Arc<KubeClient>) -> Self {
        Self {
            kube,
            file: FileTailerConfig::default(),
            pod: PodTailerConfig::default(),
        }
    }

    pub fn with_file_config(mut self, config: FileTailerConfig) -> Self {
        self.file = config;
        self
    }

    pub fn with_pod_config(mut self, config: PodTailerConfig) -> Self {
        self.pod = config;
        self
    }
}

impl SourceFactory for DefaultSourceFactory {
    fn open(&self, spec: SourceSpec) -> BoxFuture<'static, Result<Box<dyn LogSource>, TailError>> {
        let kube = Arc::clone(&self.kube);
        let file_config = self.file.clone();
        let pod_config = self.pod.clone();

        Box::pin(async move {
            debug!(source = %spec, tail_lines = spec.tail_lines(), "Opening source");
            match spec {
                SourceSpec::File { path, tail_lines } => {
                    let tailer = FileTailer::open(path, tail_lines, file_config).await?;
                    Ok(Box::new(tailer) as Box<dyn LogSource>)
                }
                SourceSpec::Pod { target, tail_lines } => {
                    let client = kube.client().await.map_err(TailError::from_client)?;
                    let tailer = PodLogTailer::new(client, target, tail_lines, pod_config);
                    Ok(Box::new(tailer) as Box<dyn LogSource>)
                }
            }
        })
    }
}
