//! Shared types for weblogview
//!
//! This crate contains data structures used across multiple weblogview crates.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Kubernetes Resource Types
// ============================================================================

/// Kubernetes context information
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    pub name: String,
    pub cluster: String,
    pub namespace: String,
    pub is_current: bool,
}

impl ContextInfo {
    pub fn new(name: String, cluster: String, namespace: Option<String>, is_current: bool) -> Self {
        Self {
            name,
            cluster,
            // Contexts without an explicit namespace use "default"
            namespace: namespace
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| "default".to_string()),
            is_current,
        }
    }
}

/// Namespace information
#[derive(Clone, Debug)]
pub struct NamespaceInfo {
    pub name: String,
}

impl NamespaceInfo {
    pub fn new(name: String) -> Self {
        Self { name }
    }
}

/// Pod information
#[derive(Clone, Debug)]
pub struct PodInfo {
    pub name: String,
    pub containers: Vec<ContainerInfo>,
}

impl PodInfo {
    pub fn new(name: String) -> Self {
        Self {
            name,
            containers: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ContainerInfo {
    pub name: String,
}

impl ContainerInfo {
    pub fn new(name: String) -> Self {
        Self { name }
    }
}

// ============================================================================
// Log Types
// ============================================================================

/// Which side of the handoff boundary a batch belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// One-time replay of historical lines
    Snapshot,
    /// Lines observed after the snapshot was taken
    Live,
}

/// An ordered run of lines that all belong to the same phase
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineBatch {
    pub phase: Phase,
    pub lines: Vec<String>,
}

impl LineBatch {
    pub fn snapshot(lines: Vec<String>) -> Self {
        Self {
            phase: Phase::Snapshot,
            lines,
        }
    }

    pub fn live(lines: Vec<String>) -> Self {
        Self {
            phase: Phase::Live,
            lines,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Identity of a container log stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodTarget {
    pub namespace: String,
    pub pod: String,
    /// `None` selects the pod's default container
    pub container: Option<String>,
}

impl PodTarget {
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: None,
        }
    }

    pub fn with_container(mut self, container: Option<String>) -> Self {
        self.container = container.filter(|c| !c.is_empty());
        self
    }
}

impl fmt::Display for PodTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.container {
            Some(container) => write!(f, "{}/{}/{}", self.namespace, self.pod, container),
            None => write!(f, "{}/{}", self.namespace, self.pod),
        }
    }
}

/// What a client asked to tail, with the resolved snapshot size
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    File { path: PathBuf, tail_lines: usize },
    Pod { target: PodTarget, tail_lines: usize },
}

impl SourceSpec {
    pub fn tail_lines(&self) -> usize {
        match self {
            Self::File { tail_lines, .. } | Self::Pod { tail_lines, .. } => *tail_lines,
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File { path, .. } => write!(f, "file {}", path.display()),
            Self::Pod { target, .. } => write!(f, "pod {}", target),
        }
    }
}
