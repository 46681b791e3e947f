//! Kubernetes client for weblogview
//!
//! This crate provides Kubernetes API integration for listing contexts,
//! namespaces, pods and containers, and for building the client that pod
//! log streams are opened with.

mod client;

pub use client::KubeClient;

// Re-export types that are used in our public API
pub use weblogview_types::{ContainerInfo, ContextInfo, NamespaceInfo, PodInfo};
