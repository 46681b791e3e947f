//! HTTP and WebSocket server for weblogview
//!
//! Serves the REST API the browser UI uses for preferences and cluster
//! metadata, and a `/ws` endpoint where each connection runs a tailing
//! session: one snapshot of recent lines, then live lines until the client
//! closes or switches source.
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/api/health` | GET | Liveness and connected session count |
//! | `/api/settings` | GET, POST | Viewer preferences |
//! | `/api/recent-files` | GET | Recently opened files |
//! | `/api/recent-namespaces` | GET | Recently used namespaces |
//! | `/api/k8s/contexts` | GET | Kubeconfig contexts |
//! | `/api/k8s/switch-context` | POST | Change the active context |
//! | `/api/k8s/namespaces` | GET | Namespace names |
//! | `/api/k8s/pods?namespace=` | GET | Pod names |
//! | `/api/k8s/containers?namespace=&pod=` | GET | Container names |
//! | `/ws` | GET | Tailing session |

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod outbound;
pub mod protocol;
pub mod registry;
pub mod routes;
pub mod server;
pub mod session;
pub mod settings;
pub mod state;
pub mod websocket;

// Re-export main types
pub use config::{ConfigError, KeepaliveConfig, ServerConfig};
pub use error::{ApiError, ApiResult, ServerError};
pub use outbound::OutboundSender;
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use registry::{ConnectionGuard, ConnectionInfo, ConnectionRegistry};
pub use server::WebLogViewServer;
pub use session::{Session, SessionPhase, TailLimits};
pub use settings::{Settings, SettingsError, SettingsStore, SettingsUpdate};
pub use state::AppState;
