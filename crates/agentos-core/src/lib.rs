//! Terminal transport and session-attachment core for the AgentOS dashboard.
//!
//! Everything here is a deterministic state machine: callers feed in events
//! and the current `Instant`, then drain the socket work from
//! [`Workspace::drain_outbox`]. No sockets, clocks, or threads live here.

pub mod attach;
pub mod backoff;
pub mod config;
pub mod connection;
pub mod fit;
#[cfg(feature = "logging")]
pub mod logging;
pub mod pane_tree;
pub mod reconnect;
pub mod registry;
pub mod scheduler;
pub mod surface;
pub mod term_wire;
pub mod touch;
pub mod utf8;
pub mod workspace;

#[cfg(test)]
mod test_support;

pub use attach::{AgentKind, AttachPhase, SessionRecord};
pub use config::{Tuning, WorkspaceConfig};
pub use connection::{ConnectionKey, TransportAction};
pub use pane_tree::{Orientation, PaneId, TabId};
pub use reconnect::{ConnectionState, SocketReadyState};
pub use surface::{FontMetrics, Geometry, PixelSize, ScrollSnapshot, TerminalSurface};
pub use workspace::{Outgoing, SurfaceFactory, Workspace};
