//! Long-running `conductor` daemon: tick loop, command connectors and a
//! Unix socket control surface.

pub mod connectors;
mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use connectors::CommandConnector;
pub use error::DaemonError;
pub use protocol::{
    request_status, request_stop, request_sync, send_request, DaemonRequest, DaemonResponse,
    DaemonStatus, SyncReply,
};
pub use runtime::{build_orchestrator, run, serve, start_blocking};
