//! HTTP subsystem: inbound server and outbound forwarder.
//!
//! # Data Flow
//! ```text
//! POST /services/{team_id}/{bot_id}/{token}
//!     → server.rs (identifiers, payload decode, dispatch)
//!     → forward.rs (outbound POST, verbatim relay)
//!     → caller receives the downstream response unchanged
//!
//! anything else → 302 to the provider's public site
//! ```

pub mod forward;
pub mod server;

pub use forward::{Forward, ForwardError, HttpForwarder};
pub use server::{build_router, AppState, HttpServer};
