//! Condition-based webhook dispatcher.
//!
//! Receives an inbound chat-message webhook, evaluates an ordered list
//! of boolean rules against the payload and path identifiers, and
//! forwards the unmodified request to the first matching rule's
//! destination (or a default synthesized from the path), relaying the
//! downstream response verbatim.

pub mod config;
pub mod dispatch;
pub mod expr;
pub mod http;
pub mod payload;
pub mod rules;

pub use config::DispatcherConfig;
pub use http::HttpServer;
pub use rules::RuleSet;
