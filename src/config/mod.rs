//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → template.rs (expand ${env(..)} / ${must_env(..)})
//!     → loader.rs (parse into schema.rs types)
//!     → rules::RuleSet::build (validate + compile conditions)
//! ```
//!
//! # Design Decisions
//! - Loading is fail-fast: any template, parse, or validation error
//!   aborts startup; the process never serves a partial configuration

pub mod loader;
pub mod schema;
pub mod template;

pub use loader::{load_config, load_from_str, ConfigError};
pub use schema::DispatcherConfig;
pub use template::{TemplateEngine, TemplateError};
