//! Condition expression engine.
//!
//! # Data Flow
//! ```text
//! Condition source (rule config)
//!     → parser.rs (source → Expr AST)
//!     → program.rs (type-check against schema.rs, freeze as Program)
//!
//! Per request:
//!     EvalContext (payload + path identifiers, value.rs)
//!     → Program::evaluate (deadline-bounded)
//!     → bool or EvalError
//! ```
//!
//! # Design Decisions
//! - Programs compiled once at configuration load, immutable at runtime
//! - Evaluation is stateless over the program: shared across request
//!   workers without locks
//! - Schema is declared explicitly, never derived by reflection

pub mod parser;
pub mod program;
pub mod schema;
pub mod value;

pub use parser::ParseError;
pub use program::{CompileError, Engine, EvalContext, EvalError, Program};
pub use schema::{Kind, Schema};
pub use value::Value;
