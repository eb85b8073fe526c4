//! Toolbridge runtime: tool orchestration for an upstream model.
//!
//! This crate sits between a model that emits function calls and the tools
//! that answer them: built-in filesystem, git and shell functions, plus
//! external tool servers spoken to over JSON-RPC on stdio.
//!
//! # Overview
//!
//! - **Orchestrator**: the entry point. Offers function declarations for a
//!   prompt and turns each function call into a [`ToolResult`].
//! - **ProcessRegistry**: keeps at most one warm process per external tool.
//! - **Builtins**: workspace functions confined by a [`policy::Policy`].
//! - **Schema**: converts tool input schemas into declarations and coerces
//!   model arguments back to the declared types.
//!
//! # Example
//!
//! ```no_run
//! use runtime::{Config, Orchestrator};
//! use serde_json::json;
//!
//! # async fn example() -> runtime::Result<()> {
//! let config = Config::load("toolbridge.toml")?;
//! let orchestrator = Orchestrator::new(config)?;
//!
//! let declarations = orchestrator.available_declarations("show git status").await;
//! println!("{} functions offered", declarations.len());
//!
//! let result = orchestrator.invoke("git", "git_status", json!({})).await;
//! println!("{}", serde_json::to_string(&result).unwrap_or_default());
//!
//! orchestrator.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod builtin;
mod config;
mod error;
mod orchestrator;
mod registry;
mod result;
mod schema;
mod selector;

// Configuration
pub use config::{BuiltinConfig, Config, RespawnConfig, TimeoutConfig, ToolConfig};

// Error types
pub use error::{Error, Result};

// Orchestration
pub use orchestrator::{Orchestrator, Stats};
pub use registry::ProcessRegistry;
pub use selector::{CatalogEntry, select};

// Invocation results
pub use result::{FailureKind, Invocation, InvocationState, Outcome, ToolFailure, ToolResult};

// Declarations and arguments
pub use schema::{
    FunctionDeclaration, Schema, SchemaMismatch, SchemaType, ToolCallArgs, coerce, to_declaration,
};

pub use builtin::BuiltinKind;
