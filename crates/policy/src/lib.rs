//! Sandboxing for built-in tools.
//!
//! Core principle: **no built-in touches a path or runs a command the policy
//! has not checked first.** Paths are confined to a root with [`resolve`];
//! commands are matched against an allowlist with [`Policy::check_command`].

mod error;
mod path;
mod policy;

pub use error::{Error, Result};
pub use path::resolve;
pub use policy::{Decision, Policy};
