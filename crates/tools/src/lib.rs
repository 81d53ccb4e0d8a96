//! Tool handlers exposed to the agent host.
//!
//! Every handler goes through [`ToolContext`]: it obtains a token from the
//! session manager and issues Graph calls through the shared executor.

pub mod auth;
pub mod context;
pub mod registry;
pub mod teams;
pub mod tool;

pub use {
    context::{Failure, ToolContext},
    registry::{ToolDescriptor, ToolRegistry},
    tool::{Tool, ToolOutput},
};
