//! Microsoft Graph request execution.
//!
//! [`GraphClient::call_graph_api`] is the single primitive every tool uses:
//! it builds the request, retries transient failures and classifies the
//! outcome into [`GraphResponse`] or [`GraphError`].

pub mod client;
pub mod error;
pub mod query;
pub mod retry;

pub use {
    client::{GraphClient, GraphResponse},
    error::{ApiError, GraphError},
    query::GraphQuery,
    retry::RetryPolicy,
};

pub use reqwest::Method;
