pub mod callback_server;
pub mod error;
pub mod flow;
pub mod pkce;
pub mod session;
pub mod storage;
pub mod types;

pub use {
    callback_server::CallbackServer,
    error::AuthError,
    flow::OAuthFlow,
    session::{AuthStatus, PendingLogin, SessionManager},
    storage::{StoreError, TokenStore},
    types::{AuthorizationRequest, PendingAuthorization, PkceChallenge, TokenRecord},
};
