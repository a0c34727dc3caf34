//! Microsoft Graph drive integration.

pub mod auth;
pub mod client;
pub mod folders;
pub mod http;
pub mod models;
pub mod retry;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::TokenManager;
pub use client::DriveClient;
pub use folders::EnsuredFolder;
pub use http::{GraphExecutor, GraphRequest, GraphResponse, Target};
pub use models::DriveItem;
pub use retry::{RetryConfig, RetryMachine, RetryState};
pub use upload::{ByteStream, Payload};
