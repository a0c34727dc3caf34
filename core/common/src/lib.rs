//! Common utilities and types shared across drivelink crates.
//!
//! This module provides the error taxonomy, remote path handling and
//! secret wrappers used by the storage pipeline and the CLI.

pub mod error;
pub mod path;
pub mod types;

pub use error::{Error, Result, RETRYABLE_STATUSES};
pub use path::{join, sanitize, RemotePath, MAX_NAME_LEN};
pub use types::Secret;
