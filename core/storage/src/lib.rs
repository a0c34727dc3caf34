//! Microsoft Graph drive upload pipeline for drivelink.
//!
//! This crate acquires and caches application credentials, sends every
//! Graph call through a retrying executor, creates the customer/order
//! folder layout idempotently and uploads files of any size.
//!
//! # Design Principles
//! - Single chokepoint: all Graph traffic goes through [`GraphExecutor`]
//! - Streaming: large files are sent one chunk at a time
//! - Per-file isolation: one failed file never aborts a batch

pub mod config;
pub mod graph;
pub mod pipeline;

pub use config::GraphConfig;
pub use graph::{
    DriveClient, DriveItem, EnsuredFolder, GraphExecutor, GraphRequest, GraphResponse, Payload,
    RetryConfig, TokenManager,
};
pub use pipeline::{
    BatchReport, DrivePipeline, FileUpload, FolderReport, ManifestReport, OrderUpload,
    RemoteEntry, UploadResult,
};
