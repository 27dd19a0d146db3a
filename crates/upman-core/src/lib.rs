//! UpMan Core - Upload Engine
//!
//! This crate provides the core upload functionality for UpMan.
//! It streams a local file plus form fields to an HTTP endpoint as
//! multipart/form-data, reporting progress to a caller-supplied listener.

mod engine;
mod error;
mod multipart;

pub use engine::*;
pub use error::*;
pub use multipart::*;

pub use upman_types::{
    ProxySettings, UploadEvent, UploadSettings, UploadStatus, UploadTask,
};
