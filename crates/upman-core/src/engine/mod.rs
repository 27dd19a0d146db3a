//! Upload Engine - streams one file as multipart/form-data
//!
//! This module implements the single-upload engine with:
//! - Chunked request streaming with bounded memory
//! - Byte-level progress notifications
//! - Cooperative cancellation between chunks
//! - Exactly one terminal notification per transfer

mod body_writer;
mod listener;
mod transfer;
mod upload_engine;

pub use body_writer::*;
pub use listener::*;
pub use upload_engine::*;
