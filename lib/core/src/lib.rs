//! Core domain types and utilities for skein.
//!
//! This crate provides the identifiers and error handling shared by the
//! workflow crates.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{EventId, ExecutionId, Identifier, ParseIdError, ResourceType};
