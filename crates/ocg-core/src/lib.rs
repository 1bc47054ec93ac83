//! # ocg-core
//!
//! Core types, traits, and primitives for the OCG assistant runtime.
//! This crate defines the shared vocabulary used by every other crate in the
//! workspace: chat messages, tool descriptors, pulse events, and the unified
//! error type.

pub mod error;
pub mod event;
pub mod message;
pub mod tool;

pub use error::{OcgError, Result};
pub use event::{Event, EventPriority, EventStatus};
pub use message::{Message, Role};
pub use tool::{FunctionCall, Schema, ToolCall, ToolResult};
