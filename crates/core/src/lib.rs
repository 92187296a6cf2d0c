//! # Roost Core
//!
//! Domain types, traits, and error definitions for the Roost orchestration
//! server. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod clock;
pub mod error;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{Error, GatewayError, ProviderError, Result, ScheduleError, SecurityError};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{
    CompletionRequest, CompletionResponse, Provider, ProviderInfo, ProviderKind, ToolDefinition,
    Usage,
};
