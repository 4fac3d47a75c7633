//! Event system for serplens
//!
//! This crate provides the event bus and event types the orchestrator uses
//! to announce pipeline progress to in-process consumers.

mod bus;
mod types;

pub use bus::EventBus;
pub use types::*;
