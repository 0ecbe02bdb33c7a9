//! # colearn-proto
//!
//! Shared types, error definitions, and the event bus adapter for the CoLearn
//! handover learner.
//!
//! This crate provides the foundational abstractions used across all CoLearn
//! crates, including:
//! - Inbound sensor events (hand pose, human intent, task status)
//! - The outbound status broadcast
//! - The `EventBus` that delivers the latest sensor values to the decision thread
//! - The `OutcomeCell` the environment blocks on while a handover resolves
//! - Common error types

mod error;
mod event;
mod event_bus;
mod outcome;

pub use error::{Error, Result};
pub use event::{
    HandoverResult, InboundEvent, IntentUpdate, Orientation, OutcomeUpdate, PoseUpdate, StatusUpdate,
};
pub use event_bus::EventBus;
pub use outcome::{Outcome, OutcomeCell, OutcomeWait};
