//! Casework Domain Types
//!
//! A **case** is the persisted entity whose lifecycle a business process
//! drives. It carries a `current_step` pointer into the process graph and
//! an open/closed status. Cases advance only in response to **events**:
//! named, payload-carrying notifications published on an in-process bus.
//!
//! # Key Concepts
//!
//! - **Case**: id, kind, current step (nullable), status, free-form attributes.
//! - **Event**: a name plus a JSON payload. The payload conventionally holds
//!   a `case_id`; an already-resolved case can travel alongside it.
//! - **WorkflowError**: the error taxonomy shared by the process runtime.
//!
//! The `current_step` of a case is always `None`, a step declared by the
//! owning process, or [`END_STEP`].

#![deny(unsafe_code)]

mod case;
mod errors;
mod event;

pub use case::*;
pub use errors::*;
pub use event::*;

/// Reserved step name that closes a case instead of executing a step.
pub const END_STEP: &str = "end";
