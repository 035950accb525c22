//! Domain models for the clinic operations engine.
//!
//! Each aggregate enforces its own invariants and buffers the [`DomainEvent`]s
//! produced by a command until the handler drains them after persistence.

mod appointment;
mod consultation;
mod events;
mod membership;
mod waiting_room;

pub use appointment::*;
pub use consultation::*;
pub use events::*;
pub use membership::*;
pub use waiting_room::*;

use thiserror::Error;

/// Errors raised by aggregates when a command violates an invariant.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Invalid transition: cannot {action} {aggregate} while {state}")]
    InvalidTransition {
        aggregate: &'static str,
        action: &'static str,
        state: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

/// Generate a fresh aggregate identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
