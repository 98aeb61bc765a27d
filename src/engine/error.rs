use std::fmt;

use thiserror::Error;
use ulid::Ulid;

use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Professional,
    Patient,
    Appointment,
    Block,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Professional => "professional",
            Entity::Patient => "patient",
            Entity::Appointment => "appointment",
            Entity::Block => "availability block",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConflictReason {
    #[error("outside professional availability")]
    OutsideAvailability,
    #[error("overbooking limit reached")]
    OverbookingLimit,
    /// Never raised by [`Engine`](super::Engine) itself: a full window is
    /// `OverbookingLimit` at every limit, zero included. Left for store adapters whose
    /// backend refuses a window outright, e.g. an exclusion constraint.
    #[error("slot not available")]
    SlotUnavailable,
}

/// Coarse classification for callers mapping errors onto a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Conflict,
    Collaborator,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("{0} not found: {1}")]
    NotFound(Entity, Ulid),
    #[error("{0}")]
    Conflict(ConflictReason),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// The appointment was persisted but its outbox event was not.
    #[error("outbox error: {0}")]
    Outbox(#[source] StoreError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidArgument(_) | EngineError::LimitExceeded(_) => {
                ErrorKind::InvalidArgument
            }
            EngineError::NotFound(..) => ErrorKind::NotFound,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::Store(_) | EngineError::Outbox(_) => ErrorKind::Collaborator,
        }
    }

    pub fn is_conflict(&self, reason: ConflictReason) -> bool {
        matches!(self, EngineError::Conflict(r) if *r == reason)
    }
}
