use ulid::Ulid;

use crate::model::{CivilDate, CivilTime, Status};

use super::store::SlotKind;

#[derive(Debug)]
pub enum EngineError {
    /// Field-level input problems, reported together.
    Validation(Vec<String>),
    NotFound(String),
    Conflict {
        professional: String,
        date: CivilDate,
        start: CivilTime,
        conflicting: Ulid,
        /// Whether `conflicting` is a booking or a time block.
        kind: SlotKind,
        suggestions: Vec<CivilTime>,
    },
    /// Every active professional is taken at the requested time.
    AllProfessionalsBusy {
        date: CivilDate,
        start: CivilTime,
        checked: usize,
    },
    DeadlineNotMet {
        hours_remaining: f64,
        minimum_hours: u32,
    },
    InvalidTransition {
        id: Ulid,
        from: Status,
        action: &'static str,
    },
    BusinessClosed(CivilDate),
    NoActiveProfessionals,
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        EngineError::Validation(vec![msg.into()])
    }

    pub fn booking_not_found(id: Ulid) -> Self {
        EngineError::NotFound(format!("booking {id}"))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(errors) => write!(f, "invalid input: {}", errors.join("; ")),
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::Conflict {
                professional,
                date,
                start,
                kind: SlotKind::Booking,
                ..
            } => write!(f, "{professional} is already booked at {start} on {date}"),
            EngineError::Conflict {
                professional,
                date,
                start,
                kind: SlotKind::Block,
                ..
            } => write!(f, "{professional} is blocked at {start} on {date}"),
            EngineError::AllProfessionalsBusy { date, start, .. } => {
                write!(f, "every professional is busy at {start} on {date}")
            }
            EngineError::DeadlineNotMet {
                hours_remaining,
                minimum_hours,
            } => write!(
                f,
                "cancellations require {minimum_hours}h notice; only {hours_remaining:.1}h remain"
            ),
            EngineError::InvalidTransition { id, from, action } => {
                write!(f, "cannot {action} booking {id}: it is {from}")
            }
            EngineError::BusinessClosed(date) => write!(f, "closed on {date}"),
            EngineError::NoActiveProfessionals => write!(f, "no active professionals"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
