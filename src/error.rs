use std::io;

use thiserror::Error;
use ulid::Ulid;

use crate::model::RoomId;

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("invalid date range: start must be before end")]
    InvalidRange,
    #[error("invalid guest details: {0}")]
    InvalidGuest(&'static str),
    #[error("room {room_id} is unavailable: conflicts with restriction {conflicting}")]
    RoomUnavailable { room_id: RoomId, conflicting: Ulid },
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),
    #[error("room already exists: {0}")]
    RoomExists(RoomId),
    #[error("reservation not found: {0}")]
    ReservationNotFound(Ulid),
    #[error("owner block not found: {0}")]
    BlockNotFound(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(#[from] io::Error),
    #[error("storage operation timed out")]
    StorageTimeout,
    #[error("notification dispatcher is closed")]
    DispatcherClosed,
    #[error("notification queue is full")]
    DispatcherFull,
}

impl BookingError {
    /// Errors caused by the request itself. Their message is safe to show to a guest.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            BookingError::InvalidRange
                | BookingError::InvalidGuest(_)
                | BookingError::RoomUnavailable { .. }
                | BookingError::RoomNotFound(_)
                | BookingError::ReservationNotFound(_)
                | BookingError::BlockNotFound(_)
                | BookingError::LimitExceeded(_)
        )
    }

    /// Whether the same request may succeed if submitted again unchanged.
    /// `RoomUnavailable` is not retryable: the caller has to search again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BookingError::Storage(_) | BookingError::StorageTimeout | BookingError::DispatcherFull
        )
    }
}

/// Why a queued notification could not be delivered. Never surfaces to booking callers.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("unknown mail template: {0}")]
    MissingTemplate(String),
    #[error("mail transport failed: {0}")]
    Transport(String),
    #[error("mail delivery timed out")]
    Timeout,
}
