use ulid::Ulid;

use crate::model::Ms;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Malformed interval: start >= end or timestamps out of range.
    InvalidRange { start: Ms, end: Ms },
    LimitExceeded(&'static str),
    NotFound(Ulid),
    UsernameTaken(String),
    EmailTaken(String),
    /// The room already has an appointment overlapping the requested slot.
    RoomUnavailable { room_id: Ulid, conflicting: Ulid },
    /// A specific resource is unavailable for the requested window.
    ResourceConflict { resource_id: Ulid, conflicting: Option<Ulid> },
    /// Entity still has dependents (room with appointments, resource with
    /// links, user owning appointments).
    InUse(Ulid),
    /// Actor may not mutate this appointment.
    Forbidden(Ulid),
    /// Snapshot replay or serialization failed; nothing was applied.
    Snapshot(String),
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::InvalidRange { start, end } => {
                write!(f, "invalid time range: [{start}, {end})")
            }
            BookingError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            BookingError::NotFound(id) => write!(f, "not found: {id}"),
            BookingError::UsernameTaken(name) => write!(f, "username taken: {name}"),
            BookingError::EmailTaken(email) => write!(f, "email taken: {email}"),
            BookingError::RoomUnavailable { room_id, conflicting } => {
                write!(f, "room {room_id} unavailable: conflicts with appointment {conflicting}")
            }
            BookingError::ResourceConflict { resource_id, conflicting } => match conflicting {
                Some(other) => write!(
                    f,
                    "resource {resource_id} unavailable: reserved by appointment {other}"
                ),
                None => write!(f, "resource {resource_id} unavailable"),
            },
            BookingError::InUse(id) => write!(f, "cannot delete {id}: still in use"),
            BookingError::Forbidden(actor) => {
                write!(f, "actor {actor} lacks permission for this mutation")
            }
            BookingError::Snapshot(e) => write!(f, "snapshot error: {e}"),
        }
    }
}

impl std::error::Error for BookingError {}
