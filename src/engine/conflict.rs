use ulid::Ulid;

use crate::model::*;

use super::BookingError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Validate raw bounds and build the half-open range.
pub(crate) fn validate_range(start: Ms, end: Ms) -> Result<TimeRange, BookingError> {
    use crate::limits::*;
    if start >= end {
        return Err(BookingError::InvalidRange { start, end });
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(BookingError::InvalidRange { start, end });
    }
    let range = TimeRange::new(start, end);
    if range.duration_ms() > MAX_RANGE_DURATION_MS {
        return Err(BookingError::LimitExceeded("appointment range too wide"));
    }
    Ok(range)
}

pub(crate) fn validate_query_window(start: Ms, end: Ms) -> Result<TimeRange, BookingError> {
    use crate::limits::*;
    if start >= end {
        return Err(BookingError::InvalidRange { start, end });
    }
    // Epoch bounds also keep the width subtraction below from overflowing.
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(BookingError::InvalidRange { start, end });
    }
    if end - start > MAX_QUERY_WINDOW_MS {
        return Err(BookingError::LimitExceeded("query window too wide"));
    }
    Ok(TimeRange::new(start, end))
}

/// Fail if any existing slot in the room (other than `exclude`, the
/// appointment being updated) overlaps the candidate range.
pub(crate) fn check_room_slot(
    room: &RoomState,
    range: &TimeRange,
    exclude: Option<Ulid>,
) -> Result<(), BookingError> {
    for slot in room.slots.overlapping(range) {
        if exclude == Some(slot.appointment_id) {
            continue;
        }
        return Err(BookingError::RoomUnavailable {
            room_id: room.id,
            conflicting: slot.appointment_id,
        });
    }
    Ok(())
}

/// Is `resource` reservable for `range` by an appointment other than `exclude`?
///
/// Fixed resources and resources flagged unavailable are never ad-hoc
/// bookable; movable availability is decided by window overlap, so many
/// non-overlapping reservations of one resource are fine.
pub(crate) fn check_resource_window(
    resource: &ResourceState,
    range: &TimeRange,
    exclude: Option<Ulid>,
) -> Result<(), BookingError> {
    if resource.kind == ResourceKind::Fixed || resource.availability == Availability::Unavailable {
        return Err(BookingError::ResourceConflict {
            resource_id: resource.id,
            conflicting: None,
        });
    }
    for window in resource.windows.overlapping(range) {
        if exclude == Some(window.appointment_id) {
            continue;
        }
        return Err(BookingError::ResourceConflict {
            resource_id: resource.id,
            conflicting: Some(window.appointment_id),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::MIN_VALID_TIMESTAMP_MS;

    const T0: Ms = MIN_VALID_TIMESTAMP_MS;
    const H: Ms = 3_600_000;

    #[test]
    fn validate_range_rejects_inverted() {
        assert!(matches!(
            validate_range(T0 + H, T0),
            Err(BookingError::InvalidRange { .. })
        ));
        assert!(matches!(
            validate_range(T0, T0),
            Err(BookingError::InvalidRange { .. })
        ));
    }

    #[test]
    fn validate_range_rejects_out_of_epoch() {
        assert!(validate_range(100, 200).is_err());
    }

    #[test]
    fn query_window_rejects_out_of_epoch() {
        assert!(matches!(
            validate_query_window(100, 200),
            Err(BookingError::InvalidRange { .. })
        ));
        // Extreme bounds must come back as an error, not overflow the
        // width computation.
        assert!(matches!(
            validate_query_window(Ms::MIN, Ms::MAX),
            Err(BookingError::InvalidRange { .. })
        ));
        assert!(validate_query_window(T0, T0 + H).is_ok());
    }

    #[test]
    fn room_check_excludes_self() {
        let mut room = RoomState::new(Ulid::new(), "A".into(), 4);
        let appt = Ulid::new();
        room.slots.insert(Reservation {
            appointment_id: appt,
            range: TimeRange::new(T0, T0 + H),
        });
        let range = TimeRange::new(T0, T0 + 2 * H);
        assert!(check_room_slot(&room, &range, Some(appt)).is_ok());
        assert!(matches!(
            check_room_slot(&room, &range, None),
            Err(BookingError::RoomUnavailable { .. })
        ));
    }

    #[test]
    fn fixed_resource_never_bookable() {
        let rs = ResourceState::new(
            Ulid::new(),
            "projector".into(),
            ResourceKind::Fixed,
            Availability::Unavailable,
        );
        let err = check_resource_window(&rs, &TimeRange::new(T0, T0 + H), None);
        assert!(matches!(err, Err(BookingError::ResourceConflict { conflicting: None, .. })));
    }

    #[test]
    fn movable_resource_boundary_touch_is_free() {
        let mut rs = ResourceState::new(
            Ulid::new(),
            "camera".into(),
            ResourceKind::Movable,
            Availability::Available,
        );
        rs.windows.insert(Reservation {
            appointment_id: Ulid::new(),
            range: TimeRange::new(T0, T0 + H),
        });
        assert!(check_resource_window(&rs, &TimeRange::new(T0 + H, T0 + 2 * H), None).is_ok());
        assert!(check_resource_window(&rs, &TimeRange::new(T0 + H / 2, T0 + H), None).is_err());
    }
}
