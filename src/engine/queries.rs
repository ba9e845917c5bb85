use ulid::Ulid;

use crate::model::*;

use super::availability::free_windows;
use super::conflict::{check_resource_window, validate_query_window};
use super::{BookingEngine, BookingError};

impl BookingEngine {
    // ── Appointments ─────────────────────────────────────────

    pub fn get_appointment(&self, id: Ulid) -> Result<Appointment, BookingError> {
        self.store()
            .get_appointment(&id)
            .ok_or(BookingError::NotFound(id))
    }

    /// All appointments, or only those owned by `owner_id`.
    pub fn list_appointments(&self, owner_id: Option<Ulid>) -> Vec<Appointment> {
        let mut appts: Vec<Appointment> = match owner_id {
            Some(owner) => self
                .store()
                .appointments_for_owner(&owner)
                .iter()
                .filter_map(|id| self.store().get_appointment(id))
                .collect(),
            None => self.store().appointments(),
        };
        appts.sort_by_key(|a| (a.range.start, a.id));
        appts
    }

    /// Filter by room and/or time bounds. When both bounds are given this is
    /// a containment filter: only appointments lying fully inside
    /// `[start, end)` are returned, not everything overlapping it.
    pub fn filter_appointments(
        &self,
        room_id: Option<Ulid>,
        start: Option<Ms>,
        end: Option<Ms>,
    ) -> Result<Vec<Appointment>, BookingError> {
        let bounds = match (start, end) {
            (Some(s), Some(e)) => Some(validate_query_window(s, e)?),
            _ => None,
        };
        let mut appts: Vec<Appointment> = self
            .store()
            .appointments()
            .into_iter()
            .filter(|a| room_id.is_none_or(|rid| a.room_id == rid))
            .filter(|a| bounds.is_none_or(|b| b.contains_range(&a.range)))
            .collect();
        appts.sort_by_key(|a| (a.range.start, a.id));
        Ok(appts)
    }

    /// Materialize the appointment↔resource link rows.
    pub fn appointment_resources(
        &self,
        appointment_id: Ulid,
    ) -> Result<Vec<AppointmentResource>, BookingError> {
        let appt = self.get_appointment(appointment_id)?;
        Ok(appt
            .resources
            .iter()
            .map(|(rid, linked_at)| AppointmentResource {
                appointment_id,
                resource_id: *rid,
                linked_at: *linked_at,
            })
            .collect())
    }

    // ── Rooms ────────────────────────────────────────────────

    pub async fn get_room(&self, id: Ulid) -> Result<RoomInfo, BookingError> {
        let rs = self.store().get_room(&id).ok_or(BookingError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(RoomInfo::from(&*guard))
    }

    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let mut ids = self.store().room_ids();
        ids.sort();
        let mut rooms = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(rs) = self.store().get_room(&id) {
                rooms.push(RoomInfo::from(&*rs.read().await));
            }
        }
        rooms
    }

    /// Rooms with no appointment overlapping `[start, end)`.
    pub async fn available_rooms(&self, start: Ms, end: Ms) -> Result<Vec<RoomInfo>, BookingError> {
        let query = validate_query_window(start, end)?;
        let mut ids = self.store().room_ids();
        ids.sort();
        let mut free = Vec::new();
        for id in ids {
            if let Some(rs) = self.store().get_room(&id) {
                let guard = rs.read().await;
                if guard.slots.overlapping(&query).next().is_none() {
                    free.push(RoomInfo::from(&*guard));
                }
            }
        }
        Ok(free)
    }

    // ── Resources ────────────────────────────────────────────

    pub async fn get_resource(&self, id: Ulid) -> Result<ResourceInfo, BookingError> {
        let rs = self
            .store()
            .get_resource(&id)
            .ok_or(BookingError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(ResourceInfo::from(&*guard))
    }

    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        let mut ids = self.store().resource_ids();
        ids.sort();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(rs) = self.store().get_resource(&id) {
                out.push(ResourceInfo::from(&*rs.read().await));
            }
        }
        out
    }

    /// Resources whose availability flag is set, regardless of kind.
    pub async fn available_resources(&self) -> Vec<ResourceInfo> {
        let mut ids = self.store().resource_ids();
        ids.sort();
        let mut out = Vec::new();
        for id in ids {
            if let Some(rs) = self.store().get_resource(&id) {
                let guard = rs.read().await;
                if guard.availability == Availability::Available {
                    out.push(ResourceInfo::from(&*guard));
                }
            }
        }
        out
    }

    /// Movable, available resources with no reservation window overlapping
    /// `[start, end)`.
    pub async fn available_movable_resources(
        &self,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<ResourceInfo>, BookingError> {
        let query = validate_query_window(start, end)?;
        let mut ids = self.store().resource_ids();
        ids.sort();
        let mut out = Vec::new();
        for id in ids {
            if let Some(rs) = self.store().get_resource(&id) {
                let guard = rs.read().await;
                if check_resource_window(&guard, &query, None).is_ok() {
                    out.push(ResourceInfo::from(&*guard));
                }
            }
        }
        Ok(out)
    }

    /// Can `resource_id` be reserved for the whole of `[start, end)`?
    pub async fn is_resource_available(
        &self,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<bool, BookingError> {
        let query = validate_query_window(start, end)?;
        let rs = self
            .store()
            .get_resource(&resource_id)
            .ok_or(BookingError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(check_resource_window(&guard, &query, None).is_ok())
    }

    /// The free sub-intervals of `[start, end)` for one resource.
    pub async fn resource_free_windows(
        &self,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<TimeRange>, BookingError> {
        let query = validate_query_window(start, end)?;
        let rs = self
            .store()
            .get_resource(&resource_id)
            .ok_or(BookingError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(free_windows(&guard, &query))
    }

    // ── Users ────────────────────────────────────────────────

    pub fn get_user(&self, id: Ulid) -> Result<User, BookingError> {
        self.store().get_user(&id).ok_or(BookingError::NotFound(id))
    }

    pub fn get_user_by_username(&self, username: &str) -> Option<User> {
        let id = self.store().user_by_username(username)?;
        self.store().get_user(&id)
    }

    pub fn list_users(&self) -> Vec<User> {
        let mut users = self.store().users();
        users.sort_by_key(|u| u.id);
        users
    }
}
