mod availability;
mod conflict;
mod error;
mod mutations;
mod policy;
mod queries;
mod store;

pub use availability::{free_windows, merge_overlapping, subtract_ranges};
pub use error::BookingError;
pub use policy::authorize;

use std::sync::Arc;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;

use conflict::{check_resource_window, check_room_slot};
use store::BookingStore;

pub type SharedRoomState = Arc<RwLock<RoomState>>;
pub type SharedResourceState = Arc<RwLock<ResourceState>>;

/// The booking core: rooms, resources, users, appointments, and the conflict
/// rules tying them together. Every mutation takes the write locks it needs
/// up front (rooms first, then resources, each group in sorted id order),
/// validates everything, then commits while still holding them: the
/// check and the write are one atomic unit.
pub struct BookingEngine {
    store: BookingStore,
}

impl Default for BookingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingEngine {
    pub fn new() -> Self {
        Self {
            store: BookingStore::new(),
        }
    }

    pub(super) fn store(&self) -> &BookingStore {
        &self.store
    }

    // ── Lock acquisition ─────────────────────────────────────

    pub(super) async fn room_write(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, BookingError> {
        let rs = self.store.get_room(&id).ok_or(BookingError::NotFound(id))?;
        Ok(rs.write_owned().await)
    }

    /// Write-lock several rooms in sorted id order to prevent deadlocks.
    pub(super) async fn rooms_write(
        &self,
        ids: &[Ulid],
    ) -> Result<Vec<OwnedRwLockWriteGuard<RoomState>>, BookingError> {
        let mut sorted: Vec<Ulid> = ids.to_vec();
        sorted.sort();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for id in sorted {
            guards.push(self.room_write(id).await?);
        }
        Ok(guards)
    }

    /// Write-lock resources in sorted id order. All must exist.
    pub(super) async fn resources_write(
        &self,
        ids: &std::collections::BTreeSet<Ulid>,
    ) -> Result<Vec<OwnedRwLockWriteGuard<ResourceState>>, BookingError> {
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let rs = self
                .store
                .get_resource(id)
                .ok_or(BookingError::NotFound(*id))?;
            guards.push(rs.write_owned().await);
        }
        Ok(guards)
    }

    // ── Snapshot / replay ────────────────────────────────────

    /// Rebuild an engine from a snapshot event list, re-validating every
    /// booking invariant. A corrupt snapshot yields `Snapshot`; nothing
    /// partial survives.
    pub fn from_events(events: &[Event]) -> Result<Self, BookingError> {
        let engine = Self::new();
        // We are the sole owner of every Arc here, so try_read/try_write
        // always succeed instantly (no contention).
        for event in events {
            match event {
                Event::UserCreated { id, username, email, password_hash, role, created_at } => {
                    if engine.store.contains_user(id) {
                        return Err(BookingError::Snapshot(format!("duplicate user {id}")));
                    }
                    if !engine.store.claim_username(username, *id) {
                        return Err(BookingError::Snapshot(format!("duplicate username {username}")));
                    }
                    if !engine.store.claim_email(email, *id) {
                        return Err(BookingError::Snapshot(format!("duplicate email {email}")));
                    }
                    engine.store.insert_user(User {
                        id: *id,
                        username: username.clone(),
                        email: email.clone(),
                        password_hash: password_hash.clone(),
                        role: *role,
                        created_at: *created_at,
                    });
                }
                Event::ResourceCreated { id, name, kind, availability } => {
                    if engine.store.contains_resource(id) {
                        return Err(BookingError::Snapshot(format!("duplicate resource {id}")));
                    }
                    let rs = ResourceState::new(*id, name.clone(), *kind, *availability);
                    engine.store.insert_resource(*id, Arc::new(RwLock::new(rs)));
                }
                Event::RoomCreated { id, name, capacity, fixed_resources } => {
                    if engine.store.contains_room(id) {
                        return Err(BookingError::Snapshot(format!("duplicate room {id}")));
                    }
                    let mut room = RoomState::new(*id, name.clone(), *capacity);
                    for rid in fixed_resources {
                        let rs = engine.store.get_resource(rid).ok_or_else(|| {
                            BookingError::Snapshot(format!("room {id} binds unknown resource {rid}"))
                        })?;
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        if guard.room_id.is_some() {
                            return Err(BookingError::Snapshot(format!(
                                "resource {rid} fixed to two rooms"
                            )));
                        }
                        guard.kind = ResourceKind::Fixed;
                        guard.availability = Availability::Unavailable;
                        guard.room_id = Some(*id);
                        room.fixed_resources.insert(*rid);
                    }
                    engine.store.insert_room(*id, Arc::new(RwLock::new(room)));
                }
                Event::AppointmentBooked { id, room_id, user_id, range, created_at, resources } => {
                    if engine.store.get_appointment(id).is_some() {
                        return Err(BookingError::Snapshot(format!("duplicate appointment {id}")));
                    }
                    if !engine.store.contains_user(user_id) {
                        return Err(BookingError::Snapshot(format!(
                            "appointment {id} owned by unknown user {user_id}"
                        )));
                    }
                    let room = engine.store.get_room(room_id).ok_or_else(|| {
                        BookingError::Snapshot(format!("appointment {id} in unknown room {room_id}"))
                    })?;
                    let mut room_guard = room.try_write().expect("replay: uncontended write");
                    check_room_slot(&room_guard, range, None)
                        .map_err(|e| BookingError::Snapshot(e.to_string()))?;

                    for rid in resources.keys() {
                        let rs = engine.store.get_resource(rid).ok_or_else(|| {
                            BookingError::Snapshot(format!(
                                "appointment {id} holds unknown resource {rid}"
                            ))
                        })?;
                        let guard = rs.try_read().expect("replay: uncontended read");
                        check_resource_window(&guard, range, None)
                            .map_err(|e| BookingError::Snapshot(e.to_string()))?;
                    }

                    room_guard.slots.insert(Reservation {
                        appointment_id: *id,
                        range: *range,
                    });
                    for rid in resources.keys() {
                        let rs = engine.store.get_resource(rid).expect("checked above");
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        guard.windows.insert(Reservation {
                            appointment_id: *id,
                            range: *range,
                        });
                    }
                    engine.store.insert_appointment(Appointment {
                        id: *id,
                        room_id: *room_id,
                        user_id: *user_id,
                        range: *range,
                        created_at: *created_at,
                        resources: resources.clone(),
                    });
                }
            }
        }
        Ok(engine)
    }

    pub fn from_json(json: &str) -> Result<Self, BookingError> {
        let events: Vec<Event> =
            serde_json::from_str(json).map_err(|e| BookingError::Snapshot(e.to_string()))?;
        Self::from_events(&events)
    }

    /// Emit the minimal event list recreating the current state. Callers are
    /// expected to snapshot a quiescent engine; id-sorted output is
    /// deterministic for a given state.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::new();

        let mut user_ids = self.store.user_ids();
        user_ids.sort();
        for id in user_ids {
            if let Some(u) = self.store.get_user(&id) {
                events.push(Event::UserCreated {
                    id: u.id,
                    username: u.username,
                    email: u.email,
                    password_hash: u.password_hash,
                    role: u.role,
                    created_at: u.created_at,
                });
            }
        }

        let mut resource_ids = self.store.resource_ids();
        resource_ids.sort();
        for id in resource_ids {
            if let Some(rs) = self.store.get_resource(&id) {
                let guard = rs.try_read().expect("snapshot: uncontended read");
                // Bound resources are re-fixed by their room's event on replay;
                // emit the unbound base state for them.
                let (kind, availability) = if guard.room_id.is_some() {
                    (ResourceKind::Movable, Availability::Available)
                } else {
                    (guard.kind, guard.availability)
                };
                events.push(Event::ResourceCreated {
                    id: guard.id,
                    name: guard.name.clone(),
                    kind,
                    availability,
                });
            }
        }

        let mut room_ids = self.store.room_ids();
        room_ids.sort();
        for id in room_ids {
            if let Some(rs) = self.store.get_room(&id) {
                let guard = rs.try_read().expect("snapshot: uncontended read");
                events.push(Event::RoomCreated {
                    id: guard.id,
                    name: guard.name.clone(),
                    capacity: guard.capacity,
                    fixed_resources: guard.fixed_resources.clone(),
                });
            }
        }

        let mut appointments = self.store.appointments();
        appointments.sort_by_key(|a| a.id);
        for a in appointments {
            events.push(Event::AppointmentBooked {
                id: a.id,
                room_id: a.room_id,
                user_id: a.user_id,
                range: a.range,
                created_at: a.created_at,
                resources: a.resources,
            });
        }

        events
    }

    pub fn snapshot_json(&self) -> Result<String, BookingError> {
        serde_json::to_string(&self.snapshot()).map_err(|e| BookingError::Snapshot(e.to_string()))
    }
}
