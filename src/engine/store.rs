use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

use super::{SharedResourceState, SharedRoomState};

/// Concurrent registries backing the engine. Rooms and resources are held
/// behind per-entity locks; appointments and users are plain records keyed
/// by id. Indexes keep uniqueness and by-owner lookups O(1).
pub struct BookingStore {
    users: DashMap<Ulid, User>,
    usernames: DashMap<String, Ulid>,
    emails: DashMap<String, Ulid>,
    rooms: DashMap<Ulid, SharedRoomState>,
    resources: DashMap<Ulid, SharedResourceState>,
    appointments: DashMap<Ulid, Appointment>,
    /// Owner → appointment ids.
    by_owner: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for BookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            usernames: DashMap::new(),
            emails: DashMap::new(),
            rooms: DashMap::new(),
            resources: DashMap::new(),
            appointments: DashMap::new(),
            by_owner: DashMap::new(),
        }
    }

    // ── Users ────────────────────────────────────────────────

    pub fn get_user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn contains_user(&self, id: &Ulid) -> bool {
        self.users.contains_key(id)
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn remove_user(&self, id: &Ulid) -> Option<User> {
        self.users.remove(id).map(|(_, u)| u)
    }

    pub fn user_ids(&self) -> Vec<Ulid> {
        self.users.iter().map(|e| *e.key()).collect()
    }

    pub fn users(&self) -> Vec<User> {
        self.users.iter().map(|e| e.value().clone()).collect()
    }

    /// Reserve `username` for `id`. Returns false when another user holds it.
    pub fn claim_username(&self, username: &str, id: Ulid) -> bool {
        let entry = self.usernames.entry(username.to_owned()).or_insert(id);
        *entry.value() == id
    }

    pub fn release_username(&self, username: &str) {
        self.usernames.remove(username);
    }

    pub fn user_by_username(&self, username: &str) -> Option<Ulid> {
        self.usernames.get(username).map(|e| *e.value())
    }

    pub fn claim_email(&self, email: &str, id: Ulid) -> bool {
        let entry = self.emails.entry(email.to_owned()).or_insert(id);
        *entry.value() == id
    }

    pub fn release_email(&self, email: &str) {
        self.emails.remove(email);
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn contains_room(&self, id: &Ulid) -> bool {
        self.rooms.contains_key(id)
    }

    pub fn insert_room(&self, id: Ulid, state: SharedRoomState) {
        self.rooms.insert(id, state);
    }

    pub fn remove_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.remove(id).map(|(_, rs)| rs)
    }

    pub fn room_ids(&self) -> Vec<Ulid> {
        self.rooms.iter().map(|e| *e.key()).collect()
    }

    // ── Resources ────────────────────────────────────────────

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub fn contains_resource(&self, id: &Ulid) -> bool {
        self.resources.contains_key(id)
    }

    pub fn insert_resource(&self, id: Ulid, state: SharedResourceState) {
        self.resources.insert(id, state);
    }

    pub fn remove_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.resources.remove(id).map(|(_, rs)| rs)
    }

    pub fn resource_ids(&self) -> Vec<Ulid> {
        self.resources.iter().map(|e| *e.key()).collect()
    }

    // ── Appointments ─────────────────────────────────────────

    pub fn get_appointment(&self, id: &Ulid) -> Option<Appointment> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    pub fn insert_appointment(&self, appt: Appointment) {
        self.by_owner.entry(appt.user_id).or_default().push(appt.id);
        self.appointments.insert(appt.id, appt);
    }

    /// Replace the record without touching the owner index (owner never changes).
    pub fn replace_appointment(&self, appt: Appointment) {
        self.appointments.insert(appt.id, appt);
    }

    pub fn remove_appointment(&self, id: &Ulid) -> Option<Appointment> {
        let appt = self.appointments.remove(id).map(|(_, a)| a)?;
        if let Some(mut owned) = self.by_owner.get_mut(&appt.user_id) {
            owned.retain(|a| a != id);
        }
        Some(appt)
    }

    pub fn appointments(&self) -> Vec<Appointment> {
        self.appointments.iter().map(|e| e.value().clone()).collect()
    }

    pub fn appointments_for_owner(&self, owner_id: &Ulid) -> Vec<Ulid> {
        self.by_owner
            .get(owner_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn owner_has_appointments(&self, owner_id: &Ulid) -> bool {
        self.by_owner
            .get(owner_id)
            .is_some_and(|owned| !owned.is_empty())
    }
}
