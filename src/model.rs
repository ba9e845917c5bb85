use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Ms,
    pub end: Ms,
}

impl TimeRange {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `other` lies fully inside `self`.
    pub fn contains_range(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    User,
}

/// The authenticated principal, as supplied by the identity collaborator.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub username: String,
    pub email: String,
    /// Opaque credential set by the identity collaborator; never verified here.
    pub password_hash: String,
    pub role: Role,
    pub created_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Movable,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    Available,
    Unavailable,
}

/// One reservation of a room or resource by an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub appointment_id: Ulid,
    pub range: TimeRange,
}

/// Reservations sorted by `range.start`. Shared by room slots and resource
/// windows; the binary-search overlap scan is the hot path of every
/// conflict check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationList(Vec<Reservation>);

impl ReservationList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reservation> {
        self.0.iter()
    }

    /// Insert maintaining sort order by range.start.
    pub fn insert(&mut self, res: Reservation) {
        let pos = self
            .0
            .binary_search_by_key(&res.range.start, |r| r.range.start)
            .unwrap_or_else(|e| e);
        self.0.insert(pos, res);
    }

    /// Remove the reservation held by `appointment_id`. Idempotent: returns
    /// `None` when no such reservation exists.
    pub fn remove(&mut self, appointment_id: Ulid) -> Option<Reservation> {
        if let Some(pos) = self.0.iter().position(|r| r.appointment_id == appointment_id) {
            Some(self.0.remove(pos))
        } else {
            None
        }
    }

    pub fn get(&self, appointment_id: Ulid) -> Option<&Reservation> {
        self.0.iter().find(|r| r.appointment_id == appointment_id)
    }

    /// Return only reservations whose range overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &TimeRange) -> impl Iterator<Item = &Reservation> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self.0.partition_point(|r| r.range.start < query.end);
        self.0[..right_bound]
            .iter()
            .filter(move |r| r.range.end > query.start)
    }
}

/// A room plus its live booking state. Guarded by one `RwLock` per room.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    /// Resources permanently bound to this room.
    pub fixed_resources: BTreeSet<Ulid>,
    /// Appointment slots, sorted by start.
    pub slots: ReservationList,
}

impl RoomState {
    pub fn new(id: Ulid, name: String, capacity: u32) -> Self {
        Self {
            id,
            name,
            capacity,
            fixed_resources: BTreeSet::new(),
            slots: ReservationList::new(),
        }
    }
}

/// A resource plus its reservation windows. Guarded by one `RwLock` per
/// resource. The availability flag mirrors room binding for fixed resources;
/// booking conflicts for movable resources are decided by window overlap.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub name: String,
    pub kind: ResourceKind,
    pub availability: Availability,
    /// The room this resource is fixed to, if any.
    pub room_id: Option<Ulid>,
    /// Reservation windows, sorted by start.
    pub windows: ReservationList,
}

impl ResourceState {
    pub fn new(id: Ulid, name: String, kind: ResourceKind, availability: Availability) -> Self {
        Self {
            id,
            name,
            kind,
            availability,
            room_id: None,
            windows: ReservationList::new(),
        }
    }
}

/// A committed appointment. The resource map is the appointment↔resource
/// join relation: resource id → linked_at timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub range: TimeRange,
    pub created_at: Ms,
    pub resources: BTreeMap<Ulid, Ms>,
}

impl Appointment {
    pub fn resource_ids(&self) -> BTreeSet<Ulid> {
        self.resources.keys().copied().collect()
    }
}

/// Materialized appointment↔resource link row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentResource {
    pub appointment_id: Ulid,
    pub resource_id: Ulid,
    pub linked_at: Ms,
}

// ── Patches ──────────────────────────────────────────────────────

/// Tri-state update field: absent (leave unchanged) vs. present (set).
/// `Set` of an empty collection or zero value is a real update, never a skip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    #[default]
    Keep,
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_set(&self) -> bool {
        matches!(self, Patch::Set(_))
    }

    /// Value to use given the current one.
    pub fn resolve(&self, current: &T) -> T
    where
        T: Clone,
    {
        match self {
            Patch::Keep => current.clone(),
            Patch::Set(v) => v.clone(),
        }
    }

    pub fn apply(self, slot: &mut T) {
        if let Patch::Set(v) = self {
            *slot = v;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppointmentPatch {
    pub room_id: Patch<Ulid>,
    pub start: Patch<Ms>,
    pub end: Patch<Ms>,
    pub resource_ids: Patch<BTreeSet<Ulid>>,
}

#[derive(Debug, Clone, Default)]
pub struct RoomPatch {
    pub name: Patch<String>,
    pub capacity: Patch<u32>,
    pub fixed_resources: Patch<BTreeSet<Ulid>>,
}

#[derive(Debug, Clone, Default)]
pub struct ResourcePatch {
    pub name: Patch<String>,
    pub kind: Patch<ResourceKind>,
    pub availability: Patch<Availability>,
}

#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub username: Patch<String>,
    pub email: Patch<String>,
    pub password_hash: Patch<String>,
    pub role: Patch<Role>,
}

// ── Snapshot events ──────────────────────────────────────────────

/// Minimal event set recreating engine state. Replay order is users and
/// resources, then rooms (bindings reference resources), then appointments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserCreated {
        id: Ulid,
        username: String,
        email: String,
        password_hash: String,
        role: Role,
        created_at: Ms,
    },
    ResourceCreated {
        id: Ulid,
        name: String,
        kind: ResourceKind,
        availability: Availability,
    },
    RoomCreated {
        id: Ulid,
        name: String,
        capacity: u32,
        fixed_resources: BTreeSet<Ulid>,
    },
    AppointmentBooked {
        id: Ulid,
        room_id: Ulid,
        user_id: Ulid,
        range: TimeRange,
        created_at: Ms,
        resources: BTreeMap<Ulid, Ms>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub fixed_resources: Vec<Ulid>,
}

impl From<&RoomState> for RoomInfo {
    fn from(rs: &RoomState) -> Self {
        Self {
            id: rs.id,
            name: rs.name.clone(),
            capacity: rs.capacity,
            fixed_resources: rs.fixed_resources.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub name: String,
    pub kind: ResourceKind,
    pub availability: Availability,
    pub room_id: Option<Ulid>,
}

impl From<&ResourceState> for ResourceInfo {
    fn from(rs: &ResourceState) -> Self {
        Self {
            id: rs.id,
            name: rs.name.clone(),
            kind: rs.kind,
            availability: rs.availability,
            room_id: rs.room_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_basics() {
        let r = TimeRange::new(100, 200);
        assert_eq!(r.duration_ms(), 100);
        let inner = TimeRange::new(150, 200);
        assert!(r.contains_range(&inner));
        assert!(r.contains_range(&r)); // self-containment
        assert!(!r.contains_range(&TimeRange::new(150, 250)));
    }

    #[test]
    fn range_overlap() {
        let a = TimeRange::new(100, 200);
        let b = TimeRange::new(150, 250);
        let c = TimeRange::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    fn res(start: Ms, end: Ms) -> Reservation {
        Reservation {
            appointment_id: Ulid::new(),
            range: TimeRange::new(start, end),
        }
    }

    #[test]
    fn reservation_ordering() {
        let mut list = ReservationList::new();
        list.insert(res(300, 400));
        list.insert(res(100, 200));
        list.insert(res(200, 300));
        let starts: Vec<Ms> = list.iter().map(|r| r.range.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn reservation_remove_is_idempotent() {
        let mut list = ReservationList::new();
        let r = res(100, 200);
        list.insert(r);
        assert!(list.remove(r.appointment_id).is_some());
        assert!(list.remove(r.appointment_id).is_none());
        assert!(list.is_empty());
    }

    #[test]
    fn overlapping_skips_disjoint() {
        let mut list = ReservationList::new();
        list.insert(res(100, 200)); // past
        list.insert(res(450, 600)); // hit
        list.insert(res(1000, 1100)); // future
        let query = TimeRange::new(500, 800);
        let hits: Vec<_> = list.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].range, TimeRange::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        // Reservation ending exactly at query.start is NOT overlapping (half-open)
        let mut list = ReservationList::new();
        list.insert(res(100, 200));
        let hits: Vec<_> = list.overlapping(&TimeRange::new(200, 300)).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn overlapping_spanning_reservation() {
        let mut list = ReservationList::new();
        list.insert(res(0, 10_000));
        let hits: Vec<_> = list.overlapping(&TimeRange::new(500, 600)).collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn patch_default_keeps() {
        let p: Patch<u32> = Patch::default();
        assert_eq!(p.resolve(&7), 7);
        let mut v = 7;
        Patch::Set(0).apply(&mut v);
        assert_eq!(v, 0); // zero is a real update
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::RoomCreated {
            id: Ulid::new(),
            name: "Atrium".into(),
            capacity: 4,
            fixed_resources: BTreeSet::new(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, decoded);
    }
}
