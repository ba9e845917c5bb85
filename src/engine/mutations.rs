use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_resource_window, check_room_slot, now_ms, validate_range};
use super::policy::authorize;
use super::{BookingEngine, BookingError};

fn room_guard(guards: &mut [OwnedRwLockWriteGuard<RoomState>], id: Ulid) -> &mut RoomState {
    let pos = guards
        .iter()
        .position(|g| g.id == id)
        .expect("room locked by caller");
    &mut guards[pos]
}

fn resource_guard(
    guards: &mut [OwnedRwLockWriteGuard<ResourceState>],
    id: Ulid,
) -> &mut ResourceState {
    let pos = guards
        .iter()
        .position(|g| g.id == id)
        .expect("resource locked by caller");
    &mut guards[pos]
}

fn room_conflict(e: BookingError) -> BookingError {
    metrics::counter!(observability::ROOM_CONFLICTS_TOTAL).increment(1);
    e
}

fn resource_conflict(e: BookingError) -> BookingError {
    metrics::counter!(observability::RESOURCE_CONFLICTS_TOTAL).increment(1);
    e
}

impl BookingEngine {
    // ── Appointments ─────────────────────────────────────────

    /// Book a room plus a set of movable resources for `[start, end)`.
    /// All checks run under the room and resource write locks; on any
    /// failure nothing is reserved.
    pub async fn create_appointment(
        &self,
        actor: &Actor,
        room_id: Ulid,
        start: Ms,
        end: Ms,
        resource_ids: &[Ulid],
    ) -> Result<Appointment, BookingError> {
        let t0 = Instant::now();
        let range = validate_range(start, end)?;
        if !self.store().contains_user(&actor.id) {
            return Err(BookingError::NotFound(actor.id));
        }
        let wanted: BTreeSet<Ulid> = resource_ids.iter().copied().collect();
        if wanted.len() > MAX_RESOURCES_PER_APPOINTMENT {
            return Err(BookingError::LimitExceeded("too many resources on appointment"));
        }

        let mut room = self.room_write(room_id).await?;
        let mut res_guards = self.resources_write(&wanted).await?;
        // The room or a resource may have been deleted between lookup and lock.
        if !self.store().contains_room(&room_id) {
            return Err(BookingError::NotFound(room_id));
        }
        for rid in &wanted {
            if !self.store().contains_resource(rid) {
                return Err(BookingError::NotFound(*rid));
            }
        }
        if room.slots.len() >= MAX_SLOTS_PER_ROOM {
            return Err(BookingError::LimitExceeded("too many appointments in room"));
        }

        check_room_slot(&room, &range, None).map_err(room_conflict)?;
        for guard in &res_guards {
            if guard.windows.len() >= MAX_WINDOWS_PER_RESOURCE {
                return Err(BookingError::LimitExceeded("too many reservations on resource"));
            }
            check_resource_window(guard, &range, None).map_err(resource_conflict)?;
        }

        // All validated; commit while still holding every lock.
        let id = Ulid::new();
        let now = now_ms();
        room.slots.insert(Reservation { appointment_id: id, range });
        for rid in &wanted {
            resource_guard(&mut res_guards, *rid)
                .windows
                .insert(Reservation { appointment_id: id, range });
        }
        let appt = Appointment {
            id,
            room_id,
            user_id: actor.id,
            range,
            created_at: now,
            resources: wanted.iter().map(|rid| (*rid, now)).collect(),
        };
        self.store().insert_appointment(appt.clone());

        metrics::counter!(observability::APPOINTMENTS_CREATED_TOTAL).increment(1);
        metrics::histogram!(observability::BOOKING_DURATION_SECONDS)
            .record(t0.elapsed().as_secs_f64());
        info!(%id, %room_id, start = range.start, end = range.end, "appointment created");
        Ok(appt)
    }

    /// Change an appointment's room, time, or resource set. Every addition
    /// (and every retained resource, when the time changes) is validated
    /// before anything is released, so a failed update leaves the original
    /// reservations intact.
    pub async fn update_appointment(
        &self,
        actor: &Actor,
        id: Ulid,
        patch: AppointmentPatch,
    ) -> Result<Appointment, BookingError> {
        let t0 = Instant::now();
        loop {
            let current = self
                .store()
                .get_appointment(&id)
                .ok_or(BookingError::NotFound(id))?;
            authorize(actor, current.user_id)?;

            let new_room = patch.room_id.resolve(&current.room_id);
            let new_range = validate_range(
                patch.start.resolve(&current.range.start),
                patch.end.resolve(&current.range.end),
            )?;
            let current_set = current.resource_ids();
            let new_set = patch.resource_ids.resolve(&current_set);
            if new_set.len() > MAX_RESOURCES_PER_APPOINTMENT {
                return Err(BookingError::LimitExceeded("too many resources on appointment"));
            }

            let mut room_guards = self.rooms_write(&[current.room_id, new_room]).await?;
            let union: BTreeSet<Ulid> = current_set.union(&new_set).copied().collect();
            let mut res_guards = self.resources_write(&union).await?;

            // Another writer may have moved or dropped the appointment while
            // we were waiting on the locks; start over from the fresh record.
            let Some(fresh) = self.store().get_appointment(&id) else {
                return Err(BookingError::NotFound(id));
            };
            if fresh.room_id != current.room_id
                || fresh.range != current.range
                || fresh.resources != current.resources
            {
                continue;
            }
            if !self.store().contains_room(&new_room) {
                return Err(BookingError::NotFound(new_room));
            }
            for rid in &union {
                if !self.store().contains_resource(rid) {
                    return Err(BookingError::NotFound(*rid));
                }
            }

            let range_changed = new_range != current.range;
            let additions: BTreeSet<Ulid> = new_set.difference(&current_set).copied().collect();
            let removals: BTreeSet<Ulid> = current_set.difference(&new_set).copied().collect();
            let retained: BTreeSet<Ulid> = new_set.intersection(&current_set).copied().collect();

            // Validation phase: nothing is mutated until every check passes.
            {
                let target = room_guard(&mut room_guards, new_room);
                if target.slots.len() >= MAX_SLOTS_PER_ROOM {
                    return Err(BookingError::LimitExceeded("too many appointments in room"));
                }
                check_room_slot(target, &new_range, Some(id)).map_err(room_conflict)?;
            }
            for rid in &additions {
                let guard = resource_guard(&mut res_guards, *rid);
                if guard.windows.len() >= MAX_WINDOWS_PER_RESOURCE {
                    return Err(BookingError::LimitExceeded("too many reservations on resource"));
                }
                check_resource_window(guard, &new_range, Some(id)).map_err(resource_conflict)?;
            }
            if range_changed {
                for rid in &retained {
                    let guard = resource_guard(&mut res_guards, *rid);
                    check_resource_window(guard, &new_range, Some(id)).map_err(resource_conflict)?;
                }
            }

            // Commit phase.
            let now = now_ms();
            room_guard(&mut room_guards, current.room_id).slots.remove(id);
            room_guard(&mut room_guards, new_room)
                .slots
                .insert(Reservation { appointment_id: id, range: new_range });

            for rid in &removals {
                resource_guard(&mut res_guards, *rid).windows.remove(id);
            }
            if range_changed {
                for rid in &retained {
                    let guard = resource_guard(&mut res_guards, *rid);
                    guard.windows.remove(id);
                    guard
                        .windows
                        .insert(Reservation { appointment_id: id, range: new_range });
                }
            }
            for rid in &additions {
                resource_guard(&mut res_guards, *rid)
                    .windows
                    .insert(Reservation { appointment_id: id, range: new_range });
            }

            let mut updated = fresh;
            updated.room_id = new_room;
            updated.range = new_range;
            let merged = new_set
                .iter()
                .map(|rid| (*rid, updated.resources.get(rid).copied().unwrap_or(now)))
                .collect();
            updated.resources = merged;
            self.store().replace_appointment(updated.clone());

            metrics::counter!(observability::APPOINTMENTS_UPDATED_TOTAL).increment(1);
            metrics::histogram!(observability::BOOKING_DURATION_SECONDS)
                .record(t0.elapsed().as_secs_f64());
            info!(%id, room = %new_room, "appointment updated");
            return Ok(updated);
        }
    }

    /// Delete an appointment, releasing its room slot and every resource
    /// window. Returns the prior record for confirmation.
    pub async fn delete_appointment(
        &self,
        actor: &Actor,
        id: Ulid,
    ) -> Result<Appointment, BookingError> {
        let t0 = Instant::now();
        loop {
            let current = self
                .store()
                .get_appointment(&id)
                .ok_or(BookingError::NotFound(id))?;
            authorize(actor, current.user_id)?;

            let mut room = self.room_write(current.room_id).await?;
            let mut res_guards = self.resources_write(&current.resource_ids()).await?;

            let Some(fresh) = self.store().get_appointment(&id) else {
                return Err(BookingError::NotFound(id));
            };
            if fresh.room_id != current.room_id || fresh.resources != current.resources {
                continue;
            }

            room.slots.remove(id);
            for rid in fresh.resources.keys() {
                resource_guard(&mut res_guards, *rid).windows.remove(id);
            }
            let prior = self
                .store()
                .remove_appointment(&id)
                .ok_or(BookingError::NotFound(id))?;

            metrics::counter!(observability::APPOINTMENTS_DELETED_TOTAL).increment(1);
            metrics::histogram!(observability::BOOKING_DURATION_SECONDS)
                .record(t0.elapsed().as_secs_f64());
            info!(%id, room = %prior.room_id, "appointment deleted");
            return Ok(prior);
        }
    }

    /// Attach one more resource to an existing appointment. Idempotent when
    /// the link already exists.
    pub async fn add_appointment_resource(
        &self,
        actor: &Actor,
        appointment_id: Ulid,
        resource_id: Ulid,
    ) -> Result<AppointmentResource, BookingError> {
        loop {
            let current = self
                .store()
                .get_appointment(&appointment_id)
                .ok_or(BookingError::NotFound(appointment_id))?;
            authorize(actor, current.user_id)?;

            let _room = self.room_write(current.room_id).await?;
            let rs = self
                .store()
                .get_resource(&resource_id)
                .ok_or(BookingError::NotFound(resource_id))?;
            let mut guard = rs.write_owned().await;

            let Some(fresh) = self.store().get_appointment(&appointment_id) else {
                return Err(BookingError::NotFound(appointment_id));
            };
            if fresh.room_id != current.room_id || fresh.range != current.range {
                continue;
            }
            if !self.store().contains_resource(&resource_id) {
                return Err(BookingError::NotFound(resource_id));
            }
            if let Some(linked_at) = fresh.resources.get(&resource_id) {
                return Ok(AppointmentResource {
                    appointment_id,
                    resource_id,
                    linked_at: *linked_at,
                });
            }
            if fresh.resources.len() >= MAX_RESOURCES_PER_APPOINTMENT {
                return Err(BookingError::LimitExceeded("too many resources on appointment"));
            }
            if guard.windows.len() >= MAX_WINDOWS_PER_RESOURCE {
                return Err(BookingError::LimitExceeded("too many reservations on resource"));
            }
            check_resource_window(&guard, &fresh.range, Some(appointment_id))
                .map_err(resource_conflict)?;

            let now = now_ms();
            guard.windows.insert(Reservation {
                appointment_id,
                range: fresh.range,
            });
            let mut updated = fresh;
            updated.resources.insert(resource_id, now);
            self.store().replace_appointment(updated);

            debug!(%appointment_id, %resource_id, "resource linked");
            return Ok(AppointmentResource {
                appointment_id,
                resource_id,
                linked_at: now,
            });
        }
    }

    /// Detach a resource from an appointment and release its window.
    /// Releasing an already-released pair is a no-op.
    pub async fn remove_appointment_resource(
        &self,
        actor: &Actor,
        appointment_id: Ulid,
        resource_id: Ulid,
    ) -> Result<(), BookingError> {
        loop {
            let current = self
                .store()
                .get_appointment(&appointment_id)
                .ok_or(BookingError::NotFound(appointment_id))?;
            authorize(actor, current.user_id)?;

            let _room = self.room_write(current.room_id).await?;
            let rs = self
                .store()
                .get_resource(&resource_id)
                .ok_or(BookingError::NotFound(resource_id))?;
            let mut guard = rs.write_owned().await;

            let Some(fresh) = self.store().get_appointment(&appointment_id) else {
                return Err(BookingError::NotFound(appointment_id));
            };
            if fresh.room_id != current.room_id {
                continue;
            }

            guard.windows.remove(appointment_id);
            let mut updated = fresh;
            updated.resources.remove(&resource_id);
            self.store().replace_appointment(updated);

            debug!(%appointment_id, %resource_id, "resource released");
            return Ok(());
        }
    }

    // ── Rooms ────────────────────────────────────────────────

    /// Create a room, binding the given resources as its fixed equipment.
    /// Bound resources become Fixed and Unavailable to ad-hoc booking.
    pub async fn create_room(
        &self,
        name: &str,
        capacity: u32,
        fixed_resource_ids: &[Ulid],
    ) -> Result<RoomInfo, BookingError> {
        if name.len() > MAX_NAME_LEN {
            return Err(BookingError::LimitExceeded("room name too long"));
        }
        let wanted: BTreeSet<Ulid> = fixed_resource_ids.iter().copied().collect();
        if wanted.len() > MAX_FIXED_RESOURCES_PER_ROOM {
            return Err(BookingError::LimitExceeded("too many fixed resources"));
        }

        let mut res_guards = self.resources_write(&wanted).await?;
        for guard in &res_guards {
            if !self.store().contains_resource(&guard.id) {
                return Err(BookingError::NotFound(guard.id));
            }
            // A resource can be fixed to at most one room, and binding one
            // with live reservations would strand those appointments.
            if guard.room_id.is_some() || !guard.windows.is_empty() {
                return Err(BookingError::InUse(guard.id));
            }
        }

        let id = Ulid::new();
        let mut room = RoomState::new(id, name.to_owned(), capacity);
        for guard in res_guards.iter_mut() {
            guard.kind = ResourceKind::Fixed;
            guard.availability = Availability::Unavailable;
            guard.room_id = Some(id);
            room.fixed_resources.insert(guard.id);
        }
        let info = RoomInfo::from(&room);
        self.store().insert_room(id, Arc::new(RwLock::new(room)));

        info!(%id, name, "room created");
        Ok(info)
    }

    /// Patch a room's name, capacity, or fixed resource set. Unbound
    /// resources revert to Movable + Available.
    pub async fn update_room(&self, id: Ulid, patch: RoomPatch) -> Result<RoomInfo, BookingError> {
        if let Patch::Set(name) = &patch.name
            && name.len() > MAX_NAME_LEN {
                return Err(BookingError::LimitExceeded("room name too long"));
            }

        let mut room = self.room_write(id).await?;
        if !self.store().contains_room(&id) {
            return Err(BookingError::NotFound(id));
        }

        let new_fixed = patch.fixed_resources.resolve(&room.fixed_resources);
        if new_fixed.len() > MAX_FIXED_RESOURCES_PER_ROOM {
            return Err(BookingError::LimitExceeded("too many fixed resources"));
        }
        let to_add: BTreeSet<Ulid> = new_fixed.difference(&room.fixed_resources).copied().collect();
        let to_remove: BTreeSet<Ulid> =
            room.fixed_resources.difference(&new_fixed).copied().collect();
        let union: BTreeSet<Ulid> = to_add.union(&to_remove).copied().collect();
        let mut res_guards = self.resources_write(&union).await?;

        for rid in &to_add {
            let guard = resource_guard(&mut res_guards, *rid);
            if guard.room_id.is_some() || !guard.windows.is_empty() {
                return Err(BookingError::InUse(*rid));
            }
        }

        for rid in &to_remove {
            let guard = resource_guard(&mut res_guards, *rid);
            guard.kind = ResourceKind::Movable;
            guard.availability = Availability::Available;
            guard.room_id = None;
        }
        for rid in &to_add {
            let guard = resource_guard(&mut res_guards, *rid);
            guard.kind = ResourceKind::Fixed;
            guard.availability = Availability::Unavailable;
            guard.room_id = Some(id);
        }
        patch.name.apply(&mut room.name);
        patch.capacity.apply(&mut room.capacity);
        room.fixed_resources = new_fixed;

        debug!(%id, "room updated");
        Ok(RoomInfo::from(&*room))
    }

    /// Delete a room with no appointments, releasing its fixed resources
    /// back to movable/available.
    pub async fn delete_room(&self, id: Ulid) -> Result<RoomInfo, BookingError> {
        let room = self.room_write(id).await?;
        if !self.store().contains_room(&id) {
            return Err(BookingError::NotFound(id));
        }
        if !room.slots.is_empty() {
            return Err(BookingError::InUse(id));
        }

        let mut res_guards = self.resources_write(&room.fixed_resources).await?;
        for guard in res_guards.iter_mut() {
            guard.kind = ResourceKind::Movable;
            guard.availability = Availability::Available;
            guard.room_id = None;
        }

        let info = RoomInfo::from(&*room);
        self.store().remove_room(&id);
        info!(%id, "room deleted");
        Ok(info)
    }

    // ── Resources ────────────────────────────────────────────

    pub async fn create_resource(
        &self,
        name: &str,
        kind: ResourceKind,
        availability: Availability,
    ) -> Result<ResourceInfo, BookingError> {
        if name.len() > MAX_NAME_LEN {
            return Err(BookingError::LimitExceeded("resource name too long"));
        }
        let id = Ulid::new();
        let rs = ResourceState::new(id, name.to_owned(), kind, availability);
        let info = ResourceInfo::from(&rs);
        self.store().insert_resource(id, Arc::new(RwLock::new(rs)));
        debug!(%id, name, "resource created");
        Ok(info)
    }

    /// Patch a resource. Kind and availability of a room-bound resource are
    /// managed by its room and cannot be patched directly; flipping either
    /// flag is also refused while reservation windows exist, so a committed
    /// booking can never be stranded on an unbookable resource.
    pub async fn update_resource(
        &self,
        id: Ulid,
        patch: ResourcePatch,
    ) -> Result<ResourceInfo, BookingError> {
        if let Patch::Set(name) = &patch.name
            && name.len() > MAX_NAME_LEN {
                return Err(BookingError::LimitExceeded("resource name too long"));
            }

        let rs = self
            .store()
            .get_resource(&id)
            .ok_or(BookingError::NotFound(id))?;
        let mut guard = rs.write_owned().await;
        if !self.store().contains_resource(&id) {
            return Err(BookingError::NotFound(id));
        }
        if (patch.kind.is_set() || patch.availability.is_set())
            && (guard.room_id.is_some() || !guard.windows.is_empty())
        {
            return Err(BookingError::InUse(id));
        }

        patch.name.apply(&mut guard.name);
        patch.kind.apply(&mut guard.kind);
        patch.availability.apply(&mut guard.availability);

        debug!(%id, "resource updated");
        Ok(ResourceInfo::from(&*guard))
    }

    /// Delete a resource that is neither reserved by any appointment nor
    /// fixed to a room's equipment (unbind it via the room first).
    pub async fn delete_resource(&self, id: Ulid) -> Result<ResourceInfo, BookingError> {
        loop {
            let rs = self
                .store()
                .get_resource(&id)
                .ok_or(BookingError::NotFound(id))?;
            let bound_room = rs.read().await.room_id;

            // Lock order is rooms before resources, so resolve the binding
            // first and retry if it moved underneath us.
            let _room = match bound_room {
                Some(room_id) => Some(self.room_write(room_id).await?),
                None => None,
            };
            let guard = rs.write_owned().await;
            if !self.store().contains_resource(&id) {
                return Err(BookingError::NotFound(id));
            }
            if guard.room_id != bound_room {
                continue;
            }
            if guard.room_id.is_some() || !guard.windows.is_empty() {
                return Err(BookingError::InUse(id));
            }

            let info = ResourceInfo::from(&*guard);
            self.store().remove_resource(&id);
            debug!(%id, "resource deleted");
            return Ok(info);
        }
    }

    // ── Users ────────────────────────────────────────────────

    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<User, BookingError> {
        if username.len() > MAX_NAME_LEN || email.len() > MAX_NAME_LEN {
            return Err(BookingError::LimitExceeded("username or email too long"));
        }
        let id = Ulid::new();
        if !self.store().claim_username(username, id) {
            return Err(BookingError::UsernameTaken(username.to_owned()));
        }
        if !self.store().claim_email(email, id) {
            self.store().release_username(username);
            return Err(BookingError::EmailTaken(email.to_owned()));
        }
        let user = User {
            id,
            username: username.to_owned(),
            email: email.to_owned(),
            password_hash: password_hash.to_owned(),
            role,
            created_at: now_ms(),
        };
        self.store().insert_user(user.clone());
        info!(%id, username, "user created");
        Ok(user)
    }

    pub async fn update_user(&self, id: Ulid, patch: UserPatch) -> Result<User, BookingError> {
        let mut user = self
            .store()
            .get_user(&id)
            .ok_or(BookingError::NotFound(id))?;

        let new_username = match &patch.username {
            Patch::Set(u) if u != &user.username => Some(u.clone()),
            _ => None,
        };
        let new_email = match &patch.email {
            Patch::Set(e) if e != &user.email => Some(e.clone()),
            _ => None,
        };
        if new_username.as_ref().is_some_and(|u| u.len() > MAX_NAME_LEN) {
            return Err(BookingError::LimitExceeded("username too long"));
        }
        if new_email.as_ref().is_some_and(|e| e.len() > MAX_NAME_LEN) {
            return Err(BookingError::LimitExceeded("email too long"));
        }

        // Claim both new index entries before releasing either old one, so a
        // failed update leaves both indexes exactly as they were.
        if let Some(username) = &new_username
            && !self.store().claim_username(username, id)
        {
            return Err(BookingError::UsernameTaken(username.clone()));
        }
        if let Some(email) = &new_email
            && !self.store().claim_email(email, id)
        {
            if let Some(username) = &new_username {
                self.store().release_username(username);
            }
            return Err(BookingError::EmailTaken(email.clone()));
        }
        if new_username.is_some() {
            self.store().release_username(&user.username);
        }
        if new_email.is_some() {
            self.store().release_email(&user.email);
        }

        patch.username.apply(&mut user.username);
        patch.email.apply(&mut user.email);
        patch.password_hash.apply(&mut user.password_hash);
        patch.role.apply(&mut user.role);
        self.store().insert_user(user.clone());
        debug!(%id, "user updated");
        Ok(user)
    }

    /// Delete a user who owns no appointments.
    pub async fn delete_user(&self, id: Ulid) -> Result<User, BookingError> {
        if self.store().owner_has_appointments(&id) {
            return Err(BookingError::InUse(id));
        }
        let user = self
            .store()
            .remove_user(&id)
            .ok_or(BookingError::NotFound(id))?;
        self.store().release_username(&user.username);
        self.store().release_email(&user.email);
        info!(%id, "user deleted");
        Ok(user)
    }
}
