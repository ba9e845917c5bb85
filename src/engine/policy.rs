use ulid::Ulid;

use crate::model::Actor;

use super::BookingError;

/// The single access control check for appointment mutations: owner or admin.
/// Callers invoke this before touching any state; a deny is always surfaced,
/// never silently ignored.
pub fn authorize(actor: &Actor, owner_id: Ulid) -> Result<(), BookingError> {
    if actor.is_admin() || actor.id == owner_id {
        Ok(())
    } else {
        metrics::counter!(crate::observability::FORBIDDEN_TOTAL).increment(1);
        Err(BookingError::Forbidden(actor.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    #[test]
    fn owner_and_admin_allowed_others_denied() {
        let owner = Ulid::new();
        let as_owner = Actor { id: owner, role: Role::User };
        let admin = Actor { id: Ulid::new(), role: Role::Admin };
        let stranger = Actor { id: Ulid::new(), role: Role::User };

        assert!(authorize(&as_owner, owner).is_ok());
        assert!(authorize(&admin, owner).is_ok());
        assert_eq!(
            authorize(&stranger, owner),
            Err(BookingError::Forbidden(stranger.id))
        );
    }
}
