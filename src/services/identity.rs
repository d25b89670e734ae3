use crate::db::BookingStore;
use crate::errors::{AppError, AppResult};

/// Who is asking. Authentication happens upstream; by the time a request
/// reaches the core the caller is either a known user or the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    User(String),
    System,
}

impl Actor {
    pub fn user(id: impl Into<String>) -> Self {
        Actor::User(id.into())
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Actor::User(id) => Some(id.as_str()),
            Actor::System => None,
        }
    }

    /// Recorded as `cancelled_by`.
    pub fn label(&self) -> String {
        match self {
            Actor::User(id) => id.clone(),
            Actor::System => "system".to_string(),
        }
    }

    pub fn is(&self, user_id: &str) -> bool {
        self.user_id() == Some(user_id)
    }
}

/// Whether `actor` owns the business. The system actor owns nothing.
pub fn is_business_owner(
    store: &dyn BookingStore,
    business_id: &str,
    actor: &Actor,
) -> AppResult<bool> {
    let Some(user_id) = actor.user_id() else {
        return Ok(false);
    };
    let business = store
        .find_business(business_id)?
        .ok_or_else(|| AppError::NotFound("business".to_string()))?;
    Ok(business.owner_id == user_id)
}

pub fn require_owner(store: &dyn BookingStore, business_id: &str, actor: &Actor) -> AppResult<()> {
    if is_business_owner(store, business_id, actor)? {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::models::{Business, User};

    fn store() -> SqliteStore {
        let store = SqliteStore::open(":memory:").unwrap();
        for id in ["owner", "stranger"] {
            store
                .save_user(&User {
                    id: id.to_string(),
                    name: id.to_string(),
                    email: None,
                })
                .unwrap();
        }
        store
            .save_business(&Business {
                id: "biz".to_string(),
                owner_id: "owner".to_string(),
                name: "Corner Salon".to_string(),
            })
            .unwrap();
        store
    }

    #[test]
    fn test_only_owner_passes() {
        let store = store();
        assert!(require_owner(&store, "biz", &Actor::user("owner")).is_ok());
        assert!(matches!(
            require_owner(&store, "biz", &Actor::user("stranger")),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            require_owner(&store, "biz", &Actor::System),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn test_unknown_business_is_not_found() {
        let store = store();
        assert!(matches!(
            require_owner(&store, "nope", &Actor::user("owner")),
            Err(AppError::NotFound(_))
        ));
    }
}
