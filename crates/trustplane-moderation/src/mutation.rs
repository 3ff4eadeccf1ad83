//! Entity mutation interface
//!
//! The executor never touches entity state directly. Every transition goes
//! through an [`EntityMutator`], which reports whether it changed anything.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use trustplane_common::{EntityKind, MutationError};

/// Result of a successful state write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// The flag changed
    Applied,
    /// The flag already had the requested value
    Unchanged,
}

/// Writes to the user, media, and twin stores
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntityMutator: Send + Sync {
    async fn set_user_active(&self, user_id: &str, active: bool)
        -> Result<Transition, MutationError>;

    async fn set_media_visibility(
        &self,
        media_id: &str,
        public: bool,
    ) -> Result<Transition, MutationError>;

    async fn set_twin_active(&self, twin_id: &str, active: bool)
        -> Result<Transition, MutationError>;
}

/// Route a flag write to the store owning `kind`
pub async fn set_state(
    mutator: &dyn EntityMutator,
    kind: EntityKind,
    id: &str,
    value: bool,
) -> Result<Transition, MutationError> {
    match kind {
        EntityKind::User => mutator.set_user_active(id, value).await,
        EntityKind::Media => mutator.set_media_visibility(id, value).await,
        EntityKind::Twin => mutator.set_twin_active(id, value).await,
    }
}

/// In-memory entity flags (for development/testing)
#[derive(Default)]
pub struct InMemoryEntityStore {
    users: DashMap<String, bool>,
    media: DashMap<String, bool>,
    twins: DashMap<String, bool>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: EntityKind) -> &DashMap<String, bool> {
        match kind {
            EntityKind::User => &self.users,
            EntityKind::Media => &self.media,
            EntityKind::Twin => &self.twins,
        }
    }

    /// Register an entity with its current flag
    pub fn insert(&self, kind: EntityKind, id: &str, flag: bool) {
        self.table(kind).insert(id.to_string(), flag);
    }

    /// Current flag of an entity
    pub fn flag(&self, kind: EntityKind, id: &str) -> Option<bool> {
        self.table(kind).get(id).map(|v| *v)
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.table(kind).len()
    }

    fn write(&self, kind: EntityKind, id: &str, value: bool) -> Result<Transition, MutationError> {
        let mut flag = self
            .table(kind)
            .get_mut(id)
            .ok_or_else(|| MutationError::NotFound(id.to_string()))?;

        if *flag == value {
            return Ok(Transition::Unchanged);
        }
        *flag = value;
        debug!(%kind, id, value, "Entity flag updated");
        Ok(Transition::Applied)
    }
}

#[async_trait]
impl EntityMutator for InMemoryEntityStore {
    async fn set_user_active(
        &self,
        user_id: &str,
        active: bool,
    ) -> Result<Transition, MutationError> {
        self.write(EntityKind::User, user_id, active)
    }

    async fn set_media_visibility(
        &self,
        media_id: &str,
        public: bool,
    ) -> Result<Transition, MutationError> {
        self.write(EntityKind::Media, media_id, public)
    }

    async fn set_twin_active(
        &self,
        twin_id: &str,
        active: bool,
    ) -> Result<Transition, MutationError> {
        self.write(EntityKind::Twin, twin_id, active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_reports_transition() {
        let store = InMemoryEntityStore::new();
        store.insert(EntityKind::User, "u1", true);

        assert_eq!(
            store.set_user_active("u1", false).await.unwrap(),
            Transition::Applied
        );
        assert_eq!(
            store.set_user_active("u1", false).await.unwrap(),
            Transition::Unchanged
        );
        assert_eq!(store.flag(EntityKind::User, "u1"), Some(false));
    }

    #[tokio::test]
    async fn test_unknown_entity() {
        let store = InMemoryEntityStore::new();
        let err = store.set_twin_active("t9", false).await.unwrap_err();
        assert_eq!(err, MutationError::NotFound("t9".to_string()));
    }

    #[tokio::test]
    async fn test_set_state_routes_by_kind() {
        let store = InMemoryEntityStore::new();
        store.insert(EntityKind::Media, "m1", true);
        store.insert(EntityKind::User, "m1", true);

        set_state(&store, EntityKind::Media, "m1", false).await.unwrap();
        assert_eq!(store.flag(EntityKind::Media, "m1"), Some(false));
        assert_eq!(store.flag(EntityKind::User, "m1"), Some(true));
    }
}
