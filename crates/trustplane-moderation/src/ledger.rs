//! Append-only record of completed moderation actions

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use trustplane_common::{ActionType, ModerationAction};

/// Filter for ledger listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerQuery {
    pub actor_id: Option<String>,
    pub action_type: Option<ActionType>,
    /// Newest N
    pub limit: Option<usize>,
}

#[derive(Default)]
struct LedgerInner {
    actions: Vec<ModerationAction>,
    by_id: HashMap<Uuid, usize>,
}

/// Completed actions in publication order
#[derive(Default)]
pub struct ActionLedger {
    inner: RwLock<LedgerInner>,
}

impl ActionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a completed action. Returns false if the id was already
    /// published; the stored action is left as is.
    pub fn publish(&self, action: ModerationAction) -> bool {
        let mut inner = self.inner.write();
        if inner.by_id.contains_key(&action.id) {
            warn!(action_id = %action.id, "Ignored republish of moderation action");
            return false;
        }
        let index = inner.actions.len();
        inner.by_id.insert(action.id, index);
        inner.actions.push(action);
        true
    }

    pub fn get(&self, id: &Uuid) -> Option<ModerationAction> {
        let inner = self.inner.read();
        inner.by_id.get(id).map(|&i| inner.actions[i].clone())
    }

    /// Matching actions, newest first
    pub fn list(&self, query: &LedgerQuery) -> Vec<ModerationAction> {
        let inner = self.inner.read();
        inner
            .actions
            .iter()
            .rev()
            .filter(|a| query.actor_id.as_ref().map_or(true, |actor| &a.actor_id == actor))
            .filter(|a| query.action_type.map_or(true, |t| a.action_type == t))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
