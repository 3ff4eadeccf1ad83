//! ModerationAction - one bulk moderation invocation
//!
//! Every `apply` produces exactly one ModerationAction. It contains:
//! - Who requested it and what kind of transition it performs
//! - The deduplicated target set
//! - Exactly one per-target result for every requested target
//! - Lifecycle status (`Requested -> Applying -> Completed`)
//!
//! Failure is per target; there is no failed state at the action level.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entity domain a moderation action targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Media,
    Twin,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::User => write!(f, "user"),
            EntityKind::Media => write!(f, "media"),
            EntityKind::Twin => write!(f, "twin"),
        }
    }
}

/// Bulk moderation action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Set a user's active flag to false
    SuspendUser,
    /// Set a user's active flag back to true
    ReinstateUser,
    /// Hide a media file from public view
    FlagMedia,
    /// Make a flagged media file public again
    RestoreMedia,
    /// Set a twin's active flag to false
    DeactivateTwin,
    /// Set a twin's active flag to true
    ActivateTwin,
}

impl ActionType {
    /// Entity domain and the flag value this action drives it to
    pub fn desired_state(&self) -> (EntityKind, bool) {
        match self {
            ActionType::SuspendUser => (EntityKind::User, false),
            ActionType::ReinstateUser => (EntityKind::User, true),
            ActionType::FlagMedia => (EntityKind::Media, false),
            ActionType::RestoreMedia => (EntityKind::Media, true),
            ActionType::DeactivateTwin => (EntityKind::Twin, false),
            ActionType::ActivateTwin => (EntityKind::Twin, true),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SuspendUser => "suspend_user",
            ActionType::ReinstateUser => "reinstate_user",
            ActionType::FlagMedia => "flag_media",
            ActionType::RestoreMedia => "restore_media",
            ActionType::DeactivateTwin => "deactivate_twin",
            ActionType::ActivateTwin => "activate_twin",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one target's mutation attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum TargetResult {
    /// The transition was performed by this invocation
    Applied,
    /// The target id did not resolve
    NotFound,
    /// The target was already in the desired state
    AlreadyInState,
    /// Downstream failure, reason preserved verbatim
    Failed(String),
    /// The entity store could not be reached
    Unavailable(String),
}

impl TargetResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, TargetResult::Applied)
    }
}

/// Action lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Requested,
    Applying,
    Completed,
}

/// What caused an action to be requested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionTrigger {
    /// An operator picked the targets
    Manual,
    /// A metrics threshold rule was breached
    Threshold { rule: String, observed_rate: f64 },
}

/// Per-result counts for one action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTally {
    pub applied: usize,
    pub not_found: usize,
    pub already_in_state: usize,
    pub failed: usize,
    pub unavailable: usize,
}

/// Recorded bulk moderation action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationAction {
    pub id: Uuid,
    pub actor_id: String,
    pub action_type: ActionType,
    pub target_ids: BTreeSet<String>,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ActionStatus,
    pub trigger: ActionTrigger,
    pub per_target_result: BTreeMap<String, TargetResult>,
}

impl ModerationAction {
    /// Create a new action in the `Requested` state
    pub fn new(
        id: Uuid,
        actor_id: &str,
        action_type: ActionType,
        target_ids: BTreeSet<String>,
        trigger: ActionTrigger,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            actor_id: actor_id.to_string(),
            action_type,
            target_ids,
            requested_at,
            completed_at: None,
            status: ActionStatus::Requested,
            trigger,
            per_target_result: BTreeMap::new(),
        }
    }

    /// Transition `Requested -> Applying`
    pub fn begin(&mut self) {
        debug_assert_eq!(self.status, ActionStatus::Requested);
        self.status = ActionStatus::Applying;
    }

    /// Transition `Applying -> Completed` with the full result mapping.
    ///
    /// Targets missing from `results` are recorded as failed so the mapping
    /// always has exactly one entry per requested target.
    pub fn complete(
        &mut self,
        mut results: BTreeMap<String, TargetResult>,
        completed_at: DateTime<Utc>,
    ) {
        results.retain(|id, _| self.target_ids.contains(id));
        for id in &self.target_ids {
            results
                .entry(id.clone())
                .or_insert_with(|| TargetResult::Failed("no result recorded".to_string()));
        }
        self.per_target_result = results;
        self.completed_at = Some(completed_at);
        self.status = ActionStatus::Completed;
    }

    /// Count results by outcome
    pub fn tally(&self) -> ActionTally {
        let mut tally = ActionTally::default();
        for result in self.per_target_result.values() {
            match result {
                TargetResult::Applied => tally.applied += 1,
                TargetResult::NotFound => tally.not_found += 1,
                TargetResult::AlreadyInState => tally.already_in_state += 1,
                TargetResult::Failed(_) => tally.failed += 1,
                TargetResult::Unavailable(_) => tally.unavailable += 1,
            }
        }
        tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_lifecycle() {
        let mut action = ModerationAction::new(
            Uuid::now_v7(),
            "admin",
            ActionType::SuspendUser,
            targets(&["u1", "u2"]),
            ActionTrigger::Manual,
            Utc::now(),
        );
        assert_eq!(action.status, ActionStatus::Requested);

        action.begin();
        assert_eq!(action.status, ActionStatus::Applying);

        let mut results = BTreeMap::new();
        results.insert("u1".to_string(), TargetResult::Applied);
        results.insert("stray".to_string(), TargetResult::Applied);
        action.complete(results, Utc::now());

        assert_eq!(action.status, ActionStatus::Completed);
        assert_eq!(action.per_target_result.len(), 2);
        assert!(matches!(action.per_target_result["u2"], TargetResult::Failed(_)));
        assert!(!action.per_target_result.contains_key("stray"));
    }

    #[test]
    fn test_tally() {
        let mut action = ModerationAction::new(
            Uuid::now_v7(),
            "admin",
            ActionType::FlagMedia,
            targets(&["m1", "m2", "m3"]),
            ActionTrigger::Manual,
            Utc::now(),
        );
        action.begin();
        let results = BTreeMap::from([
            ("m1".to_string(), TargetResult::Applied),
            ("m2".to_string(), TargetResult::NotFound),
            ("m3".to_string(), TargetResult::Failed("disk full".into())),
        ]);
        action.complete(results, Utc::now());

        let tally = action.tally();
        assert_eq!(tally.applied, 1);
        assert_eq!(tally.not_found, 1);
        assert_eq!(tally.failed, 1);
    }

    #[test]
    fn test_desired_state() {
        assert_eq!(ActionType::SuspendUser.desired_state(), (EntityKind::User, false));
        assert_eq!(ActionType::FlagMedia.desired_state(), (EntityKind::Media, false));
        assert_eq!(ActionType::ActivateTwin.desired_state(), (EntityKind::Twin, true));
    }

    #[test]
    fn test_target_result_json() {
        let json = serde_json::to_string(&TargetResult::Failed("timeout".into())).unwrap();
        assert!(json.contains("failed"));
        assert!(json.contains("timeout"));
    }
}
