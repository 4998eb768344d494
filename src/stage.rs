use std::fmt;

use anyhow::anyhow;
use serde::Serialize;

use crate::error::{LibError, Result};
use crate::models::UserId;

/// Where a single user's backfill transaction currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillStage {
    Start,
    GraphCreated,
    MembershipCreated,
    DocumentsReassigned,
    CountUpdated,
    Committed,
    Failed,
    RolledBack,
}

impl BackfillStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            BackfillStage::Start => "start",
            BackfillStage::GraphCreated => "graph_created",
            BackfillStage::MembershipCreated => "membership_created",
            BackfillStage::DocumentsReassigned => "documents_reassigned",
            BackfillStage::CountUpdated => "count_updated",
            BackfillStage::Committed => "committed",
            BackfillStage::Failed => "failed",
            BackfillStage::RolledBack => "rolled_back",
        }
    }

    /// The stage that follows a successful step, if any.
    pub const fn next(self) -> Option<Self> {
        match self {
            BackfillStage::Start => Some(BackfillStage::GraphCreated),
            BackfillStage::GraphCreated => Some(BackfillStage::MembershipCreated),
            BackfillStage::MembershipCreated => Some(BackfillStage::DocumentsReassigned),
            BackfillStage::DocumentsReassigned => Some(BackfillStage::CountUpdated),
            BackfillStage::CountUpdated => Some(BackfillStage::Committed),
            BackfillStage::Failed => Some(BackfillStage::RolledBack),
            BackfillStage::Committed | BackfillStage::RolledBack => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, BackfillStage::Committed | BackfillStage::RolledBack)
    }

    pub fn can_transition_to(self, target: BackfillStage) -> bool {
        match target {
            BackfillStage::Failed => !self.is_terminal() && self != BackfillStage::Failed,
            _ => self.next() == Some(target),
        }
    }
}

impl fmt::Display for BackfillStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one user's walk through [`BackfillStage`]s.
#[derive(Debug, Clone)]
pub struct BackfillProgress {
    user_id: UserId,
    stage: BackfillStage,
    failed_at: Option<BackfillStage>,
}

impl BackfillProgress {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            stage: BackfillStage::Start,
            failed_at: None,
        }
    }

    pub fn stage(&self) -> BackfillStage {
        self.stage
    }

    /// Last stage reached before the failure, when the user failed.
    pub fn failed_at(&self) -> Option<BackfillStage> {
        self.failed_at
    }

    pub fn advance(&mut self, target: BackfillStage) -> Result<()> {
        if !self.stage.can_transition_to(target) {
            return Err(LibError::unknown(
                "Invalid backfill stage transition",
                anyhow!(
                    "user {} cannot move from {} to {}",
                    self.user_id,
                    self.stage,
                    target
                ),
            ));
        }

        tracing::debug!(
            user_id = %self.user_id,
            from = %self.stage,
            to = %target,
            "backfill stage"
        );
        if target == BackfillStage::Failed {
            self.failed_at = Some(self.stage);
        }
        self.stage = target;
        Ok(())
    }

    /// Records a failure followed by the rollback of the user's transaction.
    pub fn fail(&mut self) {
        if self.stage.can_transition_to(BackfillStage::Failed) {
            self.failed_at = Some(self.stage);
            self.stage = BackfillStage::Failed;
        }
        if self.stage == BackfillStage::Failed {
            self.stage = BackfillStage::RolledBack;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_every_stage_in_order() {
        let mut progress = BackfillProgress::new(UserId::new_v4());
        for stage in [
            BackfillStage::GraphCreated,
            BackfillStage::MembershipCreated,
            BackfillStage::DocumentsReassigned,
            BackfillStage::CountUpdated,
            BackfillStage::Committed,
        ] {
            progress.advance(stage).expect("transition should be allowed");
        }
        assert_eq!(progress.stage(), BackfillStage::Committed);
        assert!(progress.stage().is_terminal());
        assert_eq!(progress.failed_at(), None);
    }

    #[test]
    fn stages_cannot_be_skipped() {
        let mut progress = BackfillProgress::new(UserId::new_v4());
        let err = progress
            .advance(BackfillStage::DocumentsReassigned)
            .expect_err("membership must come first");
        assert_eq!(err.public, "Invalid backfill stage transition");
        assert_eq!(progress.stage(), BackfillStage::Start);
    }

    #[test]
    fn failure_rolls_back_and_remembers_the_stage() {
        let mut progress = BackfillProgress::new(UserId::new_v4());
        progress.advance(BackfillStage::GraphCreated).unwrap();
        progress.advance(BackfillStage::MembershipCreated).unwrap();
        progress.fail();

        assert_eq!(progress.stage(), BackfillStage::RolledBack);
        assert_eq!(progress.failed_at(), Some(BackfillStage::MembershipCreated));
    }

    #[test]
    fn committed_users_cannot_fail() {
        assert!(!BackfillStage::Committed.can_transition_to(BackfillStage::Failed));
        assert!(!BackfillStage::RolledBack.can_transition_to(BackfillStage::Failed));
        assert!(BackfillStage::Start.can_transition_to(BackfillStage::Failed));
        assert!(BackfillStage::Failed.can_transition_to(BackfillStage::RolledBack));
    }
}
