use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::invariants::BackfillInvariantViolation;
use crate::models::{GraphId, UserId};
use crate::stage::BackfillStage;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_USER_FAILURES: u8 = 1;
pub const EXIT_FATAL: u8 = 2;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UserOutcome {
    /// Dry run: what a real run would touch.
    Planned {
        user_id: UserId,
        email: String,
        orphaned_documents: i64,
    },
    Migrated {
        user_id: UserId,
        email: String,
        graph_id: GraphId,
        zep_graph_id: String,
        documents_reassigned: u64,
    },
    Skipped {
        user_id: UserId,
        email: String,
        reason: String,
    },
    Failed {
        user_id: UserId,
        email: String,
        stage: BackfillStage,
        code: String,
        error: String,
    },
}

impl UserOutcome {
    pub fn user_id(&self) -> UserId {
        match self {
            UserOutcome::Planned { user_id, .. }
            | UserOutcome::Migrated { user_id, .. }
            | UserOutcome::Skipped { user_id, .. }
            | UserOutcome::Failed { user_id, .. } => *user_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillReport {
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub scanned: usize,
    pub outcomes: Vec<UserOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<BackfillInvariantViolation>,
}

impl BackfillReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            scanned: 0,
            outcomes: Vec::new(),
            aborted: None,
            violations: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: UserOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, UserOutcome::Migrated { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, UserOutcome::Failed { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, UserOutcome::Skipped { .. }))
            .count()
    }

    pub fn documents_reassigned(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|outcome| match outcome {
                UserOutcome::Migrated {
                    documents_reassigned,
                    ..
                } => *documents_reassigned,
                _ => 0,
            })
            .sum()
    }

    pub fn planned_documents(&self) -> i64 {
        self.outcomes
            .iter()
            .map(|outcome| match outcome {
                UserOutcome::Planned {
                    orphaned_documents, ..
                } => *orphaned_documents,
                _ => 0,
            })
            .sum()
    }

    pub fn migrated_users(&self) -> Vec<UserId> {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, UserOutcome::Migrated { .. }))
            .map(UserOutcome::user_id)
            .collect()
    }

    pub fn exit_code(&self) -> u8 {
        if self.aborted.is_some() {
            EXIT_FATAL
        } else if self.failed() > 0 || !self.violations.is_empty() {
            EXIT_USER_FAILURES
        } else {
            EXIT_SUCCESS
        }
    }
}
