use std::sync::Arc;

use anyhow::anyhow;
use sqlx::{PgPool, Postgres, Transaction};

use crate::config::{BackfillConfig, EmptyGraphPolicy};
use crate::error::{LibError, Result};
use crate::graph_store::GraphStoreClient;
use crate::invariants::{self, BackfillInvariantViolation};
use crate::models::{LegacyUser, ProvisionedGraph, UserFilter, UserId};
use crate::provisioner;
use crate::reassigner;
use crate::report::{BackfillReport, UserOutcome};
use crate::scanner;
use crate::stage::{BackfillProgress, BackfillStage};

/// A user whose transaction was rolled back.
#[derive(Debug)]
pub struct MigrationFailure {
    pub user_id: UserId,
    pub stage: BackfillStage,
    pub error: LibError,
}

enum Completion {
    Commit {
        provisioned: ProvisionedGraph,
        reassigned: u64,
    },
    Skip {
        reason: &'static str,
    },
}

/// Runs the backfill one user at a time, each user in its own transaction.
#[derive(Clone)]
pub struct BackfillCoordinator {
    pool: Arc<PgPool>,
    config: Arc<BackfillConfig>,
    graph_store: Option<Arc<dyn GraphStoreClient>>,
}

impl BackfillCoordinator {
    pub fn new(
        pool: Arc<PgPool>,
        config: Arc<BackfillConfig>,
        graph_store: Arc<dyn GraphStoreClient>,
    ) -> Self {
        Self {
            pool,
            config,
            graph_store: Some(graph_store),
        }
    }

    /// A coordinator that can only [`plan`](Self::plan).
    pub fn read_only(pool: Arc<PgPool>, config: Arc<BackfillConfig>) -> Self {
        Self {
            pool,
            config,
            graph_store: None,
        }
    }

    /// Dry run: scans and counts without opening a write transaction.
    pub async fn plan(&self, filter: &UserFilter) -> Result<BackfillReport> {
        let mut report = BackfillReport::new(true);
        let users = scanner::find_users_with_orphaned_documents(&self.pool, filter).await?;
        report.scanned = users.len();
        tracing::info!(users = users.len(), "dry run: found users with orphaned documents");

        for user in users {
            let orphaned_documents = scanner::count_orphaned_documents(&*self.pool, user.id).await?;
            tracing::info!(
                user_id = %user.id,
                email = %user.email,
                orphaned_documents,
                "dry run: would create default graph"
            );
            report.record(UserOutcome::Planned {
                user_id: user.id,
                email: user.email,
                orphaned_documents,
            });
        }

        report.finish();
        Ok(report)
    }

    /// Migrates every scanned user. Per-user failures are recorded and the
    /// batch moves on; connectivity or configuration failures stop it.
    pub async fn run(&self, filter: &UserFilter) -> Result<BackfillReport> {
        if self.graph_store.is_none() {
            return Err(LibError::configuration(
                "A graph store client is required to migrate documents",
                anyhow!("coordinator was built read-only"),
            ));
        }

        let mut report = BackfillReport::new(false);
        let users = scanner::find_users_with_orphaned_documents(&self.pool, filter).await?;
        report.scanned = users.len();
        tracing::info!(users = users.len(), "found users with orphaned documents");

        for user in &users {
            match self.migrate_user(user).await {
                Ok(outcome) => report.record(outcome),
                Err(failure) => {
                    tracing::warn!(
                        user_id = %failure.user_id,
                        email = %user.email,
                        stage = %failure.stage,
                        kind = failure.error.kind.as_str(),
                        code = failure.error.code,
                        error = %failure.error.source,
                        "backfill failed for user, transaction rolled back"
                    );
                    let fatal = failure.error.is_fatal();
                    report.record(UserOutcome::Failed {
                        user_id: user.id,
                        email: user.email.clone(),
                        stage: failure.stage,
                        code: failure.error.code.to_string(),
                        error: failure.error.to_string(),
                    });
                    if fatal {
                        tracing::error!(
                            user_id = %user.id,
                            error = %failure.error,
                            "aborting backfill"
                        );
                        report.aborted = Some(failure.error.to_string());
                        break;
                    }
                }
            }
        }

        report.finish();
        tracing::info!(
            scanned = report.scanned,
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            documents = report.documents_reassigned(),
            "backfill finished"
        );
        Ok(report)
    }

    /// Provisions and reassigns for one user inside a single transaction.
    pub async fn migrate_user(
        &self,
        user: &LegacyUser,
    ) -> std::result::Result<UserOutcome, MigrationFailure> {
        let mut progress = BackfillProgress::new(user.id);
        let fail = |progress: &mut BackfillProgress, error: LibError| {
            let stage = progress.stage();
            progress.fail();
            MigrationFailure {
                user_id: user.id,
                stage: progress.failed_at().unwrap_or(stage),
                error,
            }
        };

        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                let error = LibError::from_write("Failed to start transaction", err);
                return Err(fail(&mut progress, error));
            }
        };

        let completion = match self.migrate_in_tx(&mut tx, user, &mut progress).await {
            Ok(completion) => completion,
            Err(error) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(
                        user_id = %user.id,
                        error = %rollback_err,
                        "rollback failed, the server discards the open transaction"
                    );
                }
                return Err(fail(&mut progress, error));
            }
        };

        match completion {
            Completion::Skip { reason } => {
                if let Err(err) = tx.rollback().await {
                    let error = LibError::from_write("Failed to roll back skipped user", err);
                    return Err(fail(&mut progress, error));
                }
                tracing::info!(user_id = %user.id, email = %user.email, reason, "skipped user");
                Ok(UserOutcome::Skipped {
                    user_id: user.id,
                    email: user.email.clone(),
                    reason: reason.to_string(),
                })
            }
            Completion::Commit {
                provisioned,
                reassigned,
            } => {
                if let Err(err) = tx.commit().await {
                    let error = LibError::from_write("Failed to commit transaction", err);
                    return Err(fail(&mut progress, error));
                }
                if let Err(error) = progress.advance(BackfillStage::Committed) {
                    // the rows are already committed; only the bookkeeping is off
                    tracing::warn!(
                        user_id = %user.id,
                        error = %error,
                        "unexpected stage after commit"
                    );
                }

                if reassigned == 0 {
                    tracing::warn!(
                        user_id = %user.id,
                        graph_id = %provisioned.graph_id,
                        "committed a default graph with no documents"
                    );
                }
                tracing::info!(
                    user_id = %user.id,
                    email = %user.email,
                    graph_id = %provisioned.graph_id,
                    documents = reassigned,
                    "migrated user"
                );
                Ok(UserOutcome::Migrated {
                    user_id: user.id,
                    email: user.email.clone(),
                    graph_id: provisioned.graph_id,
                    zep_graph_id: provisioned.zep_graph_id,
                    documents_reassigned: reassigned,
                })
            }
        }
    }

    async fn migrate_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user: &LegacyUser,
        progress: &mut BackfillProgress,
    ) -> Result<Completion> {
        let graph_store = self.graph_store.as_deref().ok_or_else(|| {
            LibError::configuration(
                "A graph store client is required to migrate documents",
                anyhow!("coordinator was built read-only"),
            )
        })?;

        lock_user(tx, user.id).await?;

        // another run may have migrated this user after the scan
        let skip_empty = self.config.empty_graph_policy == EmptyGraphPolicy::Skip;
        if skip_empty && scanner::count_orphaned_documents(&mut **tx, user.id).await? == 0 {
            return Ok(Completion::Skip {
                reason: "no orphaned documents left",
            });
        }

        let provisioned =
            provisioner::provision_default_graph(tx, user.id, &self.config, graph_store, progress)
                .await?;
        let reassigned =
            reassigner::reassign_orphaned_documents(tx, user.id, provisioned.graph_id, progress)
                .await?;

        if reassigned == 0 && skip_empty {
            return Ok(Completion::Skip {
                reason: "no documents were reassigned",
            });
        }

        Ok(Completion::Commit {
            provisioned,
            reassigned,
        })
    }

    /// Checks the committed state of every migrated user.
    pub async fn verify(&self, report: &BackfillReport) -> Result<Vec<BackfillInvariantViolation>> {
        let users = report.migrated_users();
        let violations = invariants::backfill_invariant_violations(
            &self.pool,
            &users,
            &self.config.default_graph_name,
        )
        .await?;
        for violation in &violations {
            tracing::warn!(
                code = violation.error_code(),
                violation = ?violation,
                "{}",
                violation.public_message()
            );
        }
        Ok(violations)
    }
}

async fn lock_user(tx: &mut Transaction<'_, Postgres>, user_id: UserId) -> Result<()> {
    let locked: Option<(uuid::Uuid,)> = sqlx::query_as(
        r#"
        SELECT id
        FROM users
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(user_id.0)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|err| LibError::from_write("Failed to lock user", err))?;

    if locked.is_some() {
        Ok(())
    } else {
        Err(LibError::persistence_with_code(
            "user_not_found",
            "User no longer exists",
            anyhow!("user {} was deleted after the scan", user_id),
        ))
    }
}
