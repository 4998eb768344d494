use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{LibError, Result};
use crate::models::{GraphId, MembershipRole, UserId};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackfillInvariantViolation {
    OrphanedDocumentsRemain {
        user_id: UserId,
        count: i64,
    },
    MissingOwnedGraph {
        user_id: UserId,
    },
    DuplicateDefaultGraph {
        user_id: UserId,
        count: usize,
    },
    MissingOwnerMembership {
        user_id: UserId,
        graph_id: GraphId,
    },
    DocumentCountMismatch {
        graph_id: GraphId,
        recorded: i32,
        actual: i64,
    },
}

impl BackfillInvariantViolation {
    pub const fn error_code(&self) -> &'static str {
        match self {
            BackfillInvariantViolation::OrphanedDocumentsRemain { .. } => {
                "backfill_orphaned_documents_remain"
            }
            BackfillInvariantViolation::MissingOwnedGraph { .. } => "backfill_missing_owned_graph",
            BackfillInvariantViolation::DuplicateDefaultGraph { .. } => {
                "backfill_duplicate_default_graph"
            }
            BackfillInvariantViolation::MissingOwnerMembership { .. } => {
                "backfill_missing_owner_membership"
            }
            BackfillInvariantViolation::DocumentCountMismatch { .. } => {
                "graph_document_count_mismatch"
            }
        }
    }

    pub const fn public_message(&self) -> &'static str {
        match self {
            BackfillInvariantViolation::OrphanedDocumentsRemain { .. } => {
                "User still owns documents without a graph"
            }
            BackfillInvariantViolation::MissingOwnedGraph { .. } => "User does not own any graph",
            BackfillInvariantViolation::DuplicateDefaultGraph { .. } => {
                "User owns more than one default graph"
            }
            BackfillInvariantViolation::MissingOwnerMembership { .. } => {
                "Graph creator has no owner membership"
            }
            BackfillInvariantViolation::DocumentCountMismatch { .. } => {
                "Graph document count does not match its documents"
            }
        }
    }
}

/// A graph as seen by the verification pass.
#[derive(Debug, Clone, FromRow)]
pub struct OwnedGraphState {
    pub id: Uuid,
    pub name: String,
    pub created_by: Uuid,
    pub document_count: i32,
    pub actual_documents: i64,
    pub has_owner_membership: bool,
}

pub fn graph_invariant_violations(
    users: &[UserId],
    orphan_counts: &HashMap<UserId, i64>,
    graphs: &[OwnedGraphState],
    default_graph_name: &str,
) -> Vec<BackfillInvariantViolation> {
    let users: BTreeSet<UserId> = users.iter().copied().collect();
    let mut owners_with_graph = BTreeSet::new();
    let mut default_graphs: BTreeMap<UserId, usize> = BTreeMap::new();
    let mut violations = Vec::new();

    for user_id in &users {
        if let Some(&count) = orphan_counts.get(user_id) {
            if count > 0 {
                violations.push(BackfillInvariantViolation::OrphanedDocumentsRemain {
                    user_id: *user_id,
                    count,
                });
            }
        }
    }

    for graph in graphs {
        let owner = UserId(graph.created_by);
        if !users.contains(&owner) {
            continue;
        }
        let graph_id = GraphId(graph.id);

        if graph.name == default_graph_name {
            *default_graphs.entry(owner).or_default() += 1;
        }

        if graph.has_owner_membership {
            owners_with_graph.insert(owner);
        } else {
            violations.push(BackfillInvariantViolation::MissingOwnerMembership {
                user_id: owner,
                graph_id,
            });
        }

        if i64::from(graph.document_count) != graph.actual_documents {
            violations.push(BackfillInvariantViolation::DocumentCountMismatch {
                graph_id,
                recorded: graph.document_count,
                actual: graph.actual_documents,
            });
        }
    }

    for user_id in users.difference(&owners_with_graph) {
        violations.push(BackfillInvariantViolation::MissingOwnedGraph { user_id: *user_id });
    }

    for (user_id, count) in default_graphs {
        if count > 1 {
            violations.push(BackfillInvariantViolation::DuplicateDefaultGraph { user_id, count });
        }
    }

    violations
}

/// Checks the post-backfill state of `users` against the database.
pub async fn backfill_invariant_violations(
    pool: &PgPool,
    users: &[UserId],
    default_graph_name: &str,
) -> Result<Vec<BackfillInvariantViolation>> {
    if users.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = users.iter().map(|id| id.0).collect();

    let orphan_rows: Vec<(Uuid, i64)> = sqlx::query_as(
        r#"
        SELECT user_id, COUNT(*)::bigint
        FROM documents
        WHERE graph_id IS NULL
          AND user_id = ANY($1::uuid[])
        GROUP BY user_id
        "#,
    )
    .bind(&ids)
    .fetch_all(pool)
    .await
    .map_err(|err| LibError::from_read("Failed to count remaining orphaned documents", err))?;
    let orphan_counts = orphan_rows
        .into_iter()
        .map(|(user_id, count)| (UserId(user_id), count))
        .collect::<HashMap<_, _>>();

    let graphs = sqlx::query_as::<_, OwnedGraphState>(
        r#"
        SELECT
            g.id,
            g.name,
            g.created_by,
            g.document_count,
            (
                SELECT COUNT(*)::bigint
                FROM documents d
                WHERE d.graph_id = g.id
            ) AS actual_documents,
            EXISTS (
                SELECT 1
                FROM graph_memberships m
                WHERE m.graph_id = g.id
                  AND m.user_id = g.created_by
                  AND m.role = $2
            ) AS has_owner_membership
        FROM graphs g
        WHERE g.created_by = ANY($1::uuid[])
        ORDER BY g.created_at ASC, g.id ASC
        "#,
    )
    .bind(&ids)
    .bind(MembershipRole::Owner.as_db_value())
    .fetch_all(pool)
    .await
    .map_err(|err| LibError::from_read("Failed to load graphs for verification", err))?;

    Ok(graph_invariant_violations(users, &orphan_counts, &graphs, default_graph_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_NAME: &str = "My Knowledge Graph";

    fn graph(owner: UserId, recorded: i32, actual: i64, has_owner: bool) -> OwnedGraphState {
        OwnedGraphState {
            id: Uuid::new_v4(),
            name: DEFAULT_NAME.to_string(),
            created_by: owner.0,
            document_count: recorded,
            actual_documents: actual,
            has_owner_membership: has_owner,
        }
    }

    #[test]
    fn consistent_backfill_has_no_violations() {
        let user = UserId::new_v4();
        let violations = graph_invariant_violations(
            &[user],
            &HashMap::new(),
            &[graph(user, 3, 3, true)],
            DEFAULT_NAME,
        );
        assert!(violations.is_empty());
    }

    #[test]
    fn reports_count_mismatch() {
        let user = UserId::new_v4();
        let state = graph(user, 2, 3, true);
        let graph_id = GraphId(state.id);
        let violations =
            graph_invariant_violations(&[user], &HashMap::new(), &[state], DEFAULT_NAME);
        assert_eq!(
            violations,
            vec![BackfillInvariantViolation::DocumentCountMismatch {
                graph_id,
                recorded: 2,
                actual: 3,
            }]
        );
        assert_eq!(violations[0].error_code(), "graph_document_count_mismatch");
    }

    #[test]
    fn reports_users_without_graphs_and_leftover_documents() {
        let user = UserId::new_v4();
        let orphan_counts = HashMap::from([(user, 2)]);
        let violations = graph_invariant_violations(&[user], &orphan_counts, &[], DEFAULT_NAME);

        assert_eq!(violations.len(), 2);
        assert!(violations.contains(&BackfillInvariantViolation::OrphanedDocumentsRemain {
            user_id: user,
            count: 2,
        }));
        assert!(
            violations.contains(&BackfillInvariantViolation::MissingOwnedGraph { user_id: user })
        );
    }

    #[test]
    fn graph_without_owner_membership_does_not_count_as_owned() {
        let user = UserId::new_v4();
        let state = graph(user, 0, 0, false);
        let graph_id = GraphId(state.id);
        let violations =
            graph_invariant_violations(&[user], &HashMap::new(), &[state], DEFAULT_NAME);

        assert_eq!(
            violations,
            vec![
                BackfillInvariantViolation::MissingOwnerMembership {
                    user_id: user,
                    graph_id,
                },
                BackfillInvariantViolation::MissingOwnedGraph { user_id: user },
            ]
        );
    }

    #[test]
    fn ignores_graphs_of_other_users() {
        let user = UserId::new_v4();
        let other = UserId::new_v4();
        let violations = graph_invariant_violations(
            &[user],
            &HashMap::new(),
            &[graph(user, 1, 1, true), graph(other, 5, 0, false)],
            DEFAULT_NAME,
        );
        assert!(violations.is_empty());
    }

    #[test]
    fn flags_a_second_default_graph() {
        let user = UserId::new_v4();
        let mut renamed = graph(user, 0, 0, true);
        renamed.name = "Research".to_string();

        let violations = graph_invariant_violations(
            &[user],
            &HashMap::new(),
            &[graph(user, 2, 2, true), graph(user, 0, 0, true)],
            DEFAULT_NAME,
        );
        assert_eq!(
            violations,
            vec![BackfillInvariantViolation::DuplicateDefaultGraph {
                user_id: user,
                count: 2,
            }]
        );
        assert_eq!(violations[0].error_code(), "backfill_duplicate_default_graph");

        let violations = graph_invariant_violations(
            &[user],
            &HashMap::new(),
            &[graph(user, 2, 2, true), renamed],
            DEFAULT_NAME,
        );
        assert!(violations.is_empty());
    }
}
