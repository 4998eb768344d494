use sqlx::{FromRow, PgExecutor, PgPool};
use uuid::Uuid;

use crate::error::{LibError, Result};
use crate::models::{LegacyUser, UserFilter, UserId};

#[derive(Debug, Clone, FromRow)]
struct LegacyUserRow {
    id: Uuid,
    email: String,
    created_at: chrono::NaiveDateTime,
    orphaned_documents: i64,
}

impl From<LegacyUserRow> for LegacyUser {
    fn from(value: LegacyUserRow) -> Self {
        Self {
            id: UserId(value.id),
            email: value.email,
            created_at: value.created_at,
            orphaned_documents: value.orphaned_documents,
        }
    }
}

/// Users that own at least one document without a graph, oldest account first.
pub async fn find_users_with_orphaned_documents(
    pool: &PgPool,
    filter: &UserFilter,
) -> Result<Vec<LegacyUser>> {
    if !filter.is_unrestricted() {
        tracing::info!(users = filter.user_ids.len(), "scan restricted to selected users");
    }
    let rows = sqlx::query_as::<_, LegacyUserRow>(
        r#"
        SELECT
            u.id,
            u.email,
            u.created_at,
            COUNT(d.id)::bigint AS orphaned_documents
        FROM users u
        JOIN documents d
          ON d.user_id = u.id
         AND d.graph_id IS NULL
        WHERE (
            cardinality($1::uuid[]) = 0
            OR u.id = ANY($1::uuid[])
        )
        GROUP BY u.id, u.email, u.created_at
        ORDER BY u.created_at ASC, u.id ASC
        "#,
    )
    .bind(filter.as_uuids())
    .fetch_all(pool)
    .await
    .map_err(|err| LibError::from_read("Failed to scan users with orphaned documents", err))?;

    Ok(rows.into_iter().map(LegacyUser::from).collect())
}

pub async fn count_orphaned_documents<'e, E>(executor: E, user_id: UserId) -> Result<i64>
where
    E: PgExecutor<'e>,
{
    let count: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)::bigint
        FROM documents
        WHERE user_id = $1
          AND graph_id IS NULL
        "#,
    )
    .bind(user_id.0)
    .fetch_one(executor)
    .await
    .map_err(|err| LibError::from_read("Failed to count orphaned documents", err))?;

    Ok(count.0)
}
