use anyhow::anyhow;
use sqlx::{Postgres, Transaction};

use crate::error::{LibError, Result};
use crate::models::{GraphId, UserId};
use crate::stage::{BackfillProgress, BackfillStage};

/// Points every graph-less document of `user_id` at `graph_id` and records the
/// number moved as the graph's document count. Returns the rows affected.
///
/// Running it again after a commit matches nothing and leaves the count alone.
pub async fn reassign_orphaned_documents(
    tx: &mut Transaction<'_, Postgres>,
    user_id: UserId,
    graph_id: GraphId,
    progress: &mut BackfillProgress,
) -> Result<u64> {
    let reassigned = sqlx::query(
        r#"
        UPDATE documents
        SET graph_id = $1,
            updated_at = CURRENT_TIMESTAMP
        WHERE user_id = $2
          AND graph_id IS NULL
        "#,
    )
    .bind(graph_id.0)
    .bind(user_id.0)
    .execute(&mut **tx)
    .await
    .map_err(|err| LibError::from_write("Failed to reassign documents", err))?
    .rows_affected();
    progress.advance(BackfillStage::DocumentsReassigned)?;

    if reassigned > 0 {
        let count = i32::try_from(reassigned).map_err(|_| {
            LibError::invalid_with_code(
                "document_count_overflow",
                "Document count does not fit the graph counter",
                anyhow!("user {} reassigned {} documents", user_id, reassigned),
            )
        })?;

        sqlx::query(
            r#"
            UPDATE graphs
            SET document_count = $1,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $2
            "#,
        )
        .bind(count)
        .bind(graph_id.0)
        .execute(&mut **tx)
        .await
        .map_err(|err| LibError::from_write("Failed to update graph document count", err))?;
    }
    progress.advance(BackfillStage::CountUpdated)?;

    tracing::debug!(
        user_id = %user_id,
        graph_id = %graph_id,
        reassigned,
        "reassigned orphaned documents"
    );
    Ok(reassigned)
}
