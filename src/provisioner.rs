use sqlx::{Postgres, Transaction};

use crate::config::BackfillConfig;
use crate::error::{LibError, Result};
use crate::graph_store::GraphStoreClient;
use crate::models::{GraphId, MembershipId, MembershipRole, ProvisionedGraph, UserId};
use crate::stage::{BackfillProgress, BackfillStage};

/// Writes the default graph and its owner membership for `owner`.
///
/// Both rows go through the caller's transaction; nothing is visible to other
/// sessions until the caller commits.
pub async fn provision_default_graph(
    tx: &mut Transaction<'_, Postgres>,
    owner: UserId,
    config: &BackfillConfig,
    graph_store: &dyn GraphStoreClient,
    progress: &mut BackfillProgress,
) -> Result<ProvisionedGraph> {
    let graph_id = GraphId::new_v4();
    let zep_graph_id = graph_store.mint_graph_ref(owner);

    sqlx::query(
        r#"
        INSERT INTO graphs (
            id,
            name,
            description,
            zep_graph_id,
            created_by,
            document_count
        )
        VALUES ($1, $2, $3, $4, $5, 0)
        "#,
    )
    .bind(graph_id.0)
    .bind(&config.default_graph_name)
    .bind(&config.default_graph_description)
    .bind(&zep_graph_id)
    .bind(owner.0)
    .execute(&mut **tx)
    .await
    .map_err(|err| LibError::from_write("Failed to create default graph", err))?;
    progress.advance(BackfillStage::GraphCreated)?;

    let membership_id = insert_membership(tx, graph_id, owner, MembershipRole::Owner).await?;
    progress.advance(BackfillStage::MembershipCreated)?;

    tracing::debug!(
        user_id = %owner,
        graph_id = %graph_id,
        zep_graph_id = %zep_graph_id,
        "provisioned default graph"
    );

    Ok(ProvisionedGraph {
        graph_id,
        membership_id,
        owner_user_id: owner,
        name: config.default_graph_name.clone(),
        zep_graph_id,
    })
}

async fn insert_membership(
    tx: &mut Transaction<'_, Postgres>,
    graph_id: GraphId,
    user_id: UserId,
    role: MembershipRole,
) -> Result<MembershipId> {
    let membership_id = MembershipId::new_v4();
    sqlx::query(
        r#"
        INSERT INTO graph_memberships (id, graph_id, user_id, role)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(membership_id.0)
    .bind(graph_id.0)
    .bind(user_id.0)
    .bind(role.as_db_value())
    .execute(&mut **tx)
    .await
    .map_err(|err| LibError::from_write("Failed to create graph membership", err))?;

    Ok(membership_id)
}
