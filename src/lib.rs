pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod graph_store;
pub mod invariants;
pub mod models;
pub mod provisioner;
pub mod reassigner;
pub mod report;
pub mod scanner;
pub mod stage;

pub mod prelude {
    pub use crate::config::{BackfillConfig, EmptyGraphPolicy, GraphStoreConfig};
    pub use crate::coordinator::{BackfillCoordinator, MigrationFailure};
    pub use crate::db::{RunLock, connect, create_backfill_tables};
    pub use crate::error::{ErrorKind, LibError, Result};
    pub use crate::graph_store::{GraphStoreClient, ZepGraphClient};
    pub use crate::invariants::{BackfillInvariantViolation, backfill_invariant_violations};
    pub use crate::models::{
        DocumentId, DocumentStatus, GraphId, LegacyUser, MembershipId, MembershipRole,
        ProvisionedGraph, UserFilter, UserId,
    };
    pub use crate::provisioner::provision_default_graph;
    pub use crate::reassigner::reassign_orphaned_documents;
    pub use crate::report::{BackfillReport, UserOutcome};
    pub use crate::scanner::{count_orphaned_documents, find_users_with_orphaned_documents};
    pub use crate::stage::{BackfillProgress, BackfillStage};
}
