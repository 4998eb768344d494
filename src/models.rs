use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize,
            Default,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::from_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(UserId);
uuid_id!(GraphId);
uuid_id!(MembershipId);
uuid_id!(DocumentId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipRole {
    Owner,
    Editor,
    Viewer,
    Member,
}

impl MembershipRole {
    pub const fn as_db_value(self) -> &'static str {
        match self {
            MembershipRole::Owner => "owner",
            MembershipRole::Editor => "editor",
            MembershipRole::Viewer => "viewer",
            MembershipRole::Member => "member",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub const fn as_db_value(self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }
}

/// A user that still owns documents without a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyUser {
    pub id: UserId,
    pub email: String,
    pub created_at: NaiveDateTime,
    pub orphaned_documents: i64,
}

/// Rows written by the provisioner for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedGraph {
    pub graph_id: GraphId,
    pub membership_id: MembershipId,
    pub owner_user_id: UserId,
    pub name: String,
    pub zep_graph_id: String,
}

/// Restricts a scan to an explicit set of users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    pub user_ids: Vec<UserId>,
}

impl UserFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only(user_ids: impl IntoIterator<Item = UserId>) -> Self {
        let mut user_ids: Vec<UserId> = user_ids.into_iter().collect();
        user_ids.sort();
        user_ids.dedup();
        Self { user_ids }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.user_ids.is_empty()
    }

    pub(crate) fn as_uuids(&self) -> Vec<Uuid> {
        self.user_ids.iter().map(|id| id.0).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_values_match_the_schema_checks() {
        assert_eq!(MembershipRole::Owner.as_db_value(), "owner");
        assert_eq!(MembershipRole::Member.as_db_value(), "member");
        assert_eq!(DocumentStatus::Completed.as_db_value(), "completed");
        assert_eq!(
            serde_json::to_value(MembershipRole::Viewer).expect("role serializes"),
            MembershipRole::Viewer.as_db_value()
        );
    }

    #[test]
    fn user_filter_dedups_ids() {
        let id = UserId::new_v4();
        let filter = UserFilter::only([id, id]);
        assert_eq!(filter.user_ids, vec![id]);
        assert!(!filter.is_unrestricted());
        assert!(UserFilter::all().is_unrestricted());
    }

    #[test]
    fn ids_parse_from_strings() {
        let raw = "7b0f7c1e-3a52-4b8e-9d3e-2f4a6c1b9e10";
        let id: GraphId = raw.parse().expect("valid uuid");
        assert_eq!(id.to_string(), raw);
        assert!("not-a-uuid".parse::<UserId>().is_err());
    }
}
