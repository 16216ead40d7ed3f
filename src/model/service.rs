use crate::model::Id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version assigned to services created without an explicit one
pub const INITIAL_VERSION: &str = "1.0.0";

/// A cataloged HTTP service; its fields describe the live generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: Id,
    pub service_uuid: String,
    pub owner_id: Id,
    pub version: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Service {
    pub fn is_live(&self) -> bool {
        !self.is_deleted
    }

    pub fn mark_deleted(&mut self) {
        let now = Utc::now();
        self.is_deleted = true;
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    pub fn restore(&mut self) {
        self.is_deleted = false;
        self.deleted_at = None;
        self.updated_at = Utc::now();
    }
}

/// Input model for creating a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewService {
    pub service_uuid: String,
    pub owner_id: Id,
    pub version: String,
    pub description: Option<String>,
}

/// Lifecycle state of an iteration as seen from outside the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationState {
    Open,
    Committed,
}

/// A draft generation of a service. While open, `version` is the version the
/// iteration was started from; once committed it is the version it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceIteration {
    pub id: Id,
    pub service_id: Id,
    pub creator_id: Id,
    pub version: String,
    pub description: Option<String>,
    pub is_committed: bool,
    pub created_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
}

impl ServiceIteration {
    pub fn state(&self) -> IterationState {
        if self.is_committed {
            IterationState::Committed
        } else {
            IterationState::Open
        }
    }

    pub fn mark_committed(&mut self, version: String) {
        self.version = version;
        self.is_committed = true;
        self.committed_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIteration {
    pub service_id: Id,
    pub creator_id: Id,
    pub version: String,
    pub description: Option<String>,
}

/// Named bucket for endpoints, unique by name within a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: Id,
    pub service_id: Id,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCategory {
    pub service_id: Id,
    pub name: String,
    pub description: Option<String>,
}
