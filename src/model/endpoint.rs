use crate::model::{ApiLevel, HttpMethod, Id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which identity space a row lives in: the live tables or the draft tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Live,
    Draft,
}

impl GenerationKind {
    pub fn endpoint_table(&self) -> &'static str {
        match self {
            GenerationKind::Live => "apis",
            GenerationKind::Draft => "api_drafts",
        }
    }
}

/// The owner of an endpoint set: a service's live generation or one iteration's draft generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Generation {
    Live { service_id: Id },
    Draft { iteration_id: Id },
}

impl Generation {
    pub fn kind(&self) -> GenerationKind {
        match self {
            Generation::Live { .. } => GenerationKind::Live,
            Generation::Draft { .. } => GenerationKind::Draft,
        }
    }

    /// Id of the owning row (service for live, iteration for draft)
    pub fn owner_id(&self) -> Id {
        match self {
            Generation::Live { service_id } => *service_id,
            Generation::Draft { iteration_id } => *iteration_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: Id,
    pub generation: Generation,
    pub owner_id: Id,
    pub category_id: Option<Id>,
    pub name: String,
    pub method: HttpMethod,
    pub path: String,
    pub description: Option<String>,
    pub level: ApiLevel,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Endpoint {
    /// Copy of this endpoint re-homed under another generation
    pub fn copy_into(&self, generation: Generation) -> NewEndpoint {
        NewEndpoint {
            generation,
            owner_id: self.owner_id,
            category_id: self.category_id,
            name: self.name.clone(),
            method: self.method,
            path: self.path.clone(),
            description: self.description.clone(),
            level: self.level,
            is_enabled: self.is_enabled,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Input model for inserting an endpoint into a generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEndpoint {
    pub generation: Generation,
    pub owner_id: Id,
    pub category_id: Option<Id>,
    pub name: String,
    pub method: HttpMethod,
    pub path: String,
    pub description: Option<String>,
    pub level: ApiLevel,
    pub is_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_serialization() {
        let live = Generation::Live { service_id: 7 };
        let json = serde_json::to_value(live).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "live", "service_id": 7}));
        assert_eq!(live.kind(), GenerationKind::Live);
        assert_eq!(Generation::Draft { iteration_id: 3 }.owner_id(), 3);
    }
}
