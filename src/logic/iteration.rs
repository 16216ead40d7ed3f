use chrono::Utc;
use serde::Serialize;

use crate::error::{CatalogError, CatalogResult};
use crate::logic::replicate::{ReplicationReport, TreeReplicator};
use crate::logic::services::{live_service, require_owner};
use crate::model::{Caller, Generation, Id, NewIteration, Service, ServiceIteration};
use crate::store::CatalogTx;

/// Result of starting an iteration
#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub iteration: ServiceIteration,
    /// False when the caller's open iteration already existed and was returned as-is
    pub created: bool,
    pub replication: ReplicationReport,
}

/// Result of committing an iteration
#[derive(Debug, Clone, Serialize)]
pub struct CommitOutcome {
    pub iteration: ServiceIteration,
    pub service: Service,
    /// Live endpoints replaced by the promoted draft
    pub removed_endpoints: u64,
    pub replication: ReplicationReport,
}

/// Draft lifecycle of a service: start, commit, abandon
pub struct IterationManager;

impl IterationManager {
    /// Open an iteration on `service_id` for the caller, snapshotting the live
    /// generation into it. Idempotent per (service, caller).
    pub async fn start(
        tx: &mut dyn CatalogTx,
        service_id: Id,
        caller: &Caller,
    ) -> CatalogResult<StartOutcome> {
        let service = live_service(tx, service_id).await?;
        require_owner(caller, &service)?;

        if let Some(existing) = tx.find_open_iteration(service.id, caller.user_id).await? {
            return Ok(Self::existing(existing));
        }

        let inserted = tx
            .insert_iteration(NewIteration {
                service_id: service.id,
                creator_id: caller.user_id,
                version: service.version.clone(),
                description: service.description.clone(),
            })
            .await?;
        let Some(iteration) = inserted else {
            // Lost a race against a concurrent start by the same caller
            let existing = tx
                .find_open_iteration(service.id, caller.user_id)
                .await?
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "open iteration for service {} vanished after insert conflict",
                        service.id
                    )
                })?;
            return Ok(Self::existing(existing));
        };

        let replication = TreeReplicator::replicate_generation(
            tx,
            Generation::Live {
                service_id: service.id,
            },
            Generation::Draft {
                iteration_id: iteration.id,
            },
        )
        .await?;

        log::info!(
            "Started iteration {} on service {} at version {} ({} endpoints copied)",
            iteration.id,
            service.service_uuid,
            iteration.version,
            replication.endpoints
        );
        Ok(StartOutcome {
            iteration,
            created: true,
            replication,
        })
    }

    /// Promote the iteration's draft generation over the live one and publish
    /// it as `new_version`.
    pub async fn commit(
        tx: &mut dyn CatalogTx,
        iteration_id: Id,
        new_version: &str,
        caller: &Caller,
    ) -> CatalogResult<CommitOutcome> {
        let new_version = new_version.trim();
        if new_version.is_empty() {
            return Err(CatalogError::validation("new version is required"));
        }

        let (mut iteration, mut service) = Self::lock_open(tx, iteration_id, caller).await?;
        if service.is_deleted {
            return Err(CatalogError::not_found(format!("service {}", service.id)));
        }
        if service.version == new_version {
            return Err(CatalogError::conflict(format!(
                "service {} is already at version {}",
                service.service_uuid, new_version
            )));
        }
        let taken = tx
            .list_iterations(service.id)
            .await?
            .into_iter()
            .any(|other| other.is_committed && other.version == new_version);
        if taken {
            return Err(CatalogError::conflict(format!(
                "version {} of service {} was already published",
                new_version, service.service_uuid
            )));
        }

        let live = Generation::Live {
            service_id: service.id,
        };
        let removed_endpoints = tx.delete_endpoints(live).await?;
        let replication = TreeReplicator::replicate_generation(
            tx,
            Generation::Draft {
                iteration_id: iteration.id,
            },
            live,
        )
        .await?;

        let previous_version = std::mem::replace(&mut service.version, new_version.to_string());
        service.description = iteration.description.clone();
        service.updated_at = Utc::now();
        tx.update_service(&service).await?;

        iteration.mark_committed(new_version.to_string());
        tx.update_iteration(&iteration).await?;

        log::info!(
            "Committed iteration {} of service {}: {} -> {} ({} endpoints promoted)",
            iteration.id,
            service.service_uuid,
            previous_version,
            new_version,
            replication.endpoints
        );
        Ok(CommitOutcome {
            iteration,
            service,
            removed_endpoints,
            replication,
        })
    }

    /// Discard an open iteration together with its draft generation
    pub async fn abandon(
        tx: &mut dyn CatalogTx,
        iteration_id: Id,
        caller: &Caller,
    ) -> CatalogResult<ServiceIteration> {
        let (iteration, service) = Self::lock_open(tx, iteration_id, caller).await?;
        tx.delete_iteration(iteration.id).await?;

        log::info!(
            "Abandoned iteration {} of service {}",
            iteration.id,
            service.service_uuid
        );
        Ok(iteration)
    }

    /// Change the description the iteration will publish on commit
    pub async fn update_description(
        tx: &mut dyn CatalogTx,
        iteration_id: Id,
        description: Option<String>,
        caller: &Caller,
    ) -> CatalogResult<ServiceIteration> {
        let (mut iteration, _) = Self::lock_open(tx, iteration_id, caller).await?;
        if iteration.description == description {
            return Err(CatalogError::validation("iteration description not changed"));
        }
        iteration.description = description;
        tx.update_iteration(&iteration).await?;
        Ok(iteration)
    }

    /// Lock the iteration row and run the checks shared by every change to it.
    /// Draft edits take this lock too so they serialize with commit and abandon.
    pub async fn lock_open(
        tx: &mut dyn CatalogTx,
        iteration_id: Id,
        caller: &Caller,
    ) -> CatalogResult<(ServiceIteration, Service)> {
        let iteration = tx.lock_iteration(iteration_id).await?;
        Self::check_open(tx, iteration, iteration_id, caller).await
    }

    async fn check_open(
        tx: &mut dyn CatalogTx,
        iteration: Option<ServiceIteration>,
        iteration_id: Id,
        caller: &Caller,
    ) -> CatalogResult<(ServiceIteration, Service)> {
        let iteration = iteration
            .ok_or_else(|| CatalogError::not_found(format!("iteration {}", iteration_id)))?;
        if iteration.is_committed {
            return Err(CatalogError::invalid_state(format!(
                "iteration {} is already committed",
                iteration.id
            )));
        }
        let service = tx
            .get_service(iteration.service_id)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("service {}", iteration.service_id)))?;
        if !caller.is_any_of(&[service.owner_id, iteration.creator_id]) {
            return Err(CatalogError::permission_denied(format!(
                "user {} is neither the owner of service {} nor the creator of iteration {}",
                caller.user_id, service.id, iteration.id
            )));
        }
        Ok((iteration, service))
    }

    fn existing(iteration: ServiceIteration) -> StartOutcome {
        log::debug!(
            "Reusing open iteration {} of service {} for user {}",
            iteration.id,
            iteration.service_id,
            iteration.creator_id
        );
        StartOutcome {
            iteration,
            created: false,
            replication: ReplicationReport::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ApiLevel, HttpMethod, NewEndpoint, NewService, NewUser, SUPER_LEVEL,
    };
    use crate::store::{CatalogStore, MemoryStore};

    struct Fixture {
        owner: Caller,
        stranger: Caller,
        service: Service,
    }

    async fn fixture(tx: &mut dyn CatalogTx) -> Fixture {
        let mut users = Vec::new();
        for name in ["owner", "stranger"] {
            let user = tx
                .insert_user(NewUser {
                    username: name.to_string(),
                    nickname: None,
                    email: None,
                    level: Some(3),
                })
                .await
                .unwrap();
            users.push(Caller::from(&user));
        }
        let service = tx
            .insert_service(NewService {
                service_uuid: "billing".to_string(),
                owner_id: users[0].user_id,
                version: "1.0.0".to_string(),
                description: Some("billing api".to_string()),
            })
            .await
            .unwrap();
        tx.insert_endpoint(NewEndpoint {
            generation: Generation::Live {
                service_id: service.id,
            },
            owner_id: users[0].user_id,
            category_id: None,
            name: "invoice".to_string(),
            method: HttpMethod::Get,
            path: "/invoice".to_string(),
            description: None,
            level: ApiLevel::P1,
            is_enabled: true,
        })
        .await
        .unwrap();

        Fixture {
            owner: users[0],
            stranger: users[1],
            service,
        }
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_snapshots_live() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let f = fixture(tx.as_mut()).await;

        let first = IterationManager::start(tx.as_mut(), f.service.id, &f.owner)
            .await
            .unwrap();
        assert!(first.created);
        assert_eq!(first.replication.endpoints, 1);
        assert_eq!(first.iteration.version, "1.0.0");
        assert_eq!(first.iteration.description.as_deref(), Some("billing api"));

        let second = IterationManager::start(tx.as_mut(), f.service.id, &f.owner)
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.iteration.id, first.iteration.id);

        let drafts = tx
            .list_endpoints(Generation::Draft {
                iteration_id: first.iteration.id,
            })
            .await
            .unwrap();
        assert_eq!(drafts.len(), 1);
    }

    #[tokio::test]
    async fn test_start_requires_owner_and_live_service() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let f = fixture(tx.as_mut()).await;

        let err = IterationManager::start(tx.as_mut(), f.service.id, &f.stranger)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::PermissionDenied(_)));

        let root = Caller::new(f.stranger.user_id, SUPER_LEVEL);
        assert!(IterationManager::start(tx.as_mut(), f.service.id, &root).await.is_ok());

        let mut service = f.service.clone();
        service.mark_deleted();
        tx.update_service(&service).await.unwrap();
        let err = IterationManager::start(tx.as_mut(), f.service.id, &f.owner)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_commit_rules() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let f = fixture(tx.as_mut()).await;
        let started = IterationManager::start(tx.as_mut(), f.service.id, &f.owner)
            .await
            .unwrap();
        let id = started.iteration.id;

        let err = IterationManager::commit(tx.as_mut(), id, "1.0.0", &f.owner)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));

        let err = IterationManager::commit(tx.as_mut(), id, "2.0.0", &f.stranger)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::PermissionDenied(_)));

        let err = IterationManager::commit(tx.as_mut(), 404, "2.0.0", &f.owner)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));

        let outcome = IterationManager::commit(tx.as_mut(), id, " 2.0.0 ", &f.owner)
            .await
            .unwrap();
        assert_eq!(outcome.service.version, "2.0.0");
        assert_eq!(outcome.removed_endpoints, 1);
        assert!(outcome.iteration.is_committed);
        assert!(outcome.iteration.committed_at.is_some());

        let err = IterationManager::commit(tx.as_mut(), id, "3.0.0", &f.owner)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidState(_)));

        // A version published earlier cannot be reused
        let again = IterationManager::start(tx.as_mut(), f.service.id, &f.owner)
            .await
            .unwrap();
        let mut service = tx.get_service(f.service.id).await.unwrap().unwrap();
        service.version = "2.1.0".to_string();
        tx.update_service(&service).await.unwrap();
        let err = IterationManager::commit(tx.as_mut(), again.iteration.id, "2.0.0", &f.owner)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_creator_may_commit_and_abandon() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let f = fixture(tx.as_mut()).await;
        let root = Caller::new(f.stranger.user_id, SUPER_LEVEL);
        let started = IterationManager::start(tx.as_mut(), f.service.id, &root)
            .await
            .unwrap();

        // The creator keeps rights on the iteration even without the super level
        let demoted = Caller::new(f.stranger.user_id, 3);
        let updated = IterationManager::update_description(
            tx.as_mut(),
            started.iteration.id,
            Some("next".to_string()),
            &demoted,
        )
        .await
        .unwrap();
        assert_eq!(updated.description.as_deref(), Some("next"));

        let abandoned = IterationManager::abandon(tx.as_mut(), started.iteration.id, &demoted)
            .await
            .unwrap();
        assert_eq!(abandoned.id, started.iteration.id);
        assert!(tx.get_iteration(abandoned.id).await.unwrap().is_none());
        assert!(tx
            .list_endpoints(Generation::Draft {
                iteration_id: abandoned.id
            })
            .await
            .unwrap()
            .is_empty());

        let err = IterationManager::abandon(tx.as_mut(), started.iteration.id, &demoted)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_commit_publishes_iteration_description() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let f = fixture(tx.as_mut()).await;
        let started = IterationManager::start(tx.as_mut(), f.service.id, &f.owner)
            .await
            .unwrap();
        IterationManager::update_description(
            tx.as_mut(),
            started.iteration.id,
            Some("billing v2".to_string()),
            &f.owner,
        )
        .await
        .unwrap();

        let outcome = IterationManager::commit(tx.as_mut(), started.iteration.id, "2.0.0", &f.owner)
            .await
            .unwrap();
        assert_eq!(outcome.service.description.as_deref(), Some("billing v2"));
    }
}
