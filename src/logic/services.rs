use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CatalogError, CatalogResult};
use crate::logic::openapi::{load_endpoints, OpenApiSynthesizer};
use crate::logic::organize::EndpointDetail;
use crate::model::{
    generate_uuid, Caller, Generation, Id, NewService, NewUser, Service, ServiceIteration, User,
    INITIAL_VERSION,
};
use crate::store::CatalogTx;

/// Request to register a service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateServiceRequest {
    #[serde(default)]
    pub service_uuid: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Published versions of a service, newest first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionHistory {
    pub service_uuid: String,
    pub current_version: String,
    pub versions: Vec<String>,
}

/// One published generation of a service with its endpoints
#[derive(Debug, Clone, Serialize)]
pub struct GenerationDetail {
    pub service_uuid: String,
    pub version: String,
    pub description: Option<String>,
    pub generation: Generation,
    pub is_latest: bool,
    pub endpoints: Vec<EndpointDetail>,
}

/// Fetch a service that has not been soft-deleted
pub(crate) async fn live_service(tx: &mut dyn CatalogTx, service_id: Id) -> CatalogResult<Service> {
    tx.get_service(service_id)
        .await?
        .filter(Service::is_live)
        .ok_or_else(|| CatalogError::not_found(format!("service {}", service_id)))
}

pub(crate) fn require_owner(caller: &Caller, service: &Service) -> CatalogResult<()> {
    if caller.is_any_of(&[service.owner_id]) {
        Ok(())
    } else {
        Err(CatalogError::permission_denied(format!(
            "user {} does not own service {}",
            caller.user_id, service.id
        )))
    }
}

/// Iteration plus its service, readable by the service owner, the iteration creator or a super user
pub(crate) async fn readable_iteration(
    tx: &mut dyn CatalogTx,
    iteration_id: Id,
    caller: &Caller,
) -> CatalogResult<(ServiceIteration, Service)> {
    let iteration = tx
        .get_iteration(iteration_id)
        .await?
        .ok_or_else(|| CatalogError::not_found(format!("iteration {}", iteration_id)))?;
    let service = tx
        .get_service(iteration.service_id)
        .await?
        .ok_or_else(|| CatalogError::not_found(format!("service {}", iteration.service_id)))?;
    if !caller.is_any_of(&[service.owner_id, iteration.creator_id]) {
        return Err(CatalogError::permission_denied(format!(
            "user {} cannot read iteration {}",
            caller.user_id, iteration.id
        )));
    }
    Ok((iteration, service))
}

/// Users, service lifecycle, version history and documents
pub struct ServiceOperations;

impl ServiceOperations {
    pub async fn register_user(tx: &mut dyn CatalogTx, user: NewUser) -> CatalogResult<User> {
        if user.username.trim().is_empty() {
            return Err(CatalogError::validation("username is required"));
        }
        if tx.find_user_by_username(&user.username).await?.is_some() {
            return Err(CatalogError::conflict(format!(
                "username '{}' already exists",
                user.username
            )));
        }
        let user = tx.insert_user(user).await?;
        log::info!("Registered user {} ({})", user.id, user.username);
        Ok(user)
    }

    pub async fn get_user(tx: &mut dyn CatalogTx, user_id: Id) -> CatalogResult<User> {
        tx.get_user(user_id)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("user {}", user_id)))
    }

    pub async fn create_service(
        tx: &mut dyn CatalogTx,
        request: CreateServiceRequest,
        caller: &Caller,
    ) -> CatalogResult<Service> {
        if tx.get_user(caller.user_id).await?.is_none() {
            return Err(CatalogError::not_found(format!("user {}", caller.user_id)));
        }

        let service_uuid = match request.service_uuid.map(|u| u.trim().to_string()) {
            Some(uuid) if !uuid.is_empty() => uuid,
            _ => generate_uuid(),
        };
        if tx.find_service_by_uuid(&service_uuid).await?.is_some() {
            return Err(CatalogError::conflict(format!(
                "service uuid '{}' already exists",
                service_uuid
            )));
        }
        let version = match request.version.map(|v| v.trim().to_string()) {
            Some(version) if !version.is_empty() => version,
            _ => INITIAL_VERSION.to_string(),
        };

        let service = tx
            .insert_service(NewService {
                service_uuid,
                owner_id: caller.user_id,
                version,
                description: request.description,
            })
            .await?;
        log::info!(
            "Created service {} ({}) at version {}",
            service.id,
            service.service_uuid,
            service.version
        );
        Ok(service)
    }

    /// Service row, including soft-deleted ones so they can be restored
    pub async fn get_service(
        tx: &mut dyn CatalogTx,
        service_id: Id,
        caller: &Caller,
    ) -> CatalogResult<Service> {
        let service = tx
            .get_service(service_id)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("service {}", service_id)))?;
        require_owner(caller, &service)?;
        Ok(service)
    }

    pub async fn list_services(tx: &mut dyn CatalogTx, caller: &Caller) -> CatalogResult<Vec<Service>> {
        Ok(tx.list_services(caller.user_id).await?)
    }

    pub async fn delete_service(
        tx: &mut dyn CatalogTx,
        service_id: Id,
        caller: &Caller,
    ) -> CatalogResult<Service> {
        let mut service = Self::get_service(tx, service_id, caller).await?;
        if service.is_deleted {
            return Err(CatalogError::invalid_state(format!(
                "service {} is already deleted",
                service.id
            )));
        }
        service.mark_deleted();
        tx.update_service(&service).await?;
        log::info!("Soft-deleted service {} ({})", service.id, service.service_uuid);
        Ok(service)
    }

    pub async fn restore_service(
        tx: &mut dyn CatalogTx,
        service_id: Id,
        caller: &Caller,
    ) -> CatalogResult<Service> {
        let mut service = Self::get_service(tx, service_id, caller).await?;
        if service.is_live() {
            return Err(CatalogError::invalid_state(format!(
                "service {} is not deleted",
                service.id
            )));
        }
        service.restore();
        tx.update_service(&service).await?;
        log::info!("Restored service {} ({})", service.id, service.service_uuid);
        Ok(service)
    }

    /// Committed versions newest first. The live version is listed first when
    /// no committed iteration carries it, e.g. a service that was never iterated.
    pub async fn version_history(
        tx: &mut dyn CatalogTx,
        service_uuid: &str,
        caller: &Caller,
    ) -> CatalogResult<VersionHistory> {
        let service = Self::service_by_uuid(tx, service_uuid, caller).await?;
        let mut versions: Vec<String> = tx
            .list_iterations(service.id)
            .await?
            .into_iter()
            .filter(|iteration| iteration.is_committed)
            .map(|iteration| iteration.version)
            .unique()
            .collect();
        if !versions.contains(&service.version) {
            versions.insert(0, service.version.clone());
        }

        Ok(VersionHistory {
            service_uuid: service.service_uuid,
            current_version: service.version,
            versions,
        })
    }

    /// A published generation looked up by version: the live one, or the
    /// committed iteration that produced `version`.
    pub async fn generation_detail(
        tx: &mut dyn CatalogTx,
        service_uuid: &str,
        version: &str,
        caller: &Caller,
    ) -> CatalogResult<GenerationDetail> {
        let service = Self::service_by_uuid(tx, service_uuid, caller).await?;
        let (generation, description, is_latest) = if service.version == version {
            (
                Generation::Live {
                    service_id: service.id,
                },
                service.description.clone(),
                true,
            )
        } else {
            let iteration = tx
                .list_iterations(service.id)
                .await?
                .into_iter()
                .find(|iteration| iteration.is_committed && iteration.version == version)
                .ok_or_else(|| {
                    CatalogError::not_found(format!("version {} of service {}", version, service_uuid))
                })?;
            (
                Generation::Draft {
                    iteration_id: iteration.id,
                },
                iteration.description,
                false,
            )
        };

        let endpoints = load_endpoints(tx, generation).await?;

        Ok(GenerationDetail {
            service_uuid: service.service_uuid,
            version: version.to_string(),
            description,
            generation,
            is_latest,
            endpoints,
        })
    }

    pub async fn live_document(
        tx: &mut dyn CatalogTx,
        service_id: Id,
        caller: &Caller,
    ) -> CatalogResult<Value> {
        let service = live_service(tx, service_id).await?;
        require_owner(caller, &service)?;
        let source = OpenApiSynthesizer::load_live(tx, service.id).await?;
        Ok(OpenApiSynthesizer::synthesize(&source))
    }

    /// Document of an iteration, open or committed
    pub async fn iteration_document(
        tx: &mut dyn CatalogTx,
        iteration_id: Id,
        caller: &Caller,
    ) -> CatalogResult<Value> {
        let (iteration, _) = readable_iteration(tx, iteration_id, caller).await?;
        let source = OpenApiSynthesizer::load_iteration(tx, iteration.id).await?;
        Ok(OpenApiSynthesizer::synthesize(&source))
    }

    /// Iteration row for any reader allowed to see it
    pub async fn get_iteration(
        tx: &mut dyn CatalogTx,
        iteration_id: Id,
        caller: &Caller,
    ) -> CatalogResult<ServiceIteration> {
        let (iteration, _) = readable_iteration(tx, iteration_id, caller).await?;
        Ok(iteration)
    }

    async fn service_by_uuid(
        tx: &mut dyn CatalogTx,
        service_uuid: &str,
        caller: &Caller,
    ) -> CatalogResult<Service> {
        let service = tx
            .find_service_by_uuid(service_uuid)
            .await?
            .filter(Service::is_live)
            .ok_or_else(|| CatalogError::not_found(format!("service {}", service_uuid)))?;
        require_owner(caller, &service)?;
        Ok(service)
    }
}
