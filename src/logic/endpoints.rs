use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};
use crate::logic::iteration::IterationManager;
use crate::logic::organize::{EndpointDetail, ParamOrganizer};
use crate::logic::services::{live_service, readable_iteration, require_owner};
use crate::logic::tree_builder::{BuildReport, ParamTreeBuilder};
use crate::model::{
    ApiLevel, Caller, Category, Endpoint, Generation, GenerationKind, HttpMethod, Id,
    NewCategory, NewEndpoint, ParamInput, ParamSide, ParamTable, Service,
};
use crate::store::CatalogTx;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Partial category update; at least one field must be present
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Draft endpoint definition as submitted by callers. `method` and `level`
/// are parsed leniently; parameter lists left out keep the current forest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointRequest {
    pub name: String,
    #[serde(default)]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub category_id: Option<Id>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
    #[serde(default)]
    pub req_params: Option<Vec<ParamInput>>,
    #[serde(default)]
    pub resp_params: Option<Vec<ParamInput>>,
}

/// A draft endpoint after an add or edit, with what the builder did to the input
#[derive(Debug, Clone, Serialize)]
pub struct DraftEdit {
    pub detail: EndpointDetail,
    pub report: BuildReport,
}

/// Parsed scalar fields of an [`EndpointRequest`]
struct EndpointFields {
    name: String,
    method: HttpMethod,
    path: String,
    level: ApiLevel,
}

impl EndpointRequest {
    fn fields(&self, report: &mut BuildReport) -> CatalogResult<EndpointFields> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(CatalogError::validation("endpoint name is required"));
        }
        let path = self.path.trim().to_string();
        if path.is_empty() {
            return Err(CatalogError::validation("endpoint path is required"));
        }

        let method = HttpMethod::parse_lenient(&self.method);
        if method.defaulted {
            report.coerce(&name, "method", &self.method, Some(method.value.as_str()));
        }
        let level = match self.level.as_deref() {
            None => ApiLevel::default(),
            Some(raw) => {
                let parsed = ApiLevel::parse_lenient(raw);
                if parsed.defaulted {
                    report.coerce(&name, "level", raw, Some(parsed.value.as_str()));
                }
                parsed.value
            }
        };

        Ok(EndpointFields {
            name,
            method: method.value,
            path,
            level,
        })
    }
}

/// Categories, live endpoint reads and draft endpoint editing
pub struct EndpointOperations;

impl EndpointOperations {
    pub async fn list_categories(
        tx: &mut dyn CatalogTx,
        service_id: Id,
        caller: &Caller,
    ) -> CatalogResult<Vec<Category>> {
        let service = Self::owned_service(tx, service_id, caller).await?;
        Ok(tx.list_categories(service.id).await?)
    }

    pub async fn add_category(
        tx: &mut dyn CatalogTx,
        service_id: Id,
        request: CategoryRequest,
        caller: &Caller,
    ) -> CatalogResult<Category> {
        let service = Self::owned_service(tx, service_id, caller).await?;
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(CatalogError::validation("category name is required"));
        }
        if tx.find_category(service.id, &name).await?.is_some() {
            return Err(CatalogError::conflict(format!(
                "category '{}' already exists in service {}",
                name, service.id
            )));
        }

        let category = tx
            .insert_category(NewCategory {
                service_id: service.id,
                name,
                description: request.description,
            })
            .await?;
        log::info!(
            "Added category {} '{}' to service {}",
            category.id,
            category.name,
            service.service_uuid
        );
        Ok(category)
    }

    pub async fn update_category(
        tx: &mut dyn CatalogTx,
        category_id: Id,
        update: CategoryUpdate,
        caller: &Caller,
    ) -> CatalogResult<Category> {
        let mut category = Self::owned_category(tx, category_id, caller).await?;
        if update.name.is_none() && update.description.is_none() {
            return Err(CatalogError::validation("nothing to update"));
        }

        let mut changed = false;
        if let Some(name) = update.name.map(|n| n.trim().to_string()) {
            if name.is_empty() {
                return Err(CatalogError::validation("category name is required"));
            }
            if name != category.name {
                if tx.find_category(category.service_id, &name).await?.is_some() {
                    return Err(CatalogError::conflict(format!(
                        "category '{}' already exists in service {}",
                        name, category.service_id
                    )));
                }
                category.name = name;
                changed = true;
            }
        }
        if update.description.is_some() && update.description != category.description {
            category.description = update.description;
            changed = true;
        }
        if !changed {
            return Err(CatalogError::validation("category not changed"));
        }

        tx.update_category(&category).await?;
        Ok(category)
    }

    /// Delete a category; its endpoints become uncategorized
    pub async fn delete_category(
        tx: &mut dyn CatalogTx,
        category_id: Id,
        caller: &Caller,
    ) -> CatalogResult<()> {
        let category = Self::owned_category(tx, category_id, caller).await?;
        tx.delete_category(category.id).await?;
        log::info!(
            "Deleted category {} '{}' of service {}",
            category.id,
            category.name,
            category.service_id
        );
        Ok(())
    }

    /// Live endpoints of a service, newest first
    pub async fn list_endpoints(
        tx: &mut dyn CatalogTx,
        service_id: Id,
        category_id: Option<Id>,
        caller: &Caller,
    ) -> CatalogResult<Vec<Endpoint>> {
        let service = Self::owned_service(tx, service_id, caller).await?;
        let mut endpoints: Vec<Endpoint> = tx
            .list_endpoints(Generation::Live {
                service_id: service.id,
            })
            .await?
            .into_iter()
            .filter(|e| category_id.is_none() || e.category_id == category_id)
            .collect();
        endpoints.reverse();
        Ok(endpoints)
    }

    pub async fn endpoint_detail(
        tx: &mut dyn CatalogTx,
        endpoint_id: Id,
        caller: &Caller,
    ) -> CatalogResult<EndpointDetail> {
        let (endpoint, _) = Self::owned_live_endpoint(tx, endpoint_id, caller).await?;
        ParamOrganizer::load_detail(tx, endpoint).await
    }

    /// Assign a live endpoint to a category of its service, or to none
    pub async fn move_endpoint(
        tx: &mut dyn CatalogTx,
        endpoint_id: Id,
        category_id: Option<Id>,
        caller: &Caller,
    ) -> CatalogResult<Endpoint> {
        let (mut endpoint, service) = Self::owned_live_endpoint(tx, endpoint_id, caller).await?;
        if endpoint.category_id == category_id {
            return Err(CatalogError::validation("endpoint category not changed"));
        }
        Self::check_category(tx, category_id, &service).await?;

        endpoint.category_id = category_id;
        endpoint.touch();
        tx.update_endpoint(&endpoint).await?;
        Ok(endpoint)
    }

    pub async fn add_draft_endpoint(
        tx: &mut dyn CatalogTx,
        iteration_id: Id,
        request: EndpointRequest,
        caller: &Caller,
    ) -> CatalogResult<DraftEdit> {
        let (iteration, service) =
            IterationManager::lock_open(tx, iteration_id, caller).await?;
        let generation = Generation::Draft {
            iteration_id: iteration.id,
        };
        let mut report = BuildReport::default();
        let fields = request.fields(&mut report)?;
        Self::check_route_free(tx, generation, fields.method, &fields.path, None).await?;
        Self::check_category(tx, request.category_id, &service).await?;

        let endpoint = tx
            .insert_endpoint(NewEndpoint {
                generation,
                owner_id: caller.user_id,
                category_id: request.category_id,
                name: fields.name,
                method: fields.method,
                path: fields.path,
                description: request.description.clone(),
                level: fields.level,
                is_enabled: request.is_enabled.unwrap_or(true),
            })
            .await?;
        Self::write_params(tx, &endpoint, &request, &mut report).await?;

        log::info!(
            "Added draft endpoint {} {} {} to iteration {}",
            endpoint.id,
            endpoint.method,
            endpoint.path,
            iteration.id
        );
        let detail = ParamOrganizer::load_detail(tx, endpoint).await?;
        Ok(DraftEdit { detail, report })
    }

    pub async fn draft_endpoint_detail(
        tx: &mut dyn CatalogTx,
        iteration_id: Id,
        endpoint_id: Id,
        caller: &Caller,
    ) -> CatalogResult<EndpointDetail> {
        let (iteration, _) = readable_iteration(tx, iteration_id, caller).await?;
        let endpoint = Self::draft_endpoint(tx, iteration.id, endpoint_id).await?;
        ParamOrganizer::load_detail(tx, endpoint).await
    }

    /// Overwrite a draft endpoint's fields. Each parameter list that is
    /// present replaces the matching forest wholesale. The category is kept.
    pub async fn update_draft_endpoint(
        tx: &mut dyn CatalogTx,
        iteration_id: Id,
        endpoint_id: Id,
        request: EndpointRequest,
        caller: &Caller,
    ) -> CatalogResult<DraftEdit> {
        let (iteration, _) = IterationManager::lock_open(tx, iteration_id, caller).await?;
        let mut endpoint = Self::draft_endpoint(tx, iteration.id, endpoint_id).await?;
        let mut report = BuildReport::default();
        let fields = request.fields(&mut report)?;
        if fields.method != endpoint.method || fields.path != endpoint.path {
            Self::check_route_free(
                tx,
                endpoint.generation,
                fields.method,
                &fields.path,
                Some(endpoint.id),
            )
            .await?;
        }

        endpoint.name = fields.name;
        endpoint.method = fields.method;
        endpoint.path = fields.path;
        endpoint.description = request.description.clone();
        endpoint.level = fields.level;
        if let Some(enabled) = request.is_enabled {
            endpoint.is_enabled = enabled;
        }
        endpoint.touch();
        tx.update_endpoint(&endpoint).await?;
        Self::write_params(tx, &endpoint, &request, &mut report).await?;

        log::info!(
            "Updated draft endpoint {} of iteration {} ({} params written, {} removed)",
            endpoint.id,
            iteration.id,
            report.inserted,
            report.removed
        );
        let detail = ParamOrganizer::load_detail(tx, endpoint).await?;
        Ok(DraftEdit { detail, report })
    }

    pub async fn delete_draft_endpoint(
        tx: &mut dyn CatalogTx,
        iteration_id: Id,
        endpoint_id: Id,
        caller: &Caller,
    ) -> CatalogResult<()> {
        let (iteration, _) = IterationManager::lock_open(tx, iteration_id, caller).await?;
        let endpoint = Self::draft_endpoint(tx, iteration.id, endpoint_id).await?;
        tx.delete_endpoint(GenerationKind::Draft, endpoint.id).await?;
        log::info!(
            "Deleted draft endpoint {} {} {} from iteration {}",
            endpoint.id,
            endpoint.method,
            endpoint.path,
            iteration.id
        );
        Ok(())
    }

    async fn write_params(
        tx: &mut dyn CatalogTx,
        endpoint: &Endpoint,
        request: &EndpointRequest,
        report: &mut BuildReport,
    ) -> CatalogResult<()> {
        let kind = endpoint.generation.kind();
        let lists = [
            (ParamSide::Request, request.req_params.as_deref()),
            (ParamSide::Response, request.resp_params.as_deref()),
        ];
        for (side, inputs) in lists {
            let Some(inputs) = inputs else {
                continue;
            };
            let table = ParamTable::new(kind, side);
            let built = ParamTreeBuilder::replace(tx, table, endpoint.id, inputs).await?;
            report.absorb(built);
        }
        Ok(())
    }

    async fn check_route_free(
        tx: &mut dyn CatalogTx,
        generation: Generation,
        method: HttpMethod,
        path: &str,
        except: Option<Id>,
    ) -> CatalogResult<()> {
        match tx.find_endpoint(generation, method, path).await? {
            Some(existing) if Some(existing.id) != except => Err(CatalogError::conflict(format!(
                "endpoint {} {} already exists",
                method, path
            ))),
            _ => Ok(()),
        }
    }

    async fn check_category(
        tx: &mut dyn CatalogTx,
        category_id: Option<Id>,
        service: &Service,
    ) -> CatalogResult<()> {
        let Some(category_id) = category_id else {
            return Ok(());
        };
        let category = tx
            .get_category(category_id)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("category {}", category_id)))?;
        if category.service_id != service.id {
            return Err(CatalogError::validation(format!(
                "category {} does not belong to service {}",
                category.id, service.id
            )));
        }
        Ok(())
    }

    async fn draft_endpoint(
        tx: &mut dyn CatalogTx,
        iteration_id: Id,
        endpoint_id: Id,
    ) -> CatalogResult<Endpoint> {
        tx.get_endpoint(GenerationKind::Draft, endpoint_id)
            .await?
            .filter(|e| e.generation == Generation::Draft { iteration_id })
            .ok_or_else(|| {
                CatalogError::not_found(format!(
                    "endpoint {} in iteration {}",
                    endpoint_id, iteration_id
                ))
            })
    }

    async fn owned_service(
        tx: &mut dyn CatalogTx,
        service_id: Id,
        caller: &Caller,
    ) -> CatalogResult<Service> {
        let service = live_service(tx, service_id).await?;
        require_owner(caller, &service)?;
        Ok(service)
    }

    async fn owned_category(
        tx: &mut dyn CatalogTx,
        category_id: Id,
        caller: &Caller,
    ) -> CatalogResult<Category> {
        let category = tx
            .get_category(category_id)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("category {}", category_id)))?;
        Self::owned_service(tx, category.service_id, caller).await?;
        Ok(category)
    }

    async fn owned_live_endpoint(
        tx: &mut dyn CatalogTx,
        endpoint_id: Id,
        caller: &Caller,
    ) -> CatalogResult<(Endpoint, Service)> {
        let endpoint = tx
            .get_endpoint(GenerationKind::Live, endpoint_id)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("endpoint {}", endpoint_id)))?;
        let service = Self::owned_service(tx, endpoint.generation.owner_id(), caller).await?;
        Ok((endpoint, service))
    }
}
