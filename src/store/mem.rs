use anyhow::{bail, Result};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::{
    Category, Endpoint, Generation, GenerationKind, HttpMethod, Id, NewCategory, NewEndpoint,
    NewIteration, NewParamNode, NewService, NewUser, ParamNode, ParamTable, Service,
    ServiceIteration, User, DEFAULT_LEVEL,
};
use crate::store::traits::{
    CatalogStore, CatalogTx, CategoryStore, EndpointStore, IterationStore, ParamStore,
    ServiceStore, UserStore,
};

/// Complete catalog contents; cloned into every transaction
#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: BTreeMap<Id, User>,
    services: BTreeMap<Id, Service>,
    iterations: BTreeMap<Id, ServiceIteration>,
    categories: BTreeMap<Id, Category>,
    endpoints: BTreeMap<(GenerationKind, Id), Endpoint>,
    params: HashMap<ParamTable, BTreeMap<Id, ParamNode>>,
    /// Last issued id per table
    sequences: HashMap<&'static str, Id>,
}

impl MemoryState {
    fn next_id(&mut self, table: &'static str) -> Id {
        let seq = self.sequences.entry(table).or_insert(0);
        *seq += 1;
        *seq
    }

    fn param_rows(&mut self, table: ParamTable) -> &mut BTreeMap<Id, ParamNode> {
        self.params.entry(table).or_default()
    }

    fn remove_endpoint(&mut self, kind: GenerationKind, id: Id) -> bool {
        if self.endpoints.remove(&(kind, id)).is_none() {
            return false;
        }
        for table in ParamTable::both(kind) {
            self.param_rows(table).retain(|_, p| p.endpoint_id != id);
        }
        true
    }

    fn endpoint_ids(&self, generation: Generation) -> Vec<Id> {
        self.endpoints
            .values()
            .filter(|e| e.generation == generation)
            .map(|e| e.id)
            .collect()
    }
}

/// In-process store. Transactions are fully serialized: `begin` waits for the
/// previous transaction to finish and works on a private copy of the state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CatalogStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn CatalogTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

/// A memory transaction; changes reach the shared state only on `commit`
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait::async_trait]
impl CatalogTx for MemoryTx {
    async fn commit(&mut self) -> Result<()> {
        *self.guard = self.working.clone();
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserStore for MemoryTx {
    async fn get_user(&mut self, id: Id) -> Result<Option<User>> {
        Ok(self.working.users.get(&id).cloned())
    }

    async fn find_user_by_username(&mut self, username: &str) -> Result<Option<User>> {
        Ok(self
            .working
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn insert_user(&mut self, user: NewUser) -> Result<User> {
        if self.working.users.values().any(|u| u.username == user.username) {
            bail!("username '{}' already exists", user.username);
        }
        let id = self.working.next_id("users");
        let user = User {
            id,
            username: user.username,
            nickname: user.nickname,
            email: user.email,
            level: user.level.unwrap_or(DEFAULT_LEVEL),
        };
        self.working.users.insert(id, user.clone());
        Ok(user)
    }
}

#[async_trait::async_trait]
impl ServiceStore for MemoryTx {
    async fn get_service(&mut self, id: Id) -> Result<Option<Service>> {
        Ok(self.working.services.get(&id).cloned())
    }

    async fn find_service_by_uuid(&mut self, service_uuid: &str) -> Result<Option<Service>> {
        Ok(self
            .working
            .services
            .values()
            .find(|s| s.service_uuid == service_uuid)
            .cloned())
    }

    async fn insert_service(&mut self, service: NewService) -> Result<Service> {
        if !self.working.users.contains_key(&service.owner_id) {
            bail!("owner {} does not exist", service.owner_id);
        }
        if self
            .working
            .services
            .values()
            .any(|s| s.service_uuid == service.service_uuid)
        {
            bail!("service uuid '{}' already exists", service.service_uuid);
        }
        let id = self.working.next_id("services");
        let now = Utc::now();
        let service = Service {
            id,
            service_uuid: service.service_uuid,
            owner_id: service.owner_id,
            version: service.version,
            description: service.description,
            created_at: now,
            updated_at: now,
            is_deleted: false,
            deleted_at: None,
        };
        self.working.services.insert(id, service.clone());
        Ok(service)
    }

    async fn update_service(&mut self, service: &Service) -> Result<()> {
        match self.working.services.get_mut(&service.id) {
            Some(existing) => {
                *existing = service.clone();
                Ok(())
            }
            None => bail!("service {} does not exist", service.id),
        }
    }

    async fn list_services(&mut self, owner_id: Id) -> Result<Vec<Service>> {
        Ok(self
            .working
            .services
            .values()
            .filter(|s| s.owner_id == owner_id && s.is_live())
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl IterationStore for MemoryTx {
    async fn get_iteration(&mut self, id: Id) -> Result<Option<ServiceIteration>> {
        Ok(self.working.iterations.get(&id).cloned())
    }

    async fn lock_iteration(&mut self, id: Id) -> Result<Option<ServiceIteration>> {
        // The whole transaction already holds the store lock
        self.get_iteration(id).await
    }

    async fn find_open_iteration(
        &mut self,
        service_id: Id,
        creator_id: Id,
    ) -> Result<Option<ServiceIteration>> {
        Ok(self
            .working
            .iterations
            .values()
            .find(|i| i.service_id == service_id && i.creator_id == creator_id && !i.is_committed)
            .cloned())
    }

    async fn insert_iteration(
        &mut self,
        iteration: NewIteration,
    ) -> Result<Option<ServiceIteration>> {
        if !self.working.services.contains_key(&iteration.service_id) {
            bail!("service {} does not exist", iteration.service_id);
        }
        if self
            .find_open_iteration(iteration.service_id, iteration.creator_id)
            .await?
            .is_some()
        {
            return Ok(None);
        }
        let id = self.working.next_id("service_iterations");
        let iteration = ServiceIteration {
            id,
            service_id: iteration.service_id,
            creator_id: iteration.creator_id,
            version: iteration.version,
            description: iteration.description,
            is_committed: false,
            created_at: Utc::now(),
            committed_at: None,
        };
        self.working.iterations.insert(id, iteration.clone());
        Ok(Some(iteration))
    }

    async fn update_iteration(&mut self, iteration: &ServiceIteration) -> Result<()> {
        match self.working.iterations.get_mut(&iteration.id) {
            Some(existing) => {
                *existing = iteration.clone();
                Ok(())
            }
            None => bail!("iteration {} does not exist", iteration.id),
        }
    }

    async fn delete_iteration(&mut self, id: Id) -> Result<bool> {
        if self.working.iterations.remove(&id).is_none() {
            return Ok(false);
        }
        for endpoint_id in self.working.endpoint_ids(Generation::Draft { iteration_id: id }) {
            self.working.remove_endpoint(GenerationKind::Draft, endpoint_id);
        }
        Ok(true)
    }

    async fn list_iterations(&mut self, service_id: Id) -> Result<Vec<ServiceIteration>> {
        let mut iterations: Vec<ServiceIteration> = self
            .working
            .iterations
            .values()
            .filter(|i| i.service_id == service_id)
            .cloned()
            .collect();
        // Committed newest first by commit time, open ones after them
        iterations.sort_by(|a, b| {
            b.committed_at
                .cmp(&a.committed_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(iterations)
    }
}

#[async_trait::async_trait]
impl CategoryStore for MemoryTx {
    async fn get_category(&mut self, id: Id) -> Result<Option<Category>> {
        Ok(self.working.categories.get(&id).cloned())
    }

    async fn find_category(&mut self, service_id: Id, name: &str) -> Result<Option<Category>> {
        Ok(self
            .working
            .categories
            .values()
            .find(|c| c.service_id == service_id && c.name == name)
            .cloned())
    }

    async fn insert_category(&mut self, category: NewCategory) -> Result<Category> {
        if self
            .find_category(category.service_id, &category.name)
            .await?
            .is_some()
        {
            bail!("category '{}' already exists", category.name);
        }
        let id = self.working.next_id("api_categories");
        let category = Category {
            id,
            service_id: category.service_id,
            name: category.name,
            description: category.description,
        };
        self.working.categories.insert(id, category.clone());
        Ok(category)
    }

    async fn update_category(&mut self, category: &Category) -> Result<()> {
        let clash = self
            .working
            .categories
            .values()
            .any(|c| c.id != category.id && c.service_id == category.service_id && c.name == category.name);
        if clash {
            bail!("category '{}' already exists", category.name);
        }
        match self.working.categories.get_mut(&category.id) {
            Some(existing) => {
                *existing = category.clone();
                Ok(())
            }
            None => bail!("category {} does not exist", category.id),
        }
    }

    async fn delete_category(&mut self, id: Id) -> Result<bool> {
        if self.working.categories.remove(&id).is_none() {
            return Ok(false);
        }
        for endpoint in self.working.endpoints.values_mut() {
            if endpoint.category_id == Some(id) {
                endpoint.category_id = None;
            }
        }
        Ok(true)
    }

    async fn list_categories(&mut self, service_id: Id) -> Result<Vec<Category>> {
        Ok(self
            .working
            .categories
            .values()
            .filter(|c| c.service_id == service_id)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl EndpointStore for MemoryTx {
    async fn get_endpoint(&mut self, kind: GenerationKind, id: Id) -> Result<Option<Endpoint>> {
        Ok(self.working.endpoints.get(&(kind, id)).cloned())
    }

    async fn list_endpoints(&mut self, generation: Generation) -> Result<Vec<Endpoint>> {
        Ok(self
            .working
            .endpoints
            .range((generation.kind(), Id::MIN)..=(generation.kind(), Id::MAX))
            .map(|(_, e)| e)
            .filter(|e| e.generation == generation)
            .cloned()
            .collect())
    }

    async fn find_endpoint(
        &mut self,
        generation: Generation,
        method: HttpMethod,
        path: &str,
    ) -> Result<Option<Endpoint>> {
        Ok(self
            .working
            .endpoints
            .values()
            .find(|e| e.generation == generation && e.method == method && e.path == path)
            .cloned())
    }

    async fn insert_endpoint(&mut self, endpoint: NewEndpoint) -> Result<Endpoint> {
        let owner_exists = match endpoint.generation {
            Generation::Live { service_id } => self.working.services.contains_key(&service_id),
            Generation::Draft { iteration_id } => {
                self.working.iterations.contains_key(&iteration_id)
            }
        };
        if !owner_exists {
            bail!("owner of {:?} does not exist", endpoint.generation);
        }
        if self
            .find_endpoint(endpoint.generation, endpoint.method, &endpoint.path)
            .await?
            .is_some()
        {
            bail!(
                "endpoint {} {} already exists in {:?}",
                endpoint.method,
                endpoint.path,
                endpoint.generation
            );
        }
        let kind = endpoint.generation.kind();
        let id = self.working.next_id(kind.endpoint_table());
        let now = Utc::now();
        let endpoint = Endpoint {
            id,
            generation: endpoint.generation,
            owner_id: endpoint.owner_id,
            category_id: endpoint.category_id,
            name: endpoint.name,
            method: endpoint.method,
            path: endpoint.path,
            description: endpoint.description,
            level: endpoint.level,
            is_enabled: endpoint.is_enabled,
            created_at: now,
            updated_at: now,
        };
        self.working.endpoints.insert((kind, id), endpoint.clone());
        Ok(endpoint)
    }

    async fn update_endpoint(&mut self, endpoint: &Endpoint) -> Result<()> {
        let kind = endpoint.generation.kind();
        let clash = self.working.endpoints.values().any(|e| {
            e.id != endpoint.id
                && e.generation == endpoint.generation
                && e.method == endpoint.method
                && e.path == endpoint.path
        });
        if clash {
            bail!("endpoint {} {} already exists", endpoint.method, endpoint.path);
        }
        match self.working.endpoints.get_mut(&(kind, endpoint.id)) {
            Some(existing) => {
                *existing = endpoint.clone();
                Ok(())
            }
            None => bail!("endpoint {} does not exist", endpoint.id),
        }
    }

    async fn delete_endpoint(&mut self, kind: GenerationKind, id: Id) -> Result<bool> {
        Ok(self.working.remove_endpoint(kind, id))
    }

    async fn delete_endpoints(&mut self, generation: Generation) -> Result<u64> {
        let ids = self.working.endpoint_ids(generation);
        for id in &ids {
            self.working.remove_endpoint(generation.kind(), *id);
        }
        Ok(ids.len() as u64)
    }
}

#[async_trait::async_trait]
impl ParamStore for MemoryTx {
    async fn list_params(&mut self, table: ParamTable, endpoint_id: Id) -> Result<Vec<ParamNode>> {
        Ok(self
            .working
            .param_rows(table)
            .values()
            .filter(|p| p.endpoint_id == endpoint_id)
            .cloned()
            .collect())
    }

    async fn insert_param(&mut self, table: ParamTable, param: NewParamNode) -> Result<ParamNode> {
        if param.slot.side() != table.side {
            bail!("{:?} row cannot be stored in {}", param.slot.side(), table.table_name());
        }
        if !self
            .working
            .endpoints
            .contains_key(&(table.generation, param.endpoint_id))
        {
            bail!("endpoint {} does not exist", param.endpoint_id);
        }
        let id = self.working.next_id(table.table_name());
        let node = ParamNode {
            id,
            endpoint_id: param.endpoint_id,
            parent_id: param.parent_id,
            name: param.name,
            param_type: param.param_type,
            required: param.required,
            default_value: param.default_value,
            description: param.description,
            example: param.example,
            array_child_type: param.array_child_type,
            slot: param.slot,
        };
        self.working.param_rows(table).insert(id, node.clone());
        Ok(node)
    }

    async fn set_param_parent(
        &mut self,
        table: ParamTable,
        id: Id,
        parent_id: Option<Id>,
    ) -> Result<()> {
        match self.working.param_rows(table).get_mut(&id) {
            Some(node) => {
                node.parent_id = parent_id;
                Ok(())
            }
            None => bail!("{} row {} does not exist", table.table_name(), id),
        }
    }

    async fn delete_params(&mut self, table: ParamTable, endpoint_id: Id) -> Result<u64> {
        let rows = self.working.param_rows(table);
        let before = rows.len();
        rows.retain(|_, p| p.endpoint_id != endpoint_id);
        Ok((before - rows.len()) as u64)
    }
}
