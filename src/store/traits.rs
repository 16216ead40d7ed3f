use crate::model::{
    Category, Endpoint, Generation, GenerationKind, HttpMethod, Id, NewCategory, NewEndpoint,
    NewIteration, NewParamNode, NewService, NewUser, ParamNode, ParamTable, Service,
    ServiceIteration, User,
};
use anyhow::Result;

/// Source of transactions. Every catalog operation runs inside exactly one.
#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    /// Open a transaction. Dropping it without calling `commit` rolls it back.
    async fn begin(&self) -> Result<Box<dyn CatalogTx>>;
}

#[async_trait::async_trait]
pub trait UserStore: Send {
    async fn get_user(&mut self, id: Id) -> Result<Option<User>>;
    async fn find_user_by_username(&mut self, username: &str) -> Result<Option<User>>;
    async fn insert_user(&mut self, user: NewUser) -> Result<User>;
}

#[async_trait::async_trait]
pub trait ServiceStore: Send {
    async fn get_service(&mut self, id: Id) -> Result<Option<Service>>;
    async fn find_service_by_uuid(&mut self, service_uuid: &str) -> Result<Option<Service>>;
    async fn insert_service(&mut self, service: NewService) -> Result<Service>;
    async fn update_service(&mut self, service: &Service) -> Result<()>;
    /// Services of an owner that are not soft-deleted, ordered by id
    async fn list_services(&mut self, owner_id: Id) -> Result<Vec<Service>>;
}

#[async_trait::async_trait]
pub trait IterationStore: Send {
    async fn get_iteration(&mut self, id: Id) -> Result<Option<ServiceIteration>>;
    /// Fetch an iteration and hold an exclusive lock on its row until the transaction ends
    async fn lock_iteration(&mut self, id: Id) -> Result<Option<ServiceIteration>>;
    async fn find_open_iteration(
        &mut self,
        service_id: Id,
        creator_id: Id,
    ) -> Result<Option<ServiceIteration>>;
    /// Insert an open iteration. Returns `None` when an open iteration for the same
    /// (service, creator) already exists.
    async fn insert_iteration(&mut self, iteration: NewIteration)
        -> Result<Option<ServiceIteration>>;
    async fn update_iteration(&mut self, iteration: &ServiceIteration) -> Result<()>;
    /// Delete an iteration together with its draft endpoints and their parameters
    async fn delete_iteration(&mut self, id: Id) -> Result<bool>;
    /// All iterations of a service: committed ones by commit time newest first,
    /// then open ones newest first
    async fn list_iterations(&mut self, service_id: Id) -> Result<Vec<ServiceIteration>>;
}

#[async_trait::async_trait]
pub trait CategoryStore: Send {
    async fn get_category(&mut self, id: Id) -> Result<Option<Category>>;
    async fn find_category(&mut self, service_id: Id, name: &str) -> Result<Option<Category>>;
    async fn insert_category(&mut self, category: NewCategory) -> Result<Category>;
    async fn update_category(&mut self, category: &Category) -> Result<()>;
    /// Delete a category, leaving its endpoints uncategorized
    async fn delete_category(&mut self, id: Id) -> Result<bool>;
    async fn list_categories(&mut self, service_id: Id) -> Result<Vec<Category>>;
}

#[async_trait::async_trait]
pub trait EndpointStore: Send {
    async fn get_endpoint(&mut self, kind: GenerationKind, id: Id) -> Result<Option<Endpoint>>;
    /// Endpoints of a generation ordered by id
    async fn list_endpoints(&mut self, generation: Generation) -> Result<Vec<Endpoint>>;
    async fn find_endpoint(
        &mut self,
        generation: Generation,
        method: HttpMethod,
        path: &str,
    ) -> Result<Option<Endpoint>>;
    async fn insert_endpoint(&mut self, endpoint: NewEndpoint) -> Result<Endpoint>;
    async fn update_endpoint(&mut self, endpoint: &Endpoint) -> Result<()>;
    /// Delete one endpoint and both of its parameter forests
    async fn delete_endpoint(&mut self, kind: GenerationKind, id: Id) -> Result<bool>;
    /// Delete every endpoint of a generation and their parameter forests
    async fn delete_endpoints(&mut self, generation: Generation) -> Result<u64>;
}

#[async_trait::async_trait]
pub trait ParamStore: Send {
    /// Rows of one endpoint in one parameter table, ordered by id
    async fn list_params(&mut self, table: ParamTable, endpoint_id: Id) -> Result<Vec<ParamNode>>;
    /// Insert and flush a row so its permanent id is known
    async fn insert_param(&mut self, table: ParamTable, param: NewParamNode) -> Result<ParamNode>;
    async fn set_param_parent(&mut self, table: ParamTable, id: Id, parent_id: Option<Id>)
        -> Result<()>;
    async fn delete_params(&mut self, table: ParamTable, endpoint_id: Id) -> Result<u64>;
}

/// A transactional persistence handle
#[async_trait::async_trait]
pub trait CatalogTx:
    UserStore + ServiceStore + IterationStore + CategoryStore + EndpointStore + ParamStore + Send
{
    /// Make every change of this transaction durable
    async fn commit(&mut self) -> Result<()>;
}
