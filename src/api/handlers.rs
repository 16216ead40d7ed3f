use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Json as RequestJson,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::CatalogError;
use crate::logic::{
    CategoryRequest, CategoryUpdate, CommitOutcome, CreateServiceRequest, DraftEdit,
    EndpointDetail, EndpointOperations, EndpointRequest, GenerationDetail, IterationManager,
    ServiceOperations, StartOutcome, VersionHistory,
};
use crate::model::{Caller, Category, Endpoint, Id, NewUser, Service, ServiceIteration, User};
use crate::store::{CatalogStore, CatalogTx};

pub type AppState<S> = Arc<S>;

pub type ApiError = (StatusCode, Json<ErrorResponse>);
pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

impl From<CatalogError> for (StatusCode, Json<ErrorResponse>) {
    fn from(err: CatalogError) -> Self {
        let status = match &err {
            CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
            CatalogError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            CatalogError::Conflict(_) | CatalogError::InvalidState(_) => StatusCode::CONFLICT,
            CatalogError::Validation(_) => StatusCode::BAD_REQUEST,
            CatalogError::Storage(e) => {
                log::error!("Storage failure: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorResponse::new(&err.to_string())))
    }
}

#[derive(Debug, Deserialize)]
pub struct EndpointQuery {
    pub category_id: Option<Id>,
}

#[derive(Debug, Deserialize)]
pub struct CommitRequest {
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct IterationUpdate {
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MoveEndpointRequest {
    #[serde(default)]
    pub category_id: Option<Id>,
}

async fn begin<S: CatalogStore>(store: &S) -> Result<Box<dyn CatalogTx>, ApiError> {
    Ok(store.begin().await.map_err(CatalogError::from)?)
}

async fn finish<T>(mut tx: Box<dyn CatalogTx>, value: T) -> Result<T, ApiError> {
    tx.commit().await.map_err(CatalogError::from)?;
    Ok(value)
}

// Users

/// POST /v1/users
pub async fn register_user<S: CatalogStore>(
    State(store): State<AppState<S>>,
    RequestJson(req): RequestJson<NewUser>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let mut tx = begin(&*store).await?;
    let user = ServiceOperations::register_user(tx.as_mut(), req).await?;
    let user = finish(tx, user).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /v1/users/:user_id
pub async fn get_user<S: CatalogStore>(
    Path(user_id): Path<Id>,
    State(store): State<AppState<S>>,
    _caller: Caller,
) -> ApiResult<User> {
    let mut tx = begin(&*store).await?;
    let user = ServiceOperations::get_user(tx.as_mut(), user_id).await?;
    Ok(Json(finish(tx, user).await?))
}

// Services

/// GET /v1/services
pub async fn list_services<S: CatalogStore>(
    State(store): State<AppState<S>>,
    caller: Caller,
) -> ApiResult<Vec<Service>> {
    let mut tx = begin(&*store).await?;
    let services = ServiceOperations::list_services(tx.as_mut(), &caller).await?;
    Ok(Json(finish(tx, services).await?))
}

/// POST /v1/services
pub async fn create_service<S: CatalogStore>(
    State(store): State<AppState<S>>,
    caller: Caller,
    RequestJson(req): RequestJson<CreateServiceRequest>,
) -> Result<(StatusCode, Json<Service>), ApiError> {
    let mut tx = begin(&*store).await?;
    let service = ServiceOperations::create_service(tx.as_mut(), req, &caller).await?;
    let service = finish(tx, service).await?;
    Ok((StatusCode::CREATED, Json(service)))
}

/// GET /v1/services/:service_id
pub async fn get_service<S: CatalogStore>(
    Path(service_id): Path<Id>,
    State(store): State<AppState<S>>,
    caller: Caller,
) -> ApiResult<Service> {
    let mut tx = begin(&*store).await?;
    let service = ServiceOperations::get_service(tx.as_mut(), service_id, &caller).await?;
    Ok(Json(finish(tx, service).await?))
}

/// DELETE /v1/services/:service_id
pub async fn delete_service<S: CatalogStore>(
    Path(service_id): Path<Id>,
    State(store): State<AppState<S>>,
    caller: Caller,
) -> ApiResult<Service> {
    let mut tx = begin(&*store).await?;
    let service = ServiceOperations::delete_service(tx.as_mut(), service_id, &caller).await?;
    Ok(Json(finish(tx, service).await?))
}

/// POST /v1/services/:service_id/restore
pub async fn restore_service<S: CatalogStore>(
    Path(service_id): Path<Id>,
    State(store): State<AppState<S>>,
    caller: Caller,
) -> ApiResult<Service> {
    let mut tx = begin(&*store).await?;
    let service = ServiceOperations::restore_service(tx.as_mut(), service_id, &caller).await?;
    Ok(Json(finish(tx, service).await?))
}

/// GET /v1/services/by-uuid/:service_uuid/versions
pub async fn version_history<S: CatalogStore>(
    Path(service_uuid): Path<String>,
    State(store): State<AppState<S>>,
    caller: Caller,
) -> ApiResult<VersionHistory> {
    let mut tx = begin(&*store).await?;
    let history = ServiceOperations::version_history(tx.as_mut(), &service_uuid, &caller).await?;
    Ok(Json(finish(tx, history).await?))
}

/// GET /v1/services/by-uuid/:service_uuid/versions/:version
pub async fn generation_detail<S: CatalogStore>(
    Path((service_uuid, version)): Path<(String, String)>,
    State(store): State<AppState<S>>,
    caller: Caller,
) -> ApiResult<GenerationDetail> {
    let mut tx = begin(&*store).await?;
    let detail =
        ServiceOperations::generation_detail(tx.as_mut(), &service_uuid, &version, &caller)
            .await?;
    Ok(Json(finish(tx, detail).await?))
}

/// GET /v1/services/:service_id/openapi.json
pub async fn live_document<S: CatalogStore>(
    Path(service_id): Path<Id>,
    State(store): State<AppState<S>>,
    caller: Caller,
) -> ApiResult<Value> {
    let mut tx = begin(&*store).await?;
    let document = ServiceOperations::live_document(tx.as_mut(), service_id, &caller).await?;
    Ok(Json(finish(tx, document).await?))
}

// Iterations

/// POST /v1/services/:service_id/iterations
///
/// 201 when a new iteration was opened, 200 when the caller's open one is returned
pub async fn start_iteration<S: CatalogStore>(
    Path(service_id): Path<Id>,
    State(store): State<AppState<S>>,
    caller: Caller,
) -> Result<(StatusCode, Json<StartOutcome>), ApiError> {
    let mut tx = begin(&*store).await?;
    let outcome = IterationManager::start(tx.as_mut(), service_id, &caller).await?;
    let outcome = finish(tx, outcome).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

/// GET /v1/iterations/:iteration_id
pub async fn get_iteration<S: CatalogStore>(
    Path(iteration_id): Path<Id>,
    State(store): State<AppState<S>>,
    caller: Caller,
) -> ApiResult<ServiceIteration> {
    let mut tx = begin(&*store).await?;
    let iteration = ServiceOperations::get_iteration(tx.as_mut(), iteration_id, &caller).await?;
    Ok(Json(finish(tx, iteration).await?))
}

/// PATCH /v1/iterations/:iteration_id
pub async fn update_iteration<S: CatalogStore>(
    Path(iteration_id): Path<Id>,
    State(store): State<AppState<S>>,
    caller: Caller,
    RequestJson(req): RequestJson<IterationUpdate>,
) -> ApiResult<ServiceIteration> {
    let mut tx = begin(&*store).await?;
    let iteration =
        IterationManager::update_description(tx.as_mut(), iteration_id, req.description, &caller)
            .await?;
    Ok(Json(finish(tx, iteration).await?))
}

/// POST /v1/iterations/:iteration_id/commit
pub async fn commit_iteration<S: CatalogStore>(
    Path(iteration_id): Path<Id>,
    State(store): State<AppState<S>>,
    caller: Caller,
    RequestJson(req): RequestJson<CommitRequest>,
) -> ApiResult<CommitOutcome> {
    let mut tx = begin(&*store).await?;
    let outcome =
        IterationManager::commit(tx.as_mut(), iteration_id, &req.version, &caller).await?;
    Ok(Json(finish(tx, outcome).await?))
}

/// DELETE /v1/iterations/:iteration_id
pub async fn abandon_iteration<S: CatalogStore>(
    Path(iteration_id): Path<Id>,
    State(store): State<AppState<S>>,
    caller: Caller,
) -> ApiResult<ServiceIteration> {
    let mut tx = begin(&*store).await?;
    let iteration = IterationManager::abandon(tx.as_mut(), iteration_id, &caller).await?;
    Ok(Json(finish(tx, iteration).await?))
}

/// GET /v1/iterations/:iteration_id/openapi.json
pub async fn iteration_document<S: CatalogStore>(
    Path(iteration_id): Path<Id>,
    State(store): State<AppState<S>>,
    caller: Caller,
) -> ApiResult<Value> {
    let mut tx = begin(&*store).await?;
    let document =
        ServiceOperations::iteration_document(tx.as_mut(), iteration_id, &caller).await?;
    Ok(Json(finish(tx, document).await?))
}

// Categories

/// GET /v1/services/:service_id/categories
pub async fn list_categories<S: CatalogStore>(
    Path(service_id): Path<Id>,
    State(store): State<AppState<S>>,
    caller: Caller,
) -> ApiResult<Vec<Category>> {
    let mut tx = begin(&*store).await?;
    let categories = EndpointOperations::list_categories(tx.as_mut(), service_id, &caller).await?;
    Ok(Json(finish(tx, categories).await?))
}

/// POST /v1/services/:service_id/categories
pub async fn add_category<S: CatalogStore>(
    Path(service_id): Path<Id>,
    State(store): State<AppState<S>>,
    caller: Caller,
    RequestJson(req): RequestJson<CategoryRequest>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    let mut tx = begin(&*store).await?;
    let category = EndpointOperations::add_category(tx.as_mut(), service_id, req, &caller).await?;
    let category = finish(tx, category).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// PATCH /v1/categories/:category_id
pub async fn update_category<S: CatalogStore>(
    Path(category_id): Path<Id>,
    State(store): State<AppState<S>>,
    caller: Caller,
    RequestJson(req): RequestJson<CategoryUpdate>,
) -> ApiResult<Category> {
    let mut tx = begin(&*store).await?;
    let category =
        EndpointOperations::update_category(tx.as_mut(), category_id, req, &caller).await?;
    Ok(Json(finish(tx, category).await?))
}

/// DELETE /v1/categories/:category_id
pub async fn delete_category<S: CatalogStore>(
    Path(category_id): Path<Id>,
    State(store): State<AppState<S>>,
    caller: Caller,
) -> Result<StatusCode, ApiError> {
    let mut tx = begin(&*store).await?;
    EndpointOperations::delete_category(tx.as_mut(), category_id, &caller).await?;
    finish(tx, ()).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Live endpoints

/// GET /v1/services/:service_id/endpoints?category_id=
pub async fn list_endpoints<S: CatalogStore>(
    Path(service_id): Path<Id>,
    Query(query): Query<EndpointQuery>,
    State(store): State<AppState<S>>,
    caller: Caller,
) -> ApiResult<Vec<Endpoint>> {
    let mut tx = begin(&*store).await?;
    let endpoints =
        EndpointOperations::list_endpoints(tx.as_mut(), service_id, query.category_id, &caller)
            .await?;
    Ok(Json(finish(tx, endpoints).await?))
}

/// GET /v1/endpoints/:endpoint_id
pub async fn endpoint_detail<S: CatalogStore>(
    Path(endpoint_id): Path<Id>,
    State(store): State<AppState<S>>,
    caller: Caller,
) -> ApiResult<EndpointDetail> {
    let mut tx = begin(&*store).await?;
    let detail = EndpointOperations::endpoint_detail(tx.as_mut(), endpoint_id, &caller).await?;
    Ok(Json(finish(tx, detail).await?))
}

/// PATCH /v1/endpoints/:endpoint_id/category
pub async fn move_endpoint<S: CatalogStore>(
    Path(endpoint_id): Path<Id>,
    State(store): State<AppState<S>>,
    caller: Caller,
    RequestJson(req): RequestJson<MoveEndpointRequest>,
) -> ApiResult<Endpoint> {
    let mut tx = begin(&*store).await?;
    let endpoint =
        EndpointOperations::move_endpoint(tx.as_mut(), endpoint_id, req.category_id, &caller)
            .await?;
    Ok(Json(finish(tx, endpoint).await?))
}

// Draft endpoints

/// POST /v1/iterations/:iteration_id/endpoints
pub async fn add_draft_endpoint<S: CatalogStore>(
    Path(iteration_id): Path<Id>,
    State(store): State<AppState<S>>,
    caller: Caller,
    RequestJson(req): RequestJson<EndpointRequest>,
) -> Result<(StatusCode, Json<DraftEdit>), ApiError> {
    let mut tx = begin(&*store).await?;
    let edit =
        EndpointOperations::add_draft_endpoint(tx.as_mut(), iteration_id, req, &caller).await?;
    let edit = finish(tx, edit).await?;
    Ok((StatusCode::CREATED, Json(edit)))
}

/// GET /v1/iterations/:iteration_id/endpoints/:endpoint_id
pub async fn draft_endpoint_detail<S: CatalogStore>(
    Path((iteration_id, endpoint_id)): Path<(Id, Id)>,
    State(store): State<AppState<S>>,
    caller: Caller,
) -> ApiResult<EndpointDetail> {
    let mut tx = begin(&*store).await?;
    let detail = EndpointOperations::draft_endpoint_detail(
        tx.as_mut(),
        iteration_id,
        endpoint_id,
        &caller,
    )
    .await?;
    Ok(Json(finish(tx, detail).await?))
}

/// PUT /v1/iterations/:iteration_id/endpoints/:endpoint_id
pub async fn update_draft_endpoint<S: CatalogStore>(
    Path((iteration_id, endpoint_id)): Path<(Id, Id)>,
    State(store): State<AppState<S>>,
    caller: Caller,
    RequestJson(req): RequestJson<EndpointRequest>,
) -> ApiResult<DraftEdit> {
    let mut tx = begin(&*store).await?;
    let edit = EndpointOperations::update_draft_endpoint(
        tx.as_mut(),
        iteration_id,
        endpoint_id,
        req,
        &caller,
    )
    .await?;
    Ok(Json(finish(tx, edit).await?))
}

/// DELETE /v1/iterations/:iteration_id/endpoints/:endpoint_id
pub async fn delete_draft_endpoint<S: CatalogStore>(
    Path((iteration_id, endpoint_id)): Path<(Id, Id)>,
    State(store): State<AppState<S>>,
    caller: Caller,
) -> Result<StatusCode, ApiError> {
    let mut tx = begin(&*store).await?;
    EndpointOperations::delete_draft_endpoint(tx.as_mut(), iteration_id, endpoint_id, &caller)
        .await?;
    finish(tx, ()).await?;
    Ok(StatusCode::NO_CONTENT)
}
