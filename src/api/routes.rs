use axum::{
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::store::CatalogStore;

pub fn create_router<S: CatalogStore + 'static>() -> Router<Arc<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Users
        .route("/v1/users", post(handlers::register_user::<S>))
        .route("/v1/users/:user_id", get(handlers::get_user::<S>))
        // Services
        .route(
            "/v1/services",
            get(handlers::list_services::<S>).post(handlers::create_service::<S>),
        )
        .route(
            "/v1/services/:service_id",
            get(handlers::get_service::<S>).delete(handlers::delete_service::<S>),
        )
        .route(
            "/v1/services/:service_id/restore",
            post(handlers::restore_service::<S>),
        )
        .route(
            "/v1/services/:service_id/openapi.json",
            get(handlers::live_document::<S>),
        )
        // Version history
        .route(
            "/v1/services/by-uuid/:service_uuid/versions",
            get(handlers::version_history::<S>),
        )
        .route(
            "/v1/services/by-uuid/:service_uuid/versions/:version",
            get(handlers::generation_detail::<S>),
        )
        // Iterations
        .route(
            "/v1/services/:service_id/iterations",
            post(handlers::start_iteration::<S>),
        )
        .route(
            "/v1/iterations/:iteration_id",
            get(handlers::get_iteration::<S>)
                .patch(handlers::update_iteration::<S>)
                .delete(handlers::abandon_iteration::<S>),
        )
        .route(
            "/v1/iterations/:iteration_id/commit",
            post(handlers::commit_iteration::<S>),
        )
        .route(
            "/v1/iterations/:iteration_id/openapi.json",
            get(handlers::iteration_document::<S>),
        )
        // Categories
        .route(
            "/v1/services/:service_id/categories",
            get(handlers::list_categories::<S>).post(handlers::add_category::<S>),
        )
        .route(
            "/v1/categories/:category_id",
            patch(handlers::update_category::<S>).delete(handlers::delete_category::<S>),
        )
        // Live endpoints
        .route(
            "/v1/services/:service_id/endpoints",
            get(handlers::list_endpoints::<S>),
        )
        .route(
            "/v1/endpoints/:endpoint_id",
            get(handlers::endpoint_detail::<S>),
        )
        .route(
            "/v1/endpoints/:endpoint_id/category",
            patch(handlers::move_endpoint::<S>),
        )
        // Draft endpoints
        .route(
            "/v1/iterations/:iteration_id/endpoints",
            post(handlers::add_draft_endpoint::<S>),
        )
        .route(
            "/v1/iterations/:iteration_id/endpoints/:endpoint_id",
            get(handlers::draft_endpoint_detail::<S>)
                .put(handlers::update_draft_endpoint::<S>)
                .delete(handlers::delete_draft_endpoint::<S>),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        create_router().with_state(Arc::new(MemoryStore::new()))
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        caller: Option<(i64, i16)>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some((user_id, level)) = caller {
            request = request
                .header("x-user-id", user_id.to_string())
                .header("x-user-level", level.to_string());
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let (status, body) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let app = app();
        let (status, body) = call(&app, "GET", "/v1/services", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains("X-User-Id"));
    }

    #[tokio::test]
    async fn test_iteration_round_trip_over_http() {
        let app = app();
        let (status, user) = call(
            &app,
            "POST",
            "/v1/users",
            None,
            Some(json!({"username": "hana", "nickname": null, "email": null, "level": null})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let owner = (user["id"].as_i64().unwrap(), 4);

        let (status, service) = call(
            &app,
            "POST",
            "/v1/services",
            Some(owner),
            Some(json!({"service_uuid": "S", "version": "0.0.1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let service_id = service["id"].as_i64().unwrap();

        let uri = format!("/v1/services/{}/iterations", service_id);
        let (status, started) = call(&app, "POST", &uri, Some(owner), None).await;
        assert_eq!(status, StatusCode::CREATED);
        let iteration_id = started["iteration"]["id"].as_i64().unwrap();
        let (status, again) = call(&app, "POST", &uri, Some(owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["iteration"]["id"].as_i64(), Some(iteration_id));

        let (status, edit) = call(
            &app,
            "POST",
            &format!("/v1/iterations/{}/endpoints", iteration_id),
            Some(owner),
            Some(json!({
                "name": "ping",
                "method": "GET",
                "path": "/ping",
                "req_params": [{"name": "token", "location": "query", "type": "string", "required": true}]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(edit["detail"]["request_params_by_location"]["query"][0]["name"], "token");

        let commit_uri = format!("/v1/iterations/{}/commit", iteration_id);
        let (status, outcome) = call(
            &app,
            "POST",
            &commit_uri,
            Some(owner),
            Some(json!({"version": "0.1.0"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["service"]["version"], "0.1.0");

        let (status, _) = call(
            &app,
            "POST",
            &commit_uri,
            Some(owner),
            Some(json!({"version": "0.2.0"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, history) =
            call(&app, "GET", "/v1/services/by-uuid/S/versions", Some(owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history["versions"], json!(["0.1.0"]));

        let (status, document) = call(
            &app,
            "GET",
            &format!("/v1/services/{}/openapi.json", service_id),
            Some(owner),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(document["openapi"], "3.1.0");
        assert!(document["paths"]["/ping"]["get"].is_object());
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let app = app();
        let (_, user) = call(
            &app,
            "POST",
            "/v1/users",
            None,
            Some(json!({"username": "ivan", "nickname": null, "email": null, "level": null})),
        )
        .await;
        let owner = (user["id"].as_i64().unwrap(), 4);
        let stranger = (owner.0 + 100, 4);

        let (status, _) = call(&app, "GET", "/v1/services/999", Some(owner), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, service) = call(
            &app,
            "POST",
            "/v1/services",
            Some(owner),
            Some(json!({"service_uuid": "T"})),
        )
        .await;
        let uri = format!("/v1/services/{}", service["id"]);
        let (status, _) = call(&app, "GET", &uri, Some(stranger), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &app,
            "POST",
            "/v1/services",
            Some(owner),
            Some(json!({"service_uuid": "T"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            &app,
            "POST",
            &format!("{}/categories", uri),
            Some(owner),
            Some(json!({"name": "  "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }
}
