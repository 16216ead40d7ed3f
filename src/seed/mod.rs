use anyhow::{Context, Result};
use serde_json::json;

use crate::logic::{
    CategoryRequest, CreateServiceRequest, EndpointOperations, EndpointRequest, IterationManager,
    ServiceOperations,
};
use crate::model::{Caller, NewUser, SUPER_LEVEL};
use crate::store::CatalogStore;

pub const DEMO_USERNAME: &str = "catalog-admin";
pub const DEMO_SERVICE_UUID: &str = "petstore";

/// Load a demo catalog: one super user owning a `petstore` service published
/// at 1.1.0 through a committed iteration. Does nothing if the demo user exists.
pub async fn load_seed_data<S: CatalogStore + ?Sized>(store: &S) -> Result<()> {
    let mut tx = store.begin().await?;
    if tx.find_user_by_username(DEMO_USERNAME).await?.is_some() {
        log::info!("Seed data already present, skipping");
        return Ok(());
    }

    let admin = ServiceOperations::register_user(
        tx.as_mut(),
        NewUser {
            username: DEMO_USERNAME.to_string(),
            nickname: Some("Catalog Admin".to_string()),
            email: Some("admin@example.com".to_string()),
            level: Some(SUPER_LEVEL),
        },
    )
    .await?;
    let caller = Caller::from(&admin);

    let service = ServiceOperations::create_service(
        tx.as_mut(),
        CreateServiceRequest {
            service_uuid: Some(DEMO_SERVICE_UUID.to_string()),
            version: Some("1.0.0".to_string()),
            description: Some("Demo pet store".to_string()),
        },
        &caller,
    )
    .await?;
    let pets = EndpointOperations::add_category(
        tx.as_mut(),
        service.id,
        CategoryRequest {
            name: "pets".to_string(),
            description: Some("Pet inventory".to_string()),
        },
        &caller,
    )
    .await?;

    let started = IterationManager::start(tx.as_mut(), service.id, &caller).await?;
    let iteration_id = started.iteration.id;

    let endpoints = [
        json!({
            "name": "listPets",
            "method": "GET",
            "path": "/pets",
            "description": "List pets with paging",
            "level": "P1",
            "category_id": pets.id,
            "req_params": [
                {"name": "limit", "location": "query", "type": "int", "default_value": "20"},
                {"name": "X-Request-Id", "location": "header", "type": "string"}
            ],
            "resp_params": [
                {"name": "items", "type": "array", "array_child_type": "object", "children": [
                    {"name": "id", "type": "int", "required": true},
                    {"name": "name", "type": "string", "required": true},
                    {"name": "vaccinated", "type": "boolean", "default_value": "false"}
                ]},
                {"name": "total", "type": "int"}
            ]
        }),
        json!({
            "name": "createPet",
            "method": "POST",
            "path": "/pets",
            "level": "P0",
            "category_id": pets.id,
            "req_params": [
                {"name": "pet", "type": "object", "required": true, "children": [
                    {"name": "name", "type": "string", "required": true},
                    {"name": "owner", "type": "object", "children": [
                        {"name": "email", "type": "string", "example": "owner@example.com"}
                    ]}
                ]}
            ],
            "resp_params": [
                {"name": "id", "type": "int", "status_code": 201},
                {"name": "message", "type": "string", "status_code": 400}
            ]
        }),
        json!({
            "name": "getPet",
            "method": "GET",
            "path": "/pets/{petId}",
            "req_params": [
                {"name": "petId", "location": "path", "type": "int", "required": true}
            ],
            "resp_params": [
                {"name": "name", "type": "string"},
                {"name": "photo", "type": "binary"}
            ]
        }),
    ];
    for value in endpoints {
        let request: EndpointRequest =
            serde_json::from_value(value).context("invalid seed endpoint definition")?;
        EndpointOperations::add_draft_endpoint(tx.as_mut(), iteration_id, request, &caller)
            .await?;
    }

    IterationManager::commit(tx.as_mut(), iteration_id, "1.1.0", &caller).await?;
    tx.commit().await?;

    log::info!(
        "Seeded service '{}' owned by '{}'",
        DEMO_SERVICE_UUID,
        DEMO_USERNAME
    );
    Ok(())
}
