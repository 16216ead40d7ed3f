use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::error::{CatalogError, CatalogResult};
use crate::logic::organize::{EndpointDetail, ParamOrganizer};
use crate::model::{Generation, Id, ParamLocation, ParamTree, ParamType, User, DEFAULT_STATUS_CODE};
use crate::store::CatalogTx;

pub const OPENAPI_VERSION: &str = "3.1.0";

static UPPERCASE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z]").unwrap());
static SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]+").unwrap());

/// Everything needed to render one generation
#[derive(Debug, Clone)]
pub struct DocumentSource {
    pub title: String,
    pub version: String,
    pub description: String,
    pub contact: Option<User>,
    pub endpoints: Vec<EndpointDetail>,
}

/// Renders a generation as an OpenAPI document
pub struct OpenApiSynthesizer;

impl OpenApiSynthesizer {
    /// Gather the live generation of a service
    pub async fn load_live(tx: &mut dyn CatalogTx, service_id: Id) -> CatalogResult<DocumentSource> {
        let service = tx
            .get_service(service_id)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("service {}", service_id)))?;
        let contact = tx.get_user(service.owner_id).await?;
        let endpoints = load_endpoints(tx, Generation::Live { service_id }).await?;

        Ok(DocumentSource {
            title: service.service_uuid,
            version: service.version,
            description: service.description.unwrap_or_default(),
            contact,
            endpoints,
        })
    }

    /// Gather the draft generation of an iteration, open or committed
    pub async fn load_iteration(
        tx: &mut dyn CatalogTx,
        iteration_id: Id,
    ) -> CatalogResult<DocumentSource> {
        let iteration = tx
            .get_iteration(iteration_id)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("iteration {}", iteration_id)))?;
        let service = tx
            .get_service(iteration.service_id)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("service {}", iteration.service_id)))?;
        let contact = tx.get_user(iteration.creator_id).await?;
        let endpoints = load_endpoints(tx, Generation::Draft { iteration_id }).await?;

        Ok(DocumentSource {
            title: service.service_uuid,
            version: iteration.version,
            description: iteration
                .description
                .or(service.description)
                .unwrap_or_default(),
            contact,
            endpoints,
        })
    }

    pub fn synthesize(source: &DocumentSource) -> Value {
        let mut components = ComponentRegistry::default();
        let mut paths: Map<String, Value> = Map::new();

        for detail in &source.endpoints {
            let operation = operation(detail, &mut components);
            let item = paths
                .entry(detail.endpoint.path.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(methods) = item {
                methods.insert(detail.endpoint.method.openapi_key(), operation);
            }
        }

        let contact = match &source.contact {
            Some(user) => json!({ "name": user.username, "email": user.email }),
            None => json!({ "name": Value::Null, "email": Value::Null }),
        };

        json!({
            "openapi": OPENAPI_VERSION,
            "info": {
                "title": source.title,
                "description": source.description,
                "contact": contact,
                "version": source.version,
            },
            "paths": paths,
            "components": { "schemas": components.schemas },
        })
    }
}

/// Organized details of every endpoint in a generation, ordered by id
pub async fn load_endpoints(
    tx: &mut dyn CatalogTx,
    generation: Generation,
) -> CatalogResult<Vec<EndpointDetail>> {
    let mut details = Vec::new();
    for endpoint in tx.list_endpoints(generation).await? {
        details.push(ParamOrganizer::load_detail(tx, endpoint).await?);
    }
    Ok(details)
}

#[derive(Default)]
struct ComponentRegistry {
    schemas: Map<String, Value>,
}

impl ComponentRegistry {
    /// Register a root schema and return the value to embed: a `$ref` when the
    /// schema has properties, the schema itself otherwise.
    fn register(&mut self, base: String, schema: Value) -> Value {
        let has_properties = schema
            .get("properties")
            .and_then(Value::as_object)
            .is_some_and(|properties| !properties.is_empty());
        if !has_properties {
            return schema;
        }

        let mut name = base.clone();
        let mut suffix = 2;
        while self.schemas.contains_key(&name) {
            name = format!("{}{}", base, suffix);
            suffix += 1;
        }
        self.schemas.insert(name.clone(), schema);
        json!({ "$ref": format!("#/components/schemas/{}", name) })
    }
}

fn operation(detail: &EndpointDetail, components: &mut ComponentRegistry) -> Value {
    let endpoint = &detail.endpoint;
    let base = component_name(&endpoint.name, endpoint.id);

    let mut parameters = Vec::new();
    for location in ParamLocation::ALL.iter().filter(|l| **l != ParamLocation::Body) {
        let roots = detail
            .request_params_by_location
            .get(location.as_str())
            .map(Vec::as_slice)
            .unwrap_or_default();
        for root in roots {
            let mut parameter = json!({
                "name": root.node.name,
                "in": location.as_str(),
                "required": root.node.required || *location == ParamLocation::Path,
                "schema": node_schema(root),
            });
            if let Some(description) = non_empty(&root.node.description) {
                parameter["description"] = json!(description);
            }
            parameters.push(parameter);
        }
    }

    let mut operation = json!({
        "description": endpoint.description,
        "operationId": endpoint.name,
        "parameters": parameters,
        "deprecated": !endpoint.is_enabled,
    });

    if let Some(body) = detail
        .request_params_by_location
        .get(ParamLocation::Body.as_str())
        .filter(|roots| !roots.is_empty())
    {
        let schema = components.register(format!("{}Request", base), root_schema(body));
        operation["requestBody"] = json!({
            "required": true,
            "content": { "application/json": { "schema": schema } },
        });
    }

    let mut responses = Map::new();
    for (status_code, roots) in &detail.response_params_by_status_code {
        let suffix = if *status_code == DEFAULT_STATUS_CODE.to_string() {
            String::new()
        } else {
            status_code.clone()
        };
        let schema = components.register(
            format!("{}Response{}", base, suffix),
            root_schema(roots),
        );
        responses.insert(
            status_code.clone(),
            json!({
                "description": format!("Response for {}", status_code),
                "content": { "application/json": { "schema": schema } },
            }),
        );
    }
    operation["responses"] = Value::Object(responses);

    operation
}

/// PascalCase form of an endpoint name: camelCase humps and non-alphanumeric
/// runs both split words. Names with no usable characters fall back to the id.
pub fn component_name(name: &str, endpoint_id: Id) -> String {
    let spaced = UPPERCASE_RE.replace_all(name, " $0");
    let cleaned = SEPARATOR_RE.replace_all(&spaced, " ");
    let pascal: String = cleaned.split_whitespace().map(capitalize).collect();
    if pascal.is_empty() {
        format!("Endpoint{}", endpoint_id)
    } else {
        pascal
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Object schema wrapping a list of root parameters
fn root_schema(roots: &[ParamTree]) -> Value {
    let mut schema = Map::new();
    schema.insert("type".to_string(), json!("object"));
    let (properties, required) = properties_of(roots);
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), json!(required));
    }
    schema.insert("additionalProperties".to_string(), json!(false));
    Value::Object(schema)
}

fn properties_of(children: &[ParamTree]) -> (Map<String, Value>, Vec<String>) {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for child in children {
        properties.insert(child.node.name.clone(), node_schema(child));
        if child.node.required {
            required.push(child.node.name.clone());
        }
    }
    (properties, required)
}

fn object_schema(children: &[ParamTree]) -> Map<String, Value> {
    let mut schema = type_schema(ParamType::Object);
    let (properties, required) = properties_of(children);
    if !properties.is_empty() {
        schema.insert("properties".to_string(), Value::Object(properties));
        schema.insert("additionalProperties".to_string(), json!(false));
    }
    if !required.is_empty() {
        schema.insert("required".to_string(), json!(required));
    }
    schema
}

fn type_schema(param_type: ParamType) -> Map<String, Value> {
    let value = match param_type {
        ParamType::String => json!({ "type": "string" }),
        ParamType::Int => json!({ "type": "integer", "format": "int64" }),
        ParamType::Double => json!({ "type": "number", "format": "double" }),
        ParamType::Boolean => json!({ "type": "boolean" }),
        ParamType::Binary => json!({ "type": "string", "format": "binary" }),
        ParamType::Object => json!({ "type": "object" }),
        ParamType::Array => json!({ "type": "array" }),
    };
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn node_schema(tree: &ParamTree) -> Value {
    let node = &tree.node;
    let mut schema = match node.param_type {
        ParamType::Object => object_schema(&tree.children),
        ParamType::Array => {
            let items = match node.array_child_type {
                Some(ParamType::Object) => object_schema(&tree.children),
                Some(child_type) => type_schema(child_type),
                None => type_schema(ParamType::String),
            };
            let mut schema = type_schema(ParamType::Array);
            schema.insert("items".to_string(), Value::Object(items));
            schema
        }
        scalar => type_schema(scalar),
    };

    if let Some(example) = non_empty(&node.example) {
        schema.insert("example".to_string(), json!(example));
    }
    if let Some(raw) = non_empty(&node.default_value) {
        schema.insert("default".to_string(), default_value(node.param_type, raw));
    }
    Value::Object(schema)
}

/// Cast a stored default to the declared type, keeping the raw text when it does not parse
pub fn default_value(param_type: ParamType, raw: &str) -> Value {
    if raw == "null" || raw == "undefined" {
        return Value::Null;
    }
    let cast = match param_type {
        ParamType::Int => raw.trim().parse::<i64>().ok().map(Value::from),
        ParamType::Double => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        ParamType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(Value::Bool(true)),
            "false" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    };
    cast.unwrap_or_else(|| Value::String(raw.to_string()))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ApiLevel, Endpoint, HttpMethod, ParamNode, ParamSide, ParamSlot,
    };
    use chrono::Utc;

    fn node(id: Id, name: &str, param_type: ParamType, slot: ParamSlot) -> ParamNode {
        ParamNode {
            id,
            endpoint_id: 1,
            parent_id: None,
            name: name.to_string(),
            param_type,
            required: false,
            default_value: None,
            description: None,
            example: None,
            array_child_type: None,
            slot,
        }
    }

    fn query() -> ParamSlot {
        ParamSlot::Request {
            location: ParamLocation::Query,
        }
    }

    fn body() -> ParamSlot {
        ParamSlot::Request {
            location: ParamLocation::Body,
        }
    }

    fn endpoint(id: Id, name: &str, method: HttpMethod, path: &str) -> Endpoint {
        Endpoint {
            id,
            generation: Generation::Live { service_id: 1 },
            owner_id: 1,
            category_id: None,
            name: name.to_string(),
            method,
            path: path.to_string(),
            description: Some("desc".to_string()),
            level: ApiLevel::P2,
            is_enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn detail(endpoint: Endpoint, request: Vec<ParamNode>, response: Vec<ParamNode>) -> EndpointDetail {
        EndpointDetail {
            endpoint,
            request_params_by_location: ParamOrganizer::organize(ParamSide::Request, request),
            response_params_by_status_code: ParamOrganizer::organize(ParamSide::Response, response),
        }
    }

    fn source(endpoints: Vec<EndpointDetail>) -> DocumentSource {
        DocumentSource {
            title: "svc".to_string(),
            version: "0.1.0".to_string(),
            description: String::new(),
            contact: None,
            endpoints,
        }
    }

    #[test]
    fn test_component_name() {
        assert_eq!(component_name("getUserInfo", 1), "GetUserInfo");
        assert_eq!(component_name("create-order_v2", 1), "CreateOrderV2");
        assert_eq!(component_name("userID", 1), "UserID");
        assert_eq!(component_name("查询", 7), "Endpoint7");
    }

    #[test]
    fn test_default_value_casts() {
        assert_eq!(default_value(ParamType::Int, "42"), json!(42));
        assert_eq!(default_value(ParamType::Int, "abc"), json!("abc"));
        assert_eq!(default_value(ParamType::Double, "1.5"), json!(1.5));
        assert_eq!(default_value(ParamType::Boolean, "0"), json!(false));
        assert_eq!(default_value(ParamType::Boolean, "True"), json!(true));
        assert_eq!(default_value(ParamType::Boolean, "yes"), json!("yes"));
        assert_eq!(default_value(ParamType::String, "undefined"), Value::Null);
        assert_eq!(default_value(ParamType::Object, "{}"), json!("{}"));
    }

    #[test]
    fn test_array_of_objects_schema() {
        let mut items = node(1, "items", ParamType::Array, body());
        items.array_child_type = Some(ParamType::Object);
        let mut id = node(2, "id", ParamType::Int, body());
        id.parent_id = Some(1);

        let tree = ParamOrganizer::assemble(vec![items, id]);
        assert_eq!(
            node_schema(&tree[0]),
            json!({
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": { "id": { "type": "integer", "format": "int64" } },
                    "additionalProperties": false
                }
            })
        );
    }

    #[test]
    fn test_query_parameters_and_path_required() {
        let mut token = node(1, "token", ParamType::String, query());
        token.required = true;
        token.description = Some("auth token".to_string());
        let id = node(2, "id", ParamType::Int, ParamSlot::Request {
            location: ParamLocation::Path,
        });

        let doc = OpenApiSynthesizer::synthesize(&source(vec![detail(
            endpoint(1, "ping", HttpMethod::Get, "/ping/{id}"),
            vec![token, id],
            vec![],
        )]));

        let operation = &doc["paths"]["/ping/{id}"]["get"];
        assert_eq!(operation["operationId"], "ping");
        assert_eq!(operation["deprecated"], false);
        assert_eq!(
            operation["parameters"],
            json!([
                {"name": "token", "in": "query", "required": true, "schema": {"type": "string"}, "description": "auth token"},
                {"name": "id", "in": "path", "required": true, "schema": {"type": "integer", "format": "int64"}}
            ])
        );
        assert!(operation.get("requestBody").is_none());
        assert_eq!(operation["responses"], json!({}));
        assert_eq!(doc["openapi"], "3.1.0");
        assert_eq!(doc["info"]["contact"], json!({"name": null, "email": null}));
    }

    #[test]
    fn test_body_and_responses_are_registered_as_components() {
        let mut name = node(1, "name", ParamType::String, body());
        name.required = true;
        let data = node(2, "data", ParamType::String, ParamSlot::Response { status_code: 200 });
        let error = node(3, "error", ParamType::String, ParamSlot::Response { status_code: 404 });

        let doc = OpenApiSynthesizer::synthesize(&source(vec![detail(
            endpoint(1, "createUser", HttpMethod::Post, "/users"),
            vec![name],
            vec![data, error],
        )]));

        let operation = &doc["paths"]["/users"]["post"];
        assert_eq!(
            operation["requestBody"]["content"]["application/json"]["schema"],
            json!({"$ref": "#/components/schemas/CreateUserRequest"})
        );
        assert_eq!(
            operation["responses"]["404"]["content"]["application/json"]["schema"],
            json!({"$ref": "#/components/schemas/CreateUserResponse404"})
        );
        assert_eq!(operation["responses"]["200"]["description"], "Response for 200");

        let schemas = &doc["components"]["schemas"];
        assert_eq!(
            schemas["CreateUserRequest"],
            json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"],
                "additionalProperties": false
            })
        );
        assert!(schemas.get("CreateUserResponse").is_some());
    }

    #[test]
    fn test_colliding_component_names_get_suffix() {
        let first = detail(
            endpoint(1, "get_user", HttpMethod::Post, "/a"),
            vec![node(1, "x", ParamType::String, body())],
            vec![],
        );
        let second = detail(
            endpoint(2, "getUser", HttpMethod::Post, "/b"),
            vec![node(2, "y", ParamType::String, body())],
            vec![],
        );
        let doc = OpenApiSynthesizer::synthesize(&source(vec![first, second]));

        assert_eq!(
            doc["paths"]["/b"]["post"]["requestBody"]["content"]["application/json"]["schema"]["$ref"],
            "#/components/schemas/GetUserRequest2"
        );
    }

    #[test]
    fn test_same_path_shares_path_item() {
        let get = detail(endpoint(1, "list", HttpMethod::Get, "/items"), vec![], vec![]);
        let post = detail(endpoint(2, "create", HttpMethod::Post, "/items"), vec![], vec![]);
        let doc = OpenApiSynthesizer::synthesize(&source(vec![get, post]));

        let item = doc["paths"]["/items"].as_object().unwrap();
        assert_eq!(item.keys().collect::<Vec<_>>(), vec!["get", "post"]);
    }
}
