use serde::Serialize;

use crate::error::{CatalogError, CatalogResult};
use crate::model::{
    Id, NewParamNode, ParamInput, ParamLocation, ParamSide, ParamSlot, ParamTable, ParamType,
    DEFAULT_STATUS_CODE,
};
use crate::store::CatalogTx;

/// An input value that was not recognized and replaced by a fallback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Coercion {
    /// Dotted name path of the node, e.g. `user.profile.age`
    pub path: String,
    pub field: &'static str,
    pub given: String,
    pub applied: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub inserted: usize,
    pub removed: u64,
    pub coercions: Vec<Coercion>,
    /// Nodes dropped because their parent's type cannot own children
    pub ignored_children: usize,
}

impl BuildReport {
    pub fn absorb(&mut self, other: BuildReport) {
        self.inserted += other.inserted;
        self.removed += other.removed;
        self.coercions.extend(other.coercions);
        self.ignored_children += other.ignored_children;
    }

    pub(crate) fn coerce(
        &mut self,
        path: &str,
        field: &'static str,
        given: &str,
        applied: Option<&str>,
    ) {
        log::debug!(
            "Coerced {} of parameter '{}' from '{}' to {:?}",
            field,
            path,
            given,
            applied
        );
        self.coercions.push(Coercion {
            path: path.to_string(),
            field,
            given: given.to_string(),
            applied: applied.map(str::to_string),
        });
    }
}

struct Pending<'a> {
    input: &'a ParamInput,
    parent_id: Option<Id>,
    /// Slot of the root this node descends from; `None` for roots
    inherited: Option<ParamSlot>,
    path: String,
}

/// Turns nested caller input into stored parameter rows
pub struct ParamTreeBuilder;

impl ParamTreeBuilder {
    /// Insert `inputs` as new roots of the endpoint's forest in `table`.
    ///
    /// Rows are written depth-first in input order, so the ids of siblings
    /// follow the order they were given in.
    pub async fn build(
        tx: &mut dyn CatalogTx,
        table: ParamTable,
        endpoint_id: Id,
        inputs: &[ParamInput],
    ) -> CatalogResult<BuildReport> {
        let mut report = BuildReport::default();
        let mut stack: Vec<Pending> = inputs
            .iter()
            .rev()
            .map(|input| Pending {
                input,
                parent_id: None,
                inherited: None,
                path: input.name.clone(),
            })
            .collect();

        while let Some(pending) = stack.pop() {
            let input = pending.input;
            if input.name.trim().is_empty() {
                return Err(CatalogError::validation(format!(
                    "parameter name is required (under '{}' in {})",
                    pending.path,
                    table.table_name()
                )));
            }

            let slot = match pending.inherited {
                Some(slot) => slot,
                None => Self::root_slot(table.side, input, &pending.path, &mut report),
            };

            let param_type = ParamType::parse_lenient(&input.param_type);
            if param_type.defaulted {
                report.coerce(&pending.path, "type", &input.param_type, Some(param_type.value.as_str()));
            }
            let array_child_type = match input.array_child_type.as_deref() {
                None | Some("") => None,
                Some(raw) => match raw.parse::<ParamType>() {
                    Ok(child_type) => Some(child_type),
                    Err(_) => {
                        report.coerce(&pending.path, "array_child_type", raw, None);
                        None
                    }
                },
            };

            let node = tx
                .insert_param(
                    table,
                    NewParamNode {
                        endpoint_id,
                        parent_id: pending.parent_id,
                        name: input.name.clone(),
                        param_type: param_type.value,
                        required: input.required.unwrap_or(false),
                        default_value: input.default_value.clone(),
                        description: input.description.clone(),
                        example: input.example.clone(),
                        array_child_type,
                        slot,
                    },
                )
                .await?;
            report.inserted += 1;

            let children = input.children.as_deref().unwrap_or_default();
            if children.is_empty() {
                continue;
            }
            if param_type.value.accepts_children(array_child_type) {
                for child in children.iter().rev() {
                    stack.push(Pending {
                        input: child,
                        parent_id: Some(node.id),
                        inherited: Some(slot),
                        path: format!("{}.{}", pending.path, child.name),
                    });
                }
            } else {
                let dropped = count_nodes(children);
                log::warn!(
                    "Ignoring {} child parameters of '{}': type {} cannot own children",
                    dropped,
                    pending.path,
                    param_type.value
                );
                report.ignored_children += dropped;
            }
        }

        Ok(report)
    }

    /// Replace the endpoint's whole forest in `table` with `inputs`
    pub async fn replace(
        tx: &mut dyn CatalogTx,
        table: ParamTable,
        endpoint_id: Id,
        inputs: &[ParamInput],
    ) -> CatalogResult<BuildReport> {
        let removed = tx.delete_params(table, endpoint_id).await?;
        let mut report = Self::build(tx, table, endpoint_id, inputs).await?;
        report.removed = removed;
        Ok(report)
    }

    fn root_slot(
        side: ParamSide,
        input: &ParamInput,
        path: &str,
        report: &mut BuildReport,
    ) -> ParamSlot {
        match side {
            ParamSide::Request => {
                let location = match input.location.as_deref() {
                    None => ParamLocation::default(),
                    Some(raw) => {
                        let parsed = ParamLocation::parse_lenient(raw);
                        if parsed.defaulted {
                            report.coerce(path, "location", raw, Some(parsed.value.as_str()));
                        }
                        parsed.value
                    }
                };
                ParamSlot::Request { location }
            }
            ParamSide::Response => ParamSlot::Response {
                status_code: input.status_code.unwrap_or(DEFAULT_STATUS_CODE),
            },
        }
    }
}

fn count_nodes(inputs: &[ParamInput]) -> usize {
    inputs
        .iter()
        .map(|input| 1 + count_nodes(input.children.as_deref().unwrap_or_default()))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::ParamOrganizer;
    use crate::model::{
        ApiLevel, Endpoint, Generation, GenerationKind, HttpMethod, NewEndpoint, NewService,
        NewUser, ParamTree,
    };
    use crate::store::{CatalogStore, MemoryStore};
    use serde_json::json;

    async fn endpoint(tx: &mut dyn CatalogTx) -> Endpoint {
        let user = tx
            .insert_user(NewUser {
                username: "bob".to_string(),
                nickname: None,
                email: None,
                level: None,
            })
            .await
            .unwrap();
        let service = tx
            .insert_service(NewService {
                service_uuid: "svc".to_string(),
                owner_id: user.id,
                version: "1.0.0".to_string(),
                description: None,
            })
            .await
            .unwrap();
        tx.insert_endpoint(NewEndpoint {
            generation: Generation::Live {
                service_id: service.id,
            },
            owner_id: user.id,
            category_id: None,
            name: "search".to_string(),
            method: HttpMethod::Get,
            path: "/search".to_string(),
            description: None,
            level: ApiLevel::P2,
            is_enabled: true,
        })
        .await
        .unwrap()
    }

    fn inputs(value: serde_json::Value) -> Vec<ParamInput> {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_children_inherit_root_location() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let endpoint = endpoint(tx.as_mut()).await;
        let table = ParamTable::new(GenerationKind::Live, ParamSide::Request);

        let params = inputs(json!([
            {"name": "filter", "location": "query", "type": "object", "children": [
                {"name": "term", "type": "string", "location": "header"},
                {"name": "range", "type": "object", "children": [
                    {"name": "from", "type": "int"}
                ]}
            ]},
            {"name": "payload", "type": "object"}
        ]));
        let report = ParamTreeBuilder::build(tx.as_mut(), table, endpoint.id, &params)
            .await
            .unwrap();
        assert_eq!(report.inserted, 5);
        assert!(report.coercions.is_empty());

        let rows = tx.list_params(table, endpoint.id).await.unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["filter", "term", "range", "from", "payload"]);
        for row in &rows[..4] {
            assert_eq!(row.slot, ParamSlot::Request { location: ParamLocation::Query });
        }
        assert_eq!(rows[4].slot, ParamSlot::Request { location: ParamLocation::Body });
    }

    #[tokio::test]
    async fn test_response_children_inherit_status_code() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let endpoint = endpoint(tx.as_mut()).await;
        let table = ParamTable::new(GenerationKind::Live, ParamSide::Response);

        let params = inputs(json!([
            {"name": "error", "type": "object", "status_code": 404, "children": [
                {"name": "message", "type": "string", "status_code": 500}
            ]},
            {"name": "data", "type": "string"}
        ]));
        ParamTreeBuilder::build(tx.as_mut(), table, endpoint.id, &params)
            .await
            .unwrap();

        let rows = tx.list_params(table, endpoint.id).await.unwrap();
        let codes: Vec<String> = rows.iter().map(|r| r.slot.bucket_key()).collect();
        assert_eq!(codes, vec!["404", "404", "200"]);
    }

    #[tokio::test]
    async fn test_unknown_enums_are_coerced_and_reported() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let endpoint = endpoint(tx.as_mut()).await;
        let table = ParamTable::new(GenerationKind::Live, ParamSide::Request);

        let params = inputs(json!([
            {"name": "count", "type": "integer", "location": "QUERY"},
            {"name": "ids", "type": "array", "array_child_type": "uuid"}
        ]));
        let report = ParamTreeBuilder::build(tx.as_mut(), table, endpoint.id, &params)
            .await
            .unwrap();

        let fields: Vec<(&str, &str)> = report
            .coercions
            .iter()
            .map(|c| (c.path.as_str(), c.field))
            .collect();
        assert_eq!(
            fields,
            vec![("count", "location"), ("count", "type"), ("ids", "array_child_type")]
        );

        let rows = tx.list_params(table, endpoint.id).await.unwrap();
        assert_eq!(rows[0].param_type, ParamType::String);
        assert_eq!(rows[0].slot, ParamSlot::Request { location: ParamLocation::Body });
        assert_eq!(rows[1].array_child_type, None);
    }

    #[tokio::test]
    async fn test_children_of_scalar_types_are_ignored() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let endpoint = endpoint(tx.as_mut()).await;
        let table = ParamTable::new(GenerationKind::Live, ParamSide::Request);

        let params = inputs(json!([
            {"name": "tags", "type": "array", "array_child_type": "string", "children": [
                {"name": "x", "type": "string", "children": [{"name": "y", "type": "int"}]}
            ]},
            {"name": "items", "type": "array", "array_child_type": "object", "children": [
                {"name": "id", "type": "int"}
            ]}
        ]));
        let report = ParamTreeBuilder::build(tx.as_mut(), table, endpoint.id, &params)
            .await
            .unwrap();
        assert_eq!(report.inserted, 3);
        assert_eq!(report.ignored_children, 2);

        let forest = ParamOrganizer::organize(
            ParamSide::Request,
            tx.list_params(table, endpoint.id).await.unwrap(),
        );
        let body: &Vec<ParamTree> = &forest["body"];
        assert_eq!(body.len(), 2);
        assert!(body[0].children.is_empty());
        assert_eq!(body[1].children[0].node.name, "id");
    }

    #[tokio::test]
    async fn test_replace_rebuilds_forest_and_rejects_empty_names() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let endpoint = endpoint(tx.as_mut()).await;
        let table = ParamTable::new(GenerationKind::Live, ParamSide::Request);

        let first = inputs(json!([{"name": "a", "type": "string"}, {"name": "b", "type": "string"}]));
        ParamTreeBuilder::build(tx.as_mut(), table, endpoint.id, &first)
            .await
            .unwrap();

        let second = inputs(json!([{"name": "c", "type": "int"}]));
        let report = ParamTreeBuilder::replace(tx.as_mut(), table, endpoint.id, &second)
            .await
            .unwrap();
        assert_eq!(report.removed, 2);
        let rows = tx.list_params(table, endpoint.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "c");

        let invalid = inputs(json!([{"name": "obj", "type": "object", "children": [{"name": " ", "type": "int"}]}]));
        let err = ParamTreeBuilder::replace(tx.as_mut(), table, endpoint.id, &invalid)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }
}
