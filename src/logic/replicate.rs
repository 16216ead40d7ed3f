use serde::Serialize;
use std::collections::HashMap;

use crate::error::CatalogResult;
use crate::model::{Endpoint, Generation, Id, ParamNode, ParamTable};
use crate::store::CatalogTx;

/// Counters describing one replication
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationReport {
    pub endpoints: usize,
    pub copied: usize,
    pub relinked: usize,
    /// Rows whose parent was not part of the source forest; their copies are roots
    pub orphaned: usize,
}

impl ReplicationReport {
    pub fn absorb(&mut self, other: ReplicationReport) {
        self.endpoints += other.endpoints;
        self.copied += other.copied;
        self.relinked += other.relinked;
        self.orphaned += other.orphaned;
    }
}

/// Copies parameter forests and endpoints between generations, remapping
/// parent references onto the fresh row ids.
pub struct TreeReplicator;

impl TreeReplicator {
    /// Copy `rows` under `target_endpoint` in `target`.
    ///
    /// Pass one inserts every row parentless and records `old id -> new id`.
    /// Pass two relinks each copy through that mapping, so the input order
    /// does not matter.
    pub async fn replicate_rows(
        tx: &mut dyn CatalogTx,
        rows: &[ParamNode],
        target: ParamTable,
        target_endpoint: Id,
    ) -> CatalogResult<ReplicationReport> {
        let mut report = ReplicationReport::default();
        let mut mapping: HashMap<Id, Id> = HashMap::with_capacity(rows.len());

        for row in rows {
            let copy = tx
                .insert_param(target, row.detached_copy(target_endpoint))
                .await?;
            mapping.insert(row.id, copy.id);
            report.copied += 1;
        }

        for row in rows {
            let (Some(parent_id), Some(&new_id)) = (row.parent_id, mapping.get(&row.id)) else {
                continue;
            };
            match mapping.get(&parent_id) {
                Some(&new_parent) => {
                    tx.set_param_parent(target, new_id, Some(new_parent)).await?;
                    report.relinked += 1;
                }
                None => {
                    log::warn!(
                        "Parameter {} in {} references missing parent {}; copy {} left as a root",
                        row.id,
                        target.table_name(),
                        parent_id,
                        new_id
                    );
                    report.orphaned += 1;
                }
            }
        }

        Ok(report)
    }

    /// Copy one parameter forest from `source_endpoint` to `target_endpoint`
    pub async fn replicate_forest(
        tx: &mut dyn CatalogTx,
        source: ParamTable,
        source_endpoint: Id,
        target: ParamTable,
        target_endpoint: Id,
    ) -> CatalogResult<ReplicationReport> {
        let rows = tx.list_params(source, source_endpoint).await?;
        Self::replicate_rows(tx, &rows, target, target_endpoint).await
    }

    /// Copy an endpoint and both of its forests into another generation
    pub async fn replicate_endpoint(
        tx: &mut dyn CatalogTx,
        endpoint: &Endpoint,
        target: Generation,
    ) -> CatalogResult<(Endpoint, ReplicationReport)> {
        let copy = tx.insert_endpoint(endpoint.copy_into(target)).await?;
        let mut report = ReplicationReport {
            endpoints: 1,
            ..Default::default()
        };

        let sources = ParamTable::both(endpoint.generation.kind());
        let targets = ParamTable::both(target.kind());
        for (source, destination) in sources.into_iter().zip(targets) {
            let forest =
                Self::replicate_forest(tx, source, endpoint.id, destination, copy.id).await?;
            report.absorb(forest);
        }

        Ok((copy, report))
    }

    /// Copy every endpoint of `from` into `to`
    pub async fn replicate_generation(
        tx: &mut dyn CatalogTx,
        from: Generation,
        to: Generation,
    ) -> CatalogResult<ReplicationReport> {
        let mut report = ReplicationReport::default();
        for endpoint in tx.list_endpoints(from).await? {
            let (_, copied) = Self::replicate_endpoint(tx, &endpoint, to).await?;
            report.absorb(copied);
        }

        log::debug!(
            "Replicated {} endpoints ({} params) from {:?} to {:?}",
            report.endpoints,
            report.copied,
            from,
            to
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::ParamOrganizer;
    use crate::model::{
        forest_shape, ApiLevel, GenerationKind, HttpMethod, NewEndpoint, NewParamNode,
        NewService, NewUser, ParamLocation, ParamSide, ParamSlot, ParamType,
    };
    use crate::store::{CatalogStore, MemoryStore};

    async fn live_endpoint(tx: &mut dyn CatalogTx) -> Endpoint {
        let user = tx
            .insert_user(NewUser {
                username: "alice".to_string(),
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
            name: "createUser".to_string(),
            method: HttpMethod::Post,
            path: "/users".to_string(),
            description: None,
            level: ApiLevel::P1,
            is_enabled: true,
        })
        .await
        .unwrap()
    }

    fn param(endpoint_id: Id, parent_id: Option<Id>, name: &str, param_type: ParamType) -> NewParamNode {
        NewParamNode {
            endpoint_id,
            parent_id,
            name: name.to_string(),
            param_type,
            required: true,
            default_value: None,
            description: None,
            example: None,
            array_child_type: None,
            slot: ParamSlot::Request {
                location: ParamLocation::Body,
            },
        }
    }

    #[tokio::test]
    async fn test_replicated_forest_is_isomorphic() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let endpoint = live_endpoint(tx.as_mut()).await;
        let table = ParamTable::new(GenerationKind::Live, ParamSide::Request);

        let user = tx
            .insert_param(table, param(endpoint.id, None, "user", ParamType::Object))
            .await
            .unwrap();
        let profile = tx
            .insert_param(table, param(endpoint.id, Some(user.id), "profile", ParamType::Object))
            .await
            .unwrap();
        tx.insert_param(table, param(endpoint.id, Some(profile.id), "age", ParamType::Int))
            .await
            .unwrap();
        tx.insert_param(table, param(endpoint.id, Some(user.id), "name", ParamType::String))
            .await
            .unwrap();

        let other = tx
            .insert_endpoint(NewEndpoint {
                path: "/users/copy".to_string(),
                ..endpoint.copy_into(endpoint.generation)
            })
            .await
            .unwrap();
        let report = TreeReplicator::replicate_forest(tx.as_mut(), table, endpoint.id, table, other.id)
            .await
            .unwrap();
        assert_eq!(report.copied, 4);
        assert_eq!(report.relinked, 3);
        assert_eq!(report.orphaned, 0);

        let source = ParamOrganizer::organize(
            ParamSide::Request,
            tx.list_params(table, endpoint.id).await.unwrap(),
        );
        let copy_rows = tx.list_params(table, other.id).await.unwrap();
        assert!(copy_rows.iter().all(|r| r.id > profile.id));
        let copy = ParamOrganizer::organize(ParamSide::Request, copy_rows);
        assert_eq!(forest_shape(&source), forest_shape(&copy));
    }

    #[tokio::test]
    async fn test_relink_tolerates_reverse_order_and_dangling_parent() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let endpoint = live_endpoint(tx.as_mut()).await;
        let table = ParamTable::new(GenerationKind::Live, ParamSide::Request);

        let root = tx
            .insert_param(table, param(endpoint.id, None, "root", ParamType::Object))
            .await
            .unwrap();
        let child = tx
            .insert_param(table, param(endpoint.id, Some(root.id), "child", ParamType::String))
            .await
            .unwrap();
        let dangling = tx
            .insert_param(table, param(endpoint.id, Some(999), "lost", ParamType::String))
            .await
            .unwrap();

        // Child first: the mapping must not depend on row order
        let rows = vec![dangling, child, root];
        let report = TreeReplicator::replicate_rows(tx.as_mut(), &rows, table, endpoint.id)
            .await
            .unwrap();
        assert_eq!(report.copied, 3);
        assert_eq!(report.relinked, 1);
        assert_eq!(report.orphaned, 1);

        let all = tx.list_params(table, endpoint.id).await.unwrap();
        let copies: Vec<&ParamNode> = all.iter().skip(3).collect();
        let lost = copies.iter().find(|r| r.name == "lost").unwrap();
        assert_eq!(lost.parent_id, None);
        let new_root = copies.iter().find(|r| r.name == "root").unwrap();
        let new_child = copies.iter().find(|r| r.name == "child").unwrap();
        assert_eq!(new_child.parent_id, Some(new_root.id));
    }
}
