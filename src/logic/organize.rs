use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::error::CatalogResult;
use crate::model::{
    Endpoint, Id, ParamForest, ParamLocation, ParamNode, ParamSide, ParamTable, ParamTree,
};
use crate::store::CatalogTx;

/// An endpoint together with both of its organized parameter forests
#[derive(Debug, Clone, Serialize)]
pub struct EndpointDetail {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    pub request_params_by_location: ParamForest,
    pub response_params_by_status_code: ParamForest,
}

/// Rebuilds nested parameter forests from flat parent-pointer rows
pub struct ParamOrganizer;

impl ParamOrganizer {
    /// Group rows into `bucket key -> roots`. Request forests always carry the
    /// five location buckets, response forests only the status codes present.
    pub fn organize(side: ParamSide, rows: Vec<ParamNode>) -> ParamForest {
        let mut forest = ParamForest::new();
        if side == ParamSide::Request {
            for location in ParamLocation::ALL {
                forest.insert(location.as_str().to_string(), Vec::new());
            }
        }

        for tree in Self::assemble(rows) {
            forest
                .entry(tree.node.slot.bucket_key())
                .or_default()
                .push(tree);
        }
        forest
    }

    /// Link rows into trees. A row whose parent is not among `rows` becomes a
    /// root; rows caught in a parent cycle are promoted to roots in input order
    /// and the edge closing the cycle is dropped. Siblings keep input order.
    pub fn assemble(rows: Vec<ParamNode>) -> Vec<ParamTree> {
        let index: HashMap<Id, usize> = rows
            .iter()
            .enumerate()
            .map(|(position, row)| (row.id, position))
            .collect();

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); rows.len()];
        let mut is_root = vec![false; rows.len()];
        for (position, row) in rows.iter().enumerate() {
            match row.parent_id.and_then(|parent| index.get(&parent)) {
                Some(&parent) if parent != position => children[parent].push(position),
                _ => is_root[position] = true,
            }
        }

        // Anything not reachable from a real root sits on a cycle or below one
        let mut reached = HashSet::new();
        for position in 0..rows.len() {
            if is_root[position] {
                mark_reachable(position, &children, &mut reached);
            }
        }
        for position in 0..rows.len() {
            if !reached.contains(&position) {
                log::warn!(
                    "Parameter {} is part of a parent cycle, treating it as a root",
                    rows[position].id
                );
                is_root[position] = true;
                mark_reachable(position, &children, &mut reached);
            }
        }

        let mut slots: Vec<Option<ParamNode>> = rows.into_iter().map(Some).collect();
        let mut placed = HashSet::new();
        let mut roots = Vec::new();
        for position in 0..slots.len() {
            if is_root[position] {
                if let Some(tree) = build_tree(position, &children, &mut slots, &mut placed) {
                    roots.push(tree);
                }
            }
        }
        roots
    }

    /// Load and organize both forests of an endpoint
    pub async fn load_detail(
        tx: &mut dyn CatalogTx,
        endpoint: Endpoint,
    ) -> CatalogResult<EndpointDetail> {
        let kind = endpoint.generation.kind();
        let [request, response] = ParamTable::both(kind);
        let request_rows = tx.list_params(request, endpoint.id).await?;
        let response_rows = tx.list_params(response, endpoint.id).await?;

        Ok(EndpointDetail {
            endpoint,
            request_params_by_location: Self::organize(ParamSide::Request, request_rows),
            response_params_by_status_code: Self::organize(ParamSide::Response, response_rows),
        })
    }
}

fn mark_reachable(start: usize, children: &[Vec<usize>], reached: &mut HashSet<usize>) {
    let mut stack = vec![start];
    while let Some(position) = stack.pop() {
        if reached.insert(position) {
            stack.extend(children[position].iter().copied());
        }
    }
}

fn build_tree(
    position: usize,
    children: &[Vec<usize>],
    slots: &mut [Option<ParamNode>],
    placed: &mut HashSet<usize>,
) -> Option<ParamTree> {
    if !placed.insert(position) {
        return None;
    }
    let node = slots[position].take()?;
    let mut tree = ParamTree::leaf(node);
    for &child in &children[position] {
        if let Some(subtree) = build_tree(child, children, slots, placed) {
            tree.children.push(subtree);
        }
    }
    Some(tree)
}
