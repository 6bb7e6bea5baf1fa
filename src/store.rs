//! In-memory implementation of the route persistence contract.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::error::{PlannerError, PlannerResult};
use crate::route::{Layer, RouteEdge, RouteInfo, route_edges, stops_from_edges};
use crate::traits::{NodeId, RouteStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
struct StoredRoute {
    info: RouteInfo,
    edges: Vec<RouteEdge>,
}

/// One exported route, as written by [`InMemoryRouteStore::to_json`].
#[derive(Debug, Serialize)]
struct ExportedRoute<'a> {
    layer: String,
    #[serde(flatten)]
    route: &'a StoredRoute,
}

/// Keeps every layer's routes in insertion order behind a mutex.
#[derive(Debug, Default)]
pub struct InMemoryRouteStore {
    layers: Mutex<HashMap<Layer, Vec<StoredRoute>>>,
}

impl InMemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn layers(&self) -> PlannerResult<MutexGuard<'_, HashMap<Layer, Vec<StoredRoute>>>> {
        self.layers
            .lock()
            .map_err(|_| PlannerError::persistence("route store lock poisoned"))
    }

    /// Number of routes in `layer`, across all days and alphas.
    pub fn route_count(&self, layer: &Layer) -> PlannerResult<usize> {
        Ok(self.layers()?.get(layer).map_or(0, Vec::len))
    }

    /// The stored edges of a route, in position order.
    pub fn route_edges(&self, layer: &Layer, route_id: &str) -> PlannerResult<Vec<RouteEdge>> {
        let layers = self.layers()?;
        let route = find(&layers, layer, route_id)?;
        let mut edges = route.edges.clone();
        edges.sort_by_key(|edge| edge.position);
        Ok(edges)
    }

    /// Every stored route as a JSON array, layers in name order.
    pub fn to_json(&self) -> PlannerResult<String> {
        let layers = self.layers()?;
        let mut names: Vec<&Layer> = layers.keys().collect();
        names.sort_by_key(|layer| layer.to_string());
        let exported: Vec<ExportedRoute<'_>> = names
            .into_iter()
            .flat_map(|layer| {
                layers[layer].iter().map(move |route| ExportedRoute {
                    layer: layer.to_string(),
                    route,
                })
            })
            .collect();
        Ok(serde_json::to_string_pretty(&exported)?)
    }
}

fn find<'a>(
    layers: &'a HashMap<Layer, Vec<StoredRoute>>,
    layer: &Layer,
    route_id: &str,
) -> PlannerResult<&'a StoredRoute> {
    layers
        .get(layer)
        .and_then(|routes| routes.iter().find(|route| route.info.route_id == route_id))
        .ok_or_else(|| PlannerError::persistence(format!("no route {route_id} in {layer}")))
}

fn stored(info: &RouteInfo, stops: &[NodeId]) -> PlannerResult<StoredRoute> {
    if stops.len() < 2 {
        return Err(PlannerError::persistence(format!(
            "route {} needs at least a base and a drop-off",
            info.route_id
        )));
    }
    Ok(StoredRoute {
        info: info.clone(),
        edges: route_edges(stops),
    })
}

impl RouteStore for InMemoryRouteStore {
    fn write_route(&self, layer: &Layer, info: &RouteInfo, stops: &[NodeId]) -> PlannerResult<()> {
        let route = stored(info, stops)?;
        let mut layers = self.layers()?;
        let routes = layers.entry(layer.clone()).or_default();
        match routes.iter().position(|existing| existing.info.route_id == info.route_id) {
            Some(index) if routes[index] == route => {}
            Some(_) => {
                return Err(PlannerError::persistence(format!(
                    "route {} already exists in {layer} with different contents",
                    info.route_id
                )));
            }
            None => routes.push(route),
        }
        Ok(())
    }

    fn update_route(&self, layer: &Layer, info: &RouteInfo, stops: &[NodeId]) -> PlannerResult<()> {
        let route = stored(info, stops)?;
        let mut layers = self.layers()?;
        let routes = layers.entry(layer.clone()).or_default();
        routes.retain(|existing| existing.info.route_id != info.route_id);
        routes.push(route);
        Ok(())
    }

    fn delete_route(&self, layer: &Layer, route_id: &str) -> PlannerResult<()> {
        if let Some(routes) = self.layers()?.get_mut(layer) {
            routes.retain(|existing| existing.info.route_id != route_id);
        }
        Ok(())
    }

    fn route_infos(&self, layer: &Layer, date: &str, alpha: f64) -> PlannerResult<Vec<RouteInfo>> {
        let layers = self.layers()?;
        Ok(layers
            .get(layer)
            .map(|routes| {
                routes
                    .iter()
                    .filter(|route| route.info.date == date && route.info.params.alpha == alpha)
                    .map(|route| route.info.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn route_stops(&self, layer: &Layer, route_id: &str) -> PlannerResult<Vec<NodeId>> {
        let layers = self.layers()?;
        Ok(stops_from_edges(&find(&layers, layer, route_id)?.edges))
    }

    fn clear_layer(&self, layer: &Layer) -> PlannerResult<()> {
        self.layers()?.remove(layer);
        Ok(())
    }
}
