//! OSRM-backed travel costs against a local `osrm-routed` container.
//!
//! Needs a preprocessed (MLD) extract in `OSRM_DATA_DIR`, named after
//! `OSRM_DATASET` (default `nevada-latest`). Run with `--ignored`.

mod fixtures;

use std::env;
use std::time::{Duration, Instant};

use testcontainers::core::{IntoContainerPort, Mount};
use testcontainers::runners::SyncRunner;
use testcontainers::{Container, GenericImage, ImageExt, ReuseDirective, TestcontainersError};

use collection_planner::greedy::{GreedyParams, greedy_solve};
use collection_planner::matrix::{Locations, TravelMatrix};
use collection_planner::osrm::{OsrmClient, OsrmConfig};
use collection_planner::route::{Depot, Layer, RouteParams};
use collection_planner::store::InMemoryRouteStore;
use collection_planner::traits::{CostMetric, MatrixProvider, NodeId, RouteStore};

use fixtures::{METRIC, TestCatalog, TestPickup, THRESHOLD, ids};

const DATE: &str = "2024-08-01";

fn osrm_container() -> Result<(Container<GenericImage>, String), TestcontainersError> {
    let data_dir = env::var("OSRM_DATA_DIR").unwrap_or_else(|_| "osrm-data".to_string());
    let dataset = env::var("OSRM_DATASET").unwrap_or_else(|_| "nevada-latest".to_string());
    let data_dir = std::fs::canonicalize(&data_dir)
        .map_err(|err| TestcontainersError::other(format!("OSRM data dir {data_dir}: {err}")))?;

    let image = GenericImage::new("osrm/osrm-backend", "latest")
        .with_exposed_port(5000.tcp())
        .with_mount(Mount::bind_mount(data_dir.to_string_lossy().to_string(), "/data"))
        .with_cmd(vec![
            "osrm-routed".to_string(),
            "--algorithm".to_string(),
            "mld".to_string(),
            format!("/data/{dataset}.osrm"),
        ])
        .with_container_name(format!("collection-planner-osrm-{dataset}"))
        .with_startup_timeout(Duration::from_secs(30))
        .with_reuse(ReuseDirective::Always);

    let container = image.start()?;
    let port = container.get_host_port_ipv4(5000.tcp())?;
    Ok((container, format!("http://127.0.0.1:{port}")))
}

/// Las Vegas depot and pickups with routable coordinates.
fn locations() -> Locations {
    Locations::from([
        ("base".to_string(), (36.1147, -115.1728)),
        ("drop".to_string(), (36.1727, -115.1580)),
        ("p1".to_string(), (36.1215, -115.1739)),
        ("p2".to_string(), (36.1263, -115.1658)),
        ("p3".to_string(), (36.1023, -115.1688)),
    ])
}

/// Polls until the server answers with a full matrix.
fn wait_for_matrix(client: &OsrmClient, nodes: &[NodeId], metric: CostMetric) -> TravelMatrix {
    let start = Instant::now();
    loop {
        match client.travel_cost_matrix(nodes, metric) {
            Ok(matrix) if matrix.len() >= nodes.len() * (nodes.len() - 1) => return matrix,
            Ok(matrix) if start.elapsed() > Duration::from_secs(15) => return matrix,
            Err(err) if start.elapsed() > Duration::from_secs(15) => panic!("OSRM never answered: {err}"),
            _ => std::thread::sleep(Duration::from_millis(500)),
        }
    }
}

#[test]
#[ignore = "needs docker and a preprocessed OSRM extract"]
fn osrm_table_returns_both_metrics() {
    let (container, base_url) = osrm_container().expect("start OSRM container");
    let config = OsrmConfig {
        base_url,
        ..OsrmConfig::default()
    };
    let client = OsrmClient::new(config, locations()).expect("build OSRM client");
    let nodes = ids(&["base", "p1", "p2", "drop"]);

    let distances = wait_for_matrix(&client, &nodes, CostMetric::Distance);
    if distances.is_empty()
        && let Ok(stderr) = container.stderr_to_vec()
    {
        eprintln!("OSRM stderr:\n{}", String::from_utf8_lossy(&stderr));
    }
    let durations = wait_for_matrix(&client, &nodes, CostMetric::Duration);

    for from in &nodes {
        for to in &nodes {
            if from != to {
                assert!(distances.cost(from, to).unwrap() > 0.0, "{from} -> {to}");
                assert!(durations.cost(from, to).unwrap() > 0.0, "{from} -> {to}");
            }
        }
    }
}

#[test]
#[ignore = "needs docker and a preprocessed OSRM extract"]
fn greedy_construction_on_road_costs() {
    let (_container, base_url) = osrm_container().expect("start OSRM container");
    let config = OsrmConfig {
        base_url,
        ..OsrmConfig::default()
    };
    let client = OsrmClient::new(config, locations()).expect("build OSRM client");
    wait_for_matrix(&client, &ids(&["base", "drop"]), CostMetric::Duration);

    // Positions only drive the selector here; costs come from OSRM.
    let selector = TestCatalog::new((0.0, 0.0), (0.0, 0.0)).day(
        DATE,
        vec![
            TestPickup::new("p1", 0.0, 0.0).dirty(),
            TestPickup::new("p2", 0.0, 0.0).clean(),
            TestPickup::new("p3", 0.0, 0.0).dirty(),
        ],
    );
    let store = InMemoryRouteStore::new();
    let run = GreedyParams {
        date: DATE.to_string(),
        metric: CostMetric::Duration,
        params: RouteParams {
            alpha: 300.0,
            max_route_length: None,
            max_stops_per_route: Some(2),
            pollution_metric: METRIC.to_string(),
            clean_waste_threshold: THRESHOLD,
        },
    };

    let written = greedy_solve(&selector, &client, &store, &Depot::new("base", "drop"), &run).unwrap();

    assert_eq!(written.iter().map(|info| info.stops).sum::<usize>(), 3);
    for info in &written {
        let stops = store.route_stops(&Layer::Greedy, &info.route_id).unwrap();
        assert!(info.length > 0.0);
        assert!(info.secondary_length > 0.0);
        assert_eq!(stops.len(), info.stops + 2);
    }
}
