//! collection-planner
//!
//! Pollution-aware collection route optimization: greedy clean/dirty
//! construction followed by local search with cross exchange, simulated
//! annealing and TSP-based intra-route reordering.

pub mod error;
pub mod traits;
pub mod matrix;
pub mod haversine;
pub mod osrm;
pub mod route;
pub mod fft;
pub mod probability;
pub mod annealing;
pub mod greedy;
pub mod cross_exchange;
pub mod tsplib;
pub mod lkh;
pub mod intra_route;
pub mod solution;
pub mod local_search;
pub mod store;
pub mod planner;

pub use error::{PlannerError, PlannerResult, TspError};
pub use planner::{BatchReport, PlannerConfig, plan_batch};
