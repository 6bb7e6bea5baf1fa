//! Test fixtures for collection-planner.
//!
//! Provides synthetic collection days whose catalog answers every backend
//! query (pickup selection, travel costs, distributions) from memory, plus
//! small TSP solvers.
#![allow(dead_code)]

pub mod collection_day;

pub use collection_day::*;
