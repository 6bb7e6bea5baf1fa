//! Error types shared by the planner.

use thiserror::Error;

use crate::traits::NodeId;

/// Errors raised at the TSP solver boundary.
#[derive(Debug, Error)]
pub enum TspError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid solver data: {0}")]
    InvalidData(String),
    #[error("{context}.\nSTDOUT:\n{stdout}\nSTDERR:\n{stderr}")]
    ProcessFailed {
        context: String,
        stdout: String,
        stderr: String,
    },
}

impl TspError {
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData(message.into())
    }
}

#[derive(Debug, Error)]
pub enum PlannerError {
    /// A travel-cost entry needed by the solution is absent from the matrix.
    #[error("no travel cost from {from} to {to}")]
    MissingEdge { from: NodeId, to: NodeId },
    #[error("tsp solver: {0}")]
    Solver(#[from] TspError),
    #[error("no pollution distribution for node {node}")]
    MissingDistribution { node: NodeId },
    /// A stochastic computation ran without the data it needs.
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("invalid pollution distribution: {0}")]
    InvalidDistribution(String),
    #[error("persistence: {0}")]
    Persistence(String),
    #[error("provider: {0}")]
    Provider(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl PlannerError {
    pub fn missing_edge(from: &str, to: &str) -> Self {
        Self::MissingEdge {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }
}

impl From<reqwest::Error> for PlannerError {
    fn from(err: reqwest::Error) -> Self {
        PlannerError::Provider(err.to_string())
    }
}

impl From<serde_json::Error> for PlannerError {
    fn from(err: serde_json::Error) -> Self {
        PlannerError::InvalidConfig(err.to_string())
    }
}

pub type PlannerResult<T> = std::result::Result<T, PlannerError>;
