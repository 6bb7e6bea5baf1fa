//! TSPLIB problem writer and tour parser for asymmetric instances.

use std::fmt::{self, Display, Formatter};

use crate::error::TspError;

const TOUR_SECTION_HEADER: &str = "TOUR_SECTION";
const TOUR_END_MARKER: &str = "-1";
const EOF_MARKER: &str = "EOF";
const TSPLIB_NODE_ID_OFFSET: usize = 1;

/// A fully specified `TYPE: ATSP` instance with an explicit full matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtspProblem {
    pub name: String,
    pub comment: Option<String>,
    /// Row-major `dimension x dimension` integer costs.
    pub weights: Vec<Vec<i64>>,
}

impl AtspProblem {
    pub fn new(name: impl Into<String>, weights: Vec<Vec<i64>>) -> Result<Self, TspError> {
        let dimension = weights.len();
        if let Some(row) = weights.iter().find(|row| row.len() != dimension) {
            return Err(TspError::invalid_data(format!(
                "matrix row has {} entries, expected {dimension}",
                row.len()
            )));
        }
        Ok(Self {
            name: name.into(),
            comment: None,
            weights,
        })
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn dimension(&self) -> usize {
        self.weights.len()
    }
}

impl Display for AtspProblem {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "NAME: {}", self.name)?;
        if let Some(comment) = &self.comment {
            writeln!(f, "COMMENT: {comment}")?;
        }
        writeln!(f, "TYPE: ATSP")?;
        writeln!(f, "DIMENSION: {}", self.dimension())?;
        writeln!(f, "EDGE_WEIGHT_TYPE: EXPLICIT")?;
        writeln!(f, "EDGE_WEIGHT_FORMAT: FULL_MATRIX")?;
        writeln!(f, "EDGE_WEIGHT_SECTION")?;
        for row in &self.weights {
            let line = row
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join("\t");
            writeln!(f, "{line}")?;
        }
        writeln!(f, "{EOF_MARKER}")
    }
}

/// Parses a TSPLIB tour file and returns the zero-based visiting order.
///
/// Headers before `TOUR_SECTION` are ignored. The section ends at `-1`,
/// `EOF` or the end of the text.
pub fn parse_tour(text: &str) -> Result<Vec<usize>, TspError> {
    let mut in_tour_section = false;
    let mut dimension: Option<usize> = None;
    let mut order = Vec::new();

    'lines: for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if !in_tour_section {
            if line.eq_ignore_ascii_case(EOF_MARKER) {
                break;
            }
            if line.eq_ignore_ascii_case(TOUR_SECTION_HEADER) {
                in_tour_section = true;
                continue;
            }
            if let Some((key, value)) = line.split_once(':').or_else(|| line.split_once('='))
                && key.trim().eq_ignore_ascii_case("DIMENSION")
            {
                let value = value.trim();
                dimension = Some(value.parse().map_err(|err| {
                    TspError::invalid_data(format!("bad DIMENSION value '{value}': {err}"))
                })?);
            }
            continue;
        }

        for token in line.split_whitespace() {
            if token == TOUR_END_MARKER || token.eq_ignore_ascii_case(EOF_MARKER) {
                break 'lines;
            }
            let id: usize = token
                .parse()
                .map_err(|err| TspError::invalid_data(format!("bad tour token '{token}': {err}")))?;
            if id < TSPLIB_NODE_ID_OFFSET {
                return Err(TspError::invalid_data(format!(
                    "bad node id {id}; TSPLIB ids start at {TSPLIB_NODE_ID_OFFSET}"
                )));
            }
            order.push(id - TSPLIB_NODE_ID_OFFSET);
        }
    }

    if !in_tour_section {
        return Err(TspError::invalid_data("missing TOUR_SECTION"));
    }
    if let Some(dimension) = dimension
        && dimension != order.len()
    {
        return Err(TspError::invalid_data(format!(
            "DIMENSION is {dimension}, but TOUR_SECTION has {} nodes",
            order.len()
        )));
    }
    Ok(order)
}
