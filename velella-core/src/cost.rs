//! Negative-log cost arithmetic for minimum-cost dynamic programming.
//!
//! Every probability `p` in `(0, 1]` has a cost `-ln(p)` in `[0, ∞)`;
//! probability zero maps to [`INFINITE_COST`], the universal "impossible"
//! sentinel. Dynamic programs over costs minimise, so smaller is better and
//! `+∞` never wins a minimum.
//!
//! The HMMER text representation stores costs directly: a `*` token means
//! `+∞`, any other token is the cost itself. [`parse_cost`] and
//! [`format_cost`] implement that convention.

use crate::{Result, VelellaError};

/// The cost of an impossible event: `-ln(0)`.
pub const INFINITE_COST: f64 = f64::INFINITY;

/// Convert a probability to its cost: `-ln(p)`, with `p <= 0` mapping to
/// [`INFINITE_COST`].
pub fn cost_of(p: f64) -> f64 {
    if p <= 0.0 {
        INFINITE_COST
    } else {
        -p.ln()
    }
}

/// Convert a cost back to a probability: `exp(-cost)`.
///
/// Inverse of [`cost_of`] up to floating point; [`INFINITE_COST`] maps to 0.
pub fn prob_of(cost: f64) -> f64 {
    (-cost).exp()
}

/// Minimum over a slice of costs.
///
/// An empty slice yields [`INFINITE_COST`].
pub fn min_cost(costs: &[f64]) -> f64 {
    costs.iter().copied().fold(INFINITE_COST, f64::min)
}

/// Index of the smallest cost, ties broken by the first-listed candidate.
///
/// An empty slice yields 0.
pub fn arg_min(costs: &[f64]) -> usize {
    let mut best = 0;
    for (i, &c) in costs.iter().enumerate().skip(1) {
        if c < costs[best] {
            best = i;
        }
    }
    best
}

/// Parse a HMMER cost token: `*` is `+∞`, anything else is a float cost.
///
/// # Errors
///
/// Returns a parse error if the token is neither `*` nor a valid float.
pub fn parse_cost(token: &str) -> Result<f64> {
    if token == "*" {
        return Ok(INFINITE_COST);
    }
    token
        .parse::<f64>()
        .map_err(|_| VelellaError::Parse(format!("invalid cost token '{}'", token)))
}

/// Format a cost as a HMMER token: `*` for `+∞`, five decimals otherwise.
pub fn format_cost(cost: f64) -> String {
    if cost == INFINITE_COST {
        "*".to_string()
    } else {
        format!("{:.5}", cost)
    }
}
