//! Traceback over a filled score layer.
//!
//! The trace starts at the argmin of the score layer and walks
//! predecessors by re-evaluating the minimum that produced each DP cell
//! (no backpointer storage). The result is a `B…E` state string plus the
//! alignment's profile and query spans; an all-`+∞` score layer yields an
//! invalid trace and reconstruction is not attempted.

use velella_core::cost::{arg_min, INFINITE_COST};

use crate::model::{BandedHmm, D, I, M};
use crate::viterbi::ViterbiScores;

/// A recovered state path with its coordinates: `aln_start..=aln_end` on
/// the profile, `aln_from..=aln_to` on the query (1-based, inclusive).
#[derive(Debug, Clone)]
pub struct ViterbiTrace {
    /// Best alignment cost; `+∞` when no valid path existed.
    pub min_score: f64,
    /// State path from `B` to `E` (one byte per state: B, M, I, D, E).
    pub aln_trace: String,
    /// First matched profile position.
    pub aln_start: usize,
    /// Last matched profile position.
    pub aln_end: usize,
    /// First aligned query position.
    pub aln_from: usize,
    /// Last aligned query position.
    pub aln_to: usize,
}

impl ViterbiTrace {
    /// An empty, invalid trace.
    pub fn new() -> Self {
        Self {
            min_score: INFINITE_COST,
            aln_trace: String::new(),
            aln_start: 0,
            aln_end: 0,
            aln_from: 0,
            aln_to: 0,
        }
    }

    /// Whether a valid alignment was recovered.
    pub fn is_valid(&self) -> bool {
        self.min_score < INFINITE_COST
    }
}

impl Default for ViterbiTrace {
    fn default() -> Self {
        Self::new()
    }
}

/// Recover the optimal state path from a filled score layer.
///
/// Returns an invalid trace if the minimum score is `+∞` (no path inside
/// the bands).
pub fn build_viterbi_trace(hmm: &BandedHmm, vs: &ViterbiScores) -> ViterbiTrace {
    let mut vt = ViterbiTrace::new();
    let (min, row, col) = vs.min_score();
    vt.min_score = min;
    if min == INFINITE_COST {
        return vt;
    }

    let k = hmm.k;
    let at = |i: usize, j: usize| i * (k + 1) + j;

    // Exit state: M_j for columns <= K, otherwise the I_K exit column.
    let mut s = if col <= k { b'M' } else { b'I' };
    let mut i = row;
    let mut j = if col <= k { col } else { k };
    vt.aln_end = j;
    vt.aln_to = row;

    let mut trace = vec![b'E'];
    while i >= 1 {
        trace.push(s);
        match s {
            b'M' => {
                s = if j > 1 {
                    let cands = [
                        vs.dp_m[at(i, 0)] + hmm.entry_cost[j],
                        vs.dp_m[at(i - 1, j - 1)] + hmm.t_cost[j - 1][M][M],
                        vs.dp_i[at(i - 1, j - 1)] + hmm.t_cost[j - 1][I][M],
                        vs.dp_d[at(i - 1, j - 1)] + hmm.t_cost[j - 1][D][M],
                    ];
                    [b'B', b'M', b'I', b'D'][arg_min(&cands)]
                } else {
                    // At j = 1 column 0 is the Begin proxy.
                    let cands = [
                        vs.dp_m[at(i, 0)] + hmm.entry_cost[j],
                        vs.dp_i[at(i - 1, j - 1)] + hmm.t_cost[j - 1][I][M],
                    ];
                    [b'B', b'I'][arg_min(&cands)]
                };
                i -= 1;
                j -= 1;
            }
            b'I' => {
                s = if j > 0 {
                    let cands = [
                        vs.dp_m[at(i - 1, j)] + hmm.t_cost[j][M][I],
                        vs.dp_i[at(i - 1, j)] + hmm.t_cost[j][I][I],
                    ];
                    [b'M', b'I'][arg_min(&cands)]
                } else {
                    // 5′-flank insert chain hanging off Begin.
                    let cands = [
                        vs.dp_m[at(i, 0)] + hmm.t_cost[0][M][I],
                        vs.dp_i[at(i - 1, 0)] + hmm.t_cost[0][I][I],
                    ];
                    [b'B', b'I'][arg_min(&cands)]
                };
                i -= 1;
            }
            b'D' => {
                let cands = [
                    vs.dp_m[at(i, j - 1)] + hmm.t_cost[j - 1][M][D],
                    vs.dp_d[at(i, j - 1)] + hmm.t_cost[j - 1][D][D],
                ];
                s = [b'M', b'D'][arg_min(&cands)];
                j -= 1;
            }
            _ => break, // reached B
        }
    }

    vt.aln_start = j + 1;
    vt.aln_from = i + 1;
    if trace.last() != Some(&b'B') {
        trace.push(b'B');
    }
    trace.reverse();
    vt.aln_trace = String::from_utf8(trace).unwrap_or_default();
    vt
}
