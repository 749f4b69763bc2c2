//! Cost-space Viterbi engine: full-grid and banded fills.
//!
//! Three DP layers `M`, `I`, `D` of shape `(L+1)×(K+1)` hold the best
//! (minimum) cost of reaching each state having consumed `i` query bases
//! and `j` profile positions; the score layer `S` of shape `(L+1)×(K+2)`
//! adds the exit and 3′-flank costs, so the overall best alignment is the
//! minimum over `S`. Column `K+1` of `S` is the `I_K → E` exit.
//!
//! The banded fill restricts the recurrence to rectangles around ordered
//! known path segments ([`AlignPath`]), gating segment interiors by
//! anti-diagonal distance; untouched cells keep their `+∞` initialisation
//! and never win a minimum.
//!
//! Both fills require a wing-retracted model: the recurrence prunes `D_1`
//! and `D_K`, whose paths retraction folded into the entry/exit costs.

use velella_core::cost::{min_cost, INFINITE_COST};
use velella_core::{Result, VelellaError};

use crate::alphabet;
use crate::model::{BandedHmm, D, I, M, SP_B, SP_C, SP_E, SP_N};

/// Fraction by which bands grow beyond the seeded query span.
pub const MIN_GAP_FRAC: f64 = 0.2;

/// Scratch DP buffers for one Viterbi run.
///
/// Buffers are reusable across queries of the same length against
/// profiles of the same length; each concurrent alignment needs its own.
#[derive(Debug, Clone)]
pub struct ViterbiScores {
    pub(crate) l: usize,
    pub(crate) k: usize,
    pub(crate) dp_m: Vec<f64>,
    pub(crate) dp_i: Vec<f64>,
    pub(crate) dp_d: Vec<f64>,
    pub(crate) s: Vec<f64>,
}

impl ViterbiScores {
    /// Buffers for a query of length `l` against a profile of length `k`.
    pub fn new(l: usize, k: usize) -> Self {
        Self {
            l,
            k,
            dp_m: vec![INFINITE_COST; (l + 1) * (k + 1)],
            dp_i: vec![INFINITE_COST; (l + 1) * (k + 1)],
            dp_d: vec![INFINITE_COST; (l + 1) * (k + 1)],
            s: vec![INFINITE_COST; (l + 1) * (k + 2)],
        }
    }

    /// Reset every cell to `+∞`.
    pub fn reset(&mut self) {
        for layer in [&mut self.dp_m, &mut self.dp_i, &mut self.dp_d, &mut self.s] {
            layer.fill(INFINITE_COST);
        }
    }

    /// Query length these buffers were sized for.
    pub fn seq_len(&self) -> usize {
        self.l
    }

    /// Profile length these buffers were sized for.
    pub fn profile_len(&self) -> usize {
        self.k
    }

    /// Final score of exiting at query position `i`, profile position `j`
    /// (column `K+1` is the `I_K → E` exit).
    pub fn score(&self, i: usize, j: usize) -> f64 {
        self.s[i * (self.k + 2) + j]
    }

    /// Minimum of the score layer with its position, scanning row-major
    /// (earliest query position wins ties).
    pub fn min_score(&self) -> (f64, usize, usize) {
        let mut best = INFINITE_COST;
        let (mut bi, mut bj) = (0, 0);
        for i in 0..=self.l {
            for j in 0..=self.k + 1 {
                let v = self.s[i * (self.k + 2) + j];
                if v < best {
                    best = v;
                    bi = i;
                    bj = j;
                }
            }
        }
        (best, bi, bj)
    }
}

/// A known path segment anchoring the banded fill: profile span
/// `start..=end`, query span `from..=to` (both 1-based, inclusive), and
/// the insertion/deletion slack that widens its anti-diagonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlignPath {
    /// First profile position covered.
    pub start: usize,
    /// Last profile position covered.
    pub end: usize,
    /// First query position covered.
    pub from: usize,
    /// Last query position covered.
    pub to: usize,
    /// Allowed drift above the seed diagonal (insertions).
    pub n_ins: usize,
    /// Allowed drift below the seed diagonal (deletions).
    pub n_del: usize,
}

/// A seed alignment anchored on consensus columns: the aligned string
/// `cs` spans CS columns `start..=end`.
#[derive(Debug, Clone)]
pub struct CsLoc {
    /// First CS column (1-based).
    pub start: usize,
    /// Last CS column (1-based).
    pub end: usize,
    /// Aligned characters, one per CS column (symbols and gaps).
    pub cs: String,
}

/// Anti-diagonal drift of `(i, j)` relative to the band origin
/// `(i0, j0)`: positive when the query runs ahead (insertions), negative
/// when the profile does (deletions).
fn diagonal_dist(i: usize, j: usize, i0: usize, j0: usize) -> isize {
    (i as isize - i0 as isize) - (j as isize - j0 as isize)
}

fn encode_query(seq: &[u8]) -> Result<Vec<usize>> {
    if seq.is_empty() {
        return Err(VelellaError::InvalidInput("empty query sequence".into()));
    }
    seq.iter()
        .enumerate()
        .map(|(i, &b)| {
            alphabet::encode(b).ok_or_else(|| {
                VelellaError::InvalidInput(format!(
                    "invalid query base '{}' at position {}",
                    b as char,
                    i + 1
                ))
            })
        })
        .collect()
}

/// Initialise column 0: the geometric N-flank prior into the Begin state.
fn prepare(hmm: &BandedHmm, vs: &mut ViterbiScores) {
    let k = vs.k;
    let at = |i: usize, j: usize| i * (k + 1) + j;
    let nn = hmm.t_sp_cost[SP_N][SP_N];
    let nb = hmm.t_sp_cost[SP_N][SP_B];
    for i in 1..=vs.l {
        // No N→N loop before the first base keeps GLOBAL mode (loop cost
        // +∞) well-defined.
        let loops = if i == 1 { 0.0 } else { nn * (i - 1) as f64 };
        vs.dp_m[at(i, 0)] = loops + nb;
        vs.dp_i[at(i, 0)] = vs.dp_m[at(i, 0)];
    }
}

/// One cell of the wing-retracted recurrence.
fn fill_cell(hmm: &BandedHmm, x: &[usize], vs: &mut ViterbiScores, i: usize, j: usize) {
    let k = vs.k;
    let at = |i: usize, j: usize| i * (k + 1) + j;
    let b = x[i - 1];
    let tc = &hmm.t_cost[j - 1];

    let best_m = min_cost(&[
        vs.dp_m[at(i, 0)] + hmm.entry_cost[j],
        vs.dp_m[at(i - 1, j - 1)] + tc[M][M],
        vs.dp_i[at(i - 1, j - 1)] + tc[I][M],
        vs.dp_d[at(i - 1, j - 1)] + tc[D][M],
    ]);
    vs.dp_m[at(i, j)] = hmm.e_m_cost[j][b] + best_m;

    let tcj = &hmm.t_cost[j];
    let best_i = (vs.dp_m[at(i - 1, j)] + tcj[M][I]).min(vs.dp_i[at(i - 1, j)] + tcj[I][I]);
    vs.dp_i[at(i, j)] = hmm.e_i_cost[j][b] + best_i;

    if j > 1 && j < hmm.k {
        // D_1 and D_K are retracted.
        vs.dp_d[at(i, j)] =
            (vs.dp_m[at(i, j - 1)] + tc[M][D]).min(vs.dp_d[at(i, j - 1)] + tc[D][D]);
    }
}

/// Fold exit, E→C, and the geometric C-flank prior into the score layer.
fn finish(hmm: &BandedHmm, vs: &mut ViterbiScores) {
    let (l, k) = (vs.l, vs.k);
    let at = |i: usize, j: usize| i * (k + 1) + j;
    let sat = |i: usize, j: usize| i * (k + 2) + j;
    let ik_exit = hmm.t_cost[k][I][M];
    for i in 0..=l {
        for j in 0..=k {
            vs.s[sat(i, j)] = vs.dp_m[at(i, j)] + hmm.exit_cost[j];
        }
        vs.s[sat(i, k + 1)] = vs.dp_i[at(i, k)] + ik_exit;
    }
    let ec = hmm.t_sp_cost[SP_E][SP_C];
    for v in vs.s.iter_mut() {
        *v += ec;
    }
    let cc = hmm.t_sp_cost[SP_C][SP_C];
    for i in 1..l {
        // Row L has no C loop.
        let add = cc * (l - i) as f64;
        for j in 0..=k + 1 {
            vs.s[sat(i, j)] += add;
        }
    }
}

fn check_dims(hmm: &BandedHmm, seq: &[u8], vs: &ViterbiScores) {
    assert_eq!(seq.len(), vs.l, "query length must match the DP buffers");
    assert_eq!(hmm.k, vs.k, "profile length must match the DP buffers");
    assert!(hmm.wing_retracted, "wing retraction must precede Viterbi");
}

/// Full-grid Viterbi fill.
///
/// # Errors
///
/// Returns an error on an empty query or a non-DNA base.
///
/// # Panics
///
/// Panics if the buffers don't match the query/profile dimensions or the
/// model is not wing-retracted (programmer errors).
pub fn calc_viterbi_scores(hmm: &BandedHmm, seq: &[u8], vs: &mut ViterbiScores) -> Result<()> {
    check_dims(hmm, seq, vs);
    let x = encode_query(seq)?;
    vs.reset();
    prepare(hmm, vs);
    for j in 1..=hmm.k {
        for i in 1..=vs.l {
            fill_cell(hmm, &x, vs, i, j);
        }
    }
    finish(hmm, vs);
    Ok(())
}

fn validate_paths(paths: &[AlignPath], l: usize, k: usize) -> Result<()> {
    for vp in paths {
        if vp.start < 1 || vp.end > k || vp.start > vp.end {
            return Err(VelellaError::InvalidInput(format!(
                "known path profile span {}..={} out of 1..={}",
                vp.start, vp.end, k
            )));
        }
        if vp.from < 1 || vp.to > l || vp.from > vp.to {
            return Err(VelellaError::InvalidInput(format!(
                "known path query span {}..={} out of 1..={}",
                vp.from, vp.to, l
            )));
        }
    }
    for pair in paths.windows(2) {
        if pair[1].from < pair[0].to || pair[1].start < pair[0].end {
            return Err(VelellaError::InvalidInput(
                "known paths must be ordered by query and profile position".into(),
            ));
        }
    }
    Ok(())
}

/// Banded Viterbi fill constrained by ordered known path segments.
///
/// Each segment gets an upstream rectangle reaching back to the previous
/// segment (or, for the first, `MIN_GAP_FRAC`-grown from its own query
/// span), an anti-diagonal-gated interior, and the last segment a
/// downstream rectangle toward the profile/query ends. Cells outside
/// every band stay at `+∞`. An empty path list leaves the buffers
/// untouched.
///
/// # Errors
///
/// Returns an error on an empty or non-DNA query, or on unordered or
/// out-of-range segments.
///
/// # Panics
///
/// As [`calc_viterbi_scores`].
pub fn calc_viterbi_scores_banded(
    hmm: &BandedHmm,
    seq: &[u8],
    vs: &mut ViterbiScores,
    paths: &[AlignPath],
) -> Result<()> {
    check_dims(hmm, seq, vs);
    if paths.is_empty() {
        return Ok(());
    }
    let (l, k) = (vs.l, hmm.k);
    validate_paths(paths, l, k)?;
    let x = encode_query(seq)?;
    vs.reset();
    prepare(hmm, vs);

    for (pi, vp) in paths.iter().enumerate() {
        let (up_from, up_start) = if pi == 0 {
            let up_q_len = vp.from - 1;
            let grow = (up_q_len as f64 * (1.0 + MIN_GAP_FRAC)) as usize;
            (
                vp.from.saturating_sub(grow).max(1),
                vp.start.saturating_sub(grow).max(1),
            )
        } else {
            (paths[pi - 1].to, paths[pi - 1].end)
        };

        // Upstream of the segment: full recurrence inside the rectangle.
        for j in up_start..=vp.start {
            for i in up_from..=vp.from {
                fill_cell(hmm, &x, vs, i, j);
            }
        }

        // The segment itself, gated by anti-diagonal drift.
        for j in vp.start..=vp.end {
            for i in vp.from..=vp.to {
                let dist = diagonal_dist(i, j, vp.from, vp.start);
                if dist > vp.n_ins as isize || dist < -(vp.n_del as isize) {
                    continue;
                }
                fill_cell(hmm, &x, vs, i, j);
            }
        }
    }

    // Downstream of the last segment toward the profile and query ends.
    let last = paths[paths.len() - 1];
    let down_q_len = l - last.to;
    let grow = (down_q_len as f64 * (1.0 + MIN_GAP_FRAC)) as usize;
    let down_end = (last.end + grow).min(k);
    let down_to = (last.to + grow).min(l);
    for j in last.end..=down_end {
        for i in last.to..=down_to {
            fill_cell(hmm, &x, vs, i, j);
        }
    }

    finish(hmm, vs);
    Ok(())
}

/// Build a known path segment from a seed alignment anchored on CS
/// columns.
///
/// Walks the seed string over CS columns `loc.start..=loc.end` (query
/// span `cs_from..=cs_to`), counting symbols on insert-only columns as
/// insertions and gaps on match columns as deletions.
///
/// # Errors
///
/// Returns an error if the seed string length doesn't match its CS span,
/// the query span doesn't match its symbol count, or the seed covers no
/// match column.
pub fn build_align_path(
    hmm: &BandedHmm,
    loc: &CsLoc,
    cs_from: usize,
    cs_to: usize,
) -> Result<AlignPath> {
    if loc.start == 0 || loc.end < loc.start || loc.cs.len() != loc.end - loc.start + 1 {
        return Err(VelellaError::InvalidInput(
            "CS locus span does not match its aligned string".into(),
        ));
    }
    if cs_from == 0 || cs_to < cs_from {
        return Err(VelellaError::InvalidInput(
            "invalid query span for CS locus".into(),
        ));
    }

    let (mut start, mut end, mut from, mut to) = (0usize, 0usize, 0usize, 0usize);
    let (mut n_ins, mut n_del) = (0usize, 0usize);
    let mut i = cs_from;
    let mut j = loc.start;
    for &ch in loc.cs.as_bytes() {
        let k = hmm.cs_to_profile(j);
        let match_col = k != 0 && hmm.profile_to_cs(k) == j;
        let non_gap = alphabet::is_symbol(ch);

        if from == 0 && non_gap {
            from = i;
        }
        if non_gap {
            to = i;
        }
        if match_col {
            if start == 0 {
                start = k;
            }
            end = k;
            if !non_gap {
                n_del += 1;
            }
        } else if non_gap {
            n_ins += 1;
        }
        j += 1;
        if non_gap {
            i += 1;
        }
    }
    if i != cs_to + 1 || j != loc.end + 1 {
        return Err(VelellaError::InvalidInput(
            "CS locus walk does not land on its declared ends".into(),
        ));
    }
    if start == 0 {
        return Err(VelellaError::InvalidInput(
            "seed alignment covers no match column".into(),
        ));
    }
    Ok(AlignPath {
        start,
        end,
        from,
        to,
        n_ins,
        n_del,
    })
}
