//! The Plan7 banded profile HMM parameter block.
//!
//! A [`BandedHmm`] of length `K` has a match/insert/delete state triple at
//! every profile position `1..=K`; slot 0 doubles as the Begin state and
//! slot `K+1` (implicit) as End. Four special states N, B, E, C model the
//! unaligned 5′/3′ flanks. All parameters are kept in two views: raw
//! probabilities, and negative-log *costs* used by the Viterbi engine.
//!
//! # Model
//!
//! - Transitions `T[k]` are 3×3 over {M, I, D}; seven entries are
//!   meaningful (I→D and D→I are forbidden). `T[0]` and `T[K]` carry the
//!   Begin/End boundary pins.
//! - Match emissions `E_M[k]` and insert emissions `E_I[k]` are 4-vectors
//!   over A, C, G, T; `E_M[0]` doubles as the compositional background.
//! - Special transitions `T_SP` over {N, B, E, C} encode the sequence
//!   alignment mode; N and C emit at background frequency.
//! - Per-position entry/exit probabilities implement profile-local
//!   alignment; wing retraction folds the pure-deletion chains
//!   B→D₁…D_{j−1}→M_j and M_i→D_{i+1}…D_K→E into them, which is what lets
//!   the dynamic program prune D₁ and D_K.
//!
//! Two index maps relate profile positions to consensus (CS) columns:
//! `profile_to_cs(k)` is the CS column owned by M_k, `cs_to_profile(j)` is
//! the owning position for match columns and 0 for insert-only columns,
//! with the right tail clamped to `K`.

use std::collections::HashMap;

use velella_core::cost::{cost_of, prob_of, INFINITE_COST};
use velella_core::{Result, VelellaError};

use crate::alphabet::SIZE;
use crate::background::Background;
use crate::prior::HmmPrior;

/// Match state index into the transition tensor.
pub const M: usize = 0;
/// Insert state index into the transition tensor.
pub const I: usize = 1;
/// Delete state index into the transition tensor.
pub const D: usize = 2;

/// 5′ flanking special state.
pub const SP_N: usize = 0;
/// Begin special state.
pub const SP_B: usize = 1;
/// End special state.
pub const SP_E: usize = 2;
/// 3′ flanking special state.
pub const SP_C: usize = 3;
/// Number of special states.
pub const NUM_SP: usize = 4;

/// Largest supported profile length.
pub const MAX_PROFILE: usize = 10_000;

/// Version text written after the `HMMER3/f` tag for freshly built models.
pub const HMM_VERSION: &str = "[velella 0.1]";

/// Sequence alignment mode: whether the query's 5′ and 3′ flanks may be
/// left unaligned (local) or must be consumed by the profile (global).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AlignMode {
    /// Both flanks global: the whole query must align.
    Global,
    /// Both flanks local: either end of the query may stay unaligned.
    Local,
    /// 5′ global, 3′ local.
    NGlobalCLocal,
    /// 5′ local, 3′ global.
    CGlobalNLocal,
}

/// The Plan7 profile HMM: parameters in probability and cost form, the
/// CS↔profile index maps, and the optional HMMER header tags.
///
/// Construction happens through the HMMER-3/f parser or the MSA builder;
/// after that the model is read-only apart from [`set_sequence_mode`].
///
/// [`set_sequence_mode`]: BandedHmm::set_sequence_mode
#[derive(Debug, Clone)]
pub struct BandedHmm {
    pub(crate) name: String,
    pub(crate) version: String,
    /// Profile length K.
    pub(crate) k: usize,
    /// Consensus-sequence width L (the MAXL tag).
    pub(crate) max_len: usize,
    pub(crate) n_seq: usize,
    pub(crate) eff_n: f64,
    pub(crate) bg: Background,

    /// Transition tensor, slot 0 = Begin; `t[k][from][to]`.
    pub(crate) t: Vec<[[f64; 3]; 3]>,
    pub(crate) t_cost: Vec<[[f64; 3]; 3]>,
    /// Match emissions; slot 0 is the compositional background (COMPO).
    pub(crate) e_m: Vec<[f64; SIZE]>,
    pub(crate) e_m_cost: Vec<[f64; SIZE]>,
    pub(crate) e_i: Vec<[f64; SIZE]>,
    pub(crate) e_i_cost: Vec<[f64; SIZE]>,

    /// Special transitions over {N, B, E, C}.
    pub(crate) t_sp: [[f64; NUM_SP]; NUM_SP],
    pub(crate) t_sp_cost: [[f64; NUM_SP]; NUM_SP],
    /// Special emissions: N and C at background frequency, B and E silent.
    pub(crate) e_sp: [[f64; SIZE]; NUM_SP],
    pub(crate) e_sp_cost: [[f64; SIZE]; NUM_SP],

    /// Profile-local entry probabilities B→M_k, slot 0 unused.
    pub(crate) entry: Vec<f64>,
    pub(crate) entry_cost: Vec<f64>,
    /// Profile-local exit probabilities M_k→E, slot 0 unused.
    pub(crate) exit: Vec<f64>,
    pub(crate) exit_cost: Vec<f64>,

    /// CS column → owning profile position (0 for insert-only columns).
    pub(crate) cs2profile: Vec<usize>,
    /// Profile position → CS column.
    pub(crate) profile2cs: Vec<usize>,

    /// Optional header tags, in file order.
    pub(crate) tags: Vec<(String, String)>,
    /// Per-position tag values (MAP, CONS, RF, MM, CS), slot 0 unused.
    pub(crate) loc_tags: HashMap<String, Vec<String>>,

    pub(crate) wing_retracted: bool,
}

impl BandedHmm {
    /// New profile of length `k` with empty parameters, uniform
    /// background, and profile-local entry/exit enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if `k` is zero or exceeds [`MAX_PROFILE`].
    pub fn new(name: &str, k: usize) -> Result<Self> {
        if k == 0 || k > MAX_PROFILE {
            return Err(VelellaError::InvalidInput(format!(
                "profile length {} out of range 1..={}",
                k, MAX_PROFILE
            )));
        }
        let mut hmm = Self {
            name: name.to_string(),
            version: HMM_VERSION.to_string(),
            k,
            max_len: 0,
            n_seq: 0,
            eff_n: 0.0,
            bg: Background::new(k),
            t: Vec::new(),
            t_cost: Vec::new(),
            e_m: Vec::new(),
            e_m_cost: Vec::new(),
            e_i: Vec::new(),
            e_i_cost: Vec::new(),
            t_sp: [[0.0; NUM_SP]; NUM_SP],
            t_sp_cost: [[INFINITE_COST; NUM_SP]; NUM_SP],
            e_sp: [[0.0; SIZE]; NUM_SP],
            e_sp_cost: [[INFINITE_COST; SIZE]; NUM_SP],
            entry: Vec::new(),
            entry_cost: Vec::new(),
            exit: Vec::new(),
            exit_cost: Vec::new(),
            cs2profile: vec![0],
            profile2cs: Vec::new(),
            tags: Vec::new(),
            loc_tags: HashMap::new(),
            wing_retracted: false,
        };
        hmm.alloc();
        hmm.enable_profile_local_mode();
        let freq = *hmm.bg.freq();
        hmm.set_sp_emission_freq(freq);
        Ok(hmm)
    }

    fn alloc(&mut self) {
        let n = self.k + 1;
        self.t = vec![[[0.0; 3]; 3]; n];
        self.t_cost = vec![[[INFINITE_COST; 3]; 3]; n];
        self.e_m = vec![[0.0; SIZE]; n];
        self.e_m_cost = vec![[INFINITE_COST; SIZE]; n];
        self.e_i = vec![[0.0; SIZE]; n];
        self.e_i_cost = vec![[INFINITE_COST; SIZE]; n];
        self.entry = vec![0.0; n];
        self.entry_cost = vec![INFINITE_COST; n];
        self.exit = vec![0.0; n];
        self.exit_cost = vec![INFINITE_COST; n];
        self.profile2cs = vec![0; n];
        self.bg.set_size(self.k);
    }

    /// Resize the profile, clearing the main parameters.
    pub(crate) fn set_profile_size(&mut self, k: usize) {
        self.k = k;
        self.alloc();
        self.enable_profile_local_mode();
        let freq = *self.bg.freq();
        self.set_sp_emission_freq(freq);
        self.wing_retracted = false;
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Profile name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version text after the `HMMER3/f` tag.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Profile length K (number of match states).
    pub fn len(&self) -> usize {
        self.k
    }

    /// Whether the profile has no positions (never true for a constructed
    /// model; present for the usual emptiness contract).
    pub fn is_empty(&self) -> bool {
        self.k == 0
    }

    /// Consensus-sequence width L (the MAXL tag).
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Number of training sequences (NSEQ).
    pub fn n_seq(&self) -> usize {
        self.n_seq
    }

    /// Effective training sequence count (EFFN).
    pub fn eff_n(&self) -> f64 {
        self.eff_n
    }

    /// The background model.
    pub fn background(&self) -> &Background {
        &self.bg
    }

    /// Whether the deletion wings have been retracted.
    pub fn is_wing_retracted(&self) -> bool {
        self.wing_retracted
    }

    /// Transition probability `T[k](from, to)`.
    pub fn transition(&self, k: usize, from: usize, to: usize) -> f64 {
        self.t[k][from][to]
    }

    /// Transition cost `-ln T[k](from, to)`.
    pub fn transition_cost(&self, k: usize, from: usize, to: usize) -> f64 {
        self.t_cost[k][from][to]
    }

    /// Match emission probability of base `b` at position `k`.
    pub fn match_emission(&self, k: usize, b: usize) -> f64 {
        self.e_m[k][b]
    }

    /// Insert emission probability of base `b` at position `k`.
    pub fn insert_emission(&self, k: usize, b: usize) -> f64 {
        self.e_i[k][b]
    }

    /// Special transition probability.
    pub fn special_transition(&self, from: usize, to: usize) -> f64 {
        self.t_sp[from][to]
    }

    /// Entry probability B→M_k.
    pub fn entry_pr(&self, k: usize) -> f64 {
        self.entry[k]
    }

    /// Exit probability M_k→E.
    pub fn exit_pr(&self, k: usize) -> f64 {
        self.exit[k]
    }

    /// CS column owned by match state `k`.
    pub fn profile_to_cs(&self, k: usize) -> usize {
        self.profile2cs[k]
    }

    /// Owning profile position of CS column `j`: 0 for insert-only
    /// columns, clamped to K past the mapped tail.
    pub fn cs_to_profile(&self, j: usize) -> usize {
        if j < self.cs2profile.len() {
            self.cs2profile[j]
        } else {
            self.k
        }
    }

    /// Value of an optional header tag.
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(tag, _)| tag == name)
            .map(|(_, val)| val.as_str())
    }

    /// Set an optional header tag, replacing any previous value.
    pub(crate) fn set_tag(&mut self, name: &str, value: &str) {
        if let Some(slot) = self.tags.iter_mut().find(|(tag, _)| tag == name) {
            slot.1 = value.to_string();
        } else {
            self.tags.push((name.to_string(), value.to_string()));
        }
    }

    /// Per-position value of a tag (MAP, CONS, RF, MM, CS) at position `k`.
    pub fn loc_tag(&self, name: &str, k: usize) -> Option<&str> {
        self.loc_tags
            .get(name)
            .and_then(|vals| vals.get(k))
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub(crate) fn set_loc_tag(&mut self, name: &str, k: usize, value: &str) {
        let slots_len = self.k + 1;
        let slots = self
            .loc_tags
            .entry(name.to_string())
            .or_insert_with(|| vec![String::new(); slots_len]);
        if slots.len() <= k {
            slots.resize(slots_len.max(k + 1), String::new());
        }
        slots[k] = value.to_string();
    }

    /// Record that match state `k` owns CS column `cs`.
    pub(crate) fn set_map(&mut self, k: usize, cs: usize) {
        self.profile2cs[k] = cs;
        if self.cs2profile.len() <= cs {
            self.cs2profile.resize(cs + 1, 0);
        }
        self.cs2profile[cs] = k;
    }

    /// Extend the CS index tail so columns past the last mapped one clamp
    /// to K instead of falling off the map.
    pub(crate) fn extend_index(&mut self) {
        let last = self.profile2cs[self.k];
        if self.cs2profile.len() <= self.max_len {
            self.cs2profile.resize(self.max_len + 1, 0);
        }
        for j in last + 1..=self.max_len {
            self.cs2profile[j] = self.k;
        }
    }

    // -----------------------------------------------------------------------
    // Mode and special states
    // -----------------------------------------------------------------------

    /// Configure the special transitions for a sequence alignment mode.
    ///
    /// Local flanks loop with the background termination probability;
    /// global flanks never loop. `N→B = 1 − N→N` and `E→C = 1` always.
    pub fn set_sequence_mode(&mut self, mode: AlignMode) {
        let term = self.bg.term_pr();
        let (nn, cc) = match mode {
            AlignMode::Global => (0.0, 0.0),
            AlignMode::Local => (term, term),
            AlignMode::NGlobalCLocal => (0.0, term),
            AlignMode::CGlobalNLocal => (term, 0.0),
        };
        self.t_sp[SP_N][SP_N] = nn;
        self.t_sp[SP_C][SP_C] = cc;
        self.t_sp[SP_N][SP_B] = 1.0 - nn;
        self.t_sp[SP_E][SP_C] = 1.0;
        for (row, cost_row) in self.t_sp.iter().zip(self.t_sp_cost.iter_mut()) {
            for (p, c) in row.iter().zip(cost_row.iter_mut()) {
                *c = cost_of(*p);
            }
        }
    }

    /// Set the emission frequencies of the flanking states; B and E stay
    /// silent.
    pub(crate) fn set_sp_emission_freq(&mut self, freq: [f64; SIZE]) {
        let total: f64 = freq.iter().sum();
        for b in 0..SIZE {
            let f = if total > 0.0 { freq[b] / total } else { 0.25 };
            self.e_sp[SP_N][b] = f;
            self.e_sp[SP_C][b] = f;
            self.e_sp[SP_B][b] = 0.0;
            self.e_sp[SP_E][b] = 0.0;
        }
        for (row, cost_row) in self.e_sp.iter().zip(self.e_sp_cost.iter_mut()) {
            for (p, c) in row.iter().zip(cost_row.iter_mut()) {
                *c = cost_of(*p);
            }
        }
    }

    /// Seed uniform profile-local entry/exit with the free (non-loop)
    /// background mass.
    pub(crate) fn enable_profile_local_mode(&mut self) {
        let free = 1.0 - self.bg.trans_pr();
        self.entry[0] = 0.0;
        self.exit[0] = 0.0;
        for k in 1..=self.k {
            self.entry[k] = free;
            self.exit[k] = free;
        }
        self.reset_entry_exit_costs();
    }

    /// Re-seed entry/exit from the profile's own Begin/End match mass
    /// (`T[0](M,M)` and `T[K](M,M)`), used after parsing a trained profile.
    pub(crate) fn adjust_profile_local_mode(&mut self) {
        self.entry[0] = 0.0;
        self.exit[0] = 0.0;
        for k in 1..=self.k {
            self.entry[k] = self.t[0][M][M];
            self.exit[k] = self.t[self.k][M][M];
        }
        self.reset_entry_exit_costs();
    }

    fn reset_entry_exit_costs(&mut self) {
        for k in 0..=self.k {
            self.entry_cost[k] = cost_of(self.entry[k]);
            self.exit_cost[k] = cost_of(self.exit[k]);
        }
    }

    /// Fold the pure-deletion chains into the entry/exit probabilities.
    ///
    /// Entry `B→M_j` gains the chain `B→D₁→…→D_{j−1}→M_j`; exit `M_i→E`
    /// gains `M_i→D_{i+1}→…→D_K→E`. Both are clamped to 1. Calling this a
    /// second time is a no-op.
    pub fn wing_retract(&mut self) {
        if self.wing_retracted {
            return;
        }
        let k = self.k;
        // Entry chains: accumulate the D→D run as j grows.
        let mut dd_sum = 0.0;
        for j in 2..=k {
            if j > 2 {
                dd_sum += self.t_cost[j - 2][D][D];
            }
            let chain = self.t_cost[0][M][D] + dd_sum + self.t_cost[j - 1][D][M];
            self.entry[j] = (self.entry[j] + (-chain).exp()).min(1.0);
        }
        // Exit chains, walking down from the profile end.
        let mut dd_sum = 0.0;
        for i in (1..k).rev() {
            let chain = self.t_cost[i][M][D] + dd_sum + self.t_cost[k][D][M];
            self.exit[i] = (self.exit[i] + (-chain).exp()).min(1.0);
            dd_sum += self.t_cost[i][D][D];
        }
        self.reset_entry_exit_costs();
        self.wing_retracted = true;
    }

    // -----------------------------------------------------------------------
    // Parameter estimation
    // -----------------------------------------------------------------------

    /// Multiply all raw counts (transitions and emissions) by `r`.
    pub(crate) fn scale(&mut self, r: f64) {
        for t in self.t.iter_mut() {
            for row in t.iter_mut() {
                for p in row.iter_mut() {
                    *p *= r;
                }
            }
        }
        for col in self.e_m.iter_mut().chain(self.e_i.iter_mut()) {
            for p in col.iter_mut() {
                *p *= r;
            }
        }
        self.reset_cost_by_prob();
    }

    /// Row-normalise the transitions and column-normalise the emissions,
    /// re-pinning the Begin/End boundary cells. Rows and columns with no
    /// observed mass are left untouched.
    pub fn normalize(&mut self) {
        for k in 0..=self.k {
            for row in self.t[k].iter_mut() {
                let total: f64 = row.iter().sum();
                if total > 0.0 {
                    for p in row.iter_mut() {
                        *p /= total;
                    }
                }
            }
            for col in [&mut self.e_m[k], &mut self.e_i[k]] {
                let total: f64 = col.iter().sum();
                if total > 0.0 {
                    for p in col.iter_mut() {
                        *p /= total;
                    }
                }
            }
        }
        self.pin_boundaries();
        self.reset_cost_by_prob();
    }

    /// Replace every transition row and emission column with its posterior
    /// mean under the Dirichlet-mixture prior, then re-pin the boundaries.
    pub fn estimate_params(&mut self, prior: &HmmPrior) {
        for k in 0..=self.k {
            let m_row = prior.match_transition.mean_post_p(&self.t[k][M]);
            self.t[k][M].copy_from_slice(&m_row);

            let i_row = prior.insert_transition.mean_post_p(&self.t[k][I][..2]);
            self.t[k][I][M] = i_row[0];
            self.t[k][I][I] = i_row[1];

            let d_counts = [self.t[k][D][M], self.t[k][D][D]];
            let d_row = prior.delete_transition.mean_post_p(&d_counts);
            self.t[k][D][M] = d_row[0];
            self.t[k][D][D] = d_row[1];

            let em = prior.match_emission.mean_post_p(&self.e_m[k]);
            self.e_m[k].copy_from_slice(&em);
            let ei = prior.insert_emission.mean_post_p(&self.e_i[k]);
            self.e_i[k].copy_from_slice(&ei);
        }
        self.pin_boundaries();
        self.reset_cost_by_prob();
    }

    /// Average over positions of the relative entropy (nats) of the match
    /// emissions against the background.
    pub fn mean_relative_entropy(&self) -> f64 {
        let bg = self.bg.freq();
        let mut ent = 0.0;
        for k in 1..=self.k {
            for b in 0..SIZE {
                let p = self.e_m[k][b];
                if p > 0.0 && bg[b] > 0.0 {
                    ent += p * (p / bg[b]).ln();
                }
            }
        }
        ent / self.k as f64
    }

    /// Enforce the Begin/End boundary conventions:
    /// `T[0](D,M)=1`, `T[0](D,D)=0`, `T[K](M,D)=0`, `T[K](D,M)=1`,
    /// `T[K](D,D)=0`.
    pub(crate) fn pin_boundaries(&mut self) {
        let k = self.k;
        self.t[0][D][M] = 1.0;
        self.t[0][D][D] = 0.0;
        self.t[k][M][D] = 0.0;
        self.t[k][D][M] = 1.0;
        self.t[k][D][D] = 0.0;
    }

    // -----------------------------------------------------------------------
    // Probability ↔ cost synchronisation
    // -----------------------------------------------------------------------

    /// Rebuild every cost array from the probability view.
    pub(crate) fn reset_cost_by_prob(&mut self) {
        for (t, tc) in self.t.iter().zip(self.t_cost.iter_mut()) {
            for (row, cost_row) in t.iter().zip(tc.iter_mut()) {
                for (p, c) in row.iter().zip(cost_row.iter_mut()) {
                    *c = cost_of(*p);
                }
            }
        }
        for (e, ec) in self
            .e_m
            .iter()
            .zip(self.e_m_cost.iter_mut())
            .chain(self.e_i.iter().zip(self.e_i_cost.iter_mut()))
        {
            for (p, c) in e.iter().zip(ec.iter_mut()) {
                *c = cost_of(*p);
            }
        }
        for (row, cost_row) in self.t_sp.iter().zip(self.t_sp_cost.iter_mut()) {
            for (p, c) in row.iter().zip(cost_row.iter_mut()) {
                *c = cost_of(*p);
            }
        }
        for (row, cost_row) in self.e_sp.iter().zip(self.e_sp_cost.iter_mut()) {
            for (p, c) in row.iter().zip(cost_row.iter_mut()) {
                *c = cost_of(*p);
            }
        }
        self.reset_entry_exit_costs();
    }

    /// Rebuild every probability array from the cost view (the parser
    /// fills costs first).
    pub(crate) fn reset_prob_by_cost(&mut self) {
        for (t, tc) in self.t.iter_mut().zip(self.t_cost.iter()) {
            for (row, cost_row) in t.iter_mut().zip(tc.iter()) {
                for (p, c) in row.iter_mut().zip(cost_row.iter()) {
                    *p = prob_of(*c);
                }
            }
        }
        for (e, ec) in self
            .e_m
            .iter_mut()
            .zip(self.e_m_cost.iter())
            .chain(self.e_i.iter_mut().zip(self.e_i_cost.iter()))
        {
            for (p, c) in e.iter_mut().zip(ec.iter()) {
                *p = prob_of(*c);
            }
        }
        for (row, cost_row) in self.t_sp.iter_mut().zip(self.t_sp_cost.iter()) {
            for (p, c) in row.iter_mut().zip(cost_row.iter()) {
                *p = prob_of(*c);
            }
        }
        for (row, cost_row) in self.e_sp.iter_mut().zip(self.e_sp_cost.iter()) {
            for (p, c) in row.iter_mut().zip(cost_row.iter()) {
                *p = prob_of(*c);
            }
        }
        for k in 0..=self.k {
            self.entry[k] = prob_of(self.entry_cost[k]);
            self.exit[k] = prob_of(self.exit_cost[k]);
        }
    }
}
