//! Profile training from a weighted multiple sequence alignment.
//!
//! Columns whose weighted symbol fraction reaches `symfrac` become match
//! positions; every sequence is then walked column-by-column, classifying
//! each residue as match, delete, insert, or pad, and the weighted
//! emission and transition counts are collected. The effective sequence
//! count is tuned by bisection so the mean relative entropy of the match
//! emissions hits [`DEFAULT_ERE`], after which the Dirichlet prior turns
//! counts into probabilities.

use std::time::{SystemTime, UNIX_EPOCH};

use velella_core::{Result, VelellaError};

use crate::model::{AlignMode, BandedHmm, D, I, M, MAX_PROFILE};
use crate::msa::Msa;
use crate::prior::HmmPrior;

/// Target mean relative entropy (nats) of match emissions vs background.
pub const DEFAULT_ERE: f64 = 1.0;

/// Weighted-identity threshold below which the consensus base is written
/// lowercase in the CONS annotation.
pub const CONS_THRESHOLD: f64 = 0.9;

/// How one sequence relates to one CS column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColState {
    /// Residue on a match column.
    Match,
    /// Residue on an insert column.
    Ins,
    /// Gap on a match column inside the sequence's span.
    Del,
    /// Anything that trains nothing: gaps on insert columns, and any
    /// column outside the sequence's residue span.
    Pad,
}

fn state_index(s: ColState) -> usize {
    match s {
        ColState::Match => M,
        ColState::Ins => I,
        ColState::Del => D,
        ColState::Pad => unreachable!("pad states never index the tensor"),
    }
}

/// Classify one residue slot given its column kind and the sequence span.
fn matching_state(match_col: bool, in_range: bool, is_symbol: bool) -> ColState {
    if !in_range {
        return ColState::Pad;
    }
    match (match_col, is_symbol) {
        (true, true) => ColState::Match,
        (true, false) => ColState::Del,
        (false, true) => ColState::Ins,
        (false, false) => ColState::Pad,
    }
}

/// Mean relative entropy of the model scaled to effective count `x`,
/// prior-estimated, minus the target. Works on a clone so the raw counts
/// of `hmm` survive every probe.
fn relative_entropy_excess(hmm: &BandedHmm, prior: &HmmPrior, x: f64, n_seq: usize) -> f64 {
    let mut probe = hmm.clone();
    probe.eff_n = x;
    probe.scale(x / n_seq as f64);
    probe.estimate_params(prior);
    probe.mean_relative_entropy() - DEFAULT_ERE
}

/// Bisection root of `f` on `[lo, hi]`; NaN when the endpoints don't
/// bracket a sign change.
fn bisect_root<F: Fn(f64) -> f64>(f: F, mut lo: f64, mut hi: f64) -> f64 {
    const TOL: f64 = 1e-4;
    const MAX_ITER: usize = 100;
    let mut f_lo = f(lo);
    let f_hi = f(hi);
    if f_lo == 0.0 {
        return lo;
    }
    if f_hi == 0.0 {
        return hi;
    }
    if !(f_lo * f_hi < 0.0) {
        return f64::NAN;
    }
    for _ in 0..MAX_ITER {
        let mid = 0.5 * (lo + hi);
        let f_mid = f(mid);
        if f_mid == 0.0 || hi - lo < TOL {
            return mid;
        }
        if f_lo * f_mid < 0.0 {
            hi = mid;
        } else {
            lo = mid;
            f_lo = f_mid;
        }
    }
    0.5 * (lo + hi)
}

/// ISO date (UTC) for the DATE tag, via the days-to-civil conversion.
fn iso_date() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let z = (secs / 86_400) as i64 + 719_468;
    let era = z / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = yoe + era * 400 + if m <= 2 { 1 } else { 0 };
    format!("{:04}-{:02}-{:02}", y, m, d)
}

/// Train a profile HMM from a weighted MSA.
///
/// `symfrac` is the weighted symbol fraction a column needs to become a
/// match position; `name` overrides the MSA name when non-empty. The
/// returned model carries MAP/CONS annotations, is LOCAL-mode and
/// wing-retracted, and is ready both for alignment and for
/// [`write_hmmer`](crate::hmmer::write_hmmer).
///
/// # Errors
///
/// Returns an error if `symfrac` is outside `(0, 1)` or no column
/// reaches it.
pub fn build(msa: &Msa, symfrac: f64, prior: &HmmPrior, name: &str) -> Result<BandedHmm> {
    if !(symfrac > 0.0 && symfrac < 1.0) {
        return Err(VelellaError::InvalidInput(format!(
            "symfrac {} must be between 0 and 1",
            symfrac
        )));
    }
    let l = msa.cs_len();
    let n_seq = msa.num_seq();

    // Column classification and the running profile position per column.
    let mut match_col = vec![false; l + 1];
    let mut col_k = vec![0usize; l + 1];
    let mut k = 0usize;
    for j in 1..=l {
        if msa.sym_w_frac(j - 1) >= symfrac {
            k += 1;
            match_col[j] = true;
        }
        col_k[j] = k;
    }
    if k == 0 {
        return Err(VelellaError::InvalidInput(format!(
            "no column reaches symfrac {}",
            symfrac
        )));
    }
    if k > MAX_PROFILE {
        return Err(VelellaError::InvalidInput(format!(
            "profile length {} exceeds the {} limit",
            k, MAX_PROFILE
        )));
    }

    let name = if name.is_empty() { msa.name() } else { name };
    let mut hmm = BandedHmm::new(name, k)?;
    hmm.max_len = l;
    let mut kk = 0;
    for j in 1..=l {
        if match_col[j] {
            kk += 1;
            hmm.set_map(kk, j);
        }
    }

    // Collect weighted counts: walk each sequence's non-pad states in
    // column order.
    for i in 0..n_seq {
        let w = msa.seq_weight(i);
        let (s_start, s_end) = (msa.seq_start(i), msa.seq_end(i));
        let mut states: Vec<(usize, ColState)> = Vec::new();
        for j in 1..=l {
            let in_range = j - 1 >= s_start && j - 1 <= s_end;
            let is_symbol = msa.encode_at(i, j - 1).is_some();
            let sm = matching_state(match_col[j], in_range, is_symbol);
            if sm != ColState::Pad {
                states.push((j, sm));
            }
        }

        for &(j, sm) in &states {
            match sm {
                ColState::Match => {
                    if let Some(b) = msa.encode_at(i, j - 1) {
                        hmm.e_m[0][b] += w; // compositional column
                        hmm.e_m[col_k[j]][b] += w;
                    }
                }
                ColState::Ins => {
                    if let Some(b) = msa.encode_at(i, j - 1) {
                        hmm.e_i[col_k[j]][b] += w;
                    }
                }
                _ => {}
            }
        }

        for pair in states.windows(2) {
            let (j, sm) = pair[0];
            let (_, sm_next) = pair[1];
            // I→D and D→I are forbidden in Plan7.
            if matches!(
                (sm, sm_next),
                (ColState::Ins, ColState::Del) | (ColState::Del, ColState::Ins)
            ) {
                continue;
            }
            hmm.t[col_k[j]][state_index(sm)][state_index(sm_next)] += w;
        }

        // Begin/End credits at the sequence's own span.
        if let Some(&(_, first)) = states.first() {
            hmm.t[0][M][state_index(first)] += w;
        }
        if let Some(&(_, last)) = states.last() {
            hmm.t[k][state_index(last)][M] += w;
        }
    }

    hmm.n_seq = n_seq;
    hmm.eff_n = n_seq as f64;
    hmm.reset_cost_by_prob();

    // Tune the effective sequence count to the entropy target, falling
    // back to the raw count when the target isn't bracketed.
    let eff = bisect_root(
        |x| relative_entropy_excess(&hmm, prior, x, n_seq),
        0.0,
        n_seq as f64,
    );
    let eff_n = if eff.is_nan() { n_seq as f64 } else { eff };
    hmm.eff_n = eff_n;
    hmm.scale(eff_n / n_seq as f64);
    hmm.estimate_params(prior);

    // Background from the estimated compositional column.
    let compo = hmm.e_m[0];
    hmm.bg.set_freq(compo);
    hmm.set_sp_emission_freq(compo);

    hmm.set_tag("MAXL", &l.to_string());
    hmm.set_tag("RF", "no");
    hmm.set_tag("MM", "no");
    hmm.set_tag("CONS", "yes");
    hmm.set_tag("CS", "no");
    hmm.set_tag("MAP", "yes");
    hmm.set_tag("NSEQ", &n_seq.to_string());
    hmm.set_tag("EFFN", &format!("{:.4}", eff_n));
    for pos in 1..=k {
        let map = hmm.profile_to_cs(pos);
        hmm.set_loc_tag("MAP", pos, &map.to_string());
        let mut c = msa.cs_base_at(map - 1);
        if msa.w_identity_at(map - 1) < CONS_THRESHOLD {
            c = c.to_ascii_lowercase();
        }
        hmm.set_loc_tag("CONS", pos, &(c as char).to_string());
    }
    hmm.set_tag("DATE", &iso_date());

    hmm.extend_index();
    hmm.set_sequence_mode(AlignMode::Local);
    hmm.wing_retract();
    Ok(hmm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet;

    fn uniform_rows(row: &[u8], n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|_| row.to_vec()).collect()
    }

    #[test]
    fn identical_sequences_train_sharp_emissions() {
        let msa = Msa::new("ten", uniform_rows(b"ACGTACGT", 10)).unwrap();
        let hmm = build(&msa, 0.5, &HmmPrior::dna_default(), "").unwrap();
        assert_eq!(hmm.len(), 8);
        assert_eq!(hmm.name(), "ten");
        for pos in 1..=8 {
            let want = alphabet::encode(b"ACGTACGT"[pos - 1]).unwrap();
            let best = (0..4)
                .max_by(|&a, &b| {
                    hmm.match_emission(pos, a)
                        .partial_cmp(&hmm.match_emission(pos, b))
                        .unwrap()
                })
                .unwrap();
            assert_eq!(best, want, "position {}", pos);
            assert!(hmm.match_emission(pos, want) > 0.5);
        }
        assert!(hmm.is_wing_retracted());
    }

    #[test]
    fn gappy_columns_become_inserts() {
        let rows = vec![
            b"AC-GT".to_vec(),
            b"AC-GT".to_vec(),
            b"ACAGT".to_vec(),
            b"AC-GT".to_vec(),
        ];
        let msa = Msa::new("gappy", rows).unwrap();
        let hmm = build(&msa, 0.5, &HmmPrior::dna_default(), "").unwrap();
        // Column 3 (25% occupancy) is an insert column.
        assert_eq!(hmm.len(), 4);
        assert_eq!(hmm.profile_to_cs(2), 2);
        assert_eq!(hmm.profile_to_cs(3), 4);
        assert_eq!(hmm.cs_to_profile(3), 0);
    }

    #[test]
    fn maps_and_annotations_are_written() {
        let msa = Msa::new("tagged", uniform_rows(b"ACGT", 6)).unwrap();
        let hmm = build(&msa, 0.5, &HmmPrior::dna_default(), "tagged").unwrap();
        assert_eq!(hmm.tag("MAP"), Some("yes"));
        assert_eq!(hmm.tag("CONS"), Some("yes"));
        assert_eq!(hmm.tag("RF"), Some("no"));
        assert_eq!(hmm.tag("NSEQ"), Some("6"));
        assert!(hmm.tag("EFFN").is_some());
        assert!(hmm.tag("DATE").map(|d| d.len() == 10).unwrap_or(false));
        for pos in 1..=4 {
            assert_eq!(hmm.loc_tag("MAP", pos).unwrap(), pos.to_string());
            // Perfectly conserved columns annotate uppercase.
            let cons = hmm.loc_tag("CONS", pos).unwrap();
            assert!(cons.chars().all(|c| c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn low_identity_consensus_is_lowercased() {
        let rows = vec![
            b"AAAA".to_vec(),
            b"AAAA".to_vec(),
            b"ACAA".to_vec(),
            b"AGAA".to_vec(),
        ];
        let msa = Msa::new("mixed", rows).unwrap();
        let hmm = build(&msa, 0.5, &HmmPrior::dna_default(), "").unwrap();
        // Column 2 identity is 0.5: lowercase consensus.
        assert_eq!(hmm.loc_tag("CONS", 2), Some("a"));
        assert_eq!(hmm.loc_tag("CONS", 1), Some("A"));
    }

    #[test]
    fn effective_count_is_tuned_down_for_redundant_alignments() {
        let msa = Msa::new("redundant", uniform_rows(b"ACGTACGTACGT", 50)).unwrap();
        let hmm = build(&msa, 0.5, &HmmPrior::dna_default(), "").unwrap();
        assert!(hmm.eff_n() > 0.0);
        assert!(
            hmm.eff_n() < 50.0,
            "50 identical sequences should tune down, got {}",
            hmm.eff_n()
        );
        assert_eq!(hmm.n_seq(), 50);
    }

    #[test]
    fn relative_entropy_grows_with_effective_count() {
        let msa = Msa::new("mono", uniform_rows(b"ACGTACGT", 20)).unwrap();
        let prior = HmmPrior::dna_default();
        let hmm = build(&msa, 0.5, &prior, "").unwrap();
        // The target function must be non-decreasing in x, which is what
        // makes the bisection root unique.
        let mut prev = f64::NEG_INFINITY;
        for step in 1..=8 {
            let x = 20.0 * step as f64 / 8.0;
            let val = relative_entropy_excess(&hmm, &prior, x, 20);
            assert!(
                val >= prev - 1e-9,
                "target function decreased at x={}: {} < {}",
                x,
                val,
                prev
            );
            prev = val;
        }
    }

    #[test]
    fn late_starting_sequences_credit_their_own_first_state() {
        let rows = vec![
            b"ACGT".to_vec(),
            b"ACGT".to_vec(),
            b"--GT".to_vec(), // starts at column 3
        ];
        let msa = Msa::new("late", rows).unwrap();
        // The late starter must not train a leading delete chain, so
        // T[0](M,D) keeps only the prior mass.
        let hmm = build(&msa, 0.5, &HmmPrior::dna_default(), "").unwrap();
        let md = hmm.transition(0, M, D);
        assert!(
            md < 0.2,
            "hanging gaps must not train Begin→Delete, got {}",
            md
        );
    }

    #[test]
    fn symfrac_is_validated() {
        let msa = Msa::new("v", uniform_rows(b"ACGT", 3)).unwrap();
        let prior = HmmPrior::dna_default();
        assert!(build(&msa, 0.0, &prior, "").is_err());
        assert!(build(&msa, 1.0, &prior, "").is_err());
        assert!(build(&msa, -0.5, &prior, "").is_err());
    }

    #[test]
    fn all_gappy_columns_fail() {
        // Every column below a high symfrac threshold.
        let rows = vec![b"A---".to_vec(), b"-C--".to_vec(), b"--G-".to_vec()];
        let msa = Msa::new("sparse", rows).unwrap();
        assert!(build(&msa, 0.9, &HmmPrior::dna_default(), "").is_err());
    }

    #[test]
    fn matching_state_classification() {
        use ColState::*;
        assert_eq!(matching_state(true, true, true), Match);
        assert_eq!(matching_state(true, true, false), Del);
        assert_eq!(matching_state(false, true, true), Ins);
        assert_eq!(matching_state(false, true, false), Pad);
        assert_eq!(matching_state(true, false, false), Pad);
    }

    #[test]
    fn iso_date_shape() {
        let d = iso_date();
        assert_eq!(d.len(), 10);
        let parts: Vec<&str> = d.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].parse::<i64>().unwrap() >= 2024);
    }
}
