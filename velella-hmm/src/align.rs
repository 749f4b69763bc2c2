//! Consensus-column-anchored alignment reconstruction.
//!
//! A successful traceback is rendered as a string of exactly `L`
//! characters, one per consensus (CS) column, so alignments of different
//! queries against the same profile stack directly into a column-wise
//! MSA. Matched bases are uppercase, deletions are [`GAP_SYM`], unaligned
//! flanks are padded with [`PAD_SYM`], and insertions survive only when a
//! multi-column gap between consecutive match positions leaves room for a
//! justified filler; otherwise they are dropped from the string (their
//! cost is still part of the alignment score).

use std::fmt;

use velella_core::{Result, VelellaError};

use crate::model::BandedHmm;
use crate::trace::ViterbiTrace;
use crate::viterbi::ViterbiScores;

/// Padding byte for unaligned flanking columns.
pub const PAD_SYM: u8 = b'.';
/// Gap byte for deleted consensus columns.
pub const GAP_SYM: u8 = b'-';

/// Layout of an insert string within a fixed-width padded field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Padding {
    /// Insert at the left edge, padding on the right.
    Left,
    /// Insert at the right edge, padding on the left.
    Right,
    /// Insert centred, padding split around it.
    Middle,
    /// Insert split in half and anchored at both edges, padding between.
    Justified,
}

fn pad_only(len: usize, pad: u8) -> String {
    std::iter::repeat(pad as char).take(len).collect()
}

/// Lay out `insert` within a field of exactly `len` characters, filling
/// with `pad`.
///
/// Oversized inserts are truncated according to the mode: LEFT keeps the
/// left `len` characters, RIGHT the right `len`, MIDDLE the centre, and
/// JUSTIFIED the two ends.
pub fn padding_seq(len: usize, insert: &str, pad: u8, mode: Padding) -> String {
    if insert.is_empty() {
        return pad_only(len, pad);
    }
    let n = insert.len();
    let mut out = String::with_capacity(len);
    match mode {
        Padding::Left => {
            if n >= len {
                out.push_str(&insert[..len]);
            } else {
                out.push_str(insert);
                out.push_str(&pad_only(len - n, pad));
            }
        }
        Padding::Right => {
            if n >= len {
                out.push_str(&insert[n - len..]);
            } else {
                out.push_str(&pad_only(len - n, pad));
                out.push_str(insert);
            }
        }
        Padding::Middle => {
            if n >= len {
                let off = (n - len) / 2;
                out.push_str(&insert[off..off + len]);
            } else {
                let left = (len - n) / 2;
                out.push_str(&pad_only(left, pad));
                out.push_str(insert);
                out.push_str(&pad_only(len - n - left, pad));
            }
        }
        Padding::Justified => {
            if n >= len {
                let head = len / 2;
                out.push_str(&insert[..head]);
                out.push_str(&insert[n - (len - head)..]);
            } else {
                let head = n / 2;
                out.push_str(&insert[..head]);
                out.push_str(&pad_only(len - n, pad));
                out.push_str(&insert[head..]);
            }
        }
    }
    debug_assert_eq!(out.len(), len);
    out
}

/// One query aligned to the consensus columns of a profile.
#[derive(Debug, Clone, PartialEq)]
pub struct HmmAlignment {
    /// Profile length the alignment was made against.
    pub k: usize,
    /// Consensus width; `align` has exactly this many characters.
    pub l: usize,
    /// First aligned query position (1-based).
    pub seq_start: usize,
    /// Last aligned query position.
    pub seq_end: usize,
    /// First matched profile position.
    pub hmm_start: usize,
    /// Last matched profile position.
    pub hmm_end: usize,
    /// CS column of `hmm_start`.
    pub cs_start: usize,
    /// CS column of `hmm_end`.
    pub cs_end: usize,
    /// Alignment cost (negative log probability).
    pub cost: f64,
    /// The CS-aligned string.
    pub align: String,
}

impl HmmAlignment {
    /// Header row for the TSV exchange format.
    pub const TSV_HEADER: &'static str =
        "seq_start\tseq_end\thmm_start\thmm_end\tCS_start\tCS_end\tcost\talignment";

    /// Whether two alignments were made against the same profile
    /// geometry and may be merged.
    pub fn is_compatible(&self, other: &HmmAlignment) -> bool {
        self.k == other.k && self.l == other.l
    }

    /// Merge a compatible alignment into this one: coordinate spans are
    /// unioned, costs added, and the aligned strings overlaid with
    /// [`PAD_SYM`] yielding to any other character. Incompatible inputs
    /// are ignored.
    pub fn merge(&mut self, other: &HmmAlignment) {
        if !self.is_compatible(other) {
            return;
        }
        self.seq_start = self.seq_start.min(other.seq_start);
        self.seq_end = self.seq_end.max(other.seq_end);
        self.hmm_start = self.hmm_start.min(other.hmm_start);
        self.hmm_end = self.hmm_end.max(other.hmm_end);
        self.cs_start = self.cs_start.min(other.cs_start);
        self.cs_end = self.cs_end.max(other.cs_end);
        self.cost += other.cost;
        self.align = self
            .align
            .bytes()
            .zip(other.align.bytes())
            .map(|(a, b)| {
                if a == PAD_SYM && b != PAD_SYM {
                    b as char
                } else {
                    a as char
                }
            })
            .collect();
    }

    /// Parse an alignment from one TSV row (the format written by
    /// `Display`).
    ///
    /// The profile geometry is not part of the row; `k` and `l` are
    /// restored from the alignment width and caller context.
    pub fn from_tsv(line: &str, k: usize) -> Result<Self> {
        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        if fields.len() != 8 {
            return Err(VelellaError::Parse(format!(
                "expected 8 alignment fields, got {}",
                fields.len()
            )));
        }
        let num = |idx: usize| -> Result<usize> {
            fields[idx]
                .parse()
                .map_err(|_| VelellaError::Parse(format!("invalid field '{}'", fields[idx])))
        };
        let cost: f64 = fields[6]
            .parse()
            .map_err(|_| VelellaError::Parse(format!("invalid cost '{}'", fields[6])))?;
        let align = fields[7].to_string();
        Ok(Self {
            k,
            l: align.len(),
            seq_start: num(0)?,
            seq_end: num(1)?,
            hmm_start: num(2)?,
            hmm_end: num(3)?,
            cs_start: num(4)?,
            cs_end: num(5)?,
            cost,
            align,
        })
    }
}

impl fmt::Display for HmmAlignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.seq_start,
            self.seq_end,
            self.hmm_start,
            self.hmm_end,
            self.cs_start,
            self.cs_end,
            self.cost,
            self.align
        )
    }
}

/// Render a trace as an `L`-wide CS-aligned string with flank padding.
///
/// The N-terminal padding is right-aligned (the unaligned query prefix
/// hugs the alignment), the C-terminal padding left-aligned. Pending
/// inserts fill multi-column gaps between match positions as justified
/// fillers and are otherwise dropped.
///
/// # Panics
///
/// Panics if the query length doesn't match the DP buffers or the trace
/// is invalid (programmer errors).
pub fn build_global_align(
    hmm: &BandedHmm,
    seq: &[u8],
    vs: &ViterbiScores,
    vt: &ViterbiTrace,
) -> HmmAlignment {
    assert_eq!(seq.len(), vs.seq_len(), "query length must match the DP buffers");
    assert!(vt.is_valid(), "cannot reconstruct an invalid trace");

    let l = hmm.max_len();
    let seq_n = String::from_utf8_lossy(&seq[..vt.aln_from - 1]).into_owned();
    let seq_c = String::from_utf8_lossy(&seq[vt.aln_to..]).into_owned();
    let cs_start = hmm.profile_to_cs(vt.aln_start);
    let cs_end = hmm.profile_to_cs(vt.aln_end);

    let mut align = String::with_capacity(l);
    let mut j = 0usize; // 1-based query position
    let mut k = 0usize; // 1-based profile position
    let mut insert = String::new();

    let tr = vt.aln_trace.as_bytes();
    let mut idx = 0;
    while idx < tr.len() {
        match tr[idx] {
            b'B' => {
                align.push_str(&padding_seq(cs_start - 1, &seq_n, PAD_SYM, Padding::Right));
                j = vt.aln_from;
                k = vt.aln_start;
            }
            b'M' => {
                // A multi-column gap before this match takes the pending
                // inserts as a justified filler.
                if k > 1 && idx > 1 && hmm.profile_to_cs(k) > hmm.profile_to_cs(k - 1) + 1 {
                    let width = hmm.profile_to_cs(k) - hmm.profile_to_cs(k - 1) - 1;
                    align.push_str(&padding_seq(width, &insert, GAP_SYM, Padding::Justified));
                }
                insert.clear();
                align.push((seq[j - 1] as char).to_ascii_uppercase());
                j += 1;
                k += 1;
            }
            b'I' => {
                insert.clear();
                while idx < tr.len() && tr[idx] == b'I' {
                    insert.push((seq[j - 1] as char).to_ascii_lowercase());
                    j += 1;
                    idx += 1;
                }
                idx -= 1;
            }
            b'D' => {
                // No insert can precede a delete, so a gap filler here is
                // pure gap symbols.
                if k > 1 && hmm.profile_to_cs(k) > hmm.profile_to_cs(k - 1) + 1 {
                    let width = hmm.profile_to_cs(k) - hmm.profile_to_cs(k - 1) - 1;
                    align.push_str(&pad_only(width, GAP_SYM));
                }
                align.push(GAP_SYM as char);
                k += 1;
            }
            b'E' => {
                debug_assert_eq!(j, vt.aln_to + 1);
                align.push_str(&padding_seq(l - cs_end, &seq_c, PAD_SYM, Padding::Left));
            }
            _ => {}
        }
        idx += 1;
    }
    debug_assert_eq!(align.len(), l);

    HmmAlignment {
        k: hmm.len(),
        l,
        seq_start: vt.aln_from,
        seq_end: vt.aln_to,
        hmm_start: vt.aln_start,
        hmm_end: vt.aln_end,
        cs_start,
        cs_end,
        cost: vt.min_score,
        align,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::SIZE;
    use crate::model::{AlignMode, D, I, M};

    // ------------------------------------------------------------------
    // Padding layouts
    // ------------------------------------------------------------------

    #[test]
    fn empty_insert_is_pure_padding() {
        assert_eq!(padding_seq(4, "", PAD_SYM, Padding::Left), "....");
        assert_eq!(padding_seq(0, "", PAD_SYM, Padding::Right), "");
    }

    #[test]
    fn left_and_right_layouts() {
        assert_eq!(padding_seq(5, "ab", GAP_SYM, Padding::Left), "ab---");
        assert_eq!(padding_seq(5, "ab", GAP_SYM, Padding::Right), "---ab");
        // Oversized: LEFT keeps the left, RIGHT the right.
        assert_eq!(padding_seq(2, "abcd", GAP_SYM, Padding::Left), "ab");
        assert_eq!(padding_seq(2, "abcd", GAP_SYM, Padding::Right), "cd");
    }

    #[test]
    fn middle_layout() {
        assert_eq!(padding_seq(6, "ab", GAP_SYM, Padding::Middle), "--ab--");
        assert_eq!(padding_seq(5, "ab", GAP_SYM, Padding::Middle), "-ab--");
        assert_eq!(padding_seq(2, "abcd", GAP_SYM, Padding::Middle), "bc");
    }

    #[test]
    fn justified_layout() {
        assert_eq!(padding_seq(6, "abcd", GAP_SYM, Padding::Justified), "ab--cd");
        assert_eq!(padding_seq(4, "abc", GAP_SYM, Padding::Justified), "a-bc");
        // Oversized: keep both ends.
        assert_eq!(padding_seq(4, "abcdef", GAP_SYM, Padding::Justified), "abef");
    }

    #[test]
    fn padding_always_has_requested_length() {
        for mode in [Padding::Left, Padding::Right, Padding::Middle, Padding::Justified] {
            for len in 0..8 {
                for insert in ["", "x", "xy", "xyz", "wxyz", "vwxyz"] {
                    assert_eq!(
                        padding_seq(len, insert, PAD_SYM, mode).len(),
                        len,
                        "mode {:?} len {} insert {:?}",
                        mode,
                        len,
                        insert
                    );
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Reconstruction
    // ------------------------------------------------------------------

    /// Model whose match positions map onto the given CS columns.
    fn mapped_hmm(maps: &[usize], max_len: usize) -> BandedHmm {
        let k = maps.len();
        let mut hmm = BandedHmm::new("mapped", k).unwrap();
        for pos in 0..=k {
            hmm.t[pos][M] = [0.85, 0.08, 0.07];
            hmm.t[pos][I] = [0.6, 0.4, 0.0];
            hmm.t[pos][D] = [0.55, 0.0, 0.45];
            for b in 0..SIZE {
                hmm.e_m[pos][b] = 0.25;
                hmm.e_i[pos][b] = 0.25;
            }
        }
        hmm.pin_boundaries();
        hmm.reset_cost_by_prob();
        for (pos, &cs) in maps.iter().enumerate() {
            hmm.set_map(pos + 1, cs);
        }
        hmm.max_len = max_len;
        hmm.extend_index();
        hmm.set_sequence_mode(AlignMode::Local);
        hmm.wing_retract();
        hmm
    }

    fn trace(
        s: &str,
        (start, end): (usize, usize),
        (from, to): (usize, usize),
    ) -> ViterbiTrace {
        ViterbiTrace {
            min_score: 1.0,
            aln_trace: s.to_string(),
            aln_start: start,
            aln_end: end,
            aln_from: from,
            aln_to: to,
        }
    }

    #[test]
    fn plain_match_renders_uppercase() {
        let hmm = mapped_hmm(&[1, 2, 3], 3);
        let vs = ViterbiScores::new(3, 3);
        let vt = trace("BMMME", (1, 3), (1, 3));
        let aln = build_global_align(&hmm, b"acg", &vs, &vt);
        assert_eq!(aln.align, "ACG");
        assert_eq!(aln.cs_start, 1);
        assert_eq!(aln.cs_end, 3);
    }

    #[test]
    fn deletion_renders_a_gap() {
        let hmm = mapped_hmm(&[1, 2, 3], 3);
        let vs = ViterbiScores::new(2, 3);
        let vt = trace("BMDME", (1, 3), (1, 2));
        let aln = build_global_align(&hmm, b"AG", &vs, &vt);
        assert_eq!(aln.align, "A-G");
    }

    #[test]
    fn insert_fills_a_multi_column_gap() {
        // Match positions own CS columns 1, 3, 5; the gaps leave filler
        // slots for inserts.
        let hmm = mapped_hmm(&[1, 3, 5], 5);
        let vs = ViterbiScores::new(4, 3);
        let vt = trace("BMIMME", (1, 3), (1, 4));
        let aln = build_global_align(&hmm, b"ACGT", &vs, &vt);
        assert_eq!(aln.align, "AcG-T");
        assert_eq!(aln.l, 5);
    }

    #[test]
    fn insert_without_a_slot_is_dropped() {
        let hmm = mapped_hmm(&[1, 2, 3], 3);
        let vs = ViterbiScores::new(4, 3);
        let vt = trace("BMIMME", (1, 3), (1, 4));
        let aln = build_global_align(&hmm, b"ACGT", &vs, &vt);
        // The c insert has no filler column; output stays 3 wide.
        assert_eq!(aln.align, "AGT");
    }

    #[test]
    fn flank_padding_is_right_then_left_aligned() {
        let hmm = mapped_hmm(&[1, 2, 3, 4, 5, 6], 6);
        let vs = ViterbiScores::new(8, 6);
        // Query positions 3..=6 align to M2..=M5.
        let vt = trace("BMMMME", (2, 5), (3, 6));
        let aln = build_global_align(&hmm, b"TTACGTAA", &vs, &vt);
        // N-pad keeps the rightmost prefix char, C-pad the leftmost
        // suffix char.
        assert_eq!(aln.align, "TACGTA");
        assert_eq!(aln.cs_start, 2);
        assert_eq!(aln.cs_end, 5);
    }

    #[test]
    fn short_flanks_pad_with_pad_sym() {
        let hmm = mapped_hmm(&[1, 2, 3, 4, 5, 6], 6);
        let vs = ViterbiScores::new(4, 6);
        // Query aligns wholly inside the profile: columns 1 and 6 unpadded.
        let vt = trace("BMMMME", (2, 5), (1, 4));
        let aln = build_global_align(&hmm, b"ACGT", &vs, &vt);
        assert_eq!(aln.align, ".ACGT.");
    }

    // ------------------------------------------------------------------
    // Merge and TSV exchange
    // ------------------------------------------------------------------

    fn aln(cs: (usize, usize), s: &str) -> HmmAlignment {
        HmmAlignment {
            k: 4,
            l: s.len(),
            seq_start: cs.0,
            seq_end: cs.1,
            hmm_start: cs.0,
            hmm_end: cs.1,
            cs_start: cs.0,
            cs_end: cs.1,
            cost: 1.5,
            align: s.to_string(),
        }
    }

    #[test]
    fn merge_overlays_pads_and_unions_spans() {
        let mut a = aln((1, 2), "AC..");
        let b = aln((3, 4), "..GT");
        a.merge(&b);
        assert_eq!(a.align, "ACGT");
        assert_eq!(a.cs_start, 1);
        assert_eq!(a.cs_end, 4);
        assert!((a.cost - 3.0).abs() < 1e-12);
    }

    #[test]
    fn merge_keeps_own_characters_on_overlap() {
        let mut a = aln((1, 3), "ACG.");
        let b = aln((2, 4), ".TTT");
        a.merge(&b);
        assert_eq!(a.align, "ACGT");
    }

    #[test]
    fn merge_ignores_incompatible() {
        let mut a = aln((1, 2), "AC..");
        let mut b = aln((1, 2), "AC...");
        b.k = 9;
        let before = a.clone();
        a.merge(&b);
        assert_eq!(a, before);
    }

    #[test]
    fn tsv_round_trip() {
        let a = aln((2, 3), ".CG.");
        let row = a.to_string();
        let parsed = HmmAlignment::from_tsv(&row, 4).unwrap();
        assert_eq!(parsed, a);
        assert!(HmmAlignment::TSV_HEADER.starts_with("seq_start"));
    }

    #[test]
    fn tsv_rejects_short_rows() {
        assert!(HmmAlignment::from_tsv("1\t2\t3", 4).is_err());
    }
}
