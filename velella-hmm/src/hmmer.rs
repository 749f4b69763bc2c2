//! HMMER-3/f text format parser and writer.
//!
//! A profile file is a header of whitespace-separated key/value lines
//! (`HMMER3/f`, `NAME`, `LENG`, `ALPH DNA`, plus optional tags preserved
//! verbatim), the `HMM` tag pair, then one three-line block per profile
//! position: match emissions (the `COMPO` background for position 0),
//! insert emissions, and the seven transitions MM MI MD IM II DM DD. The
//! file ends with `//` on a line of its own; a missing terminator is a
//! parse failure.
//!
//! Values are negative-log costs; the `*` token is `+∞`. Parsing returns a
//! ready-to-align model: index-extended, probability-synced, profile-local
//! entry/exit re-seeded from the model's own Begin/End mass, LOCAL
//! sequence mode, and wing-retracted.

use velella_core::cost::{format_cost, parse_cost, prob_of};
use velella_core::{Result, VelellaError};

use crate::alphabet::{self, SIZE};
use crate::model::{AlignMode, BandedHmm, D, I, M};

/// The two header lines between the optional tags and the first position
/// block.
pub const HMM_TAG: &str =
    "HMM\t\tA\tC\tG\tT\n\t\tm->m\tm->i\tm->d\ti->m\ti->i\td->m\td->d";

/// Per-position tag columns, in file order after the emissions.
const LOC_TAGS: [&str; 5] = ["MAP", "CONS", "RF", "MM", "CS"];

fn parse_err(line_no: usize, msg: impl Into<String>) -> VelellaError {
    VelellaError::Parse(format!("line {}: {}", line_no, msg.into()))
}

/// Next non-blank line; advances the cursor past it and returns its
/// 1-based number.
fn next_content<'a>(lines: &[&'a str], cur: &mut usize) -> Option<(usize, &'a str)> {
    while *cur < lines.len() {
        let line = lines[*cur];
        *cur += 1;
        if !line.trim().is_empty() {
            return Some((*cur, line));
        }
    }
    None
}

/// Parse `n` cost tokens from an iterator, reporting the line on failure.
fn take_costs<'a>(
    toks: &mut impl Iterator<Item = &'a str>,
    n: usize,
    line_no: usize,
) -> Result<Vec<f64>> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let tok = toks
            .next()
            .ok_or_else(|| parse_err(line_no, "too few values"))?;
        out.push(parse_cost(tok).map_err(|e| parse_err(line_no, e.to_string()))?);
    }
    Ok(out)
}

/// Parse a HMMER-3/f profile from text.
///
/// # Errors
///
/// Returns a parse error on an obsolete version tag (below `f`), a
/// non-DNA alphabet, a missing `LENG`, malformed position blocks, a
/// missing `MAP yes` flag, or a missing `//` terminator. No partial model
/// is returned.
pub fn parse_hmmer(input: &str) -> Result<BandedHmm> {
    let lines: Vec<&str> = input.lines().collect();
    let mut cur = 0usize;

    // Header section.
    let mut version = String::new();
    let mut name = String::from("unnamed");
    let mut leng: Option<usize> = None;
    let mut maxl = 0usize;
    let mut n_seq = 0usize;
    let mut eff_n = 0.0f64;
    let mut tags: Vec<(String, String)> = Vec::new();
    let mut saw_version = false;
    let mut reached_body = false;

    while let Some((line_no, line)) = next_content(&lines, &mut cur) {
        let mut toks = line.split_whitespace();
        let tag = match toks.next() {
            Some(t) => t,
            None => continue,
        };
        let rest = line
            .trim_start()
            .strip_prefix(tag)
            .unwrap_or("")
            .trim()
            .to_string();

        if let Some(suffix) = tag.strip_prefix("HMMER3") {
            // Require format version f or newer ("HMMER3/f").
            if suffix.len() < 2 || suffix.as_bytes()[1] < b'f' {
                return Err(parse_err(
                    line_no,
                    format!("obsolete HMM version '{}', need HMMER3/f or higher", tag),
                ));
            }
            saw_version = true;
            version = rest;
        } else if tag == "NAME" {
            name = rest;
        } else if tag == "LENG" {
            let k: usize = rest
                .split_whitespace()
                .next()
                .and_then(|t| t.parse().ok())
                .ok_or_else(|| parse_err(line_no, "invalid LENG"))?;
            leng = Some(k);
        } else if tag == "ALPH" {
            if rest != alphabet::ALIAS {
                return Err(parse_err(
                    line_no,
                    format!("alphabet '{}' not allowed, must be DNA", rest),
                ));
            }
        } else if tag == "HMM" {
            // Skip the transition-order header line as well.
            next_content(&lines, &mut cur);
            reached_body = true;
            break;
        } else {
            if tag == "MAXL" {
                maxl = rest.parse().unwrap_or(0);
            } else if tag == "NSEQ" {
                n_seq = rest.parse().unwrap_or(0);
            } else if tag == "EFFN" {
                eff_n = rest.parse().unwrap_or(0.0);
            } else if tag == "STATS" {
                // Key the record by STATS + mode + distribution.
                let mode = toks.next().unwrap_or("");
                let distrib = toks.next().unwrap_or("");
                let key = format!("STATS {} {}", mode, distrib);
                let val = rest
                    .strip_prefix(mode)
                    .map(str::trim_start)
                    .and_then(|r| r.strip_prefix(distrib))
                    .map(str::trim)
                    .unwrap_or("")
                    .to_string();
                tags.push((key, val));
                continue;
            }
            tags.push((tag.to_string(), rest));
        }
    }

    if !saw_version {
        return Err(VelellaError::Parse("missing HMMER3/f version line".into()));
    }
    if !reached_body {
        return Err(VelellaError::Parse("missing HMM tag line".into()));
    }
    let k = leng.ok_or_else(|| VelellaError::Parse("missing LENG".into()))?;

    let mut hmm = BandedHmm::new(&name, k)?;
    hmm.version = version;
    hmm.tags = tags;
    hmm.max_len = maxl;
    hmm.n_seq = n_seq;
    hmm.eff_n = eff_n;

    // Body: one block per position, COMPO first.
    let mut last_map = 0usize;
    for pos in 0..=k {
        let (line_no, line) =
            next_content(&lines, &mut cur).ok_or_else(|| VelellaError::Parse(format!(
                "unexpected end of profile at position {}",
                pos
            )))?;
        let mut toks = line.split_whitespace();
        let first = toks.next().unwrap_or("");

        if pos == 0 {
            if first != "COMPO" {
                return Err(parse_err(line_no, "expected COMPO line"));
            }
            let compo = take_costs(&mut toks, SIZE, line_no)?;
            let mut freq = [0.0; SIZE];
            for (b, &c) in compo.iter().enumerate() {
                hmm.e_m_cost[0][b] = c;
                freq[b] = prob_of(c);
            }
            hmm.bg.set_freq(freq);
            hmm.set_sp_emission_freq(freq);
        } else {
            match first.parse::<usize>() {
                Ok(p) if p == pos => {}
                _ => {
                    return Err(parse_err(
                        line_no,
                        format!("expected match state {}, got '{}'", pos, first),
                    ))
                }
            }
            let emits = take_costs(&mut toks, SIZE, line_no)?;
            hmm.e_m_cost[pos].copy_from_slice(&emits);

            // The MAP annotation is what anchors profile positions to
            // consensus columns; refuse profiles without it.
            if hmm.tag("MAP") != Some("yes") {
                return Err(parse_err(line_no, "HMM file must have the MAP flag set to 'yes'"));
            }
            for tag in LOC_TAGS {
                if hmm.tag(tag).is_none() {
                    continue;
                }
                let val = toks
                    .next()
                    .ok_or_else(|| parse_err(line_no, format!("missing {} annotation", tag)))?;
                if tag == "MAP" {
                    let cs: usize = val
                        .parse()
                        .map_err(|_| parse_err(line_no, "invalid MAP column"))?;
                    // Column 0 is the index sentinel and mapped columns
                    // must advance with the profile.
                    if cs <= last_map {
                        return Err(parse_err(
                            line_no,
                            "MAP columns must be strictly increasing",
                        ));
                    }
                    last_map = cs;
                    hmm.set_map(pos, cs);
                }
                hmm.set_loc_tag(tag, pos, val);
            }
        }

        // Insert emission line.
        let (line_no, line) = next_content(&lines, &mut cur)
            .ok_or_else(|| VelellaError::Parse("unexpected end of profile".into()))?;
        let inserts = take_costs(&mut line.split_whitespace(), SIZE, line_no)?;
        hmm.e_i_cost[pos].copy_from_slice(&inserts);

        // Transition line: MM MI MD IM II DM DD.
        let (line_no, line) = next_content(&lines, &mut cur)
            .ok_or_else(|| VelellaError::Parse("unexpected end of profile".into()))?;
        let tr = take_costs(&mut line.split_whitespace(), 7, line_no)?;
        hmm.t_cost[pos][M][M] = tr[0];
        hmm.t_cost[pos][M][I] = tr[1];
        hmm.t_cost[pos][M][D] = tr[2];
        hmm.t_cost[pos][I][M] = tr[3];
        hmm.t_cost[pos][I][I] = tr[4];
        hmm.t_cost[pos][D][M] = tr[5];
        hmm.t_cost[pos][D][D] = tr[6];
    }

    match next_content(&lines, &mut cur) {
        Some((_, line)) if line.trim() == "//" => {}
        _ => {
            return Err(VelellaError::Parse(
                "profile not terminated by //".into(),
            ))
        }
    }

    // Make the model alignable: synced views, clamped index tail,
    // entry/exit from the model's own Begin/End mass, local mode, wings in.
    if hmm.max_len == 0 {
        hmm.max_len = hmm.profile2cs[k];
    }
    hmm.extend_index();
    hmm.reset_prob_by_cost();
    hmm.adjust_profile_local_mode();
    hmm.set_sequence_mode(AlignMode::Local);
    hmm.wing_retract();
    Ok(hmm)
}

/// Write a profile as HMMER-3/f text.
pub fn write_hmmer(hmm: &BandedHmm) -> String {
    let mut out = String::new();
    if hmm.version.is_empty() {
        out.push_str("HMMER3/f\n");
    } else {
        out.push_str(&format!("HMMER3/f\t{}\n", hmm.version));
    }
    out.push_str(&format!("NAME\t{}\n", hmm.name));
    out.push_str(&format!("LENG\t{}\n", hmm.k));
    out.push_str(&format!("ALPH\t{}\n", alphabet::ALIAS));
    for (tag, val) in &hmm.tags {
        out.push_str(&format!("{}  {}\n", tag, val));
    }
    out.push_str(HMM_TAG);
    out.push('\n');

    for pos in 0..=hmm.k {
        if pos == 0 {
            out.push_str("\tCOMPO");
            for b in 0..SIZE {
                out.push('\t');
                out.push_str(&format_cost(hmm.e_m_cost[0][b]));
            }
            out.push('\n');
        } else {
            out.push_str(&format!("\t{}", pos));
            for b in 0..SIZE {
                out.push('\t');
                out.push_str(&format_cost(hmm.e_m_cost[pos][b]));
            }
            for tag in LOC_TAGS {
                if hmm.tag(tag).is_some() {
                    out.push('\t');
                    out.push_str(hmm.loc_tag(tag, pos).unwrap_or("-"));
                }
            }
            out.push('\n');
        }

        out.push('\t');
        for b in 0..SIZE {
            out.push('\t');
            out.push_str(&format_cost(hmm.e_i_cost[pos][b]));
        }
        out.push('\n');

        let tc = &hmm.t_cost[pos];
        let transitions = [
            tc[M][M], tc[M][I], tc[M][D], tc[I][M], tc[I][I], tc[D][M], tc[D][D],
        ];
        out.push('\t');
        for c in transitions {
            out.push('\t');
            out.push_str(&format_cost(c));
        }
        out.push('\n');
    }
    out.push_str("//\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use velella_core::cost::{cost_of, INFINITE_COST};

    /// Hand-set 3-position model with MAP/CONS annotations, ready for
    /// writing.
    fn sample_hmm() -> BandedHmm {
        let mut hmm = BandedHmm::new("sample", 3).unwrap();
        for pos in 0..=3 {
            hmm.t[pos][M] = [0.85, 0.08, 0.07];
            hmm.t[pos][I] = [0.6, 0.4, 0.0];
            hmm.t[pos][D] = [0.55, 0.0, 0.45];
            for b in 0..SIZE {
                hmm.e_m[pos][b] = if b == pos % SIZE { 0.7 } else { 0.1 };
                hmm.e_i[pos][b] = 0.25;
            }
        }
        hmm.e_m[0] = [0.3, 0.2, 0.3, 0.2];
        hmm.pin_boundaries();
        hmm.reset_cost_by_prob();
        hmm.max_len = 5;
        hmm.n_seq = 4;
        hmm.eff_n = 2.5;
        hmm.set_tag("MAXL", "5");
        hmm.set_tag("NSEQ", "4");
        hmm.set_tag("EFFN", "2.5");
        hmm.set_tag("MAP", "yes");
        hmm.set_tag("CONS", "yes");
        let cons = [b'-', b'A', b'C', b'G'];
        for pos in 1..=3 {
            hmm.set_map(pos, pos + 1); // leading insert column
            hmm.set_loc_tag("MAP", pos, &(pos + 1).to_string());
            hmm.set_loc_tag("CONS", pos, &(cons[pos] as char).to_string());
        }
        hmm
    }

    #[test]
    fn round_trip_preserves_parameters() {
        let original = sample_hmm();
        let text = write_hmmer(&original);
        let parsed = parse_hmmer(&text).unwrap();

        assert_eq!(parsed.name(), "sample");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed.max_len(), 5);
        assert_eq!(parsed.n_seq(), 4);
        assert!((parsed.eff_n() - 2.5).abs() < 1e-9);

        for pos in 0..=3 {
            for (a, b) in [(M, M), (M, I), (M, D), (I, M), (I, I), (D, M), (D, D)] {
                let want = original.t_cost[pos][a][b];
                let got = parsed.t_cost[pos][a][b];
                if want == INFINITE_COST {
                    assert_eq!(got, INFINITE_COST);
                } else {
                    assert!((want - got).abs() < 1e-5, "T[{}]({},{})", pos, a, b);
                }
            }
            for b in 0..SIZE {
                assert!((original.e_m_cost[pos][b] - parsed.e_m_cost[pos][b]).abs() < 1e-5);
                assert!((original.e_i_cost[pos][b] - parsed.e_i_cost[pos][b]).abs() < 1e-5);
            }
        }
        for pos in 1..=3 {
            assert_eq!(parsed.profile_to_cs(pos), original.profile_to_cs(pos));
            assert_eq!(parsed.loc_tag("CONS", pos), original.loc_tag("CONS", pos));
        }
        assert_eq!(parsed.tag("NSEQ"), Some("4"));
        assert_eq!(parsed.tag("MAXL"), Some("5"));
    }

    #[test]
    fn second_round_trip_is_exact() {
        let text = write_hmmer(&sample_hmm());
        let once = parse_hmmer(&text).unwrap();
        let twice = parse_hmmer(&write_hmmer(&once)).unwrap();
        assert_eq!(once.t_cost, twice.t_cost);
        assert_eq!(once.e_m_cost, twice.e_m_cost);
        assert_eq!(once.e_i_cost, twice.e_i_cost);
        assert_eq!(once.tags, twice.tags);
        assert_eq!(once.profile2cs, twice.profile2cs);
    }

    #[test]
    fn parsed_model_is_ready_to_align() {
        let parsed = parse_hmmer(&write_hmmer(&sample_hmm())).unwrap();
        assert!(parsed.is_wing_retracted());
        // LOCAL mode: flanks loop with the background termination mass.
        let term = parsed.background().term_pr();
        assert!((parsed.special_transition(crate::model::SP_N, crate::model::SP_N) - term).abs() < 1e-9);
        // Entry/exit were re-seeded from the Begin/End match mass.
        assert!(parsed.entry_pr(1) > 0.0);
        // Index tail clamps to K.
        assert_eq!(parsed.cs_to_profile(5), 3);
        assert_eq!(parsed.cs_to_profile(99), 3);
    }

    #[test]
    fn missing_terminator_fails() {
        let text = write_hmmer(&sample_hmm());
        let truncated = text.replace("//\n", "");
        let err = parse_hmmer(&truncated).unwrap_err();
        assert!(err.to_string().contains("terminated"), "{}", err);
    }

    #[test]
    fn obsolete_version_fails() {
        let text = write_hmmer(&sample_hmm()).replace("HMMER3/f", "HMMER3/b");
        assert!(parse_hmmer(&text).is_err());
    }

    #[test]
    fn wrong_alphabet_fails() {
        let text = write_hmmer(&sample_hmm()).replace("ALPH\tDNA", "ALPH\tamino");
        assert!(parse_hmmer(&text).is_err());
    }

    #[test]
    fn missing_map_flag_fails() {
        let text = write_hmmer(&sample_hmm()).replace("MAP  yes\n", "");
        assert!(parse_hmmer(&text).is_err());
    }

    #[test]
    fn non_increasing_map_columns_fail() {
        // Rewind the MAP annotation of position 2 (column 3) to column 1.
        let text = write_hmmer(&sample_hmm());
        let broken = text.replacen("\t3\tC\n", "\t1\tC\n", 1);
        assert_ne!(text, broken);
        assert!(parse_hmmer(&broken).is_err());
    }

    #[test]
    fn star_token_is_infinite_cost() {
        let parsed = parse_hmmer(&write_hmmer(&sample_hmm())).unwrap();
        // I→D is forbidden, written as '*', parsed back to +∞ / prob 0.
        assert_eq!(parsed.t_cost[1][I][D], INFINITE_COST);
        assert_eq!(parsed.transition(1, I, D), 0.0);
        // Boundary pin: T[0](D,M) = 1 has cost 0.
        assert!((parsed.t_cost[0][D][M] - cost_of(1.0)).abs() < 1e-9);
    }
}
