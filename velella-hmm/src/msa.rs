//! Weighted multiple sequence alignment input for profile training.
//!
//! An [`Msa`] holds aligned rows over the consensus-column coordinate
//! system plus per-sequence weights, and answers the column statistics the
//! builder needs: weighted symbol fraction, weighted identity, consensus
//! base, and per-sequence residue spans.

use velella_core::{Result, VelellaError};

use crate::alphabet::{self, SIZE};

/// A weighted multiple sequence alignment.
///
/// All rows have the same length (the consensus-sequence width); columns
/// are addressed 0-based here, while profile building converts to the
/// 1-based CS coordinates of the HMM index maps.
#[derive(Debug, Clone)]
pub struct Msa {
    name: String,
    rows: Vec<Vec<u8>>,
    weights: Vec<f64>,
    starts: Vec<usize>,
    ends: Vec<usize>,
}

impl Msa {
    /// New alignment with unit sequence weights.
    ///
    /// # Errors
    ///
    /// Returns an error if the alignment is empty, rows differ in length,
    /// or a row contains no residues.
    pub fn new(name: &str, rows: Vec<Vec<u8>>) -> Result<Self> {
        let n = rows.len();
        Self::with_weights(name, rows, vec![1.0; n])
    }

    /// New alignment with explicit per-sequence weights.
    ///
    /// # Errors
    ///
    /// As [`Msa::new`], plus an error on a weight count mismatch or a
    /// non-positive weight.
    pub fn with_weights(name: &str, rows: Vec<Vec<u8>>, weights: Vec<f64>) -> Result<Self> {
        if rows.is_empty() || rows[0].is_empty() {
            return Err(VelellaError::InvalidInput("empty MSA".into()));
        }
        let width = rows[0].len();
        if rows.iter().any(|r| r.len() != width) {
            return Err(VelellaError::InvalidInput(
                "MSA rows differ in length".into(),
            ));
        }
        if weights.len() != rows.len() {
            return Err(VelellaError::InvalidInput(
                "need one weight per sequence".into(),
            ));
        }
        if weights.iter().any(|&w| w <= 0.0) {
            return Err(VelellaError::InvalidInput(
                "sequence weights must be positive".into(),
            ));
        }
        let mut starts = Vec::with_capacity(rows.len());
        let mut ends = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let start = row.iter().position(|&b| alphabet::is_symbol(b));
            let end = row.iter().rposition(|&b| alphabet::is_symbol(b));
            match (start, end) {
                (Some(s), Some(e)) => {
                    starts.push(s);
                    ends.push(e);
                }
                _ => {
                    return Err(VelellaError::InvalidInput(format!(
                        "sequence {} has no residues",
                        i
                    )))
                }
            }
        }
        Ok(Self {
            name: name.to_string(),
            rows,
            weights,
            starts,
            ends,
        })
    }

    /// Alignment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of sequences.
    pub fn num_seq(&self) -> usize {
        self.rows.len()
    }

    /// Consensus-sequence width (number of columns).
    pub fn cs_len(&self) -> usize {
        self.rows[0].len()
    }

    /// Raw character of sequence `i` at column `j` (both 0-based).
    pub fn char_at(&self, i: usize, j: usize) -> u8 {
        self.rows[i][j]
    }

    /// Encoded residue of sequence `i` at column `j`, or `None` for a gap.
    pub fn encode_at(&self, i: usize, j: usize) -> Option<usize> {
        alphabet::encode(self.rows[i][j])
    }

    /// Weight of sequence `i`.
    pub fn seq_weight(&self, i: usize) -> f64 {
        self.weights[i]
    }

    /// First column (0-based) with a residue in sequence `i`.
    pub fn seq_start(&self, i: usize) -> usize {
        self.starts[i]
    }

    /// Last column (0-based) with a residue in sequence `i`.
    pub fn seq_end(&self, i: usize) -> usize {
        self.ends[i]
    }

    /// Weighted fraction of sequences with a residue at column `j`.
    pub fn sym_w_frac(&self, j: usize) -> f64 {
        let mut sym = 0.0;
        let mut total = 0.0;
        for (row, &w) in self.rows.iter().zip(&self.weights) {
            total += w;
            if alphabet::is_symbol(row[j]) {
                sym += w;
            }
        }
        sym / total
    }

    /// Weighted identity at column `j`: the weight share of the most
    /// common base among all sequences.
    pub fn w_identity_at(&self, j: usize) -> f64 {
        let mut counts = [0.0; SIZE];
        let mut total = 0.0;
        for (row, &w) in self.rows.iter().zip(&self.weights) {
            total += w;
            if let Some(b) = alphabet::encode(row[j]) {
                counts[b] += w;
            }
        }
        counts.iter().copied().fold(0.0, f64::max) / total
    }

    /// Weighted-majority base at column `j`, or `-` for an all-gap column.
    pub fn cs_base_at(&self, j: usize) -> u8 {
        let mut counts = [0.0; SIZE];
        for (row, &w) in self.rows.iter().zip(&self.weights) {
            if let Some(b) = alphabet::encode(row[j]) {
                counts[b] += w;
            }
        }
        let mut best = 0;
        for (b, &c) in counts.iter().enumerate().skip(1) {
            if c > counts[best] {
                best = b;
            }
        }
        if counts[best] > 0.0 {
            alphabet::decode(best)
        } else {
            b'-'
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> Msa {
        Msa::new(
            "toy",
            vec![
                b"AC-GT".to_vec(),
                b"ACAGT".to_vec(),
                b"-C-GT".to_vec(),
                b"AC-G-".to_vec(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn dimensions() {
        let msa = toy();
        assert_eq!(msa.num_seq(), 4);
        assert_eq!(msa.cs_len(), 5);
    }

    #[test]
    fn residue_spans() {
        let msa = toy();
        assert_eq!(msa.seq_start(0), 0);
        assert_eq!(msa.seq_end(0), 4);
        assert_eq!(msa.seq_start(2), 1);
        assert_eq!(msa.seq_end(3), 3);
    }

    #[test]
    fn symbol_fractions() {
        let msa = toy();
        assert!((msa.sym_w_frac(0) - 0.75).abs() < 1e-12);
        assert!((msa.sym_w_frac(1) - 1.0).abs() < 1e-12);
        assert!((msa.sym_w_frac(2) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn weighted_identity_and_consensus() {
        let msa = toy();
        assert_eq!(msa.cs_base_at(1), b'C');
        assert!((msa.w_identity_at(1) - 1.0).abs() < 1e-12);
        assert!((msa.w_identity_at(0) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn weights_shift_the_consensus() {
        let msa = Msa::with_weights(
            "w",
            vec![b"A".to_vec(), b"C".to_vec(), b"C".to_vec()],
            vec![5.0, 1.0, 1.0],
        )
        .unwrap();
        assert_eq!(msa.cs_base_at(0), b'A');
        assert!((msa.w_identity_at(0) - 5.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn validation_errors() {
        assert!(Msa::new("e", vec![]).is_err());
        assert!(Msa::new("e", vec![b"AC".to_vec(), b"A".to_vec()]).is_err());
        assert!(Msa::new("e", vec![b"--".to_vec()]).is_err());
        assert!(
            Msa::with_weights("e", vec![b"AC".to_vec()], vec![0.0]).is_err()
        );
    }
}
