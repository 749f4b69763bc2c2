//! Banded Plan7 profile HMM alignment for DNA sequences.
//!
//! Velella trains a profile hidden Markov model from a weighted multiple
//! sequence alignment (or reads a HMMER-3/f text profile), aligns query
//! sequences against it with a minimum-cost Viterbi dynamic program that
//! can be banded around pre-computed seed hits, and renders each
//! alignment as a fixed-width consensus-column string, so alignments of
//! many queries stack directly into a column-wise MSA.
//!
//! # Pipeline
//!
//! parse/build → [`BandedHmm`] (mode set and wings retracted by both
//! constructors) → [`calc_viterbi_scores`] /
//! [`calc_viterbi_scores_banded`] → [`build_viterbi_trace`] →
//! [`build_global_align`] → [`HmmAlignment`].
//!
//! # Quick start
//!
//! ```
//! use velella_hmm::{
//!     build, build_global_align, build_viterbi_trace, calc_viterbi_scores,
//!     HmmPrior, Msa, ViterbiScores,
//! };
//!
//! let rows = vec![b"ACGT".to_vec(); 4];
//! let msa = Msa::new("toy", rows).unwrap();
//! let hmm = build(&msa, 0.5, &HmmPrior::dna_default(), "").unwrap();
//!
//! let seq = b"ACGT";
//! let mut vs = ViterbiScores::new(seq.len(), hmm.len());
//! calc_viterbi_scores(&hmm, seq, &mut vs).unwrap();
//! let trace = build_viterbi_trace(&hmm, &vs);
//! assert!(trace.is_valid());
//!
//! let aln = build_global_align(&hmm, seq, &vs, &trace);
//! assert_eq!(aln.align.len(), 4);
//! ```

pub mod align;
pub mod alphabet;
pub mod background;
pub mod builder;
pub mod hmmer;
pub mod model;
pub mod msa;
pub mod prior;
pub mod trace;
pub mod viterbi;

pub use align::{build_global_align, padding_seq, HmmAlignment, Padding, GAP_SYM, PAD_SYM};
pub use builder::{build, CONS_THRESHOLD, DEFAULT_ERE};
pub use hmmer::{parse_hmmer, write_hmmer, HMM_TAG};
pub use model::{AlignMode, BandedHmm, MAX_PROFILE};
pub use msa::Msa;
pub use prior::{DirichletMixture, HmmPrior};
pub use trace::{build_viterbi_trace, ViterbiTrace};
pub use viterbi::{
    build_align_path, calc_viterbi_scores, calc_viterbi_scores_banded, AlignPath, CsLoc,
    ViterbiScores, MIN_GAP_FRAC,
};
