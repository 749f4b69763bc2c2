//! Dirichlet-mixture priors for parameter estimation.
//!
//! Training replaces each observed count vector with its posterior mean
//! under a Dirichlet mixture: component responsibilities come from the
//! marginal likelihood of the counts under each component, and the
//! posterior mean is the responsibility-weighted blend of the per-component
//! conjugate updates `(n + α) / (|n| + |α|)`.
//!
//! A single-component mixture degenerates to plain pseudocount smoothing.

use std::f64::consts::PI;

use velella_core::{Result, VelellaError};

/// Lanczos approximation of `ln Γ(x)` (g = 7, n = 9).
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 8] = [
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];

    if x < 0.5 {
        // Reflection formula: Γ(x) = π / (sin(πx) · Γ(1-x))
        let log_pi_over_sin = (PI / (PI * x).sin()).ln();
        log_pi_over_sin - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut ag = 0.99999999999980993_f64;
        for (i, &c) in COEFFS.iter().enumerate() {
            ag += c / (x + i as f64 + 1.0);
        }
        let t = x + 7.5; // g + 0.5
        0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + ag.ln()
    }
}

/// `ln B(α) = Σ ln Γ(αᵢ) − ln Γ(Σ αᵢ)`, the log normaliser of a Dirichlet.
fn ln_beta(alpha: &[f64]) -> f64 {
    let sum: f64 = alpha.iter().sum();
    alpha.iter().map(|&a| ln_gamma(a)).sum::<f64>() - ln_gamma(sum)
}

/// A mixture of Dirichlet densities over distributions of a fixed arity.
#[derive(Debug, Clone)]
pub struct DirichletMixture {
    weights: Vec<f64>,
    alphas: Vec<Vec<f64>>,
}

impl DirichletMixture {
    /// New mixture from component weights and concentration vectors.
    ///
    /// Weights are renormalised to sum 1.
    ///
    /// # Errors
    ///
    /// Returns an error if the mixture is empty, the component arities
    /// differ, or any weight or concentration is non-positive.
    pub fn new(weights: Vec<f64>, alphas: Vec<Vec<f64>>) -> Result<Self> {
        if weights.is_empty() || weights.len() != alphas.len() {
            return Err(VelellaError::InvalidInput(
                "DirichletMixture: need one weight per component".into(),
            ));
        }
        let arity = alphas[0].len();
        if arity == 0 {
            return Err(VelellaError::InvalidInput(
                "DirichletMixture: components must have positive arity".into(),
            ));
        }
        for alpha in &alphas {
            if alpha.len() != arity {
                return Err(VelellaError::InvalidInput(
                    "DirichletMixture: component arities differ".into(),
                ));
            }
            if alpha.iter().any(|&a| a <= 0.0) {
                return Err(VelellaError::InvalidInput(
                    "DirichletMixture: concentrations must be positive".into(),
                ));
            }
        }
        if weights.iter().any(|&w| w <= 0.0) {
            return Err(VelellaError::InvalidInput(
                "DirichletMixture: weights must be positive".into(),
            ));
        }
        let total: f64 = weights.iter().sum();
        let weights = weights.into_iter().map(|w| w / total).collect();
        Ok(Self { weights, alphas })
    }

    /// Single-component mixture: plain pseudocount smoothing with `alpha`.
    pub fn single(alpha: Vec<f64>) -> Self {
        Self {
            weights: vec![1.0],
            alphas: vec![alpha],
        }
    }

    /// Arity of the distributions this mixture is over.
    pub fn arity(&self) -> usize {
        self.alphas[0].len()
    }

    /// Posterior mean distribution given observed (possibly weighted)
    /// counts.
    ///
    /// The result is normalised to sum 1 and has the same arity as the
    /// mixture; counts of the wrong length are truncated/zero-extended by
    /// the caller's contract and must match in practice.
    pub fn mean_post_p(&self, counts: &[f64]) -> Vec<f64> {
        let arity = self.arity();
        debug_assert_eq!(counts.len(), arity);
        let n_total: f64 = counts.iter().sum();

        // Component responsibilities from the marginal likelihood
        // B(α + n) / B(α), in log space.
        let mut log_resp: Vec<f64> = self
            .weights
            .iter()
            .zip(self.alphas.iter())
            .map(|(&w, alpha)| {
                let post: Vec<f64> = alpha.iter().zip(counts).map(|(&a, &n)| a + n).collect();
                w.ln() + ln_beta(&post) - ln_beta(alpha)
            })
            .collect();
        let max = log_resp.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        for r in log_resp.iter_mut() {
            *r = (*r - max).exp();
        }
        let resp_total: f64 = log_resp.iter().sum();

        let mut mean = vec![0.0; arity];
        for (resp, alpha) in log_resp.iter().zip(self.alphas.iter()) {
            let q = resp / resp_total;
            let post_total: f64 = alpha.iter().sum::<f64>() + n_total;
            for (slot, (&a, &n)) in mean.iter_mut().zip(alpha.iter().zip(counts)) {
                *slot += q * (a + n) / post_total;
            }
        }
        let total: f64 = mean.iter().sum();
        for slot in mean.iter_mut() {
            *slot /= total;
        }
        mean
    }
}

/// The five Dirichlet mixtures a profile HMM is estimated with: match and
/// insert emissions (arity 4), and the match, insert, and delete
/// transition rows (arities 3, 2, 2).
#[derive(Debug, Clone)]
pub struct HmmPrior {
    /// Match emission prior (over A, C, G, T).
    pub match_emission: DirichletMixture,
    /// Insert emission prior (over A, C, G, T).
    pub insert_emission: DirichletMixture,
    /// Match transition prior (over M→M, M→I, M→D).
    pub match_transition: DirichletMixture,
    /// Insert transition prior (over I→M, I→I).
    pub insert_transition: DirichletMixture,
    /// Delete transition prior (over D→M, D→D).
    pub delete_transition: DirichletMixture,
}

impl HmmPrior {
    /// A modest single-component DNA prior: weak match-emission smoothing
    /// so conserved columns stay sharp, heavier smoothing elsewhere.
    pub fn dna_default() -> Self {
        Self {
            match_emission: DirichletMixture::single(vec![0.37; 4]),
            insert_emission: DirichletMixture::single(vec![1.0; 4]),
            match_transition: DirichletMixture::single(vec![0.8, 0.1, 0.1]),
            insert_transition: DirichletMixture::single(vec![0.6, 0.4]),
            delete_transition: DirichletMixture::single(vec![0.6, 0.4]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-9;

    #[test]
    fn ln_gamma_matches_factorials() {
        // Γ(n) = (n-1)!
        assert!((ln_gamma(1.0)).abs() < 1e-10);
        assert!((ln_gamma(5.0) - 24.0_f64.ln()).abs() < 1e-9);
        assert!((ln_gamma(0.5) - PI.sqrt().ln()).abs() < 1e-9);
    }

    #[test]
    fn single_component_is_pseudocount_smoothing() {
        let dm = DirichletMixture::single(vec![1.0; 4]);
        let mean = dm.mean_post_p(&[6.0, 0.0, 0.0, 0.0]);
        // (6+1)/(6+4) and (0+1)/(6+4)
        assert!((mean[0] - 0.7).abs() < TOL);
        assert!((mean[1] - 0.1).abs() < TOL);
        assert!((mean.iter().sum::<f64>() - 1.0).abs() < TOL);
    }

    #[test]
    fn zero_counts_yield_prior_mean() {
        let dm = DirichletMixture::single(vec![2.0, 1.0, 1.0]);
        let mean = dm.mean_post_p(&[0.0; 3]);
        assert!((mean[0] - 0.5).abs() < TOL);
        assert!((mean[1] - 0.25).abs() < TOL);
    }

    #[test]
    fn mixture_tracks_the_matching_component() {
        // One AT-rich and one GC-rich component; AT-heavy counts should be
        // pulled toward the AT component's update.
        let dm = DirichletMixture::new(
            vec![0.5, 0.5],
            vec![vec![5.0, 1.0, 1.0, 5.0], vec![1.0, 5.0, 5.0, 1.0]],
        )
        .unwrap();
        let mean = dm.mean_post_p(&[10.0, 0.0, 0.0, 10.0]);
        assert!(mean[0] > 0.3, "A should be favoured, got {:?}", mean);
        assert!(mean[1] < 0.2, "C should be disfavoured, got {:?}", mean);
        assert!((mean.iter().sum::<f64>() - 1.0).abs() < TOL);
    }

    #[test]
    fn mixture_validation() {
        assert!(DirichletMixture::new(vec![], vec![]).is_err());
        assert!(DirichletMixture::new(vec![1.0], vec![vec![1.0, -1.0]]).is_err());
        assert!(
            DirichletMixture::new(vec![1.0, 1.0], vec![vec![1.0], vec![1.0, 1.0]]).is_err()
        );
    }

    #[test]
    fn default_prior_arities() {
        let prior = HmmPrior::dna_default();
        assert_eq!(prior.match_emission.arity(), 4);
        assert_eq!(prior.insert_emission.arity(), 4);
        assert_eq!(prior.match_transition.arity(), 3);
        assert_eq!(prior.insert_transition.arity(), 2);
        assert_eq!(prior.delete_transition.arity(), 2);
    }
}
