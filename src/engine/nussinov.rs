//! engine::nussinov — reference log-linear Nussinov-style structure model.
//!
//! Purpose
//! -------
//! A complete, small [`InferenceEngine`] implementation: a CRF over
//! pseudoknot-free secondary structures whose score is a sum of per-pair and
//! per-unpaired-position feature weights. It supports every capability the
//! objective layer needs (clamping, loss augmentation, evidence emissions,
//! inside/outside posteriors, Viterbi, MEA and centroid decoding) and is the
//! engine used throughout the test suite.
//!
//! Grammar
//! -------
//! Over half-open spans `[a, b)` of the sequence:
//! - `L[a, a] = 0` (empty span);
//! - `a` unpaired: `u(a) + L[a+1, b]`;
//! - `a` paired with `k`, `a + MIN_HAIRPIN < k < b`: `p(a, k) + L[a+1, k] + L[k+1, b]`.
//!
//! Each structure has exactly one derivation, so the log-sum over rules is the
//! log-partition function and the max over rules is the Viterbi score.
//!
//! Features
//! --------
//! Six canonical pair types (`AU UA CG GC GU UG`) followed by five unpaired
//! base identities (`A C G U N`), see [`FEATURE_NAMES`]. Non-canonical pairs
//! are never admissible; a clamp to a structure containing one cannot be
//! parsed and yields `Score::Invalid`.
//!
//! Evidence
//! --------
//! For every evidence track whose `(channel, source)` exists in the layout,
//! each positive observation `d` at position `i` contributes
//! `ln Gamma(d; k_s, θ_s)` to the state `s` of `i` (paired or unpaired) in
//! `Pass::Ess`. Zero and missing observations contribute nothing.
use std::sync::Arc;

use ndarray::{Array1, Array2};
use statrs::distribution::{Continuous, Gamma};

use crate::{
    corpus::{
        EvidenceCell, EvidenceTrack, Example, GammaParam, PAIRED, PAIRING_STATES, ParameterLayout,
        Structure, UNPAIRED,
    },
    engine::{EngineError, EngineResult, GammaCounts, InferenceEngine, Pass, Score},
    optimization::numerical_stability::log_add_exp,
};

/// Minimum number of unpaired positions enclosed by a pair.
pub const MIN_HAIRPIN: usize = 3;
pub const NUM_PAIR_TYPES: usize = 6;
pub const NUM_BASES: usize = 5;
pub const NUM_FEATURES: usize = NUM_PAIR_TYPES + NUM_BASES;

pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "pair_AU",
    "pair_UA",
    "pair_CG",
    "pair_GC",
    "pair_GU",
    "pair_UG",
    "unpaired_A",
    "unpaired_C",
    "unpaired_G",
    "unpaired_U",
    "unpaired_N",
];

const NEG_INF: f64 = f64::NEG_INFINITY;

fn base_index(c: char) -> usize {
    match c.to_ascii_uppercase() {
        'A' => 0,
        'C' => 1,
        'G' => 2,
        'U' | 'T' => 3,
        _ => 4,
    }
}

fn pair_type(left: usize, right: usize) -> Option<usize> {
    match (left, right) {
        (0, 3) => Some(0),
        (3, 0) => Some(1),
        (1, 2) => Some(2),
        (2, 1) => Some(3),
        (2, 3) => Some(4),
        (3, 2) => Some(5),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Choice {
    Unpaired,
    Pair(usize),
}

#[derive(Debug, Clone)]
struct LoadedSequence {
    bases: Vec<usize>,
    evidence: Vec<EvidenceTrack>,
}

/// Per-pass rule scores; `pair[[a, k]] == −∞` marks an inadmissible pair.
struct Potentials {
    unpaired: Vec<Option<f64>>,
    pair: Array2<f64>,
}

/// Marginals of the last Viterbi (indicators) or outside (posteriors) pass.
#[derive(Debug, Clone)]
struct Marginals {
    unpaired: Array1<f64>,
    paired: Array1<f64>,
    pairs: Array2<f64>,
}

#[derive(Debug, Clone)]
pub struct NussinovEngine {
    layout: Arc<ParameterLayout>,
    sequence: Option<LoadedSequence>,
    values: Option<Array1<f64>>,
    constraints: Option<Vec<Option<usize>>>,
    loss: Option<(Vec<Option<usize>>, f64)>,
    evidence_terms: Option<Array2<f64>>,
    inside: Option<(Pass, Array2<f64>)>,
    log_z: Option<f64>,
    viterbi_best: Option<f64>,
    best_structure: Option<Structure>,
    marginals: Option<Marginals>,
}

impl NussinovEngine {
    /// # Errors
    /// [`EngineError::ParameterDimMismatch`] if the layout's structural block
    /// is not [`NUM_FEATURES`] long.
    pub fn new(layout: Arc<ParameterLayout>) -> EngineResult<Self> {
        if layout.n_structural() != NUM_FEATURES {
            return Err(EngineError::ParameterDimMismatch {
                expected: NUM_FEATURES,
                found: layout.n_structural(),
            });
        }
        Ok(Self {
            layout,
            sequence: None,
            values: None,
            constraints: None,
            loss: None,
            evidence_terms: None,
            inside: None,
            log_z: None,
            viterbi_best: None,
            best_structure: None,
            marginals: None,
        })
    }

    /// Layout with this engine's structural block and one regularization group.
    pub fn default_layout(n_channels: usize, n_sources: usize) -> ParameterLayout {
        ParameterLayout::single_group(NUM_FEATURES, n_channels, n_sources)
    }

    /// Structural feature counts of `structure` over `example`'s sequence.
    pub fn structure_features(example: &Example, structure: &Structure) -> Array1<f64> {
        let bases: Vec<usize> = example.sequence().chars().map(base_index).collect();
        features_of(&bases, structure)
    }

    fn loaded(&self) -> EngineResult<&LoadedSequence> {
        self.sequence.as_ref().ok_or(EngineError::SequenceNotLoaded)
    }

    fn len(&self) -> EngineResult<usize> {
        Ok(self.loaded()?.bases.len())
    }

    fn invalidate_results(&mut self) {
        self.inside = None;
        self.log_z = None;
        self.viterbi_best = None;
        self.best_structure = None;
        self.marginals = None;
    }

    fn check_structure_len(&self, structure: &Structure) -> EngineResult<()> {
        let n = self.len()?;
        if structure.len() != n {
            return Err(EngineError::StructureLengthMismatch { expected: n, found: structure.len() });
        }
        Ok(())
    }

    fn potentials(&self, pass: Pass) -> EngineResult<Potentials> {
        let seq = self.loaded()?;
        let w = self.values.as_ref().ok_or(EngineError::ValuesNotLoaded)?;
        let evidence = match pass {
            Pass::Plain => None,
            Pass::Ess => Some(self.evidence_terms.as_ref().ok_or(EngineError::EvidenceNotPrepared)?),
        };
        let n = seq.bases.len();

        let mut unpaired = vec![None; n];
        for (a, slot) in unpaired.iter_mut().enumerate() {
            if let Some(c) = &self.constraints {
                if c[a].is_some() {
                    continue;
                }
            }
            let mut s = w[NUM_PAIR_TYPES + seq.bases[a]];
            if let Some(ev) = evidence {
                s += ev[[a, UNPAIRED]];
            }
            if let Some((truth, scale)) = &self.loss {
                if truth[a].is_some() {
                    s += scale;
                }
            }
            *slot = Some(s);
        }

        let mut pair = Array2::from_elem((n, n), NEG_INF);
        for a in 0..n {
            for k in (a + MIN_HAIRPIN + 1)..n {
                let Some(t) = pair_type(seq.bases[a], seq.bases[k]) else {
                    continue;
                };
                if let Some(c) = &self.constraints {
                    if c[a] != Some(k) {
                        continue;
                    }
                }
                let mut s = w[t];
                if let Some(ev) = evidence {
                    s += ev[[a, PAIRED]] + ev[[k, PAIRED]];
                }
                if let Some((truth, scale)) = &self.loss {
                    if truth[a] != Some(k) {
                        s += scale;
                    }
                    if truth[k] != Some(a) {
                        s += scale;
                    }
                }
                pair[[a, k]] = s;
            }
        }
        Ok(Potentials { unpaired, pair })
    }

    fn run_inside(pot: &Potentials, n: usize) -> Array2<f64> {
        let mut l = Array2::from_elem((n + 1, n + 1), NEG_INF);
        for i in 0..=n {
            l[[i, i]] = 0.0;
        }
        for len in 1..=n {
            for a in 0..=(n - len) {
                let b = a + len;
                let mut acc = NEG_INF;
                if let Some(u) = pot.unpaired[a] {
                    acc = log_add_exp(acc, u + l[[a + 1, b]]);
                }
                for k in (a + MIN_HAIRPIN + 1)..b {
                    let p = pot.pair[[a, k]];
                    if p == NEG_INF {
                        continue;
                    }
                    acc = log_add_exp(acc, p + l[[a + 1, k]] + l[[k + 1, b]]);
                }
                l[[a, b]] = acc;
            }
        }
        l
    }

    /// Highest-total derivation under arbitrary rule gains. Returns the best
    /// total and the traceback table, or `None` when nothing is admissible.
    fn max_derivation<U, P>(n: usize, unpaired: U, pair: P) -> (f64, Vec<Option<Choice>>)
    where
        U: Fn(usize) -> Option<f64>,
        P: Fn(usize, usize) -> Option<f64>,
    {
        let stride = n + 1;
        let mut best = Array2::from_elem((n + 1, n + 1), NEG_INF);
        let mut choice: Vec<Option<Choice>> = vec![None; stride * stride];
        for i in 0..=n {
            best[[i, i]] = 0.0;
        }
        for len in 1..=n {
            for a in 0..=(n - len) {
                let b = a + len;
                let mut top = NEG_INF;
                let mut pick = None;
                if let Some(u) = unpaired(a) {
                    let cand = u + best[[a + 1, b]];
                    if cand > top {
                        top = cand;
                        pick = Some(Choice::Unpaired);
                    }
                }
                for k in (a + MIN_HAIRPIN + 1)..b {
                    let Some(p) = pair(a, k) else {
                        continue;
                    };
                    let cand = p + best[[a + 1, k]] + best[[k + 1, b]];
                    if cand > top {
                        top = cand;
                        pick = Some(Choice::Pair(k));
                    }
                }
                best[[a, b]] = top;
                choice[a * stride + b] = pick;
            }
        }
        (best[[0, n]], choice)
    }

    fn traceback(n: usize, choice: &[Option<Choice>]) -> Option<Structure> {
        let stride = n + 1;
        let mut partners = vec![None; n];
        let mut stack = vec![(0usize, n)];
        while let Some((a, b)) = stack.pop() {
            if a >= b {
                continue;
            }
            match choice[a * stride + b]? {
                Choice::Unpaired => stack.push((a + 1, b)),
                Choice::Pair(k) => {
                    partners[a] = Some(k);
                    partners[k] = Some(a);
                    stack.push((a + 1, k));
                    stack.push((k + 1, b));
                }
            }
        }
        Some(Structure::from_valid_partners(partners))
    }

    fn pairable(bases: &[usize], a: usize, k: usize) -> bool {
        k > a + MIN_HAIRPIN && pair_type(bases[a], bases[k]).is_some()
    }

    fn decode_with_gains<U, P>(&self, unpaired: U, pair: P) -> EngineResult<Structure>
    where
        U: Fn(usize) -> f64,
        P: Fn(usize, usize) -> f64,
    {
        let bases = &self.loaded()?.bases;
        let n = bases.len();
        let (_, choice) = Self::max_derivation(
            n,
            |a| Some(unpaired(a)),
            |a, k| Self::pairable(bases, a, k).then(|| pair(a, k)),
        );
        Self::traceback(n, &choice).ok_or(EngineError::NoAdmissibleStructure)
    }

    fn marginals(&self) -> EngineResult<&Marginals> {
        self.marginals.as_ref().ok_or(EngineError::PosteriorsNotComputed)
    }
}

fn features_of(bases: &[usize], structure: &Structure) -> Array1<f64> {
    let mut f = Array1::zeros(NUM_FEATURES);
    for (i, partner) in structure.partners().iter().enumerate() {
        match *partner {
            None => f[NUM_PAIR_TYPES + bases[i]] += 1.0,
            Some(j) if j > i => {
                if let Some(t) = pair_type(bases[i], bases[j]) {
                    f[t] += 1.0;
                }
            }
            Some(_) => {}
        }
    }
    f
}

fn indicator_marginals(structure: &Structure) -> Marginals {
    let n = structure.len();
    let mut m = Marginals {
        unpaired: Array1::zeros(n),
        paired: Array1::zeros(n),
        pairs: Array2::zeros((n, n)),
    };
    for (i, partner) in structure.partners().iter().enumerate() {
        match *partner {
            None => m.unpaired[i] = 1.0,
            Some(j) => {
                m.paired[i] = 1.0;
                m.pairs[[i, j]] = 1.0;
            }
        }
    }
    m
}

impl InferenceEngine for NussinovEngine {
    fn num_structural_features(&self) -> usize {
        NUM_FEATURES
    }

    fn load_sequence(&mut self, example: &Example) -> EngineResult<()> {
        self.sequence = Some(LoadedSequence {
            bases: example.sequence().chars().map(base_index).collect(),
            evidence: example.evidence().to_vec(),
        });
        self.constraints = None;
        self.loss = None;
        self.evidence_terms = None;
        self.invalidate_results();
        Ok(())
    }

    fn load_values(&mut self, values: &Array1<f64>) -> EngineResult<()> {
        if values.len() != self.layout.dim() {
            return Err(EngineError::ParameterDimMismatch {
                expected: self.layout.dim(),
                found: values.len(),
            });
        }
        self.values = Some(values.clone());
        self.evidence_terms = None;
        self.invalidate_results();
        Ok(())
    }

    fn use_constraints(&mut self, structure: &Structure) -> EngineResult<()> {
        self.check_structure_len(structure)?;
        self.constraints = Some(structure.partners().to_vec());
        self.invalidate_results();
        Ok(())
    }

    fn clear_constraints(&mut self) {
        self.constraints = None;
        self.invalidate_results();
    }

    fn use_loss(&mut self, truth: &Structure, per_position: f64) -> EngineResult<()> {
        if !per_position.is_finite() {
            return Err(EngineError::InvalidLossScale { value: per_position });
        }
        self.check_structure_len(truth)?;
        self.loss = Some((truth.partners().to_vec(), per_position));
        self.invalidate_results();
        Ok(())
    }

    fn clear_loss(&mut self) {
        self.loss = None;
        self.invalidate_results();
    }

    fn update_evidence_structures(&mut self) -> EngineResult<()> {
        let seq = self.loaded()?;
        let w = self.values.as_ref().ok_or(EngineError::ValuesNotLoaded)?;
        let n = seq.bases.len();
        let mut terms = Array2::zeros((n, PAIRING_STATES));
        for track in &seq.evidence {
            if track.channel >= self.layout.n_channels() || track.source >= self.layout.n_sources() {
                continue;
            }
            for state in [UNPAIRED, PAIRED] {
                let cell = EvidenceCell::new(track.channel, state, track.source);
                let shape = w[self.layout.logical_index(cell, GammaParam::LogShape)?].exp();
                let scale = w[self.layout.logical_index(cell, GammaParam::LogScale)?].exp();
                let density = Gamma::new(shape, 1.0 / scale)
                    .map_err(|_| EngineError::InvalidGammaParameters { shape, scale })?;
                for (p, value) in track.values.iter().enumerate() {
                    if let Some(d) = *value {
                        if d > 0.0 {
                            terms[[p, state]] += density.ln_pdf(d);
                        }
                    }
                }
            }
        }
        self.evidence_terms = Some(terms);
        self.invalidate_results();
        Ok(())
    }

    fn compute_viterbi(&mut self, pass: Pass) -> EngineResult<()> {
        let pot = self.potentials(pass)?;
        let n = self.len()?;
        let (best, choice) = Self::max_derivation(
            n,
            |a| pot.unpaired[a],
            |a, k| {
                let p = pot.pair[[a, k]];
                (p != NEG_INF).then_some(p)
            },
        );
        self.viterbi_best = Some(best);
        self.best_structure = if best.is_finite() { Self::traceback(n, &choice) } else { None };
        self.marginals = self.best_structure.as_ref().map(indicator_marginals);
        Ok(())
    }

    fn compute_inside(&mut self, pass: Pass) -> EngineResult<()> {
        let pot = self.potentials(pass)?;
        let n = self.len()?;
        let l = Self::run_inside(&pot, n);
        self.log_z = Some(l[[0, n]]);
        self.inside = Some((pass, l));
        Ok(())
    }

    fn compute_outside(&mut self, pass: Pass) -> EngineResult<()> {
        let pot = self.potentials(pass)?;
        let n = self.len()?;
        let l = match self.inside.take() {
            Some((p, l)) if p == pass => l,
            _ => Self::run_inside(&pot, n),
        };
        let log_z = l[[0, n]];
        let mut m = Marginals {
            unpaired: Array1::zeros(n),
            paired: Array1::zeros(n),
            pairs: Array2::zeros((n, n)),
        };
        if log_z.is_finite() {
            let mut o = Array2::from_elem((n + 1, n + 1), NEG_INF);
            o[[0, n]] = 0.0;
            for len in (1..=n).rev() {
                for a in 0..=(n - len) {
                    let b = a + len;
                    let ob = o[[a, b]];
                    if ob == NEG_INF {
                        continue;
                    }
                    if let Some(u) = pot.unpaired[a] {
                        let t = ob + u;
                        o[[a + 1, b]] = log_add_exp(o[[a + 1, b]], t);
                        m.unpaired[a] += (t + l[[a + 1, b]] - log_z).exp();
                    }
                    for k in (a + MIN_HAIRPIN + 1)..b {
                        let p = pot.pair[[a, k]];
                        if p == NEG_INF {
                            continue;
                        }
                        let t = ob + p;
                        o[[a + 1, k]] = log_add_exp(o[[a + 1, k]], t + l[[k + 1, b]]);
                        o[[k + 1, b]] = log_add_exp(o[[k + 1, b]], t + l[[a + 1, k]]);
                        let post = (t + l[[a + 1, k]] + l[[k + 1, b]] - log_z).exp();
                        m.pairs[[a, k]] += post;
                        m.pairs[[k, a]] += post;
                        m.paired[a] += post;
                        m.paired[k] += post;
                    }
                }
            }
        }
        self.log_z = Some(log_z);
        self.inside = Some((pass, l));
        self.marginals = Some(m);
        Ok(())
    }

    fn viterbi_score(&self) -> Score {
        self.viterbi_best.map_or(Score::Invalid, Score::from_log)
    }

    fn log_partition(&self) -> Score {
        self.log_z.map_or(Score::Invalid, Score::from_log)
    }

    fn viterbi_features(&self) -> EngineResult<Array1<f64>> {
        let seq = self.loaded()?;
        match &self.best_structure {
            Some(s) => Ok(features_of(&seq.bases, s)),
            None => Ok(Array1::zeros(NUM_FEATURES)),
        }
    }

    fn feature_expectations(&self) -> EngineResult<Array1<f64>> {
        let seq = self.loaded()?;
        let m = self.marginals()?;
        let n = seq.bases.len();
        let mut f = Array1::zeros(NUM_FEATURES);
        for a in 0..n {
            f[NUM_PAIR_TYPES + seq.bases[a]] += m.unpaired[a];
            for k in (a + 1)..n {
                let p = m.pairs[[a, k]];
                if p == 0.0 {
                    continue;
                }
                if let Some(t) = pair_type(seq.bases[a], seq.bases[k]) {
                    f[t] += p;
                }
            }
        }
        Ok(f)
    }

    fn pair_posteriors(&self) -> EngineResult<Array2<f64>> {
        Ok(self.marginals()?.pairs.clone())
    }

    fn predict_viterbi(&self) -> EngineResult<Structure> {
        self.best_structure.clone().ok_or(EngineError::NoAdmissibleStructure)
    }

    fn predict_posterior(&self, gain: f64) -> EngineResult<Structure> {
        let m = self.marginals()?;
        self.decode_with_gains(|a| m.unpaired[a], |a, k| 2.0 * gain * m.pairs[[a, k]])
    }

    fn predict_centroid(&self, gain: f64) -> EngineResult<Structure> {
        let m = self.marginals()?;
        self.decode_with_gains(|_| 0.0, |a, k| (gain + 1.0) * m.pairs[[a, k]] - 1.0)
    }

    fn gamma_counts(
        &self, channel: usize, source: usize, state: Option<usize>, exclude_zeros: bool,
    ) -> EngineResult<GammaCounts> {
        let seq = self.loaded()?;
        let m = match state {
            Some(_) => Some(self.marginals()?),
            None => None,
        };
        let mut counts = GammaCounts::default();
        for track in seq.evidence.iter().filter(|t| t.channel == channel && t.source == source) {
            for (p, value) in track.values.iter().enumerate() {
                let Some(d) = *value else {
                    continue;
                };
                if exclude_zeros && d == 0.0 {
                    continue;
                }
                let weight = match (state, m) {
                    (Some(UNPAIRED), Some(m)) => m.unpaired[p],
                    (Some(_), Some(m)) => m.paired[p],
                    _ => 1.0,
                };
                if weight == 0.0 {
                    continue;
                }
                counts.sum += weight * d;
                counts.sum_log += weight * d.ln();
                counts.count += weight;
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::EvidenceTrack;
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover the reference engine against brute-force enumeration
    // on tiny sequences: partition function, posteriors, Viterbi, clamping,
    // loss augmentation and evidence statistics.
    // -------------------------------------------------------------------------

    fn engine(channels: usize) -> NussinovEngine {
        let layout = Arc::new(NussinovEngine::default_layout(channels, 1));
        NussinovEngine::new(layout).expect("matching layout")
    }

    fn example(seq: &str) -> Example {
        Example::new("x", seq, None, Vec::new(), 1.0).expect("valid example")
    }

    #[test]
    // Purpose
    // -------
    // At zero weights the partition function counts admissible structures.
    //
    // Given
    // -----
    // - "GAAAC": the empty structure and the single hairpin (0,4).
    // - "GAAACA": the same two; G–A at (0,5) is not canonical.
    //
    // Expect
    // ------
    // - log Z = ln 2 for both.
    fn log_partition_counts_structures_at_zero_weights() {
        // Arrange
        let mut e = engine(0);
        let zeros = Array1::zeros(NUM_FEATURES);

        for seq in ["GAAAC", "GAAACA"] {
            // Act
            e.load_sequence(&example(seq)).expect("load");
            e.load_values(&zeros).expect("values");
            e.compute_inside(Pass::Plain).expect("inside");

            // Assert
            assert_abs_diff_eq!(e.log_partition().value().expect("valid"), 2f64.ln(), epsilon = 1e-12);
        }
    }

    #[test]
    // Purpose
    // -------
    // Posteriors from the outside pass match the two-structure closed form.
    //
    // Given
    // -----
    // - "GAAAC" with pair_GC weight 1.0, everything else zero.
    //
    // Expect
    // ------
    // - P(0,4) = e / (1 + e) and expected features equal the marginals.
    fn outside_posteriors_match_closed_form() {
        // Arrange
        let mut e = engine(0);
        let mut w = Array1::zeros(NUM_FEATURES);
        w[3] = 1.0;
        e.load_sequence(&example("GAAAC")).expect("load");
        e.load_values(&w).expect("values");

        // Act
        e.compute_inside(Pass::Plain).expect("inside");
        e.compute_outside(Pass::Plain).expect("outside");
        let p = e.pair_posteriors().expect("posteriors");
        let f = e.feature_expectations().expect("features");

        // Assert
        let expected = 1f64.exp() / (1.0 + 1f64.exp());
        assert_abs_diff_eq!(p[[0, 4]], expected, epsilon = 1e-12);
        assert_abs_diff_eq!(p[[4, 0]], expected, epsilon = 1e-12);
        assert_abs_diff_eq!(f[3], expected, epsilon = 1e-12);
        // G and C are unpaired only in the empty structure.
        assert_abs_diff_eq!(f[NUM_PAIR_TYPES + 2], 1.0 - expected, epsilon = 1e-12);
        assert_abs_diff_eq!(f[NUM_PAIR_TYPES], 3.0, epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // Viterbi picks the hairpin when the pair weight is positive and reports
    // its feature counts.
    fn viterbi_prefers_positive_pair() {
        // Arrange
        let mut e = engine(0);
        let mut w = Array1::zeros(NUM_FEATURES);
        w[3] = 0.5;
        e.load_sequence(&example("GAAAC")).expect("load");
        e.load_values(&w).expect("values");

        // Act
        e.compute_viterbi(Pass::Plain).expect("viterbi");

        // Assert
        assert_eq!(e.viterbi_score(), Score::Valid(0.5));
        assert_eq!(e.predict_viterbi().expect("structure").to_dot_bracket(), "(...)");
        assert_eq!(e.viterbi_features().expect("features")[3], 1.0);
    }

    #[test]
    // Purpose
    // -------
    // Clamping to a non-canonical or too-short pair leaves nothing admissible.
    //
    // Given
    // -----
    // - "GAAAA" clamped to "(...)" (G–A is not canonical).
    //
    // Expect
    // ------
    // - Viterbi and log-partition are `Score::Invalid`.
    fn clamp_to_unparsable_structure_is_invalid() {
        // Arrange
        let mut e = engine(0);
        e.load_sequence(&example("GAAAA")).expect("load");
        e.load_values(&Array1::zeros(NUM_FEATURES)).expect("values");
        let clamp = Structure::from_dot_bracket("(...)").expect("valid");

        // Act
        e.use_constraints(&clamp).expect("constraints");
        e.compute_viterbi(Pass::Plain).expect("viterbi");
        e.compute_inside(Pass::Plain).expect("inside");

        // Assert
        assert_eq!(e.viterbi_score(), Score::Invalid);
        assert_eq!(e.log_partition(), Score::Invalid);
    }

    #[test]
    // Purpose
    // -------
    // Loss augmentation at zero weights makes Viterbi return the maximum
    // Hamming-style loss against the truth.
    //
    // Given
    // -----
    // - "GAAAC" with truth "(...)" and per-position loss 1.
    //
    // Expect
    // ------
    // - Best score 2 (the empty structure disagrees at both paired positions).
    fn loss_augmented_viterbi_finds_worst_structure() {
        // Arrange
        let mut e = engine(0);
        let truth = Structure::from_dot_bracket("(...)").expect("valid");
        e.load_sequence(&example("GAAAC")).expect("load");
        e.load_values(&Array1::zeros(NUM_FEATURES)).expect("values");

        // Act
        e.use_loss(&truth, 1.0).expect("loss");
        e.compute_viterbi(Pass::Plain).expect("viterbi");

        // Assert
        assert_eq!(e.viterbi_score(), Score::Valid(2.0));
    }

    #[test]
    // Purpose
    // -------
    // Evidence statistics are weighted by the state marginals of the last pass.
    //
    // Given
    // -----
    // - "GAAAC" clamped to "(...)", one track [2, 0, 1, None, 4].
    //
    // Expect
    // ------
    // - Paired state: positions 0 and 4 → Σd = 6, N = 2.
    // - Unpaired state excluding zeros: position 2 only → Σd = 1, N = 1.
    fn gamma_counts_follow_clamped_marginals() {
        // Arrange
        let mut e = engine(1);
        let track = EvidenceTrack::new(0, 0, vec![Some(2.0), Some(0.0), Some(1.0), None, Some(4.0)]);
        let truth = Structure::from_dot_bracket("(...)").expect("valid");
        let ex = Example::new("ev", "GAAAC", Some(truth.clone()), vec![track], 1.0).expect("valid");
        let dim = NussinovEngine::default_layout(1, 1).dim();
        e.load_sequence(&ex).expect("load");
        e.load_values(&Array1::zeros(dim)).expect("values");
        e.update_evidence_structures().expect("evidence");
        e.use_constraints(&truth).expect("clamp");

        // Act
        e.compute_inside(Pass::Ess).expect("inside");
        e.compute_outside(Pass::Ess).expect("outside");
        let paired = e.gamma_counts(0, 0, Some(PAIRED), false).expect("counts");
        let unpaired = e.gamma_counts(0, 0, Some(UNPAIRED), true).expect("counts");

        // Assert
        assert_abs_diff_eq!(paired.sum, 6.0, epsilon = 1e-12);
        assert_abs_diff_eq!(paired.count, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(paired.sum_log, 8f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(unpaired.sum, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(unpaired.count, 1.0, epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // MEA decoding keeps a confident pair and centroid drops an unlikely one.
    fn posterior_decoders_respect_gain() {
        // Arrange
        let mut e = engine(0);
        let mut w = Array1::zeros(NUM_FEATURES);
        w[3] = 3.0;
        e.load_sequence(&example("GAAAC")).expect("load");
        e.load_values(&w).expect("values");
        e.compute_outside(Pass::Plain).expect("outside");

        // Act
        let mea = e.predict_posterior(1.0).expect("mea");
        let centroid = e.predict_centroid(1.0).expect("centroid");

        // Assert: P(0,4) ≈ 0.95 is above both thresholds.
        assert_eq!(mea.to_dot_bracket(), "(...)");
        assert_eq!(centroid.to_dot_bracket(), "(...)");

        // Arrange: strongly negative pair weight.
        w[3] = -3.0;
        e.load_values(&w).expect("values");
        e.compute_outside(Pass::Plain).expect("outside");

        // Act / Assert
        assert_eq!(e.predict_centroid(1.0).expect("centroid").to_dot_bracket(), ".....");
    }
}
