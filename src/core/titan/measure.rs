//! Measurement: outcome sampling and the collapse projector.
//!
//! Collapse goes through the same application path as unitary gates, so the
//! projector is wrapped, together with ordinary operators, in [`Transform`].
use std::rc::Rc;

use num_complex::Complex64 as C64;
use rand::Rng;

use super::basis::Basis;
use super::ops::Operator;
use super::types::{Amplitudes, CMatrix};
use crate::core::error::{QError, Result};

/// Anything that can be applied to a state.
#[derive(Clone, Debug)]
pub enum Transform {
    /// Checked unitary, possibly a tensor product of independent pieces.
    Unitary(Operator),
    /// Post-measurement projector; exempt from the unitarity check.
    Collapse(MeasureOp),
}

impl Transform {
    pub fn dim(&self) -> usize {
        match self {
            Transform::Unitary(op) => op.dim(),
            Transform::Collapse(m) => m.dim(),
        }
    }

    pub fn matrix(&self) -> &CMatrix {
        match self {
            Transform::Unitary(op) => op.matrix(),
            Transform::Collapse(m) => m.matrix(),
        }
    }

    pub fn is_separable(&self) -> bool {
        matches!(self, Transform::Unitary(op) if op.is_separable())
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Transform::Unitary(op) if op.is_identity())
    }

    pub fn requires_unitarity(&self) -> bool {
        matches!(self, Transform::Unitary(_))
    }

    /// Independent pieces in tensor order; a projector is a single piece.
    pub fn pieces(&self) -> Vec<Transform> {
        match self {
            Transform::Unitary(op) => op.pieces().into_iter().map(Transform::Unitary).collect(),
            Transform::Collapse(_) => vec![self.clone()],
        }
    }
}

impl From<Operator> for Transform {
    fn from(op: Operator) -> Self {
        Transform::Unitary(op)
    }
}

impl From<&Operator> for Transform {
    fn from(op: &Operator) -> Self {
        Transform::Unitary(op.clone())
    }
}

impl From<MeasureOp> for Transform {
    fn from(m: MeasureOp) -> Self {
        Transform::Collapse(m)
    }
}

/// `|e_i⟩⟨e_i| / a`: projects onto eigenstate `i` and rescales by the probed amplitude `a`.
#[derive(Clone, Debug)]
pub struct MeasureOp {
    matrix: Rc<CMatrix>,
    outcome: usize,
}

impl MeasureOp {
    pub fn new(basis: &Basis, outcome: usize, amplitude: C64) -> Result<Self> {
        if amplitude.norm() == 0.0 {
            return Err(QError::illegal(format!(
                "cannot collapse onto eigenstate {outcome}: its amplitude is zero"
            )));
        }
        let e = basis.eigenstate(outcome)?;
        let m = (&e * e.adjoint()) / amplitude;
        Ok(Self { matrix: Rc::new(m), outcome })
    }

    /// Projector for the outcome drawn by [`sample`].
    pub fn from_sample(s: &Sample) -> Result<Self> {
        Self::new(&s.basis, s.index, s.coords[s.index])
    }

    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn matrix(&self) -> &CMatrix {
        &self.matrix
    }

    pub fn outcome(&self) -> usize {
        self.outcome
    }
}

/// A drawn outcome with the coordinates it was drawn from.
#[derive(Clone, Debug)]
pub struct Sample {
    pub index: usize,
    pub coords: Amplitudes,
    pub basis: Basis,
}

/// Draw an outcome of measuring `state` in `basis` (Born rule).
pub fn sample<R: Rng + ?Sized>(basis: &Basis, state: &Amplitudes, tol: f64, rng: &mut R) -> Result<Sample> {
    if basis.len() != state.len() {
        return Err(QError::dimension(format!(
            "Wrong basis dimension (got {} expected {})",
            basis.len(),
            state.len()
        )));
    }
    let coords = basis.transform_with(state, tol)?;
    let r: f64 = rng.gen();
    let index = pick_outcome(coords.iter().map(|z| z.norm_sqr()), r);
    tracing::trace!(index, r, "sampled outcome");
    Ok(Sample { index, coords, basis: basis.clone() })
}

/// Walk `i = 0, 1, …` subtracting `pᵢ` from 1 until the remainder is at or
/// below `r`. Rounding leftovers fall back to the last non-zero outcome.
pub fn pick_outcome<I: IntoIterator<Item = f64>>(probabilities: I, r: f64) -> usize {
    let mut remaining = 1.0;
    let mut last_possible = 0;
    for (i, p) in probabilities.into_iter().enumerate() {
        if p > 0.0 {
            last_possible = i;
        }
        remaining -= p;
        if remaining <= r {
            return i;
        }
    }
    last_possible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::titan::types::{c, real_ket, unit_ket, vectors_approx_eq};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn pick_outcome_walks_cumulative() {
        let p = [0.25, 0.5, 0.25];
        assert_eq!(pick_outcome(p, 0.9), 0);
        assert_eq!(pick_outcome(p, 0.5), 1);
        assert_eq!(pick_outcome(p, 0.0), 2);
        assert_eq!(pick_outcome([0.0, 1.0 - 1e-16, 0.0], 0.0), 1);
    }

    #[test]
    fn sample_rejects_wrong_basis() {
        let mut rng = StdRng::seed_from_u64(1);
        let err = sample(&Basis::bell(), &unit_ket(2, 0), 1e-14, &mut rng).unwrap_err();
        assert!(matches!(err, QError::Dimension(_)));
    }

    #[test]
    fn collapse_projector_lands_on_eigenstate() {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let psi = real_ket(&[s, s]);
        let mut rng = StdRng::seed_from_u64(9);
        let drawn = sample(&Basis::standard(), &psi, 1e-14, &mut rng).unwrap();
        let proj = MeasureOp::from_sample(&drawn).unwrap();
        let out = proj.matrix() * &psi;
        assert!(vectors_approx_eq(&out, &unit_ket(2, drawn.index), 1e-12));
        assert!(!Transform::from(proj).requires_unitarity());
    }

    #[test]
    fn zero_amplitude_cannot_collapse() {
        assert!(MeasureOp::new(&Basis::standard(), 1, c(0.0, 0.0)).is_err());
    }
}
