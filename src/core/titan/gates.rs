//! Standard quantum gates and builders.
use nalgebra::DMatrix;
use num_complex::Complex64 as C64;
use rand::Rng;

use super::ops::Operator;
use super::types::{c, random_unitary, CMatrix};
use crate::core::error::{QError, Result};

fn gate(n: usize, entries: &[C64]) -> Operator {
    Operator::unchecked(DMatrix::from_row_slice(n, n, entries))
}

pub fn i2() -> Operator {
    Operator::identity(2)
}
pub fn x() -> Operator {
    gate(2, &[c(0.0, 0.0), c(1.0, 0.0), c(1.0, 0.0), c(0.0, 0.0)])
}
pub fn y() -> Operator {
    gate(2, &[c(0.0, 0.0), c(0.0, -1.0), c(0.0, 1.0), c(0.0, 0.0)])
}
pub fn z() -> Operator {
    gate(2, &[c(1.0, 0.0), c(0.0, 0.0), c(0.0, 0.0), c(-1.0, 0.0)])
}
pub fn h() -> Operator {
    let s = std::f64::consts::FRAC_1_SQRT_2;
    gate(2, &[c(s, 0.0), c(s, 0.0), c(s, 0.0), c(-s, 0.0)])
}

/// Flips the second qubit when the first is `|1⟩`.
pub fn cnot() -> Operator {
    let (o, l) = (c(0.0, 0.0), c(1.0, 0.0));
    #[rustfmt::skip]
    let m = [
        l, o, o, o,
        o, l, o, o,
        o, o, o, l,
        o, o, l, o,
    ];
    gate(4, &m)
}

pub fn swap() -> Operator {
    let (o, l) = (c(0.0, 0.0), c(1.0, 0.0));
    #[rustfmt::skip]
    let m = [
        l, o, o, o,
        o, o, l, o,
        o, l, o, o,
        o, o, o, l,
    ];
    gate(4, &m)
}

pub fn sqrt_swap() -> Operator {
    let (o, l) = (c(0.0, 0.0), c(1.0, 0.0));
    let (p, q) = (c(0.5, 0.5), c(0.5, -0.5));
    #[rustfmt::skip]
    let m = [
        l, o, o, o,
        o, p, q, o,
        o, q, p, o,
        o, o, o, l,
    ];
    gate(4, &m)
}

/// Controlled-U for a single-qubit `u`.
pub fn controlled(u: &Operator) -> Result<Operator> {
    if u.dim() != 2 {
        return Err(QError::dimension(format!(
            "The operator U must be a 2x2 matrix (got {0}x{0})",
            u.dim()
        )));
    }
    let mut m = CMatrix::identity(4, 4);
    m.view_mut((2, 2), (2, 2)).copy_from(u.matrix());
    Ok(Operator::unchecked(m))
}

/// `diag(1, e^{iφ})`, `phi` in radians.
pub fn phase(phi: f64) -> Operator {
    gate(2, &[c(1.0, 0.0), c(0.0, 0.0), c(0.0, 0.0), C64::from_polar(1.0, phi)])
}

/// Phase gate with the angle given in degrees.
pub fn phase_deg(degrees: f64) -> Operator {
    phase(degrees.to_radians())
}

/// Haar-random `n × n` unitary.
pub fn random<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Operator {
    Operator::unchecked(random_unitary(n, rng))
}
