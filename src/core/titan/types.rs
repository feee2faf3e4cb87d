//! Scalar, vector and matrix primitives for Titan's state engine.
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64 as C64;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

pub type Amplitudes = DVector<C64>;
pub type CMatrix = DMatrix<C64>;

/// `‖U†U − I‖∞` above this rejects an operator.
pub const UNITARY_TOLERANCE: f64 = 1e-8;
/// Largest off-diagonal of `R` (from `QR`) still accepted as orthogonal.
pub const ORTHONORMAL_TOLERANCE: f64 = 1e-10;

#[inline]
pub fn c(r: f64, i: f64) -> C64 {
    C64::new(r, i)
}

/// Column vector from real entries.
pub fn real_ket(values: &[f64]) -> Amplitudes {
    DVector::from_iterator(values.len(), values.iter().map(|&r| c(r, 0.0)))
}

/// Column vector from complex entries.
pub fn ket(values: &[C64]) -> Amplitudes {
    DVector::from_column_slice(values)
}

/// `|i⟩` in a space of dimension `dim`.
pub fn unit_ket(dim: usize, i: usize) -> Amplitudes {
    let mut v = DVector::from_element(dim, c(0.0, 0.0));
    v[i] = c(1.0, 0.0);
    v
}

#[inline]
pub fn approx_eq(a: C64, b: C64, tol: f64) -> bool {
    (a - b).norm() <= tol
}

pub fn vectors_approx_eq(a: &Amplitudes, b: &Amplitudes, tol: f64) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| approx_eq(*x, *y, tol))
}

/// Σ |aᵢ|²
pub fn norm_sqr(v: &Amplitudes) -> f64 {
    v.iter().map(|z| z.norm_sqr()).sum()
}

/// Snap components within `tol` of 0 or ±1 (per real/imaginary part) to the exact value.
pub fn round_error(v: &mut Amplitudes, tol: f64) {
    for z in v.iter_mut() {
        *z = round_scalar(*z, tol);
    }
}

/// Scalar form of `round_error`.
#[inline]
pub fn round_scalar(z: C64, tol: f64) -> C64 {
    c(snap(z.re, tol), snap(z.im, tol))
}

#[inline]
fn snap(x: f64, tol: f64) -> f64 {
    for target in [0.0, 1.0, -1.0] {
        if (x - target).abs() <= tol {
            return target;
        }
    }
    x
}

/// `‖MᴴM − I‖∞`
pub fn identity_deviation(m: &CMatrix) -> f64 {
    let n = m.nrows();
    let gram = m.adjoint() * m;
    (gram - CMatrix::identity(n, n))
        .iter()
        .map(|z| z.norm())
        .fold(0.0_f64, f64::max)
}

pub fn is_unitary(m: &CMatrix) -> bool {
    m.is_square() && identity_deviation(m) <= UNITARY_TOLERANCE
}

/// QR-based test: columns are orthonormal iff `R` is diagonal with unit-modulus entries.
pub fn is_orthonormal(m: &CMatrix) -> bool {
    if !m.is_square() {
        return false;
    }
    let r = m.clone().qr().r();
    let n = r.nrows();
    for i in 0..n {
        if (r[(i, i)].norm() - 1.0).abs() > ORTHONORMAL_TOLERANCE {
            return false;
        }
        for j in (i + 1)..n {
            if r[(i, j)].norm() > ORTHONORMAL_TOLERANCE {
                return false;
            }
        }
    }
    true
}

/// Kronecker product A ⊗ B
pub fn kron(a: &CMatrix, b: &CMatrix) -> CMatrix {
    let (ar, ac) = (a.nrows(), a.ncols());
    let (br, bc) = (b.nrows(), b.ncols());
    let mut out = CMatrix::from_element(ar * br, ac * bc, c(0.0, 0.0));
    for i in 0..ar {
        for j in 0..ac {
            let aij = a[(i, j)];
            if aij == c(0.0, 0.0) {
                continue;
            }
            for k in 0..br {
                for l in 0..bc {
                    out[(i * br + k, j * bc + l)] = aij * b[(k, l)];
                }
            }
        }
    }
    out
}

/// Kronecker product of two column vectors.
pub fn kron_ket(a: &Amplitudes, b: &Amplitudes) -> Amplitudes {
    let n = b.len();
    DVector::from_fn(a.len() * n, |i, _| a[i / n] * b[i % n])
}

/// Haar-random `n × n` unitary: QR of a complex Ginibre matrix, with the
/// phases of `diag(R)` folded back into `Q`.
pub fn random_unitary<R: Rng + ?Sized>(n: usize, rng: &mut R) -> CMatrix {
    let s = std::f64::consts::FRAC_1_SQRT_2;
    let z = CMatrix::from_fn(n, n, |_, _| {
        let re: f64 = StandardNormal.sample(rng);
        let im: f64 = StandardNormal.sample(rng);
        c(s * re, s * im)
    });
    let qr = z.qr();
    let r = qr.r();
    let mut q = qr.q();
    for j in 0..n {
        let d = r[(j, j)];
        let norm = d.norm();
        if norm > 0.0 {
            let phase = d / norm;
            for i in 0..n {
                q[(i, j)] *= phase;
            }
        }
    }
    q
}
