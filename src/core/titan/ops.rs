//! Unitary operators with deferred tensor products.
//!
//! An `Operator` is stored as the ordered list of factors whose Kronecker
//! product it is. Tensoring two operators only concatenates the lists; the
//! dense matrix is built the first time somebody asks for it. The factor list
//! is what lets a composite state route each factor to the subsystems it
//! actually spans.
use std::rc::Rc;

use num_complex::Complex64 as C64;
use once_cell::unsync::OnceCell;

use super::basis::{Basis, STD_SYMBOLS};
use super::digits::MixedRadix;
use super::measure::Transform;
use super::notation::parse_kets;
use super::qbits::Qbits;
use super::qstate::QState;
use super::types::{approx_eq, c, identity_deviation, kron, Amplitudes, CMatrix, UNITARY_TOLERANCE};
use crate::core::error::{QError, Result};

#[derive(Clone, Debug)]
pub struct Operator {
    factors: Vec<Rc<CMatrix>>,
    dense: OnceCell<Rc<CMatrix>>,
}

/// One side of a rule given to [`Operator::build`].
#[derive(Clone, Debug)]
pub enum StateSpec {
    /// Eigenstate `k` of the rule basis; `-k` selects `-|e_k⟩`.
    /// `-0` is `0`, so the first eigenstate cannot be negated this way.
    Index(i64),
    /// Bra-ket text over the rule basis' symbols, e.g. `"|0> -|1>"`.
    Ket(String),
    /// An explicit column vector.
    Vector(Amplitudes),
}

impl From<i64> for StateSpec {
    fn from(k: i64) -> Self {
        StateSpec::Index(k)
    }
}

impl From<&str> for StateSpec {
    fn from(s: &str) -> Self {
        StateSpec::Ket(s.to_string())
    }
}

impl From<String> for StateSpec {
    fn from(s: String) -> Self {
        StateSpec::Ket(s)
    }
}

impl From<Amplitudes> for StateSpec {
    fn from(v: Amplitudes) -> Self {
        StateSpec::Vector(v)
    }
}

impl Operator {
    /// Wrap a unitary matrix.
    pub fn new(m: CMatrix) -> Result<Self> {
        if !m.is_square() {
            return Err(QError::init_caused_by(
                "Error to initialize Op",
                QError::dimension(format!("operator must be square (got {}x{})", m.nrows(), m.ncols())),
            ));
        }
        let deviation = identity_deviation(&m);
        if deviation > UNITARY_TOLERANCE {
            return Err(QError::init(format!(
                "Error to initialize Op: matrix not unitary (‖UᴴU−I‖∞={deviation:e})"
            )));
        }
        Ok(Self::unchecked(m))
    }

    /// Row-major entries of an `n × n` unitary.
    pub fn from_row_slice(n: usize, entries: &[C64]) -> Result<Self> {
        if entries.len() != n * n {
            return Err(QError::init(format!(
                "Error to initialize Op: {} entries for a {n}x{n} matrix",
                entries.len()
            )));
        }
        Self::new(CMatrix::from_row_slice(n, n, entries))
    }

    /// Caller guarantees unitarity (library gates).
    pub(crate) fn unchecked(m: CMatrix) -> Self {
        let m = Rc::new(m);
        Self { factors: vec![m.clone()], dense: OnceCell::with_value(m) }
    }

    /// The identity of tensor composition: a `1 × 1` identity with no factors.
    pub fn neutral() -> Self {
        Self { factors: Vec::new(), dense: OnceCell::with_value(Rc::new(CMatrix::identity(1, 1))) }
    }

    /// `n × n` identity.
    pub fn identity(n: usize) -> Self {
        Self::unchecked(CMatrix::identity(n, n))
    }

    pub fn dim(&self) -> usize {
        self.factors.iter().map(|f| f.nrows()).product()
    }

    /// The dense matrix, materialized on first use.
    pub fn matrix(&self) -> &CMatrix {
        self.dense.get_or_init(|| {
            let mut acc = CMatrix::identity(1, 1);
            for f in &self.factors {
                acc = kron(&acc, f);
            }
            Rc::new(acc)
        })
    }

    /// Independent factors, in tensor order.
    pub fn pieces(&self) -> Vec<Operator> {
        self.factors
            .iter()
            .map(|f| Self { factors: vec![f.clone()], dense: OnceCell::with_value(f.clone()) })
            .collect()
    }

    pub fn piece_dims(&self) -> Vec<usize> {
        self.factors.iter().map(|f| f.nrows()).collect()
    }

    /// More than one independently addressable factor.
    pub fn is_separable(&self) -> bool {
        self.factors.len() > 1
    }

    pub fn is_neutral(&self) -> bool {
        self.factors.is_empty()
    }

    /// Every factor is exactly the identity.
    pub fn is_identity(&self) -> bool {
        self.factors.iter().all(|f| {
            f.iter().enumerate().all(|(k, z)| {
                let (r, col) = (k % f.nrows(), k / f.nrows());
                *z == if r == col { c(1.0, 0.0) } else { c(0.0, 0.0) }
            })
        })
    }

    /// `self ⊗ other`, keeping both factor lists.
    pub fn tensor(&self, other: &Operator) -> Operator {
        let mut factors = self.factors.clone();
        factors.extend(other.factors.iter().cloned());
        Self { factors, dense: OnceCell::new() }
    }

    /// `self ⊗ self ⊗ …` (`n` times); `n = 0` gives the neutral operator.
    pub fn tensor_pow(&self, n: usize) -> Operator {
        (0..n).fold(Self::neutral(), |acc, _| acc.tensor(self))
    }

    /// Matrix product `self · other` (apply `other` first).
    pub fn compose(&self, other: &Operator) -> Result<Operator> {
        if self.dim() != other.dim() {
            return Err(QError::dimension(format!(
                "cannot compose a {}-dimensional operator with a {}-dimensional one",
                self.dim(),
                other.dim()
            )));
        }
        Ok(Self::unchecked(self.matrix() * other.matrix()))
    }

    /// Conjugate transpose; factor structure is kept.
    pub fn adjoint(&self) -> Operator {
        Self { factors: self.factors.iter().map(|f| Rc::new(f.adjoint())).collect(), dense: OnceCell::new() }
    }

    /// Multiply by a global phase; other scalars would break unitarity.
    pub fn scale_phase(&self, z: C64) -> Result<Operator> {
        if (z.norm() - 1.0).abs() > UNITARY_TOLERANCE {
            return Err(QError::illegal(format!(
                "only unit-modulus scalars keep an operator unitary (|{z}| = {})",
                z.norm()
            )));
        }
        Ok(Self::unchecked(self.matrix() * z))
    }

    pub fn approx_eq(&self, other: &Operator, tol: f64) -> bool {
        self.dim() == other.dim()
            && self.matrix().iter().zip(other.matrix().iter()).all(|(a, b)| approx_eq(*a, *b, tol))
    }

    /// Pre-multiply the state's amplitudes by this operator.
    pub fn apply_to<S: QState + ?Sized>(&self, state: &S) -> Result<()> {
        state.apply(Transform::Unitary(self.clone()))
    }

    /// Apply this operator to every leaf subsystem of `qbits` independently.
    pub fn apply_to_each_subsystem(&self, qbits: &Qbits) -> Result<()> {
        qbits.apply_to_each(self)
    }

    /// Build `Σ |dst⟩⟨src|` over `basis` (default: canonical, sized to the rule count).
    pub fn build(rules: &[(StateSpec, StateSpec)], basis: Option<&Basis>) -> Result<Operator> {
        let basis = match basis {
            Some(b) => b.clone(),
            None => Basis::canonical(rules.len())?,
        };
        let n = basis.len();
        let mut m = CMatrix::zeros(n, n);
        for (src, dst) in rules {
            let s = resolve(src, &basis)?;
            let d = resolve(dst, &basis)?;
            m += d * s.adjoint();
        }
        Operator::new(m)
    }

    /// Like [`Operator::build`], over the canonical basis of a product space
    /// whose eigenstates are labelled digit by digit (`"01"`, `"10"`, …).
    pub fn build_over_dims(rules: &[(StateSpec, StateSpec)], dims: &[usize]) -> Result<Operator> {
        if let Some(&d) = dims.iter().find(|&&d| d > STD_SYMBOLS.len() || d == 0) {
            return Err(QError::dimension(format!(
                "digit labels need dimensions between 1 and {} (got {d})",
                STD_SYMBOLS.len()
            )));
        }
        let mut digits = MixedRadix::new(dims);
        let mut symbols = Vec::with_capacity(digits.capacity());
        loop {
            symbols.push(digits.label(|_, d| &STD_SYMBOLS[d..d + 1]));
            if !digits.increment() {
                break;
            }
        }
        let basis = Basis::canonical_with_symbols(symbols.len(), Some(symbols))?;
        Self::build(rules, Some(&basis))
    }
}

fn resolve(spec: &StateSpec, basis: &Basis) -> Result<Amplitudes> {
    match spec {
        StateSpec::Index(k) if *k >= 0 => basis.eigenstate(*k as usize),
        StateSpec::Index(k) => Ok(-basis.eigenstate(k.unsigned_abs() as usize)?),
        StateSpec::Ket(text) => {
            let terms = parse_kets(text)?;
            let mut coords = Amplitudes::zeros(basis.len());
            for (symbol, coef) in terms {
                let i = basis.find_symbol(&symbol).ok_or_else(|| {
                    QError::incomprehensible(format!("symbol |{symbol}> is not part of the rule basis"))
                })?;
                coords[i] += coef;
            }
            basis.inverse_transform(&coords)
        }
        StateSpec::Vector(v) if v.len() == basis.len() => Ok(v.clone()),
        StateSpec::Vector(v) => Err(QError::dimension(format!(
            "rule vector of length {} for a basis of length {}",
            v.len(),
            basis.len()
        ))),
    }
}
