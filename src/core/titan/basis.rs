//! Orthonormal measurement/display bases.
//!
//! A `Basis` is immutable once built: its columns are labelled eigenstates,
//! each bound to a display symbol and a readout value (the number handed back
//! by a measurement). Canonical bases never materialize their identity matrix
//! and large bases label eigenstates on demand.
use std::borrow::Cow;
use std::fmt;
use std::ops::Range;
use std::rc::Rc;

use nalgebra::RowDVector;
use num_complex::Complex64 as C64;
use rand::Rng;

use super::types::{
    c, is_orthonormal, kron, random_unitary, round_error, round_scalar, unit_ket, Amplitudes, CMatrix,
};
use crate::config;
use crate::core::error::{QError, Result};

/// Symbols used while a basis is small enough; beyond, eigenstates are labelled by index.
pub const STD_SYMBOLS: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Clone, Debug)]
enum Frame {
    Canonical(usize),
    Dense(Rc<CMatrix>),
}

#[derive(Clone, Debug)]
enum Symbols {
    Alphabet(usize),
    Indexed(usize),
    Fixed(Rc<[String]>),
    Product(Rc<Symbols>, Rc<Symbols>),
}

impl Symbols {
    fn for_len(n: usize) -> Self {
        if n <= STD_SYMBOLS.len() {
            Symbols::Alphabet(n)
        } else {
            Symbols::Indexed(n)
        }
    }

    fn len(&self) -> usize {
        match self {
            Symbols::Alphabet(n) | Symbols::Indexed(n) => *n,
            Symbols::Fixed(s) => s.len(),
            Symbols::Product(a, b) => a.len() * b.len(),
        }
    }

    fn get(&self, i: usize) -> Cow<'_, str> {
        match self {
            Symbols::Alphabet(_) => Cow::Borrowed(&STD_SYMBOLS[i..i + 1]),
            Symbols::Indexed(_) => Cow::Owned(i.to_string()),
            Symbols::Fixed(s) => Cow::Borrowed(s[i].as_str()),
            Symbols::Product(a, b) => {
                let n = b.len();
                Cow::Owned(format!("{}{}", a.get(i / n), b.get(i % n)))
            }
        }
    }

    fn find(&self, symbol: &str) -> Option<usize> {
        match self {
            Symbols::Alphabet(n) => {
                if symbol.len() != 1 {
                    return None;
                }
                STD_SYMBOLS[..*n].find(symbol)
            }
            Symbols::Indexed(n) => symbol.parse::<usize>().ok().filter(|i| i < n),
            Symbols::Fixed(s) => s.iter().position(|x| x == symbol),
            Symbols::Product(..) => (0..self.len()).find(|&i| self.get(i) == symbol),
        }
    }
}

#[derive(Clone, Debug)]
enum Readout {
    Index,
    Explicit(Rc<[C64]>),
}

#[derive(Clone, Debug)]
pub struct Basis {
    frame: Frame,
    symbols: Symbols,
    readout: Readout,
}

impl Basis {
    /// Build from a matrix whose columns are the eigenstates.
    pub fn new(matrix: CMatrix, symbols: Option<Vec<String>>) -> Result<Self> {
        Self::try_new(matrix, symbols).map_err(|e| QError::init_caused_by("Error to initialize Basis", e))
    }

    fn try_new(matrix: CMatrix, symbols: Option<Vec<String>>) -> Result<Self> {
        if !matrix.is_square() {
            return Err(QError::dimension(format!(
                "a basis matrix must be square (got {}x{})",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        if !is_orthonormal(&matrix) {
            return Err(QError::illegal("The vectors of the basis must be 'orthonormal' with each other"));
        }
        let n = matrix.nrows();
        let symbols = Self::check_symbols(n, symbols)?;
        Ok(Self { frame: Frame::Dense(Rc::new(matrix)), symbols, readout: Readout::Index })
    }

    /// Build from a list of eigenstates.
    pub fn from_eigenstates(states: &[Amplitudes], symbols: Option<Vec<String>>) -> Result<Self> {
        let n = states.len();
        if let Some(bad) = states.iter().find(|s| s.len() != n) {
            return Err(QError::init(format!(
                "Error to initialize Basis: {n} eigenstates need length {n} (got {})",
                bad.len()
            )));
        }
        Self::new(CMatrix::from_fn(n, n, |r, col| states[col][r]), symbols)
    }

    /// The canonical basis `{|0⟩ … |dim−1⟩}`.
    pub fn canonical(dim: usize) -> Result<Self> {
        Self::canonical_with_symbols(dim, None)
    }

    pub fn canonical_with_symbols(dim: usize, symbols: Option<Vec<String>>) -> Result<Self> {
        if dim < 2 {
            return Err(QError::init(format!("Minimum length allowed for a Basis is 2 (got {dim})")));
        }
        let symbols = Self::check_symbols(dim, symbols)?;
        Ok(Self { frame: Frame::Canonical(dim), symbols, readout: Readout::Index })
    }

    /// `{|0⟩, |1⟩}`
    pub fn standard() -> Self {
        Self { frame: Frame::Canonical(2), symbols: Symbols::Alphabet(2), readout: Readout::Index }
    }

    /// `{|+⟩, |−⟩}`
    pub fn hadamard() -> Self {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let m = CMatrix::from_row_slice(2, 2, &[c(s, 0.0), c(s, 0.0), c(s, 0.0), c(-s, 0.0)]);
        Self::fixed(m, &["+", "-"])
    }

    /// `{|Φ+⟩, |Ψ+⟩, |Ψ−⟩, |Φ−⟩}`
    pub fn bell() -> Self {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let (o, p, n) = (c(0.0, 0.0), c(s, 0.0), c(-s, 0.0));
        #[rustfmt::skip]
        let m = CMatrix::from_row_slice(4, 4, &[
            p, o, o, p,
            o, p, p, o,
            o, p, n, o,
            p, o, o, n,
        ]);
        Self::fixed(m, &["Φ+", "Ψ+", "Ψ-", "Φ-"])
    }

    fn fixed(m: CMatrix, symbols: &[&str]) -> Self {
        let symbols: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
        Self {
            frame: Frame::Dense(Rc::new(m)),
            symbols: Symbols::Fixed(symbols.into()),
            readout: Readout::Index,
        }
    }

    /// A random orthonormal basis of dimension `dim`.
    pub fn random<R: Rng + ?Sized>(dim: usize, symbols: Option<Vec<String>>, rng: &mut R) -> Result<Self> {
        if dim < 2 {
            return Err(QError::init(format!("Minimum length allowed for a Basis is 2 (got {dim})")));
        }
        Self::new(random_unitary(dim, rng), symbols)
    }

    /// Bind explicit readout values, one per eigenstate.
    pub fn with_eigenvalues(mut self, values: Vec<C64>) -> Result<Self> {
        if values.len() != self.len() {
            return Err(QError::init(format!(
                "Error to initialize Basis: {} eigenvalues for {} eigenstates",
                values.len(),
                self.len()
            )));
        }
        self.readout = Readout::Explicit(values.into());
        Ok(self)
    }

    fn check_symbols(n: usize, symbols: Option<Vec<String>>) -> Result<Symbols> {
        match symbols {
            Some(s) if s.len() != n => Err(QError::init(format!(
                "Length of symbols and basis must be the same ({} symbols, dimension {n})",
                s.len()
            ))),
            Some(s) => Ok(Symbols::Fixed(s.into())),
            None => Ok(Symbols::for_len(n)),
        }
    }

    pub fn len(&self) -> usize {
        match &self.frame {
            Frame::Canonical(n) => *n,
            Frame::Dense(m) => m.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_canonical(&self) -> bool {
        matches!(self.frame, Frame::Canonical(_))
    }

    /// The basis matrix (identity for canonical bases, built on request).
    pub fn matrix(&self) -> Cow<'_, CMatrix> {
        match &self.frame {
            Frame::Canonical(n) => Cow::Owned(CMatrix::identity(*n, *n)),
            Frame::Dense(m) => Cow::Borrowed(&**m),
        }
    }

    /// The `i`-th eigenstate as a column vector.
    pub fn eigenstate(&self, i: usize) -> Result<Amplitudes> {
        self.check_index(i)?;
        Ok(match &self.frame {
            Frame::Canonical(n) => unit_ket(*n, i),
            Frame::Dense(m) => m.column(i).into_owned(),
        })
    }

    /// Eigenstates for a range of indices.
    pub fn eigenstates(&self, range: Range<usize>) -> Result<Vec<Amplitudes>> {
        range.map(|i| self.eigenstate(i)).collect()
    }

    /// The value a measurement reports when it collapses onto eigenstate `i`.
    pub fn measure_outcome_value(&self, i: usize) -> Result<C64> {
        self.check_index(i)?;
        Ok(match &self.readout {
            Readout::Index => c(i as f64, 0.0),
            Readout::Explicit(v) => v[i],
        })
    }

    /// Display symbol of eigenstate `i`, `None` past the end.
    pub fn symbol(&self, i: usize) -> Option<Cow<'_, str>> {
        (i < self.len()).then(|| self.symbols.get(i))
    }

    pub fn symbols(&self) -> impl Iterator<Item = Cow<'_, str>> + '_ {
        (0..self.len()).map(move |i| self.symbols.get(i))
    }

    pub fn find_symbol(&self, symbol: &str) -> Option<usize> {
        self.symbols.find(symbol)
    }

    fn check_index(&self, i: usize) -> Result<()> {
        if i >= self.len() {
            return Err(QError::dimension(format!(
                "eigenstate index {i} out of range for a basis of length {}",
                self.len()
            )));
        }
        Ok(())
    }

    fn check_len(&self, got: usize) -> Result<()> {
        if got != self.len() {
            return Err(QError::dimension(format!(
                "Wrong basis dimension (got {} expected {got})",
                self.len()
            )));
        }
        Ok(())
    }

    /// Coordinates of `v` in this basis, rounded with the global precision.
    pub fn transform(&self, v: &Amplitudes) -> Result<Amplitudes> {
        self.transform_with(v, config::global().tolerance())
    }

    /// Coordinates `M†·v`, with components near 0 or ±1 snapped within `tol`.
    pub fn transform_with(&self, v: &Amplitudes, tol: f64) -> Result<Amplitudes> {
        self.check_len(v.len())?;
        Ok(match &self.frame {
            Frame::Canonical(_) => v.clone(),
            Frame::Dense(m) => {
                let mut out = m.ad_mul(v);
                round_error(&mut out, tol);
                out
            }
        })
    }

    /// Row-vector form of `transform`: `v·conj(M)`.
    pub fn transform_row(&self, v: &RowDVector<C64>) -> Result<RowDVector<C64>> {
        self.check_len(v.len())?;
        Ok(match &self.frame {
            Frame::Canonical(_) => v.clone(),
            Frame::Dense(m) => {
                let tol = config::global().tolerance();
                (v * m.map(|z| z.conj())).map(|z| round_scalar(z, tol))
            }
        })
    }

    /// Back from coordinates to the canonical frame: `M·coords`.
    pub fn inverse_transform(&self, coords: &Amplitudes) -> Result<Amplitudes> {
        self.check_len(coords.len())?;
        Ok(match &self.frame {
            Frame::Canonical(_) => coords.clone(),
            Frame::Dense(m) => &**m * coords,
        })
    }

    /// `self ⊗ other`: columns are products of eigenstates in lexicographic order.
    pub fn tensor(&self, other: &Basis) -> Basis {
        let frame = match (&self.frame, &other.frame) {
            (Frame::Canonical(a), Frame::Canonical(b)) => Frame::Canonical(a * b),
            _ => Frame::Dense(Rc::new(kron(&self.matrix(), &other.matrix()))),
        };
        Basis {
            frame,
            symbols: Symbols::Product(Rc::new(self.symbols.clone()), Rc::new(other.symbols.clone())),
            readout: Readout::Index,
        }
    }

    /// Always fails: bases are immutable.
    pub fn set_item(&mut self, _i: usize, _value: Amplitudes) -> Result<()> {
        Err(QError::not_allowed("Basis is an immutable object"))
    }

    /// Always fails: bases are immutable.
    pub fn conjugate(&self) -> Result<Basis> {
        Err(QError::not_allowed("Basis is an immutable object"))
    }

    /// Always fails: bases are immutable.
    pub fn transpose(&self) -> Result<Basis> {
        Err(QError::not_allowed("Basis is an immutable object"))
    }
}

impl fmt::Display for Basis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.len() {
            let col = match &self.frame {
                Frame::Canonical(n) => unit_ket(*n, i),
                Frame::Dense(m) => m.column(i).into_owned(),
            };
            let cells: Vec<String> = col.iter().map(|z| z.to_string()).collect();
            writeln!(f, "|{}>: [{}]", self.symbols.get(i), cells.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::titan::types::{real_ket, vectors_approx_eq};

    #[test]
    fn library_bases_are_orthonormal() {
        assert!(is_orthonormal(&Basis::hadamard().matrix()));
        assert!(is_orthonormal(&Basis::bell().matrix()));
        assert_eq!(Basis::bell().symbol(0).as_deref(), Some("Φ+"));
        assert_eq!(Basis::bell().symbol(7), None);
        assert_eq!(Basis::standard().symbol(5), None);
    }

    #[test]
    fn rejects_non_orthonormal_and_symbol_mismatch() {
        let m = CMatrix::from_row_slice(2, 2, &[c(1.0, 0.0), c(1.0, 0.0), c(0.0, 0.0), c(1.0, 0.0)]);
        assert!(matches!(Basis::new(m, None), Err(QError::Initialization(_))));
        let err = Basis::canonical_with_symbols(3, Some(vec!["a".into()])).unwrap_err();
        assert!(matches!(err, QError::Initialization(_)));
        assert!(Basis::canonical(1).is_err());
    }

    #[test]
    fn large_bases_label_on_demand() {
        let b = Basis::canonical(100).unwrap();
        assert_eq!(b.symbol(99).as_deref(), Some("99"));
        assert_eq!(b.find_symbol("42"), Some(42));
        assert_eq!(Basis::canonical(16).unwrap().symbol(15).as_deref(), Some("F"));
    }

    #[test]
    fn readout_defaults_to_index() {
        let b = Basis::hadamard();
        assert_eq!(b.measure_outcome_value(1).unwrap(), c(1.0, 0.0));
        let b = b.with_eigenvalues(vec![c(1.0, 0.0), c(-1.0, 0.0)]).unwrap();
        assert_eq!(b.measure_outcome_value(1).unwrap(), c(-1.0, 0.0));
        assert!(b.measure_outcome_value(2).is_err());
    }

    #[test]
    fn hadamard_transform() {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let plus = real_ket(&[s, s]);
        assert_eq!(Basis::hadamard().transform(&plus).unwrap(), real_ket(&[1.0, 0.0]));
    }

    #[test]
    fn tensor_orders_lexicographically() {
        let hb = Basis::hadamard().tensor(&Basis::standard());
        assert_eq!(hb.len(), 4);
        assert_eq!(hb.symbol(1).as_deref(), Some("+1"));
        assert_eq!(hb.symbol(2).as_deref(), Some("-0"));
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let expected = real_ket(&[0.0, s, 0.0, -s]);
        assert!(vectors_approx_eq(&hb.eigenstate(3).unwrap(), &expected, 1e-12));
        assert!(Basis::standard().tensor(&Basis::standard()).is_canonical());
    }

    #[test]
    fn mutation_is_not_allowed() {
        let mut b = Basis::standard();
        assert!(b.set_item(0, real_ket(&[0.0, 1.0])).unwrap_err().is_not_allowed());
        assert!(b.conjugate().unwrap_err().is_not_allowed());
        assert!(b.transpose().unwrap_err().is_not_allowed());
    }
}
