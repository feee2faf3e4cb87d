//! Single subsystems.
//!
//! A [`Qbit`] is a stable handle. While independent it owns its amplitudes;
//! once an operation entangles it, the same handle forwards everything to the
//! [`Qent`] that now holds the joint vector, and remembers its position there.
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use num_complex::Complex64 as C64;
use rand::{Rng, RngCore};

use super::basis::{Basis, STD_SYMBOLS};
use super::measure::{sample, Transform};
use super::notation::parse_kets;
use super::qbits::Qbits;
use super::qent::Qent;
use super::qstate::QState;
use super::types::{c, norm_sqr, random_unitary, round_error, Amplitudes};
use crate::config::{self, SimConfig};
use crate::core::error::{QError, Result};

#[derive(Debug)]
pub(crate) enum Backing {
    Owned(Amplitudes),
    Entangled { group: Qent, position: usize },
}

#[derive(Debug)]
pub(crate) struct Subsystem {
    pub(crate) dim: usize,
    pub(crate) backing: Backing,
    pub(crate) basis: Basis,
    pub(crate) config: SimConfig,
}

#[derive(Clone)]
pub struct Qbit(pub(crate) Rc<RefCell<Subsystem>>);

/// Options for [`Qbit`] construction.
#[derive(Clone, Debug)]
pub struct QbitBuilder {
    amplitudes: Amplitudes,
    basis: Option<Basis>,
    normalize: Option<bool>,
    transform: bool,
    config: Option<SimConfig>,
}

impl QbitBuilder {
    /// Default measurement/display basis (canonical if unset).
    pub fn basis(mut self, basis: Basis) -> Self {
        self.basis = Some(basis);
        self
    }

    /// Normalize a non-unit vector instead of failing. Unset follows `auto_normalize`.
    pub fn normalize(mut self, on: bool) -> Self {
        self.normalize = Some(on);
        self
    }

    /// Store the coordinates of the vector in the basis instead of the vector itself.
    pub fn transform(mut self, on: bool) -> Self {
        self.transform = on;
        self
    }

    pub fn config(mut self, cfg: SimConfig) -> Self {
        self.config = Some(cfg);
        self
    }

    pub fn build(self) -> Result<Qbit> {
        self.try_build().map_err(|e| QError::init_caused_by("Error to initialize Qbit", e))
    }

    fn try_build(self) -> Result<Qbit> {
        let config = self.config.unwrap_or_else(config::global);
        config.validate()?;
        let mut v = self.amplitudes;
        if v.len() < 2 {
            return Err(QError::dimension(format!("a subsystem needs at least 2 amplitudes (got {})", v.len())));
        }
        let basis = match self.basis {
            Some(b) if b.len() != v.len() => {
                return Err(QError::dimension(format!(
                    "Lengths of state and basis must be equal ({} vs {})",
                    v.len(),
                    b.len()
                )))
            }
            Some(b) => b,
            None => Basis::canonical(v.len())?,
        };
        let norm = norm_sqr(&v).sqrt();
        if (norm - 1.0).abs() > config.tolerance() {
            if !self.normalize.unwrap_or(config.auto_normalize) {
                return Err(QError::illegal(format!(
                    "A quantum state must have norm 1, this one has norm {norm}"
                )));
            }
            if norm == 0.0 {
                return Err(QError::illegal("the zero vector cannot be normalized"));
            }
            v /= c(norm, 0.0);
        }
        if self.transform {
            v = basis.transform_with(&v, config.tolerance())?;
        }
        Ok(Qbit::from_parts(v, basis, config))
    }
}

impl Qbit {
    pub fn builder(amplitudes: Amplitudes) -> QbitBuilder {
        QbitBuilder { amplitudes, basis: None, normalize: None, transform: false, config: None }
    }

    /// Unit vector in the canonical basis, global config.
    pub fn new(amplitudes: Amplitudes) -> Result<Qbit> {
        Self::builder(amplitudes).build()
    }

    pub(crate) fn from_parts(amplitudes: Amplitudes, basis: Basis, config: SimConfig) -> Qbit {
        let dim = amplitudes.len();
        Qbit(Rc::new(RefCell::new(Subsystem { dim, backing: Backing::Owned(amplitudes), basis, config })))
    }

    /// Parse bra-ket text such as `"0.6|0> -0.8j|1>"`.
    ///
    /// Without a basis one is inferred from the symbols: `0`/`1` only gives
    /// the standard basis, single characters of [`STD_SYMBOLS`] a canonical
    /// basis up to the highest one, anything else a canonical basis labelled
    /// with the symbols in the order they appear.
    pub fn parse(text: &str, basis: Option<Basis>) -> Result<Qbit> {
        Self::parse_with(text, basis, None)
    }

    pub fn parse_with(text: &str, basis: Option<Basis>, normalize: Option<bool>) -> Result<Qbit> {
        let terms = parse_kets(text)?;
        let basis = match basis {
            Some(b) => b,
            None => infer_basis(&terms)?,
        };
        let mut coords = Amplitudes::zeros(basis.len());
        for (symbol, coef) in &terms {
            let i = basis.find_symbol(symbol).ok_or_else(|| {
                QError::incomprehensible(format!("|{symbol}> is not an eigenstate of the basis"))
            })?;
            coords[i] += coef;
        }
        let v = basis.inverse_transform(&coords)?;
        let mut builder = Self::builder(v).basis(basis);
        if let Some(on) = normalize {
            builder = builder.normalize(on);
        }
        builder.build()
    }

    /// Haar-random state of dimension `n`.
    pub fn random(n: usize) -> Result<Qbit> {
        Self::random_with(n, &mut rand::thread_rng())
    }

    pub fn random_with<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Result<Qbit> {
        if n < 2 {
            return Err(QError::init(format!("Error to initialize Qbit: dimension {n} is below 2")));
        }
        Self::builder(random_unitary(n, rng).column(0).into_owned()).normalize(true).build()
    }

    /// Random state with `basis` as its default basis.
    pub fn random_in(basis: &Basis) -> Result<Qbit> {
        Self::random_in_with(basis, &mut rand::thread_rng())
    }

    pub fn random_in_with<R: Rng + ?Sized>(basis: &Basis, rng: &mut R) -> Result<Qbit> {
        let n = basis.len();
        Self::builder(random_unitary(n, rng).column(0).into_owned())
            .basis(basis.clone())
            .normalize(true)
            .build()
    }

    pub fn dim(&self) -> usize {
        self.0.borrow().dim
    }

    pub fn is_entangled(&self) -> bool {
        matches!(self.0.borrow().backing, Backing::Entangled { .. })
    }

    /// The group holding this subsystem, if any.
    pub fn group(&self) -> Option<Qent> {
        self.entanglement().map(|(g, _)| g)
    }

    /// Current position inside the group.
    pub fn position(&self) -> Option<usize> {
        self.entanglement().map(|(_, p)| p)
    }

    pub(crate) fn entanglement(&self) -> Option<(Qent, usize)> {
        match &self.0.borrow().backing {
            Backing::Entangled { group, position } => Some((group.clone(), *position)),
            Backing::Owned(_) => None,
        }
    }

    pub fn ptr_eq(&self, other: &Qbit) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// `self ⊗ other` as a composite.
    pub fn tensor(&self, other: &Qbit) -> Result<Qbits> {
        Qbits::new(vec![self.clone(), other.clone()])
    }

    /// `n` independent copies. Only an unentangled subsystem can be copied.
    pub fn replicate(&self, n: usize) -> Result<Qbits> {
        let sub = self.0.borrow();
        let Backing::Owned(v) = &sub.backing else {
            return Err(QError::illegal("This state is in entanglement"));
        };
        let copies = (0..n).map(|_| Qbit::from_parts(v.clone(), sub.basis.clone(), sub.config)).collect();
        Qbits::new(copies)
    }

    /// Own amplitudes, or the marginal summary when entangled.
    pub(crate) fn derive_state(&self) -> Result<Amplitudes> {
        let (group, position) = match &self.0.borrow().backing {
            Backing::Owned(v) => return Ok(v.clone()),
            Backing::Entangled { group, position } => (group.clone(), *position),
        };
        group.marginal(position)
    }
}

fn infer_basis(terms: &[(String, C64)]) -> Result<Basis> {
    if terms.iter().all(|(s, _)| s == "0" || s == "1") {
        return Ok(Basis::standard());
    }
    let indices: Option<Vec<usize>> = terms
        .iter()
        .map(|(s, _)| if s.len() == 1 { STD_SYMBOLS.find(s.as_str()) } else { None })
        .collect();
    if let Some(top) = indices.and_then(|ix| ix.into_iter().max()) {
        return Basis::canonical(top + 1);
    }
    if terms.len() >= 2 {
        let symbols = terms.iter().map(|(s, _)| s.clone()).collect();
        return Basis::canonical_with_symbols(terms.len(), Some(symbols));
    }
    Err(QError::incomprehensible(format!(
        "cannot infer a basis from the lone symbol |{}>",
        terms[0].0
    )))
}

impl QState for Qbit {
    fn len(&self) -> usize {
        self.dim()
    }

    fn spaces(&self) -> Vec<usize> {
        vec![self.dim()]
    }

    fn config(&self) -> SimConfig {
        self.0.borrow().config
    }

    fn basis(&self) -> Basis {
        self.0.borrow().basis.clone()
    }

    fn set_basis(&self, basis: Option<Basis>) -> Result<()> {
        let dim = self.dim();
        let basis = match basis {
            Some(b) if b.len() != dim => {
                return Err(QError::dimension(format!(
                    "Lengths of state and basis must be equal ({dim} vs {})",
                    b.len()
                )))
            }
            Some(b) => b,
            None => Basis::canonical(dim)?,
        };
        self.0.borrow_mut().basis = basis;
        Ok(())
    }

    fn apply(&self, transform: Transform) -> Result<()> {
        let dim = self.dim();
        if transform.dim() != dim {
            return Err(QError::dimension(format!(
                "operator of dimension {} applied to a subsystem of dimension {dim}",
                transform.dim()
            )));
        }
        // the borrow must end before a group touches its members
        let group = {
            let mut sub = self.0.borrow_mut();
            let tol = sub.config.tolerance();
            match &mut sub.backing {
                Backing::Owned(v) => {
                    *v = transform.matrix() * &*v;
                    round_error(v, tol);
                    None
                }
                Backing::Entangled { group, .. } => Some(group.clone()),
            }
        };
        match group {
            Some(g) => g.apply_to_subset(&transform, std::slice::from_ref(self)),
            None => Ok(()),
        }
    }

    fn measure_with(&self, basis: Option<&Basis>, rng: &mut dyn RngCore) -> Result<C64> {
        let basis = basis.cloned().unwrap_or_else(|| self.basis());
        if let Some(group) = self.group() {
            return group.measure_members(std::slice::from_ref(self), &basis, rng);
        }
        let mut sub = self.0.borrow_mut();
        let tol = sub.config.tolerance();
        let drawn = match &sub.backing {
            Backing::Owned(v) => sample(&basis, v, tol, rng)?,
            Backing::Entangled { .. } => return Err(QError::illegal("subsystem was entangled while measuring")),
        };
        sub.backing = Backing::Owned(basis.eigenstate(drawn.index)?);
        basis.measure_outcome_value(drawn.index)
    }

    fn state(&self) -> Result<Amplitudes> {
        self.config().ensure_cheat()?;
        self.derive_state()
    }

    fn is_approximate(&self) -> bool {
        self.is_entangled()
    }
}

impl fmt::Display for Qbit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.print_as(None) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "<Qstate @ {:p}, (Qbit)>", Rc::as_ptr(&self.0)),
        }
    }
}

impl fmt::Debug for Qbit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Qbit")
            .field("dim", &self.dim())
            .field("position", &self.position())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::titan::gates;
    use crate::core::titan::types::{real_ket, unit_ket, vectors_approx_eq};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn rejects_non_unit_vectors_unless_asked() {
        let err = Qbit::new(real_ket(&[1.0, 1.0])).unwrap_err();
        assert!(matches!(err, QError::Initialization(_)));
        assert!(err.to_string().contains("raised by Illegal Operation"));

        let q = Qbit::builder(real_ket(&[1.0, 1.0])).normalize(true).build().unwrap();
        let s = std::f64::consts::FRAC_1_SQRT_2;
        assert!(vectors_approx_eq(&q.state().unwrap(), &real_ket(&[s, s]), 1e-12));

        let auto = SimConfig::default().with_auto_normalize(true);
        assert!(Qbit::builder(real_ket(&[3.0, 4.0])).config(auto).build().is_ok());
        assert!(Qbit::builder(real_ket(&[0.0, 0.0])).normalize(true).build().is_err());
    }

    #[test]
    fn basis_length_must_match() {
        assert!(Qbit::builder(unit_ket(3, 0)).basis(Basis::standard()).build().is_err());
        let q = Qbit::new(unit_ket(2, 0)).unwrap();
        assert!(q.set_basis(Some(Basis::bell())).is_err());
        assert!(q.set_basis(Some(Basis::hadamard())).is_ok());
    }

    #[test]
    fn transform_flag_stores_coordinates() {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let q = Qbit::builder(real_ket(&[s, s])).basis(Basis::hadamard()).transform(true).build().unwrap();
        assert_eq!(q.state().unwrap(), real_ket(&[1.0, 0.0]));
    }

    #[test]
    fn parse_infers_bases() {
        let q = Qbit::parse("|1>", None).unwrap();
        assert_eq!(q.state().unwrap(), unit_ket(2, 1));

        let q = Qbit::parse("|2>", None).unwrap();
        assert_eq!(q.len(), 3);

        let q = Qbit::parse_with("|up> + |down>", None, Some(true)).unwrap();
        assert_eq!(q.basis().symbol(1).as_deref(), Some("down"));

        let s = std::f64::consts::FRAC_1_SQRT_2;
        let q = Qbit::parse("|+>", Some(Basis::hadamard())).unwrap();
        assert!(vectors_approx_eq(&q.state().unwrap(), &real_ket(&[s, s]), 1e-12));

        assert!(matches!(Qbit::parse("|x>", None), Err(QError::Incomprehensible(_))));
    }

    #[test]
    fn apply_and_measure_owned() {
        let q = Qbit::new(unit_ket(2, 0)).unwrap();
        gates::x().apply_to(&q).unwrap();
        assert_eq!(q.state().unwrap(), unit_ket(2, 1));
        assert!(q.apply(gates::cnot().into()).is_err());

        let mut rng = StdRng::seed_from_u64(5);
        assert_eq!(q.measure_with(None, &mut rng).unwrap(), c(1.0, 0.0));
        gates::h().apply_to(&q).unwrap();
        let v = q.measure_with(Some(&Basis::hadamard()), &mut rng).unwrap();
        assert_eq!(v, c(1.0, 0.0));
        assert_eq!(q.state().unwrap(), Basis::hadamard().eigenstate(1).unwrap());
    }

    #[test]
    fn replicate_copies_independent_states() {
        let q = Qbit::new(unit_ket(2, 1)).unwrap();
        let copies = q.replicate(3).unwrap();
        assert_eq!(copies.spaces(), vec![2, 2, 2]);
        gates::x().apply_to(&copies.members()[0]).unwrap();
        assert_eq!(q.state().unwrap(), unit_ket(2, 1));
    }

    #[test]
    fn cheat_gates_introspection() {
        let cfg = SimConfig::default().with_cheat(false);
        let q = Qbit::builder(unit_ket(2, 0)).config(cfg).build().unwrap();
        assert!(q.state().unwrap_err().is_not_allowed());
        assert!(q.probability(0, None).unwrap_err().is_not_allowed());
        assert!(q.print_as(None).unwrap_err().is_not_allowed());
        assert!(q.to_string().starts_with("<Qstate @ 0x"));
    }

    #[test]
    fn formats_kets() {
        let q = Qbit::builder(real_ket(&[1.0, -1.0])).normalize(true).build().unwrap();
        assert_eq!(q.to_string(), "+0.70711|0> -0.70711|1>");
        assert_eq!(q.print_as(Some(&Basis::hadamard())).unwrap(), "+1|->");
        assert_eq!(q.print_probs(None).unwrap(), "|0>: 50%\n|1>: 50%\n");
    }
}
