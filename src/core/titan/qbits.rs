//! Composite states.
//!
//! `Qbits` is an ordered view over leaf subsystems. It never owns amplitudes:
//! the state is derived from the members on demand, and operators are routed
//! to whichever member or entangled group they actually touch.
use std::cell::RefCell;
use std::fmt;
use std::ops::Range;

use num_complex::Complex64 as C64;
use rand::RngCore;

use super::basis::Basis;
use super::measure::{sample, MeasureOp, Transform};
use super::ops::Operator;
use super::qbit::Qbit;
use super::qent::Qent;
use super::qstate::QState;
use super::types::{kron_ket, unit_ket, Amplitudes};
use crate::config::SimConfig;
use crate::core::error::{QError, Result};

/// What [`Qbits::apply_at`] applies.
#[derive(Clone, Debug)]
pub enum OpSpec {
    Single(Operator),
    /// One operator per placement, see [`Target`].
    List(Vec<Operator>),
}

impl From<Operator> for OpSpec {
    fn from(op: Operator) -> Self {
        OpSpec::Single(op)
    }
}

impl From<&Operator> for OpSpec {
    fn from(op: &Operator) -> Self {
        OpSpec::Single(op.clone())
    }
}

impl From<Vec<Operator>> for OpSpec {
    fn from(ops: Vec<Operator>) -> Self {
        OpSpec::List(ops)
    }
}

/// Where [`Qbits::apply_at`] places its operator(s).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Target {
    /// A single operator must span the whole composite; a list starts at 0.
    #[default]
    Whole,
    /// Starting at this member; a list is laid out back to back from here.
    Start(usize),
    /// A single operator acts on these members in this order (they need not
    /// be adjacent); list entry `k` starts at member `positions[k]`.
    Positions(Vec<usize>),
}

/// Number of members, from `start`, whose dimensions multiply to `dim`.
fn span_of(dims: &[usize], start: usize, dim: usize) -> Result<usize> {
    let mut acc = 1;
    let mut k = start;
    while acc < dim && k < dims.len() {
        acc *= dims[k];
        k += 1;
    }
    if acc != dim || k == start {
        return Err(QError::dimension(format!(
            "an operator of dimension {dim} does not fit the subsystems {:?} from position {start}",
            dims
        )));
    }
    Ok(k - start)
}

/// Embed `spec` into the full space of subsystems `dims`, with identities on
/// every member it does not cover.
pub fn complete_operator(dims: &[usize], spec: &OpSpec, target: &Target) -> Result<Operator> {
    let mut placed: Vec<(usize, &Operator)> = match (spec, target) {
        (OpSpec::Single(op), Target::Whole) => {
            let total: usize = dims.iter().product();
            if op.dim() != total {
                return Err(QError::dimension(format!(
                    "operator of dimension {} applied to a space of dimension {total}",
                    op.dim()
                )));
            }
            vec![(0, op)]
        }
        (OpSpec::Single(op), Target::Start(k)) => vec![(*k, op)],
        (OpSpec::Single(op), Target::Positions(ps)) => match ps.as_slice() {
            [p] => vec![(*p, op)],
            _ => {
                return Err(QError::illegal(
                    "a single operator over several positions cannot be embedded; apply it through Qbits::apply_at",
                ))
            }
        },
        (OpSpec::List(ops), Target::Whole | Target::Start(_)) => {
            let mut at = match target {
                Target::Start(k) => *k,
                _ => 0,
            };
            let mut placed = Vec::with_capacity(ops.len());
            for op in ops {
                placed.push((at, op));
                at += span_of(dims, at, op.dim())?;
            }
            placed
        }
        (OpSpec::List(ops), Target::Positions(ps)) => {
            if ops.len() != ps.len() {
                return Err(QError::dimension(format!(
                    "{} operators for {} positions",
                    ops.len(),
                    ps.len()
                )));
            }
            ps.iter().copied().zip(ops).collect()
        }
    };
    placed.sort_by_key(|(at, _)| *at);

    let mut full = Operator::neutral();
    let mut i = 0;
    let mut next = placed.into_iter().peekable();
    while i < dims.len() {
        match next.peek() {
            Some(&(at, op)) if at == i => {
                i += span_of(dims, i, op.dim())?;
                full = full.tensor(op);
                next.next();
            }
            Some(&(at, _)) if at < i => {
                return Err(QError::illegal(format!("operators overlap at position {at}")));
            }
            _ => {
                full = full.tensor(&Operator::identity(dims[i]));
                i += 1;
            }
        }
    }
    if let Some((at, _)) = next.next() {
        return Err(QError::dimension(format!(
            "position {at} out of range for {} subsystems",
            dims.len()
        )));
    }
    Ok(full)
}

/// Group consecutive pieces and subsystems into the smallest runs whose
/// dimensions agree.
fn align(dims: &[usize], pieces: &[Operator]) -> Result<Vec<(Range<usize>, Vec<Operator>)>> {
    let misaligned = || QError::dimension(format!("operator pieces do not line up with the subsystems {dims:?}"));
    let mut out = Vec::new();
    let (mut p, mut m) = (0, 0);
    while m < dims.len() {
        let (p0, m0) = (p, m);
        let (mut pd, mut md) = (1usize, 1usize);
        loop {
            if m == m0 || md < pd {
                if m == dims.len() {
                    return Err(misaligned());
                }
                md *= dims[m];
                m += 1;
            } else if p == p0 || pd < md {
                if p == pieces.len() {
                    return Err(misaligned());
                }
                pd *= pieces[p].dim();
                p += 1;
            } else {
                break;
            }
        }
        out.push((m0..m, pieces[p0..p].to_vec()));
    }
    Ok(out)
}

/// Apply each run of `pieces` to the run of `members` it lines up with.
/// Identity runs are skipped; only runs spanning several members entangle.
fn route_pieces(members: &[Qbit], pieces: &[Operator]) -> Result<()> {
    let dims: Vec<usize> = members.iter().map(Qbit::dim).collect();
    for (range, run) in align(&dims, pieces)? {
        if run.iter().all(Operator::is_identity) {
            continue;
        }
        let chunk = run.iter().fold(Operator::neutral(), |acc, p| acc.tensor(p));
        match &members[range] {
            [single] => single.apply(chunk.into())?,
            joint => Qent::gen_ent(joint)?.apply_to_subset(&chunk.into(), joint)?,
        }
    }
    Ok(())
}

#[derive(Debug)]
pub struct Qbits {
    members: Vec<Qbit>,
    basis: RefCell<Option<Basis>>,
    config: SimConfig,
}

impl Qbits {
    /// Group `members` in order. Each leaf may appear once.
    pub fn new(members: Vec<Qbit>) -> Result<Qbits> {
        Self::check_members(&members).map_err(|e| QError::init_caused_by("Error to initialize the Qbits", e))?;
        let config = members[0].config();
        Ok(Qbits { members, basis: RefCell::new(None), config })
    }

    fn check_members(members: &[Qbit]) -> Result<()> {
        if members.is_empty() {
            return Err(QError::dimension("a composite needs at least one subsystem"));
        }
        for (k, q) in members.iter().enumerate() {
            if members[..k].iter().any(|o| o.ptr_eq(q)) {
                return Err(QError::illegal("Duplicate qubit not allowed"));
            }
        }
        Ok(())
    }

    /// Flatten several composites into one.
    pub fn concat(parts: &[&Qbits]) -> Result<Qbits> {
        Self::new(parts.iter().flat_map(|p| p.members.iter().cloned()).collect())
    }

    /// `self` followed by the members of `other`.
    pub fn extend(&self, other: &Qbits) -> Result<Qbits> {
        Self::concat(&[self, other])
    }

    /// `self` followed by `q`.
    pub fn push(&self, q: &Qbit) -> Result<Qbits> {
        let mut members = self.members.clone();
        members.push(q.clone());
        Self::new(members)
    }

    /// Composites may hold entangled members, so they are never copied.
    pub fn replicate(&self, _n: usize) -> Result<Qbits> {
        Err(QError::illegal("Entangled quantum states cannot be duplicated"))
    }

    pub fn members(&self) -> &[Qbit] {
        &self.members
    }

    pub fn get(&self, i: usize) -> Option<&Qbit> {
        self.members.get(i)
    }

    /// The group spanning exactly these members, if any.
    fn exact_group(&self) -> Option<Qent> {
        Qent::get_common(&self.members).filter(|g| g.member_count() == self.members.len())
    }

    /// Apply `spec` at `target`, padding with identities.
    pub fn apply_at(&self, spec: impl Into<OpSpec>, target: Target) -> Result<()> {
        let spec = spec.into();
        if let (OpSpec::Single(op), Target::Positions(ps)) = (&spec, &target) {
            if ps.len() > 1 {
                return self.apply_to_positions(op, ps);
            }
        }
        let full = complete_operator(&self.spaces(), &spec, &target)?;
        self.dispatch(Transform::Unitary(full))
    }

    fn apply_to_positions(&self, op: &Operator, positions: &[usize]) -> Result<()> {
        let subset = positions
            .iter()
            .map(|&p| {
                self.members.get(p).cloned().ok_or_else(|| {
                    QError::dimension(format!("position {p} out of range for {} subsystems", self.members.len()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::check_members(&subset)?;
        let span: usize = subset.iter().map(Qbit::dim).product();
        if span != op.dim() {
            return Err(QError::dimension(format!(
                "operator of dimension {} applied to subsystems spanning {span}",
                op.dim()
            )));
        }
        if op.is_separable() {
            return route_pieces(&subset, &op.pieces());
        }
        Qent::gen_ent(&subset)?.apply_to_subset(&op.into(), &subset)
    }

    /// Apply `op` to every member on its own.
    pub fn apply_to_each(&self, op: &Operator) -> Result<()> {
        if let Some(q) = self.members.iter().find(|q| q.dim() != op.dim()) {
            return Err(QError::dimension(format!(
                "operator of dimension {} cannot act on a subsystem of dimension {}",
                op.dim(),
                q.dim()
            )));
        }
        for q in &self.members {
            q.apply(op.into())?;
        }
        Ok(())
    }

    /// Route a full-space transform: each independent piece goes to the
    /// members it spans, anything else entangles the whole composite.
    fn dispatch(&self, transform: Transform) -> Result<()> {
        if transform.dim() != self.len() {
            return Err(QError::dimension(format!(
                "operator of dimension {} applied to a composite of dimension {}",
                transform.dim(),
                self.len()
            )));
        }
        if let Transform::Unitary(op) = &transform {
            if op.is_separable() {
                return route_pieces(&self.members, &op.pieces());
            }
        }
        if transform.is_identity() {
            return Ok(());
        }
        match self.members.as_slice() {
            [single] => single.apply(transform),
            members => Qent::gen_ent(members)?.apply_to_subset(&transform, members),
        }
    }

    /// The joint vector: the exact group vector when one group spans exactly
    /// these members (reordered to match), the product of member states otherwise.
    fn derive_state(&self) -> Result<Amplitudes> {
        if let Some(group) = self.exact_group() {
            group.prepare_members(&self.members)?;
            return Ok(group.snapshot());
        }
        self.members
            .iter()
            .try_fold(unit_ket(1, 0), |acc, q| Ok(kron_ket(&acc, &q.derive_state()?)))
    }
}

impl QState for Qbits {
    fn len(&self) -> usize {
        self.members.iter().map(Qbit::dim).product()
    }

    fn spaces(&self) -> Vec<usize> {
        self.members.iter().map(Qbit::dim).collect()
    }

    fn config(&self) -> SimConfig {
        self.config
    }

    /// Explicit basis, or the product of the members' bases.
    fn basis(&self) -> Basis {
        if let Some(b) = self.basis.borrow().as_ref() {
            return b.clone();
        }
        let mut parts = self.members.iter().map(QState::basis);
        let first = parts.next().unwrap_or_else(Basis::standard);
        parts.fold(first, |acc, b| acc.tensor(&b))
    }

    fn set_basis(&self, basis: Option<Basis>) -> Result<()> {
        if let Some(b) = &basis {
            if b.len() != self.len() {
                return Err(QError::dimension(format!(
                    "Lengths of state and basis must be equal ({} vs {})",
                    self.len(),
                    b.len()
                )));
            }
        }
        *self.basis.borrow_mut() = basis;
        Ok(())
    }

    fn apply(&self, transform: Transform) -> Result<()> {
        self.dispatch(transform)
    }

    fn measure_with(&self, basis: Option<&Basis>, rng: &mut dyn RngCore) -> Result<C64> {
        let basis = basis.cloned().unwrap_or_else(|| self.basis());
        if basis.len() != self.len() {
            return Err(QError::dimension(format!(
                "Wrong basis dimension (got {} expected {})",
                basis.len(),
                self.len()
            )));
        }
        if let Some(group) = self.exact_group() {
            return group.measure_members(&self.members, &basis, rng);
        }
        if self.members.iter().any(Qbit::is_entangled) {
            return Qent::gen_ent(&self.members)?.measure_members(&self.members, &basis, rng);
        }
        // all independent: sample a snapshot, then collapse through the
        // ordinary application path
        let snapshot = self.derive_state()?;
        let drawn = sample(&basis, &snapshot, self.config.tolerance(), rng)?;
        drop(snapshot);
        self.dispatch(MeasureOp::from_sample(&drawn)?.into())?;
        basis.measure_outcome_value(drawn.index)
    }

    fn state(&self) -> Result<Amplitudes> {
        self.config.ensure_cheat()?;
        self.derive_state()
    }

    fn is_approximate(&self) -> bool {
        self.exact_group().is_none() && self.members.iter().any(Qbit::is_entangled)
    }
}

impl fmt::Display for Qbits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.print_as(None) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "<Qstate @ {:p}, (Qbits)>", self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::titan::gates;
    use crate::core::titan::types::{c, unit_ket};

    fn zeros(n: usize) -> Qbits {
        Qbits::new((0..n).map(|_| Qbit::new(unit_ket(2, 0)).unwrap()).collect()).unwrap()
    }

    #[test]
    fn rejects_duplicates_and_flattens() {
        let q = Qbit::new(unit_ket(2, 0)).unwrap();
        let err = Qbits::new(vec![q.clone(), q.clone()]).unwrap_err();
        assert!(err.to_string().contains("Duplicate qubit not allowed"));

        let a = zeros(2);
        let b = zeros(3);
        let ab = a.extend(&b).unwrap();
        assert_eq!(ab.spaces(), vec![2; 5]);
        assert!(ab.extend(&a).is_err());
        assert!(ab.replicate(2).is_err());
    }

    #[test]
    fn complete_operator_pads_with_identities() {
        let full = complete_operator(&[2, 2, 2], &gates::x().into(), &Target::Start(1)).unwrap();
        assert_eq!(full.piece_dims(), vec![2, 2, 2]);
        let expected = gates::i2().tensor(&gates::x()).tensor(&gates::i2());
        assert!(full.approx_eq(&expected, 0.0));

        let spec = OpSpec::List(vec![gates::h(), gates::z()]);
        let full = complete_operator(&[2, 2, 2], &spec, &Target::Positions(vec![2, 0])).unwrap();
        let expected = gates::z().tensor(&gates::i2()).tensor(&gates::h());
        assert!(full.approx_eq(&expected, 0.0));

        assert!(complete_operator(&[2, 3], &gates::cnot().into(), &Target::Start(0)).is_err());
        assert!(complete_operator(&[2, 2], &gates::x().into(), &Target::Start(2)).is_err());
        assert!(complete_operator(&[2, 2], &gates::x().into(), &Target::Whole).is_err());
    }

    #[test]
    fn identity_pieces_do_not_entangle() {
        let qs = zeros(3);
        qs.apply_at(&gates::x(), Target::Start(1)).unwrap();
        assert!(qs.members().iter().all(|q| !q.is_entangled()));
        assert_eq!(qs.state().unwrap(), unit_ket(8, 0b010));
    }

    #[test]
    fn joint_piece_entangles_only_its_span() {
        let qs = zeros(3);
        qs.apply_at(&gates::h(), Target::Start(0)).unwrap();
        qs.apply_at(&gates::cnot(), Target::Start(0)).unwrap();
        assert!(qs.members()[0].is_entangled() && qs.members()[1].is_entangled());
        assert!(!qs.members()[2].is_entangled());
        assert!(qs.is_approximate());
    }

    #[test]
    fn scattered_positions() {
        let qs = zeros(3);
        qs.apply_at(&gates::x(), Target::Start(2)).unwrap();
        qs.apply_at(&gates::cnot(), Target::Positions(vec![2, 0])).unwrap();
        assert_eq!(qs.state().unwrap(), unit_ket(8, 0b101));
    }

    #[test]
    fn scattered_product_operator_stays_separable() {
        let qs = zeros(3);
        qs.apply_at(gates::x().tensor(&gates::x()), Target::Positions(vec![2, 0])).unwrap();
        assert!(qs.members().iter().all(|q| !q.is_entangled()));
        assert_eq!(qs.state().unwrap(), unit_ket(8, 0b101));

        // order matters: the second piece lands on the second listed position
        let qs = zeros(3);
        qs.apply_at(gates::i2().tensor(&gates::x()), Target::Positions(vec![2, 1])).unwrap();
        assert!(qs.members().iter().all(|q| !q.is_entangled()));
        assert_eq!(qs.state().unwrap(), unit_ket(8, 0b010));
    }

    #[test]
    fn apply_to_each_flips_all() {
        let qs = zeros(3);
        gates::x().apply_to_each_subsystem(&qs).unwrap();
        assert_eq!(qs.state().unwrap(), unit_ket(8, 0b111));
        assert!(qs.apply_to_each(&gates::cnot()).is_err());
    }

    #[test]
    fn default_basis_is_product_of_members() {
        let qs = zeros(2);
        qs.members()[1].set_basis(Some(Basis::hadamard())).unwrap();
        assert_eq!(qs.basis().symbol(3).as_deref(), Some("1-"));
        assert_eq!(qs.probability(0, Some(&Basis::canonical(4).unwrap())).unwrap(), 1.0);
        assert_eq!(qs.measure(Some(&Basis::canonical(4).unwrap())).unwrap(), c(0.0, 0.0));
    }
}
