//! Entangled groups.
//!
//! A `Qent` owns the joint amplitude vector of every subsystem that has
//! interacted with another one. Members are kept in an explicit order; the
//! vector is laid out as a mixed-radix index over that order (first member is
//! the most significant digit). Operators on scattered members are applied by
//! first swapping those members into one contiguous block.
//!
//! The group holds weak handles to its members and each member holds a strong
//! handle back, so dropping every member drops the group.
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use num_complex::Complex64 as C64;
use rand::{Rng, RngCore};
use tracing::{debug, trace};

use super::basis::Basis;
use super::digits::{split_dims, MixedRadix};
use super::measure::{pick_outcome, sample, MeasureOp, Transform};
use super::ops::Operator;
use super::qbit::{Backing, Qbit, Subsystem};
use super::qstate::QState;
use super::types::{c, kron_ket, round_error, unit_ket, Amplitudes, CMatrix};
use crate::config::SimConfig;
use crate::core::error::{QError, Result};

#[derive(Clone)]
struct Member {
    handle: Weak<RefCell<Subsystem>>,
    dim: usize,
}

impl Member {
    fn is(&self, q: &Qbit) -> bool {
        self.handle.as_ptr() == Rc::as_ptr(&q.0)
    }
}

/// An explicit basis and the member order its factors refer to.
struct PinnedBasis {
    basis: Basis,
    order: Vec<Weak<RefCell<Subsystem>>>,
}

pub(crate) struct QentInner {
    amplitudes: Amplitudes,
    members: Vec<Member>,
    basis: Option<PinnedBasis>,
    config: SimConfig,
}

#[derive(Clone)]
pub struct Qent(Rc<RefCell<QentInner>>);

impl Qent {
    /// The group every subsystem of `members` already belongs to, if there is one.
    pub(crate) fn get_common(members: &[Qbit]) -> Option<Qent> {
        let (first, rest) = members.split_first()?;
        let group = first.group()?;
        rest.iter()
            .all(|q| q.group().is_some_and(|g| g.ptr_eq(&group)))
            .then_some(group)
    }

    /// The common group of `members`, forming one if needed.
    pub(crate) fn gen_ent(members: &[Qbit]) -> Result<Qent> {
        match Self::get_common(members) {
            Some(group) => Ok(group),
            None => Self::form(members),
        }
    }

    /// Merge `targets` into one group. Independent subsystems contribute their
    /// own vector; entangled ones bring their whole group along. Factors are
    /// tensored in traversal order.
    pub(crate) fn form(targets: &[Qbit]) -> Result<Qent> {
        if targets.is_empty() {
            return Err(QError::init("Error to initialize the Qbits entangled: no subsystem given"));
        }
        let mut members: Vec<Member> = Vec::new();
        let mut amplitudes = unit_ket(1, 0);
        let mut absorbed: Vec<Qent> = Vec::new();
        let mut config = None;
        for q in targets {
            let sub = q.0.borrow();
            config.get_or_insert(sub.config);
            match &sub.backing {
                Backing::Owned(v) => {
                    if members.iter().any(|m| m.is(q)) {
                        continue;
                    }
                    amplitudes = kron_ket(&amplitudes, v);
                    members.push(Member { handle: Rc::downgrade(&q.0), dim: sub.dim });
                }
                Backing::Entangled { group, .. } => {
                    if absorbed.iter().any(|g| g.ptr_eq(group)) {
                        continue;
                    }
                    let inner = group.0.borrow();
                    amplitudes = kron_ket(&amplitudes, &inner.amplitudes);
                    members.extend(inner.members.iter().cloned());
                    absorbed.push(group.clone());
                }
            }
        }
        let config = config.unwrap_or_default();
        let qent = Qent(Rc::new(RefCell::new(QentInner { amplitudes, members, basis: None, config })));
        drop(absorbed);
        qent.repoint_all();
        debug!(dims = ?qent.dims(), len = qent.len(), "entangled group formed");
        Ok(qent)
    }

    fn repoint_all(&self) {
        let inner = self.0.borrow();
        for (position, m) in inner.members.iter().enumerate() {
            if let Some(rc) = m.handle.upgrade() {
                rc.borrow_mut().backing = Backing::Entangled { group: self.clone(), position };
            }
        }
    }

    pub fn ptr_eq(&self, other: &Qent) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn member_count(&self) -> usize {
        self.0.borrow().members.len()
    }

    /// Dimension of each member, in the current order.
    pub fn dims(&self) -> Vec<usize> {
        self.0.borrow().members.iter().map(|m| m.dim).collect()
    }

    /// Live members in the current order.
    pub fn members(&self) -> Vec<Qbit> {
        self.0.borrow().members.iter().filter_map(|m| m.handle.upgrade().map(Qbit)).collect()
    }

    /// Amplitudes in the current member order, bypassing the cheat check.
    pub(crate) fn snapshot(&self) -> Amplitudes {
        self.0.borrow().amplitudes.clone()
    }

    fn position_of(&self, q: &Qbit) -> Result<usize> {
        match q.entanglement() {
            Some((group, position)) if group.ptr_eq(self) => Ok(position),
            _ => Err(QError::illegal("subsystem is not a member of this entangled group")),
        }
    }

    fn positions_of(&self, subset: &[Qbit]) -> Result<Vec<usize>> {
        subset.iter().map(|q| self.position_of(q)).collect()
    }

    /// Exchange the members at positions `i` and `j`, reordering the vector
    /// so it still describes the same state.
    pub fn swap(&self, i: usize, j: usize) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        let n = inner.members.len();
        if i >= n || j >= n {
            return Err(QError::dimension(format!("cannot swap positions {i} and {j} in a group of {n}")));
        }
        if i == j {
            return Ok(());
        }
        let dims: Vec<usize> = inner.members.iter().map(|m| m.dim).collect();
        if dims[i] == dims[j] {
            let amps = inner.amplitudes.as_mut_slice();
            let mut digits = MixedRadix::new(&dims);
            for x in 0..dims[i] {
                for y in x + 1..dims[i] {
                    loop {
                        digits.set(i, x);
                        digits.set(j, y);
                        let a = digits.value();
                        digits.set(i, y);
                        digits.set(j, x);
                        amps.swap(a, digits.value());
                        if !digits.increment_skipping(&[i, j]) {
                            break;
                        }
                    }
                }
            }
        } else {
            // the radix itself changes: gather into the swapped layout
            let mut swapped = dims.clone();
            swapped.swap(i, j);
            let mut digits = MixedRadix::new(&swapped);
            let mut out = Amplitudes::zeros(inner.amplitudes.len());
            loop {
                let mut old = digits.digits().to_vec();
                old.swap(i, j);
                let src = old.iter().zip(&dims).fold(0, |acc, (&d, &b)| acc * b + d);
                out[digits.value()] = inner.amplitudes[src];
                if !digits.increment() {
                    break;
                }
            }
            inner.amplitudes = out;
        }
        inner.members.swap(i, j);
        for pos in [i, j] {
            if let Some(rc) = inner.members[pos].handle.upgrade() {
                if let Backing::Entangled { position, .. } = &mut rc.borrow_mut().backing {
                    *position = pos;
                }
            }
        }
        trace!(i, j, "swapped subsystems");
        Ok(())
    }

    /// Bring the members at `positions` together, in the given order, in a
    /// block starting at the lowest of them. Others keep their relative order.
    /// Returns the start of the block; a second call with the result is a no-op.
    pub fn prepare(&self, positions: &[usize]) -> Result<usize> {
        let n = self.member_count();
        if let Some(&p) = positions.iter().find(|&&p| p >= n) {
            return Err(QError::dimension(format!("position {p} out of range for a group of {n}")));
        }
        for (k, p) in positions.iter().enumerate() {
            if positions[..k].contains(p) {
                return Err(QError::illegal(format!("position {p} listed twice")));
            }
        }
        let Some(&start) = positions.iter().min() else {
            return Err(QError::illegal("cannot prepare an empty set of subsystems"));
        };
        // order[pos] = where that member sat before this call
        let mut order: Vec<usize> = (0..n).collect();
        for (k, &p) in positions.iter().enumerate() {
            let target = start + k;
            let mut cur = order.iter().position(|&o| o == p).unwrap_or(target);
            while cur > target {
                self.swap(cur - 1, cur)?;
                order.swap(cur - 1, cur);
                cur -= 1;
            }
        }
        Ok(start)
    }

    /// [`Qent::prepare`] addressed by member handles.
    pub fn prepare_members(&self, subset: &[Qbit]) -> Result<usize> {
        let positions = self.positions_of(subset)?;
        self.prepare(&positions)
    }

    /// `m` on the `count` members starting at `start`, identity elsewhere,
    /// without building the full-size matrix.
    fn apply_local(&self, m: &CMatrix, start: usize, count: usize) {
        let mut inner = self.0.borrow_mut();
        let dims: Vec<usize> = inner.members.iter().map(|mb| mb.dim).collect();
        let (before, span, after) = split_dims(&dims, start, count);
        let mut block = Amplitudes::zeros(span);
        for b in 0..before {
            for a in 0..after {
                let base = b * span * after + a;
                for s in 0..span {
                    block[s] = inner.amplitudes[base + s * after];
                }
                let out = m * &block;
                for s in 0..span {
                    inner.amplitudes[base + s * after] = out[s];
                }
            }
        }
        let tol = inner.config.tolerance();
        round_error(&mut inner.amplitudes, tol);
    }

    /// Apply `transform` to `subset`, which may be scattered across the group.
    pub fn apply_to_subset(&self, transform: &Transform, subset: &[Qbit]) -> Result<()> {
        let positions = self.positions_of(subset)?;
        let dims = self.dims();
        let span: usize = positions.iter().map(|&p| dims[p]).product();
        if span != transform.dim() {
            return Err(QError::dimension(format!(
                "operator of dimension {} applied to subsystems spanning {span}",
                transform.dim()
            )));
        }
        let start = self.prepare(&positions)?;
        self.apply_local(transform.matrix(), start, positions.len());
        Ok(())
    }

    /// Apply `op` to each member on its own.
    pub fn apply_to_each(&self, op: &Operator) -> Result<()> {
        let dims = self.dims();
        if let Some(&d) = dims.iter().find(|&&d| d != op.dim()) {
            return Err(QError::dimension(format!(
                "operator of dimension {} cannot act on a subsystem of dimension {d}",
                op.dim()
            )));
        }
        for k in 0..dims.len() {
            self.apply_local(op.matrix(), k, 1);
        }
        Ok(())
    }

    /// Measure `subset` in `basis` (a basis of the subset's joint space, in the
    /// order given). The rest of the group is left in the matching
    /// post-measurement state.
    pub fn measure_members(&self, subset: &[Qbit], basis: &Basis, rng: &mut dyn RngCore) -> Result<C64> {
        let positions = self.positions_of(subset)?;
        let dims = self.dims();
        let span: usize = positions.iter().map(|&p| dims[p]).product();
        if basis.len() != span {
            return Err(QError::dimension(format!(
                "Wrong basis dimension (got {} expected {span})",
                basis.len()
            )));
        }
        let start = self.prepare(&positions)?;
        if positions.len() == dims.len() {
            return self.collapse_whole(basis, rng);
        }

        let probs = self.outcome_probabilities(basis, start, positions.len());
        let r: f64 = rng.gen();
        let index = pick_outcome(probs.iter().copied(), r);
        let projector = MeasureOp::new(basis, index, c(probs[index].sqrt(), 0.0))?;
        let transform = Transform::from(projector);
        self.apply_local(transform.matrix(), start, positions.len());
        trace!(index, p = probs[index], "partial measurement");
        basis.measure_outcome_value(index)
    }

    /// `p_i = ‖(|e_i⟩⟨e_i| ⊗ I)ψ‖²` for the block of `count` members at `start`.
    fn outcome_probabilities(&self, basis: &Basis, start: usize, count: usize) -> Vec<f64> {
        let inner = self.0.borrow();
        let dims: Vec<usize> = inner.members.iter().map(|m| m.dim).collect();
        let (before, span, after) = split_dims(&dims, start, count);
        let m = basis.matrix();
        let mut probs = vec![0.0; span];
        let mut block = Amplitudes::zeros(span);
        for b in 0..before {
            for a in 0..after {
                let base = b * span * after + a;
                for s in 0..span {
                    block[s] = inner.amplitudes[base + s * after];
                }
                for (p, z) in probs.iter_mut().zip(m.ad_mul(&block).iter()) {
                    *p += z.norm_sqr();
                }
            }
        }
        probs
    }

    /// Measure the whole group and overwrite the vector with the eigenstate drawn.
    fn collapse_whole(&self, basis: &Basis, rng: &mut dyn RngCore) -> Result<C64> {
        let mut inner = self.0.borrow_mut();
        let tol = inner.config.tolerance();
        let drawn = sample(basis, &inner.amplitudes, tol, rng)?;
        inner.amplitudes = basis.eigenstate(drawn.index)?;
        trace!(index = drawn.index, "group collapsed");
        basis.measure_outcome_value(drawn.index)
    }

    /// Per-value probability of the member at `position`, square-rooted into a
    /// vector. Relative phases are lost, so this is a display aid and not a
    /// reduced state. Cheat-gated.
    pub fn reduced_probability_vector(&self, position: usize) -> Result<Amplitudes> {
        self.config().ensure_cheat()?;
        self.marginal(position)
    }

    /// Put the members back in the order recorded by `set_basis`, if any.
    fn restore_basis_order(&self) -> Result<()> {
        let positions = {
            let inner = self.0.borrow();
            let Some(pinned) = &inner.basis else {
                return Ok(());
            };
            pinned
                .order
                .iter()
                .map(|w| {
                    inner
                        .members
                        .iter()
                        .position(|m| Weak::ptr_eq(&m.handle, w))
                        .ok_or_else(|| QError::illegal("a member of the pinned basis order left the group"))
                })
                .collect::<Result<Vec<_>>>()?
        };
        self.prepare(&positions)?;
        Ok(())
    }

    pub(crate) fn marginal(&self, position: usize) -> Result<Amplitudes> {
        let inner = self.0.borrow();
        let dims: Vec<usize> = inner.members.iter().map(|m| m.dim).collect();
        if position >= dims.len() {
            return Err(QError::dimension(format!(
                "position {position} out of range for a group of {}",
                dims.len()
            )));
        }
        let (_, d, after) = split_dims(&dims, position, 1);
        let mut acc = vec![0.0; d];
        for (idx, z) in inner.amplitudes.iter().enumerate() {
            acc[(idx / after) % d] += z.norm_sqr();
        }
        Ok(Amplitudes::from_iterator(d, acc.into_iter().map(|p| c(p.sqrt(), 0.0))))
    }
}

impl QState for Qent {
    fn len(&self) -> usize {
        self.0.borrow().amplitudes.len()
    }

    fn spaces(&self) -> Vec<usize> {
        self.dims()
    }

    fn config(&self) -> SimConfig {
        self.0.borrow().config
    }

    /// Explicit basis, or the product of the members' own bases. An explicit
    /// basis refers to the member order at the time it was set; `state`,
    /// `apply` and `measure` restore that order first.
    fn basis(&self) -> Basis {
        if let Some(pinned) = &self.0.borrow().basis {
            return pinned.basis.clone();
        }
        let inner = self.0.borrow();
        let mut parts = inner.members.iter().map(|m| match m.handle.upgrade() {
            Some(rc) => rc.borrow().basis.clone(),
            None => Basis::canonical(m.dim).unwrap_or_else(|_| Basis::standard()),
        });
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
        let mut inner = self.0.borrow_mut();
        let order = inner.members.iter().map(|m| m.handle.clone()).collect();
        inner.basis = basis.map(|basis| PinnedBasis { basis, order });
        Ok(())
    }

    /// Applies to the members in their current order.
    fn apply(&self, transform: Transform) -> Result<()> {
        if transform.dim() != self.len() {
            return Err(QError::dimension(format!(
                "operator of dimension {} applied to a group of dimension {}",
                transform.dim(),
                self.len()
            )));
        }
        self.restore_basis_order()?;
        let n = self.member_count();
        self.apply_local(transform.matrix(), 0, n);
        Ok(())
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
        self.restore_basis_order()?;
        self.collapse_whole(&basis, rng)
    }

    fn state(&self) -> Result<Amplitudes> {
        self.config().ensure_cheat()?;
        self.restore_basis_order()?;
        Ok(self.snapshot())
    }
}

impl fmt::Debug for Qent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Qent").field("dims", &self.dims()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::titan::gates;
    use crate::core::titan::types::{real_ket, vectors_approx_eq};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn qubit(a: f64, b: f64) -> Qbit {
        Qbit::builder(real_ket(&[a, b])).normalize(true).build().unwrap()
    }

    fn raw(q: &Qent) -> Amplitudes {
        q.snapshot()
    }

    #[test]
    fn form_tensors_in_traversal_order() {
        let (a, b) = (qubit(1.0, 0.0), qubit(0.0, 1.0));
        let g = Qent::form(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(raw(&g), real_ket(&[0.0, 1.0, 0.0, 0.0]));
        assert_eq!((a.position(), b.position()), (Some(0), Some(1)));
        assert!(Qent::get_common(&[a, b]).is_some_and(|c| c.ptr_eq(&g)));
    }

    #[test]
    fn form_merges_existing_groups() {
        let qs: Vec<Qbit> = (0..4).map(|_| qubit(1.0, 0.0)).collect();
        let left = Qent::form(&qs[..2]).unwrap();
        let right = Qent::form(&qs[2..]).unwrap();
        assert!(!left.ptr_eq(&right));
        let all = Qent::gen_ent(&[qs[3].clone(), qs[0].clone()]).unwrap();
        assert_eq!(all.dims(), vec![2, 2, 2, 2]);
        // right's members come first because qs[3] was visited first
        assert_eq!(qs[2].position(), Some(0));
        assert_eq!(qs[0].position(), Some(2));
        assert!(qs.iter().all(|q| q.group().is_some_and(|g| g.ptr_eq(&all))));
    }

    #[test]
    fn swap_is_an_involution_and_updates_positions() {
        let mut rng = StdRng::seed_from_u64(11);
        let qs: Vec<Qbit> = [2, 3, 2].iter().map(|&d| Qbit::random_with(d, &mut rng).unwrap()).collect();
        let g = Qent::form(&qs).unwrap();
        let before = raw(&g);
        g.swap(0, 1).unwrap();
        assert_eq!(g.dims(), vec![3, 2, 2]);
        assert_eq!(qs[0].position(), Some(1));
        g.swap(0, 1).unwrap();
        assert_eq!(raw(&g), before);
        g.swap(0, 2).unwrap();
        g.swap(2, 0).unwrap();
        assert_eq!(raw(&g), before);
        assert!(g.swap(0, 3).is_err());
    }

    #[test]
    fn prepare_is_idempotent_and_keeps_order() {
        let qs: Vec<Qbit> = (0..5).map(|_| qubit(1.0, 0.0)).collect();
        let g = Qent::form(&qs).unwrap();
        let start = g.prepare(&[3, 1]).unwrap();
        assert_eq!(start, 1);
        let order: Vec<usize> = qs.iter().map(|q| q.position().unwrap()).collect();
        assert_eq!(order, vec![0, 2, 3, 1, 4]);
        assert_eq!(g.prepare(&[1, 2]).unwrap(), 1);
        let again: Vec<usize> = qs.iter().map(|q| q.position().unwrap()).collect();
        assert_eq!(again, order);
        assert!(g.prepare(&[1, 1]).is_err());
    }

    #[test]
    fn apply_to_scattered_subset() {
        let qs: Vec<Qbit> = (0..3).map(|_| qubit(1.0, 0.0)).collect();
        let g = Qent::form(&qs).unwrap();
        g.apply_to_subset(&gates::x().into(), &qs[2..]).unwrap();
        let subset = [qs[2].clone(), qs[0].clone()];
        g.apply_to_subset(&gates::cnot().into(), &subset).unwrap();
        // control on qs[2], target qs[0]
        let expected = [1.0, 0.0, 1.0];
        for (q, want) in qs.iter().zip(expected) {
            assert_eq!(q.derive_state().unwrap(), real_ket(&[1.0 - want, want]));
        }
        assert!(g.apply_to_subset(&gates::x().into(), &subset).is_err());
    }

    #[test]
    fn marginal_discards_phase() {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let (a, b) = (qubit(s, -s), qubit(1.0, 0.0));
        let g = Qent::form(&[a, b]).unwrap();
        let m = g.reduced_probability_vector(0).unwrap();
        assert!(vectors_approx_eq(&m, &real_ket(&[s, s]), 1e-12));
        assert!(g.reduced_probability_vector(2).is_err());
    }

    #[test]
    fn explicit_basis_survives_reordering() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..12 {
            let (a, b) = (qubit(0.0, 1.0), qubit(1.0, 0.0));
            let g = Qent::form(&[a.clone(), b.clone()]).unwrap();
            // hadamard on a, standard on b
            g.set_basis(Some(Basis::hadamard().tensor(&Basis::standard()))).unwrap();
            g.prepare_members(&[b.clone(), a.clone()]).unwrap();
            assert_eq!(a.position(), Some(1));
            let outcome = g.measure_with(None, &mut rng).unwrap();
            assert_eq!(outcome.re as usize % 2, 0);
            assert_eq!((a.position(), b.position()), (Some(0), Some(1)));
        }
    }

    #[test]
    fn explicit_basis_fixes_the_reported_order() {
        let (a, b) = (qubit(0.0, 1.0), qubit(1.0, 0.0));
        let g = Qent::form(&[a.clone(), b.clone()]).unwrap();
        g.set_basis(Some(Basis::canonical(4).unwrap())).unwrap();
        g.swap(0, 1).unwrap();
        assert_eq!(g.state().unwrap(), real_ket(&[0.0, 0.0, 1.0, 0.0]));
        assert!(g.set_basis(Some(Basis::standard())).is_err());
    }

    #[test]
    fn partial_measurement_keeps_correlations() {
        let mut rng = StdRng::seed_from_u64(21);
        for _ in 0..20 {
            let (a, b) = (qubit(1.0, 1.0), qubit(1.0, 0.0));
            let g = Qent::form(&[a.clone(), b.clone()]).unwrap();
            g.apply(gates::cnot().into()).unwrap();
            let first = g.measure_members(&[a.clone()], &Basis::standard(), &mut rng).unwrap();
            let second = b.measure_with(None, &mut rng).unwrap();
            assert_eq!(first, second);
            assert!((crate::core::titan::types::norm_sqr(&raw(&g)) - 1.0).abs() < 1e-12);
        }
    }
}
