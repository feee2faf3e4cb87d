//! The contract shared by single subsystems, composites and entangled groups.
use num_complex::Complex64 as C64;
use rand::RngCore;

use super::basis::Basis;
use super::measure::Transform;
use super::notation::{format_ket, format_probs};
use super::types::Amplitudes;
use crate::config::SimConfig;
use crate::core::error::{QError, Result};

pub trait QState {
    /// Dimension of the Hilbert space.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimension of each leaf subsystem, in order.
    fn spaces(&self) -> Vec<usize>;

    fn config(&self) -> SimConfig;

    /// Default basis for measurement and display.
    fn basis(&self) -> Basis;

    /// `None` restores the default.
    fn set_basis(&self, basis: Option<Basis>) -> Result<()>;

    /// Pre-multiply the amplitudes by `transform`.
    fn apply(&self, transform: Transform) -> Result<()>;

    /// Measure, collapse, and report the readout value of the outcome.
    fn measure_with(&self, basis: Option<&Basis>, rng: &mut dyn RngCore) -> Result<C64>;

    fn measure(&self, basis: Option<&Basis>) -> Result<C64> {
        self.measure_with(basis, &mut rand::thread_rng())
    }

    /// Raw amplitudes in the canonical frame. Cheat-gated.
    fn state(&self) -> Result<Amplitudes>;

    /// True when [`QState::state`] is a probability summary rather than an amplitude vector.
    fn is_approximate(&self) -> bool {
        false
    }

    /// `|⟨e_i|ψ⟩|²`. Cheat-gated.
    fn probability(&self, i: usize, basis: Option<&Basis>) -> Result<f64> {
        let v = self.state()?;
        let owned;
        let b = match basis {
            Some(b) => b,
            None => {
                owned = self.basis();
                &owned
            }
        };
        let coords = b.transform_with(&v, self.config().tolerance())?;
        coords.get(i).map(|z| z.norm_sqr()).ok_or_else(|| {
            QError::dimension(format!("outcome {i} out of range for a basis of length {}", b.len()))
        })
    }

    /// Ket notation of the state seen from `basis`. Cheat-gated.
    fn print_as(&self, basis: Option<&Basis>) -> Result<String> {
        let v = self.state()?;
        let cfg = self.config();
        let owned;
        let b = match basis {
            Some(b) => b,
            None => {
                owned = self.basis();
                &owned
            }
        };
        let coords = b.transform_with(&v, cfg.tolerance())?;
        Ok(format_ket(&coords, |i| b.symbol(i).unwrap_or_default(), cfg.display_digits, display_threshold(&cfg), self.is_approximate()))
    }

    /// One `"|s>: p%"` line per eigenstate of `basis`. Cheat-gated.
    fn print_probs(&self, basis: Option<&Basis>) -> Result<String> {
        let v = self.state()?;
        let cfg = self.config();
        let owned;
        let b = match basis {
            Some(b) => b,
            None => {
                owned = self.basis();
                &owned
            }
        };
        let coords = b.transform_with(&v, cfg.tolerance())?;
        Ok(format_probs(&coords, |i| b.symbol(i).unwrap_or_default(), cfg.display_digits))
    }
}

/// Amplitudes below half a displayed unit are left out of a ket.
fn display_threshold(cfg: &SimConfig) -> f64 {
    let digits = i32::try_from(cfg.display_digits).unwrap_or(i32::MAX);
    cfg.tolerance().max(0.5 * 10f64.powi(-digits))
}
