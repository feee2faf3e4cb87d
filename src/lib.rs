//! Pure-state simulation of qubits and qudits with lazy entanglement tracking.
//!
//! Subsystems stay independent until an operator or a measurement spans more
//! than one of them; only then are their vectors merged into a shared group.

pub mod config;
pub mod core;

pub use crate::config::SimConfig;
pub use crate::core::error::{QError, Result};
pub use crate::core::titan::basis::Basis;
pub use crate::core::titan::gates;
pub use crate::core::titan::measure::{MeasureOp, Transform};
pub use crate::core::titan::ops::{Operator, StateSpec};
pub use crate::core::titan::qbit::{Qbit, QbitBuilder};
pub use crate::core::titan::qbits::{complete_operator, OpSpec, Qbits, Target};
pub use crate::core::titan::qent::Qent;
pub use crate::core::titan::qstate::QState;
pub use crate::core::titan::types::{c, ket, real_ket, unit_ket, Amplitudes, CMatrix};
