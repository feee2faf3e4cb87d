//! Titan: the composite quantum-state engine.
//!
//! Leaves first: `types` and `digits` are numeric plumbing, `basis`, `ops`
//! and `gates` describe what can be measured and applied, `qbit`, `qbits`
//! and `qent` hold state.

pub mod basis;
pub mod digits;
pub mod gates;
pub mod measure;
pub mod notation;
pub mod ops;
pub mod qbit;
pub mod qbits;
pub mod qent;
pub mod qstate;
pub mod types;
