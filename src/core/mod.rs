//! Core module tree: the error taxonomy and the Titan state engine.

pub mod error;
pub mod titan;
