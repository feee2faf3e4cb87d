//! Mixed-radix indices: one digit per subsystem, each with its own base,
//! most-significant digit first.
use crate::core::error::{QError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MixedRadix {
    bases: Vec<usize>,
    digits: Vec<usize>,
}

impl MixedRadix {
    /// All digits zero.
    pub fn new(bases: &[usize]) -> Self {
        Self { bases: bases.to_vec(), digits: vec![0; bases.len()] }
    }

    /// Decompose `value` into digits; fails if it does not fit.
    pub fn from_value(bases: &[usize], mut value: usize) -> Result<Self> {
        let mut digits = vec![0; bases.len()];
        for (d, &b) in digits.iter_mut().zip(bases).rev() {
            *d = value % b;
            value /= b;
        }
        if value != 0 {
            return Err(QError::dimension(format!("value too high for bases {bases:?}")));
        }
        Ok(Self { bases: bases.to_vec(), digits })
    }

    pub fn bases(&self) -> &[usize] {
        &self.bases
    }

    pub fn digits(&self) -> &[usize] {
        &self.digits
    }

    pub fn digit(&self, pos: usize) -> usize {
        self.digits[pos]
    }

    pub fn set(&mut self, pos: usize, digit: usize) {
        debug_assert!(digit < self.bases[pos]);
        self.digits[pos] = digit;
    }

    /// Size of the whole index space.
    pub fn capacity(&self) -> usize {
        self.bases.iter().product()
    }

    /// Flattened index.
    pub fn value(&self) -> usize {
        self.digits
            .iter()
            .zip(&self.bases)
            .fold(0, |acc, (&d, &b)| acc * b + d)
    }

    /// `+1`. Returns `false` (and wraps to zero) once the space is exhausted.
    pub fn increment(&mut self) -> bool {
        self.increment_skipping(&[])
    }

    /// `+1` over every digit except those in `frozen`, which keep their value.
    /// Returns `false` (free digits wrapped to zero) after the last combination.
    pub fn increment_skipping(&mut self, frozen: &[usize]) -> bool {
        for x in (0..self.digits.len()).rev() {
            if frozen.contains(&x) {
                continue;
            }
            self.digits[x] += 1;
            if self.digits[x] < self.bases[x] {
                return true;
            }
            self.digits[x] = 0;
        }
        false
    }

    /// Label built by concatenating each digit's symbol.
    pub fn label<F, S>(&self, symbol: F) -> String
    where
        F: Fn(usize, usize) -> S,
        S: AsRef<str>,
    {
        self.digits
            .iter()
            .enumerate()
            .map(|(pos, &d)| symbol(pos, d))
            .fold(String::new(), |mut acc, s| {
                acc.push_str(s.as_ref());
                acc
            })
    }
}

/// Product of dimensions before `start`, within `[start, start+len)` and after.
pub fn split_dims(dims: &[usize], start: usize, len: usize) -> (usize, usize, usize) {
    let before = dims[..start].iter().product();
    let span = dims[start..start + len].iter().product();
    let after = dims[start + len..].iter().product();
    (before, span, after)
}
