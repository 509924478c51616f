//! `Tensor`: the crate's own minimal storage backend (§6 `[AMBIENT]`).
//!
//! A real `threader`/`storage_type`/GPU-framework collaborator would be
//! supplied by a host application; this crate carries a small, honest
//! stand-in so `compile(...)` is directly callable and testable without an
//! external dependency. Axes are `RangeInclusive<i64>` rather than
//! `0..len`, so non-1-origin ("OffsetArray") axes are native, not bolted on.

use std::ops::RangeInclusive;

/// A dense, row-major, `f64`-valued tensor with possibly non-1-origin axes.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    axes: Vec<RangeInclusive<i64>>,
    data: Vec<f64>,
}

impl Tensor {
    /// Build a tensor from explicit axes and row-major data.
    ///
    /// # Panics
    /// Panics if `data.len()` does not equal the product of axis lengths.
    #[must_use]
    pub fn from_data(axes: Vec<RangeInclusive<i64>>, data: Vec<f64>) -> Self {
        let expected: usize = axes.iter().map(|a| axis_len(a)).product();
        assert_eq!(data.len(), expected, "tensor data length does not match axis shape");
        Tensor { axes, data }
    }

    /// Allocate a zero-filled tensor over `axes`.
    #[must_use]
    pub fn zeros(axes: Vec<RangeInclusive<i64>>) -> Self {
        let len: usize = axes.iter().map(|a| axis_len(a)).product();
        Tensor { axes, data: vec![0.0; len] }
    }

    /// Allocate a tensor over `axes` with every element set to `fill`.
    #[must_use]
    pub fn filled(axes: Vec<RangeInclusive<i64>>, fill: f64) -> Self {
        let len: usize = axes.iter().map(|a| axis_len(a)).product();
        Tensor { axes, data: vec![fill; len] }
    }

    /// A rank-0 scalar tensor.
    #[must_use]
    pub fn scalar(value: f64) -> Self {
        Tensor { axes: Vec::new(), data: vec![value] }
    }

    /// Rank (number of axes).
    #[must_use]
    pub fn rank(&self) -> usize {
        self.axes.len()
    }

    /// The axes, in declaration order.
    #[must_use]
    pub fn axes(&self) -> &[RangeInclusive<i64>] {
        &self.axes
    }

    /// The backing row-major element slice.
    #[must_use]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// The backing row-major element slice, mutably.
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Read the scalar value of a rank-0 tensor.
    ///
    /// # Panics
    /// Panics if `self` is not rank 0.
    #[must_use]
    pub fn as_scalar(&self) -> f64 {
        assert_eq!(self.axes.len(), 0, "as_scalar called on a non-scalar tensor");
        self.data[0]
    }

    fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1usize; self.axes.len()];
        for k in (0..self.axes.len().saturating_sub(1)).rev() {
            strides[k] = strides[k + 1] * axis_len(&self.axes[k + 1]);
        }
        strides
    }

    fn flat_index(&self, coords: &[i64]) -> Option<usize> {
        if coords.len() != self.axes.len() {
            return None;
        }
        let strides = self.strides();
        let mut flat = 0usize;
        for ((coord, axis), stride) in coords.iter().zip(self.axes.iter()).zip(strides.iter()) {
            if !axis.contains(coord) {
                return None;
            }
            #[allow(clippy::cast_sign_loss, reason = "offset is non-negative once range membership is checked")]
            let offset = (*coord - axis.start()) as usize;
            flat += offset * stride;
        }
        Some(flat)
    }

    /// Read the element at `coords`, or `None` if out of range / wrong rank.
    #[must_use]
    pub fn get(&self, coords: &[i64]) -> Option<f64> {
        self.flat_index(coords).map(|i| self.data[i])
    }

    /// Write the element at `coords`.
    ///
    /// # Panics
    /// Panics if `coords` is out of range or has the wrong rank.
    pub fn set(&mut self, coords: &[i64], value: f64) {
        let idx = self.flat_index(coords).expect("coordinates out of range");
        self.data[idx] = value;
    }

    /// Allocate a tensor with the same axes as `self`, zero-filled.
    #[must_use]
    pub fn similar(&self) -> Self {
        Tensor::zeros(self.axes.clone())
    }
}

/// Length of an inclusive axis range.
#[must_use]
pub fn axis_len(axis: &RangeInclusive<i64>) -> usize {
    if axis.end() < axis.start() {
        0
    } else {
        #[allow(clippy::cast_sign_loss, reason = "end >= start checked above")]
        {
            (*axis.end() - *axis.start() + 1) as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeros_has_expected_length() {
        let t = Tensor::zeros(vec![1..=2, 1..=3]);
        assert_eq!(t.data().len(), 6);
    }

    #[test]
    fn get_set_round_trip_with_offset_axis() {
        let mut t = Tensor::zeros(vec![-1..=1]);
        t.set(&[-1], 5.0);
        t.set(&[0], 6.0);
        t.set(&[1], 7.0);
        assert_eq!(t.get(&[-1]), Some(5.0));
        assert_eq!(t.get(&[0]), Some(6.0));
        assert_eq!(t.get(&[2]), None);
    }

    #[test]
    fn row_major_layout_matches_matrix_expectations() {
        let t = Tensor::from_data(vec![1..=2, 1..=2], vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(t.get(&[1, 1]), Some(1.0));
        assert_eq!(t.get(&[1, 2]), Some(2.0));
        assert_eq!(t.get(&[2, 1]), Some(3.0));
        assert_eq!(t.get(&[2, 2]), Some(4.0));
    }
}
