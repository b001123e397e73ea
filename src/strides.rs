//! Per-dimension element-step tables for linear addressing.
//!
//! A [`Strides`] is index-parallel to a [`Dimensions`]: the linear offset of a
//! coordinate is `Σ coordinate[i] * stride[i]` plus the view's base offset.
//! A stride of 0 along a dimension encodes broadcasting.

use crate::dimensions::{Dimensions, NDIM_MAX};

/// Signed element strides, one per dimension, outermost first.
///
/// Unused slots past the paired shape's rank are kept at 0 so that derived
/// equality stays meaningful.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Strides {
    ndim: usize,
    stride: [isize; NDIM_MAX],
}

impl Strides {
    /// Strides of a fully packed (C-contiguous, row-major) layout for `dims`.
    pub fn contiguous(dims: &Dimensions) -> Strides {
        let mut out = Strides {
            ndim: dims.ndim(),
            stride: [0; NDIM_MAX],
        };
        let mut running = 1isize;
        for i in (0..dims.ndim()).rev() {
            out.stride[i] = running;
            running *= dims.extent_at(i) as isize;
        }
        out
    }

    /// Build from explicit values, outermost first.
    pub fn from_slice(strides: &[isize]) -> Strides {
        let mut out = Strides {
            ndim: strides.len(),
            stride: [0; NDIM_MAX],
        };
        out.stride[..strides.len()].copy_from_slice(strides);
        out
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn at(&self, index: usize) -> isize {
        self.stride[index]
    }

    pub fn set(&mut self, index: usize, value: isize) {
        self.stride[index] = value;
    }

    pub fn as_slice(&self) -> &[isize] {
        &self.stride[..self.ndim]
    }

    /// Remove the entry at `index`, shifting inner entries outward.
    pub(crate) fn erase_at(&mut self, index: usize) {
        for i in index..self.ndim - 1 {
            self.stride[i] = self.stride[i + 1];
        }
        self.ndim -= 1;
        self.stride[self.ndim] = 0;
    }

    /// Whether this table describes the packed layout for `dims`.
    ///
    /// Extent-1 dimensions are ignored, as their stride never contributes.
    pub fn is_contiguous(&self, dims: &Dimensions) -> bool {
        let mut expected = 1isize;
        for i in (0..dims.ndim()).rev() {
            let extent = dims.extent_at(i);
            if extent <= 1 {
                continue;
            }
            if self.stride[i] != expected {
                return false;
            }
            expected *= extent as isize;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dim::Dim;

    fn dims(pairs: &[(&str, i64)]) -> Dimensions {
        let pairs: Vec<(Dim, i64)> = pairs.iter().map(|&(n, e)| (Dim::new(n), e)).collect();
        Dimensions::from_pairs(&pairs).unwrap()
    }

    #[test]
    fn contiguous_strides() {
        let d = dims(&[("z", 4), ("y", 2), ("x", 3)]);
        let s = Strides::contiguous(&d);
        assert_eq!(s.as_slice(), &[6, 3, 1]);
        assert!(s.is_contiguous(&d));
    }

    #[test]
    fn rank_zero() {
        let s = Strides::contiguous(&Dimensions::new());
        assert_eq!(s.as_slice(), &[] as &[isize]);
        assert!(s.is_contiguous(&Dimensions::new()));
    }

    #[test]
    fn broadcast_stride_is_not_contiguous() {
        let d = dims(&[("y", 2), ("x", 3)]);
        let s = Strides::from_slice(&[0, 1]);
        assert!(!s.is_contiguous(&d));
    }

    #[test]
    fn extent_one_dims_ignored() {
        let d = dims(&[("y", 1), ("x", 3)]);
        let s = Strides::from_slice(&[100, 1]);
        assert!(s.is_contiguous(&d));
    }

    #[test]
    fn erase_shifts_entries() {
        let mut s = Strides::from_slice(&[6, 3, 1]);
        s.erase_at(1);
        assert_eq!(s.as_slice(), &[6, 1]);
        s.erase_at(1);
        assert_eq!(s.as_slice(), &[6]);
    }
}
