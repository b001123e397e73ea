//! Labeled shape metadata.
//!
//! [`Dimensions`] is a fixed-capacity ordered sequence of `(Dim, extent)`
//! pairs, outermost first. Labels are unique, extents are non-negative, and
//! the rank never exceeds [`NDIM_MAX`]. [`Sizes`] is the same storage used as
//! a plain label→extent set where order carries no meaning.

use std::fmt;

use crate::dim::Dim;
use crate::error::DimensionError;

/// Maximum rank of a labeled array.
pub const NDIM_MAX: usize = 6;

/// Ordered label→extent map describing an array's logical shape.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    ndim: usize,
    dims: [Dim; NDIM_MAX],
    shape: [i64; NDIM_MAX],
}

impl Default for Dimensions {
    fn default() -> Self {
        Dimensions {
            ndim: 0,
            dims: [Dim::NONE; NDIM_MAX],
            shape: [0; NDIM_MAX],
        }
    }
}

impl Dimensions {
    /// The empty (rank-0) shape.
    pub fn new() -> Dimensions {
        Dimensions::default()
    }

    /// Build from `(label, extent)` pairs, outermost first.
    pub fn from_pairs(pairs: &[(Dim, i64)]) -> Result<Dimensions, DimensionError> {
        let mut out = Dimensions::new();
        for &(dim, extent) in pairs {
            out.add_inner(dim, extent)?;
        }
        Ok(out)
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn is_empty(&self) -> bool {
        self.ndim == 0
    }

    /// Labels, outermost first.
    pub fn labels(&self) -> &[Dim] {
        &self.dims[..self.ndim]
    }

    /// Extents, index-parallel to [`labels`](Self::labels).
    pub fn shape(&self) -> &[i64] {
        &self.shape[..self.ndim]
    }

    pub fn contains(&self, dim: Dim) -> bool {
        self.index_of(dim).is_some()
    }

    /// Position of `dim`, 0 = outermost.
    pub fn index_of(&self, dim: Dim) -> Option<usize> {
        self.labels().iter().position(|&d| d == dim)
    }

    pub fn extent(&self, dim: Dim) -> Option<i64> {
        self.index_of(dim).map(|i| self.shape[i])
    }

    pub fn extent_at(&self, index: usize) -> i64 {
        self.shape[index]
    }

    pub fn label_at(&self, index: usize) -> Dim {
        self.dims[index]
    }

    /// Product of extents; 1 for rank 0.
    pub fn volume(&self) -> i64 {
        self.shape().iter().product()
    }

    fn check_insert(&self, dim: Dim, extent: i64) -> Result<(), DimensionError> {
        if extent < 0 {
            return Err(DimensionError::NegativeExtent(extent));
        }
        if self.contains(dim) || dim == Dim::NONE {
            return Err(DimensionError::DuplicateLabel(dim));
        }
        if self.ndim == NDIM_MAX {
            return Err(DimensionError::RankOverflow { max: NDIM_MAX });
        }
        Ok(())
    }

    pub(crate) fn insert_at(
        &mut self,
        index: usize,
        dim: Dim,
        extent: i64,
    ) -> Result<(), DimensionError> {
        self.check_insert(dim, extent)?;
        for i in (index..self.ndim).rev() {
            self.dims[i + 1] = self.dims[i];
            self.shape[i + 1] = self.shape[i];
        }
        self.dims[index] = dim;
        self.shape[index] = extent;
        self.ndim += 1;
        Ok(())
    }

    /// Insert as the new outermost dimension.
    pub fn add(&mut self, dim: Dim, extent: i64) -> Result<(), DimensionError> {
        self.insert_at(0, dim, extent)
    }

    /// Insert as the new innermost dimension.
    pub fn add_inner(&mut self, dim: Dim, extent: i64) -> Result<(), DimensionError> {
        self.insert_at(self.ndim, dim, extent)
    }

    /// Remove `dim`, shifting more-inner labels outward by one position.
    pub fn erase(&mut self, dim: Dim) -> Result<(), DimensionError> {
        let index = self.index_of(dim).ok_or(DimensionError::NotFound(dim))?;
        self.erase_at(index);
        Ok(())
    }

    pub(crate) fn erase_at(&mut self, index: usize) {
        for i in index..self.ndim - 1 {
            self.dims[i] = self.dims[i + 1];
            self.shape[i] = self.shape[i + 1];
        }
        self.ndim -= 1;
        self.dims[self.ndim] = Dim::NONE;
        self.shape[self.ndim] = 0;
    }

    /// Change the extent of an existing dimension.
    pub fn resize(&mut self, dim: Dim, extent: i64) -> Result<(), DimensionError> {
        if extent < 0 {
            return Err(DimensionError::NegativeExtent(extent));
        }
        let index = self.index_of(dim).ok_or(DimensionError::NotFound(dim))?;
        self.shape[index] = extent;
        Ok(())
    }

    /// Relabel `from` to `to`, keeping position and extent.
    pub fn replace(&mut self, from: Dim, to: Dim) -> Result<(), DimensionError> {
        let index = self.index_of(from).ok_or(DimensionError::NotFound(from))?;
        if to != from {
            if self.contains(to) || to == Dim::NONE {
                return Err(DimensionError::DuplicateLabel(to));
            }
            self.dims[index] = to;
        }
        Ok(())
    }

    /// Addressing stride of `dim` in a fully packed (C-contiguous) layout:
    /// the product of all extents inner to it.
    pub fn offset(&self, dim: Dim) -> Result<i64, DimensionError> {
        let index = self.index_of(dim).ok_or(DimensionError::NotFound(dim))?;
        Ok(self.shape[index + 1..self.ndim].iter().product())
    }

    /// Direct sum of two label sets, governing broadcast-output shapes.
    ///
    /// The first argument's relative order wins for labels it contains; labels
    /// only in `other` are placed just outside the first shared label that
    /// follows them in `other`, or appended innermost. The order stability is
    /// a documented contract: downstream code relies on it to avoid
    /// transposing large buffers.
    pub fn merge(&self, other: &Dimensions) -> Result<Dimensions, DimensionError> {
        let mut out = *self;
        for i in 0..other.ndim {
            let dim = other.dims[i];
            let extent = other.shape[i];
            if let Some(extent_self) = self.extent(dim) {
                if extent_self != extent {
                    return Err(DimensionError::ExtentMismatch {
                        dim,
                        a: extent_self,
                        b: extent,
                    });
                }
                continue;
            }
            let anchor = other.labels()[i + 1..]
                .iter()
                .find_map(|&d| out.index_of(d))
                .unwrap_or(out.ndim);
            out.insert_at(anchor, dim, extent)?;
        }
        Ok(out)
    }

    /// Labels present in both with matching extents, in `self`'s order.
    pub fn intersection(&self, other: &Dimensions) -> Dimensions {
        let mut out = Dimensions::new();
        for i in 0..self.ndim {
            if other.extent(self.dims[i]) == Some(self.shape[i]) {
                // Cannot overflow capacity or duplicate: out is a subset of self.
                let _ = out.add_inner(self.dims[i], self.shape[i]);
            }
        }
        out
    }

    /// Reorder labels. An empty `order` reverses; otherwise `order` must be a
    /// permutation of the current labels.
    pub fn transpose(&self, order: &[Dim]) -> Result<Dimensions, DimensionError> {
        let mut out = Dimensions::new();
        if order.is_empty() {
            for i in (0..self.ndim).rev() {
                let _ = out.add_inner(self.dims[i], self.shape[i]);
            }
            return Ok(out);
        }
        if order.len() != self.ndim {
            return Err(DimensionError::InvalidOrder(order.to_vec()));
        }
        for &dim in order {
            let extent = self
                .extent(dim)
                .ok_or_else(|| DimensionError::InvalidOrder(order.to_vec()))?;
            out.add_inner(dim, extent)
                .map_err(|_| DimensionError::InvalidOrder(order.to_vec()))?;
        }
        Ok(out)
    }

    /// Split `dim` into `to`, replacing it in place. The replacement must
    /// preserve volume.
    pub fn fold(&self, dim: Dim, to: &Dimensions) -> Result<Dimensions, DimensionError> {
        let index = self.index_of(dim).ok_or(DimensionError::NotFound(dim))?;
        if to.volume() != self.shape[index] {
            return Err(DimensionError::VolumeMismatch {
                dim,
                extent: self.shape[index],
                volume: to.volume(),
            });
        }
        let mut out = *self;
        out.erase_at(index);
        for i in 0..to.ndim {
            out.insert_at(index + i, to.dims[i], to.shape[i])?;
        }
        Ok(out)
    }

    /// Collapse the contiguous, order-matching block `from` into the single
    /// label `to`.
    pub fn flatten(&self, from: &[Dim], to: Dim) -> Result<Dimensions, DimensionError> {
        if from.is_empty() {
            return Err(DimensionError::NotContiguous(from.to_vec()));
        }
        let start = self
            .index_of(from[0])
            .ok_or(DimensionError::NotFound(from[0]))?;
        for (k, &dim) in from.iter().enumerate() {
            if self.index_of(dim) != Some(start + k) {
                return Err(DimensionError::NotContiguous(from.to_vec()));
            }
        }
        let volume: i64 = self.shape[start..start + from.len()].iter().product();
        let mut out = *self;
        for _ in 0..from.len() {
            out.erase_at(start);
        }
        out.insert_at(start, to, volume)?;
        Ok(out)
    }
}

impl fmt::Debug for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dimensions(")?;
        for i in 0..self.ndim {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", self.dims[i], self.shape[i])?;
        }
        write!(f, ")")
    }
}

/// Label→extent set for a data array, without meaningful order.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Sizes {
    inner: Dimensions,
}

impl From<&Dimensions> for Sizes {
    fn from(dims: &Dimensions) -> Sizes {
        Sizes { inner: *dims }
    }
}

impl Sizes {
    pub fn new() -> Sizes {
        Sizes::default()
    }

    pub fn insert(&mut self, dim: Dim, extent: i64) -> Result<(), DimensionError> {
        self.inner.add_inner(dim, extent)
    }

    pub fn contains(&self, dim: Dim) -> bool {
        self.inner.contains(dim)
    }

    pub fn extent(&self, dim: Dim) -> Option<i64> {
        self.inner.extent(dim)
    }

    pub fn erase(&mut self, dim: Dim) -> Result<(), DimensionError> {
        self.inner.erase(dim)
    }

    pub fn rename(&mut self, from: Dim, to: Dim) -> Result<(), DimensionError> {
        self.inner.replace(from, to)
    }

    pub fn volume(&self) -> i64 {
        self.inner.volume()
    }

    /// Superset test: every entry of `other` is present here with the same
    /// extent.
    pub fn includes(&self, other: &Sizes) -> bool {
        other
            .inner
            .labels()
            .iter()
            .zip(other.inner.shape())
            .all(|(&d, &e)| self.extent(d) == Some(e))
    }

    /// Extent of `dim` reduced to the slice `[begin, end)`.
    pub fn slice(&self, dim: Dim, begin: i64, end: i64) -> Result<Sizes, DimensionError> {
        let extent = self.extent(dim).ok_or(DimensionError::NotFound(dim))?;
        if begin < 0 || begin > end || end > extent {
            return Err(DimensionError::SliceOutOfRange {
                dim,
                begin,
                end,
                extent,
            });
        }
        let mut out = *self;
        out.inner.resize(dim, end - begin)?;
        Ok(out)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Dim, i64)> + '_ {
        self.inner
            .labels()
            .iter()
            .copied()
            .zip(self.inner.shape().iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(pairs: &[(&str, i64)]) -> Dimensions {
        let pairs: Vec<(Dim, i64)> = pairs.iter().map(|&(n, e)| (Dim::new(n), e)).collect();
        Dimensions::from_pairs(&pairs).unwrap()
    }

    #[test]
    fn add_outer_and_inner() {
        let mut d = Dimensions::new();
        d.add_inner(Dim::new("x"), 3).unwrap();
        d.add(Dim::new("y"), 2).unwrap();
        assert_eq!(d.labels(), &[Dim::new("y"), Dim::new("x")]);
        assert_eq!(d.shape(), &[2, 3]);
        assert_eq!(d.volume(), 6);
    }

    #[test]
    fn empty_volume_is_one() {
        assert_eq!(Dimensions::new().volume(), 1);
    }

    #[test]
    fn duplicate_label_rejected() {
        let mut d = dims(&[("x", 3)]);
        assert_eq!(
            d.add(Dim::new("x"), 4),
            Err(DimensionError::DuplicateLabel(Dim::new("x")))
        );
    }

    #[test]
    fn negative_extent_rejected() {
        let mut d = Dimensions::new();
        assert_eq!(
            d.add(Dim::new("x"), -1),
            Err(DimensionError::NegativeExtent(-1))
        );
    }

    #[test]
    fn rank_overflow_rejected() {
        let mut d = Dimensions::new();
        for i in 0..NDIM_MAX {
            d.add_inner(Dim::new(&format!("rank_{i}")), 1).unwrap();
        }
        assert_eq!(
            d.add_inner(Dim::new("rank_overflow"), 1),
            Err(DimensionError::RankOverflow { max: NDIM_MAX })
        );
    }

    #[test]
    fn erase_shifts_inner_labels() {
        let mut d = dims(&[("z", 4), ("y", 2), ("x", 3)]);
        d.erase(Dim::new("y")).unwrap();
        assert_eq!(d.labels(), &[Dim::new("z"), Dim::new("x")]);
        assert_eq!(d.shape(), &[4, 3]);
        assert_eq!(
            d.erase(Dim::new("missing")),
            Err(DimensionError::NotFound(Dim::new("missing")))
        );
    }

    #[test]
    fn offset_is_packed_stride() {
        let d = dims(&[("z", 4), ("y", 2), ("x", 3)]);
        assert_eq!(d.offset(Dim::new("z")).unwrap(), 6);
        assert_eq!(d.offset(Dim::new("y")).unwrap(), 3);
        assert_eq!(d.offset(Dim::new("x")).unwrap(), 1);
    }

    #[test]
    fn merge_concrete_scenario() {
        // {Y:2, X:3} ⊕ {X:3, Z:4} = {Y:2, X:3, Z:4}
        let a = dims(&[("y", 2), ("x", 3)]);
        let b = dims(&[("x", 3), ("z", 4)]);
        let m = a.merge(&b).unwrap();
        assert_eq!(m, dims(&[("y", 2), ("x", 3), ("z", 4)]));
    }

    #[test]
    fn merge_favors_first_argument_order() {
        let a = dims(&[("y", 2), ("x", 3)]);
        let b = dims(&[("x", 3), ("y", 2)]);
        assert_eq!(a.merge(&b).unwrap(), a);
        assert_eq!(b.merge(&a).unwrap(), b);
    }

    #[test]
    fn merge_keeps_outer_labels_outer() {
        // A label only in `other` that sits outside a shared label stays
        // outside it in the result.
        let a = dims(&[("x", 3)]);
        let b = dims(&[("y", 2), ("x", 3)]);
        assert_eq!(a.merge(&b).unwrap(), dims(&[("y", 2), ("x", 3)]));
    }

    #[test]
    fn merge_is_set_commutative() {
        let a = dims(&[("y", 2), ("x", 3)]);
        let b = dims(&[("z", 5), ("x", 3)]);
        let ab = a.merge(&b).unwrap();
        let ba = b.merge(&a).unwrap();
        for &d in ab.labels() {
            assert_eq!(ab.extent(d), ba.extent(d));
        }
        assert_eq!(ab.ndim(), ba.ndim());
    }

    #[test]
    fn merge_extent_mismatch() {
        let a = dims(&[("x", 3)]);
        let b = dims(&[("x", 4)]);
        assert_eq!(
            a.merge(&b),
            Err(DimensionError::ExtentMismatch {
                dim: Dim::new("x"),
                a: 3,
                b: 4,
            })
        );
    }

    #[test]
    fn intersection_is_symmetric_as_set() {
        let a = dims(&[("y", 2), ("x", 3)]);
        let b = dims(&[("x", 3), ("z", 4)]);
        let i1 = a.intersection(&b);
        let i2 = b.intersection(&a);
        assert_eq!(i1, dims(&[("x", 3)]));
        assert_eq!(i1, i2);
    }

    #[test]
    fn transpose_explicit_and_reverse() {
        let d = dims(&[("y", 2), ("x", 3)]);
        let t = d.transpose(&[Dim::new("x"), Dim::new("y")]).unwrap();
        assert_eq!(t, dims(&[("x", 3), ("y", 2)]));
        assert_eq!(d.transpose(&[]).unwrap(), t);
        assert!(d.transpose(&[Dim::new("x")]).is_err());
        assert!(d.transpose(&[Dim::new("x"), Dim::new("z")]).is_err());
    }

    #[test]
    fn fold_then_flatten_roundtrip() {
        let d = dims(&[("y", 2), ("x", 6)]);
        let to = dims(&[("a", 2), ("b", 3)]);
        let folded = d.fold(Dim::new("x"), &to).unwrap();
        assert_eq!(folded, dims(&[("y", 2), ("a", 2), ("b", 3)]));
        let back = folded
            .flatten(&[Dim::new("a"), Dim::new("b")], Dim::new("x"))
            .unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn fold_volume_mismatch() {
        let d = dims(&[("x", 6)]);
        let to = dims(&[("a", 2), ("b", 2)]);
        assert!(matches!(
            d.fold(Dim::new("x"), &to),
            Err(DimensionError::VolumeMismatch { .. })
        ));
    }

    #[test]
    fn flatten_requires_contiguous_matching_block() {
        let d = dims(&[("z", 4), ("y", 2), ("x", 3)]);
        // Out of order.
        assert!(matches!(
            d.flatten(&[Dim::new("x"), Dim::new("y")], Dim::new("f")),
            Err(DimensionError::NotContiguous(_))
        ));
        // Not adjacent.
        assert!(matches!(
            d.flatten(&[Dim::new("z"), Dim::new("x")], Dim::new("f")),
            Err(DimensionError::NotContiguous(_))
        ));
        let f = d.flatten(&[Dim::new("y"), Dim::new("x")], Dim::new("f")).unwrap();
        assert_eq!(f, dims(&[("z", 4), ("f", 6)]));
    }

    #[test]
    fn sizes_includes_and_slice() {
        let a = Sizes::from(&dims(&[("y", 2), ("x", 3)]));
        let b = Sizes::from(&dims(&[("x", 3)]));
        assert!(a.includes(&b));
        assert!(!b.includes(&a));
        let s = a.slice(Dim::new("x"), 1, 3).unwrap();
        assert_eq!(s.extent(Dim::new("x")), Some(2));
        assert!(a.slice(Dim::new("x"), 2, 5).is_err());
    }

    #[test]
    fn sizes_rename() {
        let mut s = Sizes::from(&dims(&[("x", 3)]));
        s.rename(Dim::new("x"), Dim::new("u")).unwrap();
        assert_eq!(s.extent(Dim::new("u")), Some(3));
        assert!(!s.contains(Dim::new("x")));
    }
}
