//! Co-iteration cursor over N strided operands.
//!
//! A [`MultiIndex`] converts logical coordinates of one shared iteration shape
//! into per-operand linear buffer offsets, hiding broadcasting, transposition
//! and (in binned mode) raggedness from the caller. It is created fresh for
//! one transform call and discarded afterwards.
//!
//! Internally the iteration dimensions are stored innermost first and
//! contiguous runs are coalesced into fewer, larger levels whenever every
//! operand's strides allow it; coalescing is purely an optimization and never
//! changes the offsets produced.

use crate::dimensions::{Dimensions, NDIM_MAX};
use crate::error::{BinnedDataError, DimensionError, Error};
use crate::strides::Strides;

/// One dense participant of a co-iteration.
#[derive(Clone, Copy)]
pub struct DenseOperand<'a> {
    pub dims: &'a Dimensions,
    pub strides: &'a Strides,
    pub offset: isize,
}

/// One participant of a binned co-iteration.
pub enum BinnedOperand<'a> {
    /// A dense operand, broadcast across each bucket (its offset is constant
    /// while a bucket's contents are visited).
    Dense {
        dims: &'a Dimensions,
        strides: &'a Strides,
        offset: isize,
    },
    /// A bucketed operand: the outer addressing selects a `(begin, end)`
    /// range, which is then traversed along the sliced dimension of the inner
    /// buffer.
    Binned {
        dims: &'a Dimensions,
        strides: &'a Strides,
        offset: isize,
        ranges: &'a [(usize, usize)],
        inner_stride: isize,
        inner_offset: isize,
        inner_extent: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct InnerAddr {
    stride: isize,
    offset: isize,
}

#[derive(Clone, Debug, PartialEq)]
struct Binned<'a, const N: usize> {
    ranges: [Option<&'a [(usize, usize)]>; N],
    inner: [Option<InnerAddr>; N],
    /// Current inner base offset per bucketed operand.
    begins: [isize; N],
    bucket_size: usize,
    bucket_pos: usize,
    outer_index: usize,
    outer_total: usize,
}

/// Ephemeral cursor for one co-iteration of `N` operands.
#[derive(Clone, Debug, PartialEq)]
pub struct MultiIndex<'a, const N: usize> {
    ndim: usize,
    /// Iteration extents after coalescing, innermost first.
    extents: [usize; NDIM_MAX],
    coord: [usize; NDIM_MAX],
    /// `stride[level][operand]`, innermost first.
    stride: [[isize; N]; NDIM_MAX],
    base: [isize; N],
    offsets: [isize; N],
    index: usize,
    total: usize,
    binned: Option<Binned<'a, N>>,
}

/// Per-operand stride tables over `iter`, innermost first, uncoalesced.
fn build_tables<const N: usize>(
    iter: &Dimensions,
    dims: [&Dimensions; N],
    strides: [&Strides; N],
) -> Result<([usize; NDIM_MAX], [[isize; N]; NDIM_MAX]), Error> {
    for k in 0..N {
        for (i, &d) in dims[k].labels().iter().enumerate() {
            let extent = dims[k].extent_at(i);
            match iter.extent(d) {
                Some(e) if e == extent => {}
                Some(e) => {
                    return Err(DimensionError::ExtentMismatch {
                        dim: d,
                        a: e,
                        b: extent,
                    }
                    .into())
                }
                None => return Err(DimensionError::NotFound(d).into()),
            }
        }
    }
    let mut extents = [0usize; NDIM_MAX];
    let mut stride = [[0isize; N]; NDIM_MAX];
    for level in 0..iter.ndim() {
        let pos = iter.ndim() - 1 - level;
        let d = iter.label_at(pos);
        extents[level] = iter.extent_at(pos) as usize;
        for k in 0..N {
            if let Some(j) = dims[k].index_of(d) {
                stride[level][k] = strides[k].at(j);
            }
        }
    }
    Ok((extents, stride))
}

/// Whether levels `l` and `l + 1` address one contiguous run for all operands.
fn can_be_flattened<const N: usize>(
    extents: &[usize],
    stride: &[[isize; N]],
    l: usize,
) -> bool {
    (0..N).all(|k| stride[l + 1][k] == extents[l] as isize * stride[l][k])
}

/// Coalesce contiguous runs in place, returning the new level count.
fn flatten_dims<const N: usize>(
    extents: &mut [usize; NDIM_MAX],
    stride: &mut [[isize; N]; NDIM_MAX],
    mut ndim: usize,
) -> usize {
    let mut l = 0;
    while l + 1 < ndim {
        if can_be_flattened(extents, stride, l) {
            extents[l] *= extents[l + 1];
            for i in l + 1..ndim - 1 {
                extents[i] = extents[i + 1];
                stride[i] = stride[i + 1];
            }
            ndim -= 1;
            extents[ndim] = 0;
            stride[ndim] = [0; N];
        } else {
            l += 1;
        }
    }
    ndim
}

impl<'a, const N: usize> MultiIndex<'a, N> {
    /// Cursor for a dense co-iteration of `operands` over `iter`.
    ///
    /// Operands whose dims are a strict subset of `iter` are broadcast
    /// (stride 0 for absent dimensions).
    pub fn dense(
        iter: &Dimensions,
        operands: [DenseOperand<'_>; N],
    ) -> Result<MultiIndex<'static, N>, Error> {
        let dims = operands.map(|o| o.dims);
        let strides = operands.map(|o| o.strides);
        let (mut extents, mut stride) = build_tables(iter, dims, strides)?;
        let ndim = flatten_dims(&mut extents, &mut stride, iter.ndim());
        let base = operands.map(|o| o.offset);
        let total = if iter.volume() < 0 {
            0
        } else {
            iter.volume() as usize
        };
        Ok(MultiIndex {
            ndim,
            extents,
            coord: [0; NDIM_MAX],
            stride,
            base,
            offsets: base,
            index: 0,
            total,
            binned: None,
        })
    }

    /// Cursor for a binned co-iteration over the rectangular outer shape
    /// `outer`, visiting each bucket's contents along the sliced dimension.
    ///
    /// All bucketed operands must agree on the bin size at every outer index;
    /// this is validated up front, as is every range against its inner
    /// buffer's extent. Zero-length buckets are skipped transparently.
    pub fn binned(
        outer: &Dimensions,
        operands: [BinnedOperand<'a>; N],
    ) -> Result<MultiIndex<'a, N>, Error> {
        let dims = std::array::from_fn(|k| match &operands[k] {
            BinnedOperand::Dense { dims, .. } | BinnedOperand::Binned { dims, .. } => *dims,
        });
        let strides = std::array::from_fn(|k| match &operands[k] {
            BinnedOperand::Dense { strides, .. } | BinnedOperand::Binned { strides, .. } => {
                *strides
            }
        });
        let (mut extents, mut stride) = build_tables(outer, dims, strides)?;
        let ndim = flatten_dims(&mut extents, &mut stride, outer.ndim());
        let base = std::array::from_fn(|k| match &operands[k] {
            BinnedOperand::Dense { offset, .. } | BinnedOperand::Binned { offset, .. } => *offset,
        });

        let mut ranges: [Option<&'a [(usize, usize)]>; N] = [None; N];
        let mut inner: [Option<InnerAddr>; N] = [None; N];
        let mut inner_extent = [0usize; N];
        for (k, operand) in operands.iter().enumerate() {
            if let BinnedOperand::Binned {
                ranges: r,
                inner_stride,
                inner_offset,
                inner_extent: extent,
                ..
            } = operand
            {
                ranges[k] = Some(r);
                inner[k] = Some(InnerAddr {
                    stride: *inner_stride,
                    offset: *inner_offset,
                });
                inner_extent[k] = *extent;
            }
        }

        let outer_total = if outer.volume() < 0 {
            0
        } else {
            outer.volume() as usize
        };

        // Front-loaded validation sweep: pairwise bin sizes and range bounds,
        // accumulating the total number of inner elements.
        let mut probe = MultiIndex::<N> {
            ndim,
            extents,
            coord: [0; NDIM_MAX],
            stride,
            base,
            offsets: base,
            index: 0,
            total: outer_total,
            binned: None,
        };
        let mut total = 0usize;
        for bin in 0..outer_total {
            let offsets = probe.get();
            let mut first: Option<(usize, usize)> = None;
            for k in 0..N {
                let Some(r) = ranges[k] else { continue };
                let (begin, end) = r[offsets[k] as usize];
                if begin > end || end > inner_extent[k] {
                    return Err(BinnedDataError::RangeOutOfBounds {
                        bin,
                        begin,
                        end,
                        extent: inner_extent[k],
                    }
                    .into());
                }
                let size = end - begin;
                match first {
                    None => first = Some((k, size)),
                    Some((first_k, first_size)) if first_size != size => {
                        return Err(BinnedDataError::BinSizeMismatch {
                            lhs_operand: first_k,
                            rhs_operand: k,
                            bin,
                            lhs_size: first_size,
                            rhs_size: size,
                        }
                        .into())
                    }
                    Some(_) => {}
                }
            }
            if let Some((_, size)) = first {
                total += size;
            }
            probe.increment();
        }

        let mut out = MultiIndex {
            ndim,
            extents,
            coord: [0; NDIM_MAX],
            stride,
            base,
            offsets: base,
            index: 0,
            total,
            binned: Some(Binned {
                ranges,
                inner,
                begins: [0; N],
                bucket_size: 0,
                bucket_pos: 0,
                outer_index: 0,
                outer_total,
            }),
        };
        if outer_total > 0 && !out.load_bucket() {
            out.seek_bucket();
        }
        Ok(out)
    }

    /// Current per-operand linear element offsets.
    #[inline]
    pub fn get(&self) -> [isize; N] {
        match &self.binned {
            None => self.offsets,
            Some(b) => {
                let mut out = self.offsets;
                for k in 0..N {
                    if let Some(addr) = b.inner[k] {
                        out[k] = b.begins[k] + b.bucket_pos as isize * addr.stride;
                    }
                }
                out
            }
        }
    }

    /// Advance by one logical step. O(1) amortized, including carries across
    /// dimension boundaries and seeks past empty buckets.
    #[inline]
    pub fn increment(&mut self) {
        self.index += 1;
        if self.binned.is_none() {
            self.advance_outer();
            return;
        }
        if let Some(b) = &mut self.binned {
            b.bucket_pos += 1;
            if b.bucket_pos < b.bucket_size {
                return;
            }
        }
        self.seek_bucket();
    }

    /// Advance the (outer, in binned mode) dense cursor by one position.
    #[inline]
    fn advance_outer(&mut self) {
        let mut d = 0;
        while d < self.ndim {
            self.coord[d] += 1;
            for k in 0..N {
                self.offsets[k] += self.stride[d][k];
            }
            if self.coord[d] < self.extents[d] || d + 1 == self.ndim {
                return;
            }
            for k in 0..N {
                self.offsets[k] -= self.extents[d] as isize * self.stride[d][k];
            }
            self.coord[d] = 0;
            d += 1;
        }
    }

    /// Move the outer cursor forward until a non-empty bucket is found or the
    /// outer shape is exhausted.
    fn seek_bucket(&mut self) {
        loop {
            let exhausted = match &mut self.binned {
                Some(b) => {
                    b.outer_index += 1;
                    b.outer_index >= b.outer_total
                }
                None => true,
            };
            if exhausted {
                return;
            }
            self.advance_outer();
            if self.load_bucket() {
                return;
            }
        }
    }

    /// Load the bucket at the current outer position. Returns false for a
    /// zero-length bucket.
    fn load_bucket(&mut self) -> bool {
        let offsets = self.offsets;
        let Some(b) = &mut self.binned else {
            return true;
        };
        let mut size = 0usize;
        for k in 0..N {
            if let (Some(ranges), Some(addr)) = (b.ranges[k], b.inner[k]) {
                let (begin, end) = ranges[offsets[k] as usize];
                b.begins[k] = addr.offset + begin as isize * addr.stride;
                size = end - begin;
            }
        }
        b.bucket_size = size;
        b.bucket_pos = 0;
        size > 0
    }

    /// Jump to the `index`-th logical element. Dense cursors only; binned
    /// cursors are always traversed from the start.
    pub fn set_index(&mut self, index: usize) {
        debug_assert!(self.binned.is_none(), "set_index requires a dense cursor");
        self.index = index.min(self.total);
        self.offsets = self.base;
        let mut rem = self.index;
        for d in 0..self.ndim {
            let extent = self.extents[d].max(1);
            let c = rem % extent;
            rem /= extent;
            self.coord[d] = c;
            for k in 0..N {
                self.offsets[k] += c as isize * self.stride[d][k];
            }
        }
    }

    /// Logical position, in `0..=total()`.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of logical elements this cursor visits.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_done(&self) -> bool {
        self.index >= self.total
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

    /// Naive nested-loop reference: per-operand offsets in row-major order
    /// over `iter`, one inner Vec per step.
    fn naive_offsets(iter: &Dimensions, ops: &[(&Dimensions, &Strides, isize)]) -> Vec<Vec<isize>> {
        let volume = iter.volume() as usize;
        let mut out = Vec::with_capacity(volume);
        for flat in 0..volume {
            // Decompose row-major: innermost varies fastest.
            let mut coords = vec![0i64; iter.ndim()];
            let mut rem = flat as i64;
            for i in (0..iter.ndim()).rev() {
                coords[i] = rem % iter.extent_at(i);
                rem /= iter.extent_at(i);
            }
            let mut step = Vec::with_capacity(ops.len());
            for (d, s, offset) in ops {
                let mut linear = *offset;
                for (i, &c) in coords.iter().enumerate() {
                    if let Some(j) = d.index_of(iter.label_at(i)) {
                        linear += c as isize * s.at(j);
                    }
                }
                step.push(linear);
            }
            out.push(step);
        }
        out
    }

    fn collect_dense<const N: usize>(mut mi: MultiIndex<'_, N>) -> Vec<Vec<isize>> {
        let mut out = Vec::new();
        while !mi.is_done() {
            out.push(mi.get().to_vec());
            mi.increment();
        }
        out
    }

    #[test]
    fn matches_naive_reference_for_covered_shapes() {
        let shapes: Vec<Dimensions> = vec![
            dims(&[]),
            dims(&[("x", 1)]),
            dims(&[("x", 7)]),
            dims(&[("y", 3), ("x", 4)]),
            dims(&[("z", 2), ("y", 3), ("x", 4)]),
            dims(&[("w", 2), ("z", 1), ("y", 3), ("x", 2)]),
        ];
        for iter in &shapes {
            let s = Strides::contiguous(iter);
            let mi = MultiIndex::dense(
                iter,
                [DenseOperand {
                    dims: iter,
                    strides: &s,
                    offset: 0,
                }],
            )
            .unwrap();
            assert_eq!(collect_dense(mi), naive_offsets(iter, &[(iter, &s, 0)]));
        }
    }

    #[test]
    fn transposed_co_iteration_pairs_identically() {
        // A 2x3 and a transposed 3x2 view of the same logical values must pair
        // identical logical (row, col) elements at every step.
        let a_dims = dims(&[("y", 2), ("x", 3)]);
        let b_dims = dims(&[("x", 3), ("y", 2)]);
        let a_strides = Strides::contiguous(&a_dims);
        let b_strides = Strides::contiguous(&b_dims);
        let iter = a_dims.merge(&b_dims).unwrap();
        let mi = MultiIndex::dense(
            &iter,
            [
                DenseOperand {
                    dims: &a_dims,
                    strides: &a_strides,
                    offset: 0,
                },
                DenseOperand {
                    dims: &b_dims,
                    strides: &b_strides,
                    offset: 0,
                },
            ],
        )
        .unwrap();
        let got = collect_dense(mi);
        let expected = naive_offsets(&iter, &[(&a_dims, &a_strides, 0), (&b_dims, &b_strides, 0)]);
        assert_eq!(got, expected);
        // Spot-check the pairing: logical (y=1, x=2) is a-offset 5, b-offset
        // 2*2 + 1 = 5 in the transposed layout.
        assert_eq!(got[5], vec![5, 5]);
    }

    #[test]
    fn broadcast_operand_has_zero_stride() {
        let iter = dims(&[("y", 2), ("x", 3)]);
        let b_dims = dims(&[("x", 3)]);
        let b_strides = Strides::contiguous(&b_dims);
        let mi = MultiIndex::dense(
            &iter,
            [DenseOperand {
                dims: &b_dims,
                strides: &b_strides,
                offset: 0,
            }],
        )
        .unwrap();
        let got: Vec<isize> = collect_dense(mi).into_iter().map(|v| v[0]).collect();
        assert_eq!(got, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn zero_volume_terminates_immediately() {
        let iter = dims(&[("y", 0), ("x", 3)]);
        let s = Strides::contiguous(&iter);
        let mi = MultiIndex::dense(
            &iter,
            [DenseOperand {
                dims: &iter,
                strides: &s,
                offset: 0,
            }],
        )
        .unwrap();
        assert!(mi.is_done());
        assert_eq!(mi.total(), 0);
    }

    #[test]
    fn operand_extent_mismatch_rejected() {
        let iter = dims(&[("x", 3)]);
        let bad = dims(&[("x", 4)]);
        let s = Strides::contiguous(&bad);
        assert!(MultiIndex::dense(
            &iter,
            [DenseOperand {
                dims: &bad,
                strides: &s,
                offset: 0,
            }]
        )
        .is_err());
    }

    #[test]
    fn coalescing_preserves_addressing_with_offsets() {
        // A sliced view: offset 1, contiguous inner run; coalescing must not
        // change the produced offsets.
        let iter = dims(&[("y", 3), ("x", 4)]);
        let view_strides = Strides::from_slice(&[8, 1]);
        let mi = MultiIndex::dense(
            &iter,
            [DenseOperand {
                dims: &iter,
                strides: &view_strides,
                offset: 1,
            }],
        )
        .unwrap();
        let got = collect_dense(mi);
        let expected = naive_offsets(&iter, &[(&iter, &view_strides, 1)]);
        assert_eq!(got, expected);
    }

    #[test]
    fn set_index_matches_sequential_traversal() {
        let iter = dims(&[("z", 3), ("y", 4), ("x", 5)]);
        let a = Strides::contiguous(&iter);
        let t = iter.transpose(&[]).unwrap();
        let b = Strides::contiguous(&t);
        let make = || {
            MultiIndex::dense(
                &iter,
                [
                    DenseOperand {
                        dims: &iter,
                        strides: &a,
                        offset: 0,
                    },
                    DenseOperand {
                        dims: &t,
                        strides: &b,
                        offset: 0,
                    },
                ],
            )
            .unwrap()
        };
        let sequential = collect_dense(make());
        for start in [0usize, 1, 17, 42, 59] {
            let mut mi = make();
            mi.set_index(start);
            assert_eq!(mi.get().to_vec(), sequential[start], "start {start}");
        }
    }

    fn binned_pair<'a>(
        outer: &'a Dimensions,
        outer_strides: &'a Strides,
        a_ranges: &'a [(usize, usize)],
        b_ranges: &'a [(usize, usize)],
        inner_extent: usize,
    ) -> Result<MultiIndex<'a, 2>, Error> {
        MultiIndex::binned(
            outer,
            [
                BinnedOperand::Binned {
                    dims: outer,
                    strides: outer_strides,
                    offset: 0,
                    ranges: a_ranges,
                    inner_stride: 1,
                    inner_offset: 0,
                    inner_extent,
                },
                BinnedOperand::Binned {
                    dims: outer,
                    strides: outer_strides,
                    offset: 0,
                    ranges: b_ranges,
                    inner_stride: 1,
                    inner_offset: 0,
                    inner_extent,
                },
            ],
        )
    }

    #[test]
    fn binned_matching_sizes_succeed() {
        // Outer {y:2}, ranges [(0,2), (2,2)] into an inner buffer of length 2.
        let outer = dims(&[("y", 2)]);
        let s = Strides::contiguous(&outer);
        let ranges = [(0usize, 2usize), (2, 2)];
        let partner = [(0usize, 2usize), (2, 2)];
        let mi = binned_pair(&outer, &s, &ranges, &partner, 2).unwrap();
        assert_eq!(mi.total(), 2);
        let got = collect_dense(mi);
        assert_eq!(got, vec![vec![0, 0], vec![1, 1]]);
    }

    #[test]
    fn binned_size_mismatch_rejected() {
        let outer = dims(&[("y", 2)]);
        let s = Strides::contiguous(&outer);
        let ranges = [(0usize, 2usize), (2, 2)];
        // Second bucket has length 1 instead of 0.
        let partner = [(0usize, 2usize), (2, 3)];
        let err = binned_pair(&outer, &s, &ranges, &partner, 3).unwrap_err();
        assert_eq!(
            err,
            Error::BinnedData(BinnedDataError::BinSizeMismatch {
                lhs_operand: 0,
                rhs_operand: 1,
                bin: 1,
                lhs_size: 0,
                rhs_size: 1,
            })
        );
    }

    #[test]
    fn binned_range_out_of_bounds_rejected() {
        let outer = dims(&[("y", 1)]);
        let s = Strides::contiguous(&outer);
        let ranges = [(0usize, 3usize)];
        let err = MultiIndex::binned(
            &outer,
            [BinnedOperand::Binned {
                dims: &outer,
                strides: &s,
                offset: 0,
                ranges: &ranges,
                inner_stride: 1,
                inner_offset: 0,
                inner_extent: 2,
            }],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::BinnedData(BinnedDataError::RangeOutOfBounds { .. })
        ));
    }

    #[test]
    fn binned_skips_empty_buckets() {
        // Buckets: [0,1), [1,1) (empty), [1,3). The cursor must seek past the
        // empty one transparently.
        let outer = dims(&[("y", 3)]);
        let s = Strides::contiguous(&outer);
        let ranges = [(0usize, 1usize), (1, 1), (1, 3)];
        let mi = MultiIndex::binned(
            &outer,
            [BinnedOperand::Binned {
                dims: &outer,
                strides: &s,
                offset: 0,
                ranges: &ranges,
                inner_stride: 1,
                inner_offset: 0,
                inner_extent: 3,
            }],
        )
        .unwrap();
        assert_eq!(mi.total(), 3);
        let got: Vec<isize> = collect_dense(mi).into_iter().map(|v| v[0]).collect();
        assert_eq!(got, vec![0, 1, 2]);
    }

    #[test]
    fn binned_leading_empty_bucket() {
        let outer = dims(&[("y", 2)]);
        let s = Strides::contiguous(&outer);
        let ranges = [(0usize, 0usize), (0, 2)];
        let mi = MultiIndex::binned(
            &outer,
            [BinnedOperand::Binned {
                dims: &outer,
                strides: &s,
                offset: 0,
                ranges: &ranges,
                inner_stride: 1,
                inner_offset: 0,
                inner_extent: 2,
            }],
        )
        .unwrap();
        let got: Vec<isize> = collect_dense(mi).into_iter().map(|v| v[0]).collect();
        assert_eq!(got, vec![0, 1]);
    }

    #[test]
    fn binned_with_dense_partner_broadcasts_per_bucket() {
        // A dense outer-shaped operand keeps a constant offset while each
        // bucket's contents are visited.
        let outer = dims(&[("y", 2)]);
        let s = Strides::contiguous(&outer);
        let ranges = [(0usize, 2usize), (2, 3)];
        let mi = MultiIndex::binned(
            &outer,
            [
                BinnedOperand::Binned {
                    dims: &outer,
                    strides: &s,
                    offset: 0,
                    ranges: &ranges,
                    inner_stride: 1,
                    inner_offset: 0,
                    inner_extent: 3,
                },
                BinnedOperand::Dense {
                    dims: &outer,
                    strides: &s,
                    offset: 0,
                },
            ],
        )
        .unwrap();
        let got = collect_dense(mi);
        assert_eq!(got, vec![vec![0, 0], vec![1, 0], vec![2, 1]]);
    }
}
