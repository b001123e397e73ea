//! Binned (ragged) variables.
//!
//! A binned variable pairs a rectangular outer shape with one `(begin, end)`
//! range per outer element, each addressing a slice of a single shared inner
//! variable along its sliced dimension. Buckets may be empty and need not be
//! ordered or disjoint.

use crate::dim::Dim;
use crate::dimensions::Dimensions;
use crate::element::{BufferData, BucketBuffer, DType};
use crate::error::{BinnedDataError, DimensionError, Result};
use crate::strides::Strides;
use crate::unit::Unit;
use crate::variable::Variable;

impl Variable {
    /// Construct a binned variable: `dims` is the outer shape, `ranges` holds
    /// one `(begin, end)` per outer element in logical order, and each range
    /// selects a slice of `inner` along `dim`.
    ///
    /// Every range is validated against the inner extent up front. The outer
    /// variable itself is dimensionless; the unit lives on `inner`.
    pub fn binned(
        dims: Dimensions,
        ranges: Vec<(usize, usize)>,
        dim: Dim,
        inner: Variable,
    ) -> Result<Variable> {
        let volume = dims.volume() as usize;
        if ranges.len() != volume {
            return Err(BinnedDataError::RangeCountMismatch {
                expected: volume,
                actual: ranges.len(),
            }
            .into());
        }
        let extent = inner
            .dims()
            .extent(dim)
            .ok_or(DimensionError::NotFound(dim))? as usize;
        for (bin, &(begin, end)) in ranges.iter().enumerate() {
            if begin > end || end > extent {
                return Err(BinnedDataError::RangeOutOfBounds {
                    bin,
                    begin,
                    end,
                    extent,
                }
                .into());
            }
        }
        Ok(binned_view(dims, Unit::NONE, ranges, dim, inner))
    }

    /// Per-bucket event counts as an `Int64` variable over the outer shape.
    pub fn bin_sizes(&self) -> Result<Variable> {
        let ranges = self.bin_ranges()?;
        let sizes: Vec<i64> = ranges.iter().map(|&(b, e)| (e - b) as i64).collect();
        Variable::new(*self.dims(), Unit::NONE, sizes, None)
    }

    /// The `(begin, end)` ranges in this view's logical order.
    pub fn bin_ranges(&self) -> Result<Vec<(usize, usize)>> {
        let guard = self.buffer().read_recursive();
        let bucket = require_bucket(&guard)?;
        self.gather(&bucket.ranges)
    }

    /// The sliced dimension of the inner buffer.
    pub fn bin_dim(&self) -> Result<Dim> {
        let guard = self.buffer().read_recursive();
        Ok(require_bucket(&guard)?.dim)
    }

    /// A shallow handle to the shared inner variable.
    pub fn bin_inner(&self) -> Result<Variable> {
        let guard = self.buffer().read_recursive();
        Ok(require_bucket(&guard)?.inner.clone())
    }

    /// The slice of the inner variable backing one bucket.
    pub fn bin_at(&self, bin: usize) -> Result<Variable> {
        let ranges = self.bin_ranges()?;
        let guard = self.buffer().read_recursive();
        let bucket = require_bucket(&guard)?;
        let &(begin, end) = ranges
            .get(bin)
            .ok_or(BinnedDataError::RangeCountMismatch {
                expected: ranges.len(),
                actual: bin,
            })?;
        bucket.inner.slice(bucket.dim, begin as i64, end as i64)
    }
}

fn require_bucket<'a>(
    buffer: &'a BufferData,
) -> std::result::Result<&'a BucketBuffer, BinnedDataError> {
    buffer.bucket().ok_or(BinnedDataError::NotBinned)
}

/// Unchecked view constructor for internal callers that have already
/// validated the ranges.
pub(crate) fn binned_view(
    dims: Dimensions,
    unit: Unit,
    ranges: Vec<(usize, usize)>,
    dim: Dim,
    inner: Variable,
) -> Variable {
    let strides = Strides::contiguous(&dims);
    let buffer = crate::element::new_handle(BufferData::Bucket(BucketBuffer {
        ranges,
        dim,
        inner,
    }));
    Variable::view(DType::Bucket, unit, dims, strides, 0, buffer, false)
}
