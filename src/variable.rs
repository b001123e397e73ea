//! The `Variable`: a unit- and variance-aware view over a shared, type-erased
//! buffer.
//!
//! Slicing, broadcasting, transposing, folding and flattening are pure
//! metadata transforms that never copy; views alias the same buffer until
//! someone asks for [`Variable::deep_copy`]. Mutation is gated by a readonly
//! flag checked on every mutating entry point.

use std::sync::Arc;

use crate::dim::Dim;
use crate::dimensions::Dimensions;
use crate::element::{BufferData, BufferHandle, DType, Element, TypedBuffer};
use crate::error::{
    DTypeError, DimensionError, Result, UnitError, VariableError, VariancesError,
};
use crate::multi_index::{DenseOperand, MultiIndex};
use crate::strides::Strides;
use crate::unit::Unit;

/// Labeled array view: dtype, unit, dims, strides, offset and a
/// reference-counted handle to the underlying buffer.
///
/// `Clone` is shallow: the clone shares the buffer. Only
/// [`deep_copy`](Variable::deep_copy) duplicates data.
#[derive(Clone, Debug)]
pub struct Variable {
    dtype: DType,
    unit: Unit,
    dims: Dimensions,
    strides: Strides,
    offset: isize,
    buffer: BufferHandle,
    readonly: bool,
}

impl Variable {
    /// Allocating constructor: a freshly owned, packed buffer.
    pub fn new<T: Element>(
        dims: Dimensions,
        unit: Unit,
        values: Vec<T>,
        variances: Option<Vec<T>>,
    ) -> Result<Variable> {
        let volume = dims.volume() as usize;
        if values.len() != volume {
            return Err(VariableError::LengthMismatch {
                expected: volume,
                actual: values.len(),
            }
            .into());
        }
        if let Some(v) = &variances {
            if !T::DTYPE.supports_variances() {
                return Err(VariancesError::Unsupported(T::DTYPE).into());
            }
            if v.len() != volume {
                return Err(VariancesError::LengthMismatch {
                    values: volume,
                    variances: v.len(),
                }
                .into());
            }
        }
        Ok(Variable {
            dtype: T::DTYPE,
            unit,
            dims,
            strides: Strides::contiguous(&dims),
            offset: 0,
            buffer: crate::element::new_handle(T::make_buffer(values, variances)),
            readonly: false,
        })
    }

    /// A packed buffer filled with `value`.
    pub fn full<T: Element>(dims: Dimensions, unit: Unit, value: T) -> Result<Variable> {
        let volume = dims.volume() as usize;
        Variable::new(dims, unit, vec![value; volume], None)
    }

    /// A packed buffer of default (zero) values, optionally with zero
    /// variances.
    pub fn zeros<T: Element>(
        dims: Dimensions,
        unit: Unit,
        with_variances: bool,
    ) -> Result<Variable> {
        let volume = dims.volume() as usize;
        let variances = with_variances.then(|| vec![T::default(); volume]);
        Variable::new(dims, unit, vec![T::default(); volume], variances)
    }

    /// A rank-0 variable holding one value.
    pub fn scalar<T: Element>(value: T, unit: Unit) -> Variable {
        // Rank-0 construction cannot fail: one value, volume one.
        match Variable::new(Dimensions::new(), unit, vec![value], None) {
            Ok(v) => v,
            Err(_) => unreachable!("rank-0 constructor is infallible"),
        }
    }

    /// View constructor sharing an existing buffer. The caller is responsible
    /// for dims/strides/offset staying within the buffer.
    pub(crate) fn view(
        dtype: DType,
        unit: Unit,
        dims: Dimensions,
        strides: Strides,
        offset: isize,
        buffer: BufferHandle,
        readonly: bool,
    ) -> Variable {
        Variable {
            dtype,
            unit,
            dims,
            strides,
            offset,
            buffer,
            readonly,
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// Change the unit tag of this view.
    pub fn set_unit(&mut self, unit: Unit) -> Result<()> {
        self.ensure_writable()?;
        self.unit = unit;
        Ok(())
    }

    pub fn dims(&self) -> &Dimensions {
        &self.dims
    }

    pub fn strides(&self) -> &Strides {
        &self.strides
    }

    pub fn offset(&self) -> isize {
        self.offset
    }

    pub fn ndim(&self) -> usize {
        self.dims.ndim()
    }

    pub fn volume(&self) -> i64 {
        self.dims.volume()
    }

    pub fn has_variances(&self) -> bool {
        self.buffer.read_recursive().has_variances()
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn set_readonly(&mut self) {
        self.readonly = true;
    }

    /// A readonly alias of this view.
    pub fn readonly_view(&self) -> Variable {
        let mut out = self.clone();
        out.readonly = true;
        out
    }

    pub(crate) fn ensure_writable(&self) -> std::result::Result<(), VariableError> {
        if self.readonly {
            Err(VariableError::Readonly)
        } else {
            Ok(())
        }
    }

    pub(crate) fn buffer(&self) -> &BufferHandle {
        &self.buffer
    }

    pub(crate) fn expect_dtype(&self, expected: DType) -> std::result::Result<(), DTypeError> {
        if self.dtype != expected {
            Err(DTypeError::Unexpected {
                expected,
                actual: self.dtype,
            })
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // View transforms (no copies)
    // ------------------------------------------------------------------

    /// Range slice: keeps `dim` with extent `end - begin`.
    pub fn slice(&self, dim: Dim, begin: i64, end: i64) -> Result<Variable> {
        self.slice_step(dim, begin, end, 1)
    }

    /// Range slice with a step along `dim`.
    pub fn slice_step(&self, dim: Dim, begin: i64, end: i64, step: i64) -> Result<Variable> {
        if step <= 0 {
            return Err(DimensionError::InvalidStep(step).into());
        }
        let index = self
            .dims
            .index_of(dim)
            .ok_or(DimensionError::NotFound(dim))?;
        let extent = self.dims.extent_at(index);
        if begin < 0 || begin > end || end > extent {
            return Err(DimensionError::SliceOutOfRange {
                dim,
                begin,
                end,
                extent,
            }
            .into());
        }
        let mut out = self.clone();
        out.offset += begin as isize * self.strides.at(index);
        out.dims.resize(dim, (end - begin + step - 1) / step)?;
        out.strides.set(index, self.strides.at(index) * step as isize);
        Ok(out)
    }

    /// Point slice: erases `dim` entirely.
    pub fn slice_point(&self, dim: Dim, position: i64) -> Result<Variable> {
        let index = self
            .dims
            .index_of(dim)
            .ok_or(DimensionError::NotFound(dim))?;
        let extent = self.dims.extent_at(index);
        if position < 0 || position >= extent {
            return Err(DimensionError::SliceOutOfRange {
                dim,
                begin: position,
                end: position + 1,
                extent,
            }
            .into());
        }
        let mut out = self.clone();
        out.offset += position as isize * self.strides.at(index);
        out.dims.erase_at(index);
        out.strides.erase_at(index);
        Ok(out)
    }

    /// Insert zero strides for dims present in `target` but absent here. The
    /// result is readonly: writing through it would alias.
    pub fn broadcast(&self, target: &Dimensions) -> Result<Variable> {
        for (i, &d) in self.dims.labels().iter().enumerate() {
            let from = self.dims.extent_at(i);
            match target.extent(d) {
                Some(to) if to == from => {}
                other => {
                    return Err(DimensionError::CannotBroadcast {
                        dim: d,
                        from,
                        to: other.unwrap_or(0),
                    }
                    .into())
                }
            }
        }
        let mut strides = Strides::from_slice(&vec![0; target.ndim()]);
        for (j, &d) in target.labels().iter().enumerate() {
            if let Some(i) = self.dims.index_of(d) {
                strides.set(j, self.strides.at(i));
            }
        }
        let mut out = self.clone();
        out.dims = *target;
        out.strides = strides;
        out.readonly = true;
        Ok(out)
    }

    /// Reorder dims; an empty order reverses.
    pub fn transpose(&self, order: &[Dim]) -> Result<Variable> {
        let dims = self.dims.transpose(order)?;
        let mut strides = Strides::from_slice(&vec![0; dims.ndim()]);
        for (j, &d) in dims.labels().iter().enumerate() {
            // Labels are a permutation of self.dims, so the index exists.
            if let Some(i) = self.dims.index_of(d) {
                strides.set(j, self.strides.at(i));
            }
        }
        let mut out = self.clone();
        out.dims = dims;
        out.strides = strides;
        Ok(out)
    }

    /// Split `dim` into `to`, preserving volume. Metadata only.
    pub fn fold(&self, dim: Dim, to: &Dimensions) -> Result<Variable> {
        let index = self
            .dims
            .index_of(dim)
            .ok_or(DimensionError::NotFound(dim))?;
        let dims = self.dims.fold(dim, to)?;
        let base = self.strides.at(index);
        let mut strides = Strides::from_slice(&vec![0; dims.ndim()]);
        for (j, &d) in dims.labels().iter().enumerate() {
            if let Some(i) = self.dims.index_of(d) {
                strides.set(j, self.strides.at(i));
            } else {
                // One of `to`'s labels: stride scales with the extents inner
                // to it within the replacement block.
                strides.set(j, base * to.offset(d)? as isize);
            }
        }
        let mut out = self.clone();
        out.dims = dims;
        out.strides = strides;
        Ok(out)
    }

    /// Collapse the contiguous block `from` into `to`. Requires the block to
    /// be contiguous in memory as well as in label order.
    pub fn flatten(&self, from: &[Dim], to: Dim) -> Result<Variable> {
        let dims = self.dims.flatten(from, to)?;
        for pair in from.windows(2) {
            let outer = self.dims.index_of(pair[0]);
            let inner = self.dims.index_of(pair[1]);
            if let (Some(outer), Some(inner)) = (outer, inner) {
                let expected = self.dims.extent_at(inner) as isize * self.strides.at(inner);
                if self.strides.at(outer) != expected {
                    return Err(DimensionError::NotContiguous(from.to_vec()).into());
                }
            }
        }
        let innermost = match from.last().and_then(|&d| self.dims.index_of(d)) {
            Some(i) => self.strides.at(i),
            None => return Err(DimensionError::NotContiguous(from.to_vec()).into()),
        };
        let mut strides = Strides::from_slice(&vec![0; dims.ndim()]);
        for (j, &d) in dims.labels().iter().enumerate() {
            if d == to {
                strides.set(j, innermost);
            } else if let Some(i) = self.dims.index_of(d) {
                strides.set(j, self.strides.at(i));
            }
        }
        let mut out = self.clone();
        out.dims = dims;
        out.strides = strides;
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Copy `other` elementwise into the `[begin, end)` range of `dim`.
    ///
    /// The sole in-place entry point for partial updates. Unit, dtype and
    /// variance parity are validated before anything is written.
    pub fn set_slice(&self, dim: Dim, begin: i64, end: i64, other: &Variable) -> Result<()> {
        self.ensure_writable()?;
        if self.unit != other.unit {
            return Err(UnitError::Incompatible {
                a: self.unit,
                b: other.unit,
            }
            .into());
        }
        if self.dtype != other.dtype {
            return Err(DTypeError::Mismatch {
                a: self.dtype,
                b: other.dtype,
            }
            .into());
        }
        if self.has_variances() != other.has_variances() {
            return Err(VariancesError::PresenceMismatch.into());
        }
        let target = self.slice(dim, begin, end)?;
        crate::transform::copy_into(&target, other)
    }

    /// Attach or clear the variance buffer.
    ///
    /// Only allowed on a view covering its whole buffer; adding variances
    /// through a slice would silently extend siblings.
    pub fn set_variances<T: Element>(&self, variances: Option<Vec<T>>) -> Result<()> {
        self.ensure_writable()?;
        self.expect_dtype(T::DTYPE)?;
        let mut guard = self.buffer.write();
        let full = self.offset == 0
            && self.strides == Strides::contiguous(&self.dims)
            && self.dims.volume() as usize == guard.len();
        if !full {
            return Err(VariancesError::SetThroughSlice.into());
        }
        T::set_variances_of(&mut guard, variances)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Readback
    // ------------------------------------------------------------------

    /// Gather a buffer-resident slice through this view's addressing, in
    /// logical (row-major) order.
    pub(crate) fn gather<T: Copy>(&self, data: &[T]) -> Result<Vec<T>> {
        let mut mi = MultiIndex::dense(
            &self.dims,
            [DenseOperand {
                dims: &self.dims,
                strides: &self.strides,
                offset: self.offset,
            }],
        )?;
        let mut out = Vec::with_capacity(mi.total());
        while !mi.is_done() {
            out.push(data[mi.get()[0] as usize]);
            mi.increment();
        }
        Ok(out)
    }

    /// Values in logical order.
    pub fn values<T: Element>(&self) -> Result<Vec<T>> {
        self.expect_dtype(T::DTYPE)?;
        let guard = self.buffer.read_recursive();
        let data = T::values_of(&guard).ok_or(DTypeError::Unexpected {
            expected: T::DTYPE,
            actual: guard.dtype(),
        })?;
        self.gather(data)
    }

    /// Variances in logical order; fails if absent.
    pub fn variances<T: Element>(&self) -> Result<Vec<T>> {
        self.expect_dtype(T::DTYPE)?;
        let guard = self.buffer.read_recursive();
        let data = T::variances_of(&guard).ok_or(VariancesError::Missing)?;
        self.gather(data)
    }

    /// The single value of a rank-0 variable.
    pub fn value<T: Element>(&self) -> Result<T> {
        if !self.dims.is_empty() {
            return Err(VariableError::NotScalar(self.ndim()).into());
        }
        Ok(self.values::<T>()?[0])
    }

    /// The single variance of a rank-0 variable.
    pub fn variance<T: Element>(&self) -> Result<T> {
        if !self.dims.is_empty() {
            return Err(VariableError::NotScalar(self.ndim()).into());
        }
        Ok(self.variances::<T>()?[0])
    }

    /// Explicit deep duplication: a freshly packed buffer with this view's
    /// logical contents. The copy is writable.
    pub fn deep_copy(&self) -> Result<Variable> {
        let guard = self.buffer.read_recursive();
        match &*guard {
            BufferData::F64(b) => self.deep_copy_typed(b),
            BufferData::F32(b) => self.deep_copy_typed(b),
            BufferData::I64(b) => self.deep_copy_typed(b),
            BufferData::I32(b) => self.deep_copy_typed(b),
            BufferData::Bool(b) => self.deep_copy_typed(b),
            BufferData::Bucket(b) => {
                let ranges = self.gather(&b.ranges)?;
                let inner = b.inner.deep_copy()?;
                let dims = self.dims;
                let unit = self.unit;
                let dim = b.dim;
                drop(guard);
                Ok(crate::bucket::binned_view(dims, unit, ranges, dim, inner))
            }
        }
    }

    fn deep_copy_typed<T: Element>(&self, buffer: &TypedBuffer<T>) -> Result<Variable> {
        let values = self.gather(&buffer.values)?;
        let variances = match &buffer.variances {
            Some(v) => Some(self.gather(v)?),
            None => None,
        };
        Variable::new(self.dims, self.unit, values, variances)
    }

    // ------------------------------------------------------------------
    // Equality relations
    // ------------------------------------------------------------------

    /// Aliasing identity: same buffer, dims, strides and offset. Distinct
    /// from value equality.
    pub fn is_same(&self, other: &Variable) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
            && self.dtype == other.dtype
            && self.unit == other.unit
            && self.dims == other.dims
            && self.strides == other.strides
            && self.offset == other.offset
    }

    /// Value equality treating matching NaN patterns as equal.
    pub fn equals_nan(&self, other: &Variable) -> bool {
        self.equal_impl(other, true)
    }

    fn equal_impl(&self, other: &Variable, nan: bool) -> bool {
        if self.dtype != other.dtype
            || self.unit != other.unit
            || self.dims != other.dims
            || self.has_variances() != other.has_variances()
        {
            return false;
        }
        let ga = self.buffer.read_recursive();
        let gb = other.buffer.read_recursive();
        match (&*ga, &*gb) {
            (BufferData::F64(a), BufferData::F64(b)) => self.eq_typed(a, other, b, nan),
            (BufferData::F32(a), BufferData::F32(b)) => self.eq_typed(a, other, b, nan),
            (BufferData::I64(a), BufferData::I64(b)) => self.eq_typed(a, other, b, nan),
            (BufferData::I32(a), BufferData::I32(b)) => self.eq_typed(a, other, b, nan),
            (BufferData::Bool(a), BufferData::Bool(b)) => self.eq_typed(a, other, b, nan),
            (BufferData::Bucket(a), BufferData::Bucket(b)) => {
                if a.dim != b.dim {
                    return false;
                }
                let (Ok(ra), Ok(rb)) = (self.gather(&a.ranges), other.gather(&b.ranges)) else {
                    return false;
                };
                for (&(ab, ae), &(bb, be)) in ra.iter().zip(&rb) {
                    if ae - ab != be - bb {
                        return false;
                    }
                    let (Ok(sa), Ok(sb)) = (
                        a.inner.slice(a.dim, ab as i64, ae as i64),
                        b.inner.slice(b.dim, bb as i64, be as i64),
                    ) else {
                        return false;
                    };
                    if !sa.equal_impl(&sb, nan) {
                        return false;
                    }
                }
                true
            }
            _ => false,
        }
    }

    fn eq_typed<T: Element>(
        &self,
        a: &TypedBuffer<T>,
        other: &Variable,
        b: &TypedBuffer<T>,
        nan: bool,
    ) -> bool {
        let Ok(mut mi) = MultiIndex::dense(
            &self.dims,
            [
                DenseOperand {
                    dims: &self.dims,
                    strides: &self.strides,
                    offset: self.offset,
                },
                DenseOperand {
                    dims: &other.dims,
                    strides: &other.strides,
                    offset: other.offset,
                },
            ],
        ) else {
            return false;
        };
        let eq = |x: T, y: T| if nan { T::equals_nan(x, y) } else { x == y };
        while !mi.is_done() {
            let [i, j] = mi.get();
            if !eq(a.values[i as usize], b.values[j as usize]) {
                return false;
            }
            if let (Some(va), Some(vb)) = (&a.variances, &b.variances) {
                if !eq(va[i as usize], vb[j as usize]) {
                    return false;
                }
            }
            mi.increment();
        }
        true
    }
}

/// Value equality: unit, dims, dtype, variance parity and elementwise
/// contents. Never compares strides or offsets directly.
impl PartialEq for Variable {
    fn eq(&self, other: &Variable) -> bool {
        self.equal_impl(other, false)
    }
}
