//! The transform/accumulate dispatch engine.
//!
//! Applies an elementwise operation across one or two variables, handling
//! broadcasting, unit propagation, variance propagation, dtype dispatch and
//! binned operands. All validation is front-loaded: a failed call leaves
//! every operand bit-for-bit unchanged.
//!
//! Dense calls over large iteration spaces fork into the rayon pool and
//! join before returning; each worker owns a disjoint index range of the
//! output. Binned co-iteration is always single-threaded.

use std::sync::Arc;

use crate::dim::Dim;
use crate::dimensions::Dimensions;
use crate::element::{BucketBuffer, BufferData, DType, Element};
use crate::error::{
    BinnedDataError, DTypeError, DimensionError, Error, Result, UnitError, VariancesError,
};
use crate::multi_index::{BinnedOperand, DenseOperand, MultiIndex};
use crate::ops::{BinaryOp, UnaryOp};
use crate::unit::Unit;
use crate::value_and_variance::ValueAndVariance;
use crate::variable::Variable;

type Vv<T> = ValueAndVariance<T>;

/// Below this iteration volume a call stays single-threaded.
#[cfg(feature = "parallel")]
const MIN_THREAD_LENGTH: usize = 32_768;

/// Number of input partitions for the two-level accumulate reduction.
#[cfg(feature = "parallel")]
const ACCUMULATE_CHUNKS: usize = 24;

// ---------------------------------------------------------------------------
// Kernel resolution
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum BinaryKernel {
    F64(fn(f64, f64) -> f64),
    F32(fn(f32, f32) -> f32),
    I64(fn(i64, i64) -> i64),
    I32(fn(i32, i32) -> i32),
    Bool(fn(bool, bool) -> bool),
    VvF64(fn(Vv<f64>, Vv<f64>) -> Vv<f64>),
    VvF32(fn(Vv<f32>, Vv<f32>) -> Vv<f32>),
    CmpF64(fn(f64, f64) -> bool),
    CmpF32(fn(f32, f32) -> bool),
    CmpI64(fn(i64, i64) -> bool),
    CmpI32(fn(i32, i32) -> bool),
    CmpBool(fn(bool, bool) -> bool),
}

#[derive(Clone, Copy)]
enum UnaryKernel {
    F64(fn(f64) -> f64),
    F32(fn(f32) -> f32),
    I64(fn(i64) -> i64),
    I32(fn(i32) -> i32),
    VvF64(fn(Vv<f64>) -> Vv<f64>),
    VvF32(fn(Vv<f32>) -> Vv<f32>),
}

/// Pick the single slot for this call, before any buffer is locked. In-place
/// calls never resolve to a comparison (the output dtype would differ).
fn resolve_binary(
    op: &dyn BinaryOp,
    dtype: DType,
    with_variances: bool,
    in_place: bool,
) -> Result<BinaryKernel> {
    let no_overload = || {
        Error::from(DTypeError::NoOverload {
            op: op.name(),
            dtype,
        })
    };
    let no_vv = || {
        Error::from(VariancesError::NoVarianceOverload {
            op: op.name(),
            dtype,
        })
    };
    match dtype {
        DType::Float64 => {
            if !in_place {
                if let Some(f) = op.f64_cmp_op() {
                    return Ok(BinaryKernel::CmpF64(f));
                }
            }
            if with_variances {
                op.f64_vv_op().map(BinaryKernel::VvF64).ok_or_else(no_vv)
            } else {
                op.f64_op().map(BinaryKernel::F64).ok_or_else(no_overload)
            }
        }
        DType::Float32 => {
            if !in_place {
                if let Some(f) = op.f32_cmp_op() {
                    return Ok(BinaryKernel::CmpF32(f));
                }
            }
            if with_variances {
                op.f32_vv_op().map(BinaryKernel::VvF32).ok_or_else(no_vv)
            } else {
                op.f32_op().map(BinaryKernel::F32).ok_or_else(no_overload)
            }
        }
        DType::Int64 => {
            if !in_place {
                if let Some(f) = op.i64_cmp_op() {
                    return Ok(BinaryKernel::CmpI64(f));
                }
            }
            op.i64_op().map(BinaryKernel::I64).ok_or_else(no_overload)
        }
        DType::Int32 => {
            if !in_place {
                if let Some(f) = op.i32_cmp_op() {
                    return Ok(BinaryKernel::CmpI32(f));
                }
            }
            op.i32_op().map(BinaryKernel::I32).ok_or_else(no_overload)
        }
        DType::Bool => {
            if !in_place {
                if let Some(f) = op.bool_cmp_op() {
                    return Ok(BinaryKernel::CmpBool(f));
                }
            }
            op.bool_op().map(BinaryKernel::Bool).ok_or_else(no_overload)
        }
        DType::Bucket => Err(no_overload()),
    }
}

fn resolve_unary(op: &dyn UnaryOp, dtype: DType, with_variances: bool) -> Result<UnaryKernel> {
    let no_overload = || {
        Error::from(DTypeError::NoOverload {
            op: op.name(),
            dtype,
        })
    };
    let no_vv = || {
        Error::from(VariancesError::NoVarianceOverload {
            op: op.name(),
            dtype,
        })
    };
    match dtype {
        DType::Float64 => {
            if with_variances {
                op.f64_vv_op().map(UnaryKernel::VvF64).ok_or_else(no_vv)
            } else {
                op.f64_op().map(UnaryKernel::F64).ok_or_else(no_overload)
            }
        }
        DType::Float32 => {
            if with_variances {
                op.f32_vv_op().map(UnaryKernel::VvF32).ok_or_else(no_vv)
            } else {
                op.f32_op().map(UnaryKernel::F32).ok_or_else(no_overload)
            }
        }
        DType::Int64 => op.i64_op().map(UnaryKernel::I64).ok_or_else(no_overload),
        DType::Int32 => op.i32_op().map(UnaryKernel::I32).ok_or_else(no_overload),
        DType::Bool | DType::Bucket => Err(no_overload()),
    }
}

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

fn operand(v: &Variable) -> DenseOperand<'_> {
    DenseOperand {
        dims: v.dims(),
        strides: v.strides(),
        offset: v.offset(),
    }
}

fn values_ref<T: Element>(buffer: &BufferData) -> Result<&[T]> {
    T::values_of(buffer).ok_or_else(|| {
        DTypeError::Unexpected {
            expected: T::DTYPE,
            actual: buffer.dtype(),
        }
        .into()
    })
}

fn values_mut_ref<T: Element>(buffer: &mut BufferData) -> Result<&mut [T]> {
    let actual = buffer.dtype();
    T::values_mut_of(buffer).ok_or_else(|| {
        DTypeError::Unexpected {
            expected: T::DTYPE,
            actual,
        }
        .into()
    })
}

fn variances_mut_ref<T: Element>(buffer: &mut BufferData) -> Result<&mut [T]> {
    T::variances_mut_of(buffer).ok_or_else(|| VariancesError::Missing.into())
}

/// Iteration shape for an in-place call: the merge must not extend the
/// mutated operand.
fn in_place_iter(a_dims: &Dimensions, b_dims: &Dimensions) -> Result<Dimensions> {
    let iter = a_dims.merge(b_dims)?;
    if &iter != a_dims {
        if let Some(&d) = iter
            .labels()
            .iter()
            .find(|d| a_dims.index_of(**d).is_none())
        {
            return Err(DimensionError::InPlaceBroadcast(d).into());
        }
    }
    Ok(iter)
}

fn check_values_only(op: &dyn BinaryOp, hv_a: bool, hv_b: bool) -> Result<()> {
    let flags = op.values_only();
    for (argument, (&flag, hv)) in flags.iter().zip([hv_a, hv_b]).enumerate() {
        if flag && hv {
            return Err(VariancesError::ValuesOnlyArgument {
                op: op.name(),
                argument,
            }
            .into());
        }
    }
    Ok(())
}

/// The dtype, unit and variance presence of a variable's elements; for a
/// binned variable these come from the inner buffer.
fn content_meta(v: &Variable) -> (DType, Unit, bool) {
    if v.dtype() == DType::Bucket {
        let guard = v.buffer().read_recursive();
        if let Some(b) = guard.bucket() {
            return (b.inner.dtype(), b.inner.unit(), b.inner.has_variances());
        }
    }
    (v.dtype(), v.unit(), v.has_variances())
}

struct SendPtr<T>(*mut T);

impl<T> Clone for SendPtr<T> {
    fn clone(&self) -> Self {
        SendPtr(self.0)
    }
}

impl<T> Copy for SendPtr<T> {}

unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

/// Fill `out` with one result per logical position, splitting into disjoint
/// output ranges across the pool when the volume warrants it.
fn for_each_slot<O: Send, const N: usize>(
    mi: MultiIndex<'static, N>,
    out: &mut [O],
    body: impl Fn(&MultiIndex<'static, N>, &mut O) + Sync,
) {
    #[cfg(feature = "parallel")]
    {
        if out.len() >= MIN_THREAD_LENGTH {
            let chunk = out.len().div_ceil(rayon::current_num_threads().max(1));
            let body = &body;
            rayon::scope(|s| {
                for (c, slice) in out.chunks_mut(chunk).enumerate() {
                    let mut cursor = mi.clone();
                    s.spawn(move |_| {
                        cursor.set_index(c * chunk);
                        for slot in slice {
                            body(&cursor, slot);
                            cursor.increment();
                        }
                    });
                }
            });
            return;
        }
    }
    let mut mi = mi;
    for slot in out.iter_mut() {
        body(&mi, slot);
        mi.increment();
    }
}

/// Visit every logical position, with the same chunking as [`for_each_slot`].
/// The body is responsible for writing only to offsets derived from its own
/// cursor position.
fn for_each_indexed<const N: usize>(
    mi: MultiIndex<'static, N>,
    body: impl Fn(&MultiIndex<'static, N>) + Sync,
) {
    #[cfg(feature = "parallel")]
    {
        let total = mi.total();
        if total >= MIN_THREAD_LENGTH {
            let chunk = total.div_ceil(rayon::current_num_threads().max(1));
            let body = &body;
            rayon::scope(|s| {
                let mut start = 0;
                while start < total {
                    let len = chunk.min(total - start);
                    let mut cursor = mi.clone();
                    s.spawn(move |_| {
                        cursor.set_index(start);
                        for _ in 0..len {
                            body(&cursor);
                            cursor.increment();
                        }
                    });
                    start += len;
                }
            });
            return;
        }
    }
    let mut mi = mi;
    while !mi.is_done() {
        body(&mi);
        mi.increment();
    }
}

/// Read side of an in-place loop: a plain slice, or the output pointer
/// itself when the operands alias one buffer.
enum Source<'s, T> {
    Slice(&'s [T]),
    Ptr(*const T),
}

impl<T: Copy> Source<'_, T> {
    unsafe fn get(&self, i: isize) -> T {
        match self {
            Source::Slice(s) => s[i as usize],
            Source::Ptr(p) => *p.offset(i),
        }
    }
}

fn in_place_loop_values<T: Element>(
    mut mi: MultiIndex<'_, 2>,
    out: *mut T,
    src: Source<'_, T>,
    f: fn(T, T) -> T,
) {
    while !mi.is_done() {
        let [i, j] = mi.get();
        unsafe { *out.offset(i) = f(*out.offset(i), src.get(j)) };
        mi.increment();
    }
}

fn in_place_loop_vv<T: Element>(
    mut mi: MultiIndex<'_, 2>,
    out_v: *mut T,
    out_e: *mut T,
    src_v: Source<'_, T>,
    src_e: Option<Source<'_, T>>,
    f: fn(Vv<T>, Vv<T>) -> Vv<T>,
) {
    while !mi.is_done() {
        let [i, j] = mi.get();
        unsafe {
            let x = Vv::new(*out_v.offset(i), *out_e.offset(i));
            let variance = match &src_e {
                Some(s) => s.get(j),
                None => T::default(),
            };
            let y = Vv::new(src_v.get(j), variance);
            let r = f(x, y);
            *out_v.offset(i) = r.value;
            *out_e.offset(i) = r.variance;
        }
        mi.increment();
    }
}

// ---------------------------------------------------------------------------
// Dense kernels, fresh output
// ---------------------------------------------------------------------------

fn binary_new<T: Element, O: Element>(
    f: fn(T, T) -> O,
    iter: &Dimensions,
    a: &Variable,
    b: &Variable,
) -> Result<Vec<O>> {
    let ga = a.buffer().read_recursive();
    let gb = b.buffer().read_recursive();
    let av = values_ref::<T>(&ga)?;
    let bv = values_ref::<T>(&gb)?;
    let mi = MultiIndex::dense(iter, [operand(a), operand(b)])?;
    let mut out = vec![O::default(); mi.total()];
    for_each_slot(mi, &mut out, |mi, slot| {
        let [i, j] = mi.get();
        *slot = f(av[i as usize], bv[j as usize]);
    });
    Ok(out)
}

fn binary_new_vv<T: Element>(
    f: fn(Vv<T>, Vv<T>) -> Vv<T>,
    iter: &Dimensions,
    a: &Variable,
    b: &Variable,
) -> Result<(Vec<T>, Vec<T>)> {
    let ga = a.buffer().read_recursive();
    let gb = b.buffer().read_recursive();
    let av = values_ref::<T>(&ga)?;
    let bv = values_ref::<T>(&gb)?;
    let ae = T::variances_of(&ga);
    let be = T::variances_of(&gb);
    let mi = MultiIndex::dense(iter, [operand(a), operand(b)])?;
    let mut out = vec![Vv::<T>::default(); mi.total()];
    for_each_slot(mi, &mut out, |mi, slot| {
        let [i, j] = mi.get();
        let x = Vv::new(av[i as usize], ae.map_or_else(T::default, |e| e[i as usize]));
        let y = Vv::new(bv[j as usize], be.map_or_else(T::default, |e| e[j as usize]));
        *slot = f(x, y);
    });
    Ok((
        out.iter().map(|p| p.value).collect(),
        out.iter().map(|p| p.variance).collect(),
    ))
}

fn unary_new<T: Element, O: Element>(f: fn(T) -> O, a: &Variable) -> Result<Vec<O>> {
    let ga = a.buffer().read_recursive();
    let av = values_ref::<T>(&ga)?;
    let mi = MultiIndex::dense(a.dims(), [operand(a)])?;
    let mut out = vec![O::default(); mi.total()];
    for_each_slot(mi, &mut out, |mi, slot| {
        *slot = f(av[mi.get()[0] as usize]);
    });
    Ok(out)
}

fn unary_new_vv<T: Element>(f: fn(Vv<T>) -> Vv<T>, a: &Variable) -> Result<(Vec<T>, Vec<T>)> {
    let ga = a.buffer().read_recursive();
    let av = values_ref::<T>(&ga)?;
    let ae = T::variances_of(&ga);
    let mi = MultiIndex::dense(a.dims(), [operand(a)])?;
    let mut out = vec![Vv::<T>::default(); mi.total()];
    for_each_slot(mi, &mut out, |mi, slot| {
        let i = mi.get()[0];
        let x = Vv::new(av[i as usize], ae.map_or_else(T::default, |e| e[i as usize]));
        *slot = f(x);
    });
    Ok((
        out.iter().map(|p| p.value).collect(),
        out.iter().map(|p| p.variance).collect(),
    ))
}

// ---------------------------------------------------------------------------
// Dense kernels, in place
// ---------------------------------------------------------------------------

fn binary_in_place_values<T: Element>(
    f: fn(T, T) -> T,
    iter: &Dimensions,
    a: &Variable,
    b: &Variable,
    parallel: bool,
) -> Result<()> {
    let same = Arc::ptr_eq(a.buffer(), b.buffer());
    let mut ga = a.buffer().write();
    let out = values_mut_ref::<T>(&mut ga)?.as_mut_ptr();
    let mi = MultiIndex::dense(iter, [operand(a), operand(b)])?;
    if same {
        // Overlapping views of one buffer: deterministic sequential order.
        in_place_loop_values(mi, out, Source::Ptr(out), f);
        return Ok(());
    }
    let gb = b.buffer().read_recursive();
    let bv = values_ref::<T>(&gb)?;
    if parallel {
        let out = SendPtr(out);
        for_each_indexed(mi, move |mi| {
            // Capture the whole wrapper, not the raw pointer field.
            let p = out;
            let [i, j] = mi.get();
            unsafe { *p.0.offset(i) = f(*p.0.offset(i), bv[j as usize]) };
        });
    } else {
        in_place_loop_values(mi, out, Source::Slice(bv), f);
    }
    Ok(())
}

fn binary_in_place_vv<T: Element>(
    f: fn(Vv<T>, Vv<T>) -> Vv<T>,
    iter: &Dimensions,
    a: &Variable,
    b: &Variable,
) -> Result<()> {
    let same = Arc::ptr_eq(a.buffer(), b.buffer());
    let mut ga = a.buffer().write();
    let out_v = values_mut_ref::<T>(&mut ga)?.as_mut_ptr();
    let out_e = variances_mut_ref::<T>(&mut ga)?.as_mut_ptr();
    let mi = MultiIndex::dense(iter, [operand(a), operand(b)])?;
    let gb;
    let (src_v, src_e) = if same {
        (Source::Ptr(out_v), Some(Source::Ptr(out_e as *const T)))
    } else {
        gb = b.buffer().read_recursive();
        (
            Source::Slice(values_ref::<T>(&gb)?),
            T::variances_of(&gb).map(Source::Slice),
        )
    };
    in_place_loop_vv(mi, out_v, out_e, src_v, src_e, f);
    Ok(())
}

fn unary_in_place_values<T: Element>(f: fn(T) -> T, a: &Variable) -> Result<()> {
    let mut ga = a.buffer().write();
    let out = values_mut_ref::<T>(&mut ga)?.as_mut_ptr();
    let mi = MultiIndex::dense(a.dims(), [operand(a)])?;
    let out = SendPtr(out);
    for_each_indexed(mi, move |mi| {
        // Capture the whole wrapper, not the raw pointer field.
        let p = out;
        let i = mi.get()[0];
        unsafe { *p.0.offset(i) = f(*p.0.offset(i)) };
    });
    Ok(())
}

fn unary_in_place_vv<T: Element>(f: fn(Vv<T>) -> Vv<T>, a: &Variable) -> Result<()> {
    let mut ga = a.buffer().write();
    let out_v = values_mut_ref::<T>(&mut ga)?.as_mut_ptr();
    let out_e = variances_mut_ref::<T>(&mut ga)?.as_mut_ptr();
    let mut mi = MultiIndex::dense(a.dims(), [operand(a)])?;
    while !mi.is_done() {
        let i = mi.get()[0];
        unsafe {
            let r = f(Vv::new(*out_v.offset(i), *out_e.offset(i)));
            *out_v.offset(i) = r.value;
            *out_e.offset(i) = r.variance;
        }
        mi.increment();
    }
    Ok(())
}

fn apply_binary_in_place(
    kernel: BinaryKernel,
    op_name: &'static str,
    iter: &Dimensions,
    a: &Variable,
    b: &Variable,
    parallel: bool,
) -> Result<()> {
    match kernel {
        BinaryKernel::F64(f) => binary_in_place_values::<f64>(f, iter, a, b, parallel),
        BinaryKernel::F32(f) => binary_in_place_values::<f32>(f, iter, a, b, parallel),
        BinaryKernel::I64(f) => binary_in_place_values::<i64>(f, iter, a, b, parallel),
        BinaryKernel::I32(f) => binary_in_place_values::<i32>(f, iter, a, b, parallel),
        BinaryKernel::Bool(f) => binary_in_place_values::<bool>(f, iter, a, b, parallel),
        BinaryKernel::VvF64(f) => binary_in_place_vv::<f64>(f, iter, a, b),
        BinaryKernel::VvF32(f) => binary_in_place_vv::<f32>(f, iter, a, b),
        _ => Err(DTypeError::NoOverload {
            op: op_name,
            dtype: a.dtype(),
        }
        .into()),
    }
}

// ---------------------------------------------------------------------------
// Public dense entry points
// ---------------------------------------------------------------------------

/// Apply `op` elementwise to `a` and `b`, producing a new packed variable of
/// the merged shape.
pub fn transform2(op: &dyn BinaryOp, a: &Variable, b: &Variable) -> Result<Variable> {
    if a.dtype() == DType::Bucket || b.dtype() == DType::Bucket {
        return binned_transform2(op, a, b);
    }
    if a.dtype() != b.dtype() {
        return Err(DTypeError::Mismatch {
            a: a.dtype(),
            b: b.dtype(),
        }
        .into());
    }
    check_values_only(op, a.has_variances(), b.has_variances())?;
    let unit = op.unit(a.unit(), b.unit())?;
    let with_variances = a.has_variances() || b.has_variances();
    let kernel = resolve_binary(op, a.dtype(), with_variances, false)?;
    let iter = a.dims().merge(b.dims())?;
    match kernel {
        BinaryKernel::F64(f) => Variable::new(iter, unit, binary_new(f, &iter, a, b)?, None),
        BinaryKernel::F32(f) => Variable::new(iter, unit, binary_new(f, &iter, a, b)?, None),
        BinaryKernel::I64(f) => Variable::new(iter, unit, binary_new(f, &iter, a, b)?, None),
        BinaryKernel::I32(f) => Variable::new(iter, unit, binary_new(f, &iter, a, b)?, None),
        BinaryKernel::Bool(f) => Variable::new(iter, unit, binary_new(f, &iter, a, b)?, None),
        BinaryKernel::VvF64(f) => {
            let (values, variances) = binary_new_vv(f, &iter, a, b)?;
            Variable::new(iter, unit, values, Some(variances))
        }
        BinaryKernel::VvF32(f) => {
            let (values, variances) = binary_new_vv(f, &iter, a, b)?;
            Variable::new(iter, unit, values, Some(variances))
        }
        BinaryKernel::CmpF64(f) => Variable::new(iter, unit, binary_new(f, &iter, a, b)?, None),
        BinaryKernel::CmpF32(f) => Variable::new(iter, unit, binary_new(f, &iter, a, b)?, None),
        BinaryKernel::CmpI64(f) => Variable::new(iter, unit, binary_new(f, &iter, a, b)?, None),
        BinaryKernel::CmpI32(f) => Variable::new(iter, unit, binary_new(f, &iter, a, b)?, None),
        BinaryKernel::CmpBool(f) => Variable::new(iter, unit, binary_new(f, &iter, a, b)?, None),
    }
}

/// Apply `op` elementwise, mutating `a`. The merged shape must not extend
/// `a`, and the result unit must match `a`'s.
pub fn transform2_in_place(op: &dyn BinaryOp, a: &Variable, b: &Variable) -> Result<()> {
    if a.dtype() == DType::Bucket || b.dtype() == DType::Bucket {
        return binned_transform2_in_place(op, a, b);
    }
    a.ensure_writable()?;
    if a.dtype() != b.dtype() {
        return Err(DTypeError::Mismatch {
            a: a.dtype(),
            b: b.dtype(),
        }
        .into());
    }
    check_values_only(op, a.has_variances(), b.has_variances())?;
    let unit = op.unit(a.unit(), b.unit())?;
    if unit != a.unit() {
        return Err(UnitError::Incompatible {
            a: a.unit(),
            b: unit,
        }
        .into());
    }
    if b.has_variances() && !a.has_variances() {
        return Err(VariancesError::PresenceMismatch.into());
    }
    let kernel = resolve_binary(op, a.dtype(), a.has_variances(), true)?;
    let iter = in_place_iter(a.dims(), b.dims())?;
    let parallel = !Arc::ptr_eq(a.buffer(), b.buffer());
    apply_binary_in_place(kernel, op.name(), &iter, a, b, parallel)
}

/// Apply `op` elementwise to `a`, producing a new packed variable.
pub fn transform(op: &dyn UnaryOp, a: &Variable) -> Result<Variable> {
    if a.dtype() == DType::Bucket {
        return binned_transform(op, a);
    }
    if op.values_only() && a.has_variances() {
        return Err(VariancesError::ValuesOnlyArgument {
            op: op.name(),
            argument: 0,
        }
        .into());
    }
    let unit = op.unit(a.unit())?;
    let kernel = resolve_unary(op, a.dtype(), a.has_variances())?;
    let dims = *a.dims();
    match kernel {
        UnaryKernel::F64(f) => Variable::new(dims, unit, unary_new(f, a)?, None),
        UnaryKernel::F32(f) => Variable::new(dims, unit, unary_new(f, a)?, None),
        UnaryKernel::I64(f) => Variable::new(dims, unit, unary_new(f, a)?, None),
        UnaryKernel::I32(f) => Variable::new(dims, unit, unary_new(f, a)?, None),
        UnaryKernel::VvF64(f) => {
            let (values, variances) = unary_new_vv(f, a)?;
            Variable::new(dims, unit, values, Some(variances))
        }
        UnaryKernel::VvF32(f) => {
            let (values, variances) = unary_new_vv(f, a)?;
            Variable::new(dims, unit, values, Some(variances))
        }
    }
}

/// Apply `op` elementwise, mutating `a`. The result unit must match `a`'s.
pub fn transform_in_place(op: &dyn UnaryOp, a: &Variable) -> Result<()> {
    if a.dtype() == DType::Bucket {
        return binned_transform_in_place(op, a);
    }
    a.ensure_writable()?;
    if op.values_only() && a.has_variances() {
        return Err(VariancesError::ValuesOnlyArgument {
            op: op.name(),
            argument: 0,
        }
        .into());
    }
    let unit = op.unit(a.unit())?;
    if unit != a.unit() {
        return Err(UnitError::Incompatible {
            a: a.unit(),
            b: unit,
        }
        .into());
    }
    let kernel = resolve_unary(op, a.dtype(), a.has_variances())?;
    match kernel {
        UnaryKernel::F64(f) => unary_in_place_values::<f64>(f, a),
        UnaryKernel::F32(f) => unary_in_place_values::<f32>(f, a),
        UnaryKernel::I64(f) => unary_in_place_values::<i64>(f, a),
        UnaryKernel::I32(f) => unary_in_place_values::<i32>(f, a),
        UnaryKernel::VvF64(f) => unary_in_place_vv::<f64>(f, a),
        UnaryKernel::VvF32(f) => unary_in_place_vv::<f32>(f, a),
    }
}

// ---------------------------------------------------------------------------
// Accumulate
// ---------------------------------------------------------------------------

/// Reduce `other` into `out`: the broadcast direction is relaxed so that one
/// `out` element may be visited and combined many times.
///
/// The parallel two-level reduction (private copies per input chunk, then a
/// combine pass) is taken only when a dry run proves `op` idempotent against
/// its own output; otherwise the call runs single-threaded.
pub fn accumulate_in_place(op: &dyn BinaryOp, out: &Variable, other: &Variable) -> Result<()> {
    out.ensure_writable()?;
    if out.dtype() == DType::Bucket || other.dtype() == DType::Bucket {
        return Err(DTypeError::NoOverload {
            op: op.name(),
            dtype: DType::Bucket,
        }
        .into());
    }
    if out.dtype() != other.dtype() {
        return Err(DTypeError::Mismatch {
            a: out.dtype(),
            b: other.dtype(),
        }
        .into());
    }
    check_values_only(op, out.has_variances(), other.has_variances())?;
    let unit = op.unit(out.unit(), other.unit())?;
    if unit != out.unit() {
        return Err(UnitError::Incompatible {
            a: out.unit(),
            b: unit,
        }
        .into());
    }
    if other.has_variances() && !out.has_variances() {
        return Err(VariancesError::PresenceMismatch.into());
    }
    let kernel = resolve_binary(op, out.dtype(), out.has_variances(), true)?;
    let iter = out.dims().merge(other.dims())?;
    #[cfg(feature = "parallel")]
    {
        if iter.volume() >= MIN_THREAD_LENGTH as i64 {
            let reduced = iter
                .labels()
                .iter()
                .copied()
                .find(|d| out.dims().index_of(*d).is_none());
            if let Some(dim) = reduced {
                if is_idempotent(op, out)? {
                    return accumulate_chunked(kernel, op.name(), out, other, dim);
                }
            }
        }
    }
    apply_binary_in_place(kernel, op.name(), &iter, out, other, false)
}

/// Dry run: `op(x, x) == x` for every current element of `out`.
#[cfg(feature = "parallel")]
fn is_idempotent(op: &dyn BinaryOp, out: &Variable) -> Result<bool> {
    let probe = out.deep_copy()?;
    transform2_in_place(op, &probe, &probe)?;
    Ok(probe.equals_nan(out))
}

/// Two-level reduction: partition `other` along `dim` (absent from `out`),
/// reduce each chunk into a private copy of `out` in parallel, then fold the
/// private copies into `out` sequentially.
#[cfg(feature = "parallel")]
fn accumulate_chunked(
    kernel: BinaryKernel,
    op_name: &'static str,
    out: &Variable,
    other: &Variable,
    dim: Dim,
) -> Result<()> {
    use rayon::prelude::*;

    let extent = other
        .dims()
        .extent(dim)
        .ok_or(DimensionError::NotFound(dim))?;
    let chunks = ACCUMULATE_CHUNKS.min(extent.max(1) as usize);
    let step = (extent as usize).div_ceil(chunks) as i64;
    let mut tasks = Vec::with_capacity(chunks);
    let mut begin = 0;
    while begin < extent {
        let end = (begin + step).min(extent);
        tasks.push((out.deep_copy()?, other.slice(dim, begin, end)?));
        begin = end;
    }
    tasks.par_iter().try_for_each(|(private, chunk)| {
        let iter = private.dims().merge(chunk.dims())?;
        apply_binary_in_place(kernel, op_name, &iter, private, chunk, false)
    })?;
    let iter = *out.dims();
    for (private, _) in &tasks {
        apply_binary_in_place(kernel, op_name, &iter, out, private, false)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Copy
// ---------------------------------------------------------------------------

/// Elementwise copy of `src` into the view `dst`, broadcasting `src` where
/// needed. Backing for `set_slice` and friends.
pub(crate) fn copy_into(dst: &Variable, src: &Variable) -> Result<()> {
    dst.ensure_writable()?;
    if dst.dtype() != src.dtype() {
        return Err(DTypeError::Mismatch {
            a: dst.dtype(),
            b: src.dtype(),
        }
        .into());
    }
    if dst.has_variances() != src.has_variances() {
        return Err(VariancesError::PresenceMismatch.into());
    }
    let iter = in_place_iter(dst.dims(), src.dims())?;
    match dst.dtype() {
        DType::Float64 => copy_typed::<f64>(&iter, dst, src),
        DType::Float32 => copy_typed::<f32>(&iter, dst, src),
        DType::Int64 => copy_typed::<i64>(&iter, dst, src),
        DType::Int32 => copy_typed::<i32>(&iter, dst, src),
        DType::Bool => copy_typed::<bool>(&iter, dst, src),
        DType::Bucket => Err(DTypeError::NoOverload {
            op: "copy",
            dtype: DType::Bucket,
        }
        .into()),
    }
}

fn copy_typed<T: Element>(iter: &Dimensions, dst: &Variable, src: &Variable) -> Result<()> {
    let same = Arc::ptr_eq(dst.buffer(), src.buffer());
    let mut gd = dst.buffer().write();
    let out_v = values_mut_ref::<T>(&mut gd)?.as_mut_ptr();
    let out_e = T::variances_mut_of(&mut gd).map(|s| s.as_mut_ptr());
    let mut mi = MultiIndex::dense(iter, [operand(dst), operand(src)])?;
    let gs;
    let (src_v, src_e) = if same {
        (
            Source::Ptr(out_v as *const T),
            out_e.map(|p| Source::Ptr(p as *const T)),
        )
    } else {
        gs = src.buffer().read_recursive();
        (
            Source::Slice(values_ref::<T>(&gs)?),
            T::variances_of(&gs).map(Source::Slice),
        )
    };
    while !mi.is_done() {
        let [i, j] = mi.get();
        unsafe {
            *out_v.offset(i) = src_v.get(j);
            if let (Some(oe), Some(se)) = (out_e, &src_e) {
                *oe.offset(i) = se.get(j);
            }
        }
        mi.increment();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Binned paths
// ---------------------------------------------------------------------------

fn side_operand<'x>(
    v: &'x Variable,
    bucket: Option<&'x BucketBuffer>,
) -> Result<BinnedOperand<'x>> {
    match bucket {
        None => Ok(BinnedOperand::Dense {
            dims: v.dims(),
            strides: v.strides(),
            offset: v.offset(),
        }),
        Some(bb) => {
            let index = bb
                .inner
                .dims()
                .index_of(bb.dim)
                .ok_or(DimensionError::NotFound(bb.dim))?;
            Ok(BinnedOperand::Binned {
                dims: v.dims(),
                strides: v.strides(),
                offset: v.offset(),
                ranges: &bb.ranges,
                inner_stride: bb.inner.strides().at(index),
                inner_offset: bb.inner.offset(),
                inner_extent: bb.inner.dims().extent_at(index) as usize,
            })
        }
    }
}

/// Packed output bin structure: one `(begin, end)` per iteration position,
/// sized from the bucketed source, laid out contiguously.
fn packed_ranges(
    iter: &Dimensions,
    src: &Variable,
    src_ranges: &[(usize, usize)],
) -> Result<Vec<(usize, usize)>> {
    let mut probe = MultiIndex::dense(iter, [operand(src)])?;
    let mut out = Vec::with_capacity(probe.total());
    let mut acc = 0usize;
    while !probe.is_done() {
        let (begin, end) = src_ranges[probe.get()[0] as usize];
        out.push((acc, acc + (end - begin)));
        acc += end - begin;
        probe.increment();
    }
    Ok(out)
}

fn assemble_binned<O: Element>(
    outer: Dimensions,
    unit: Unit,
    values: Vec<O>,
    variances: Option<Vec<O>>,
    ranges: Vec<(usize, usize)>,
    dim: Dim,
) -> Result<Variable> {
    let inner_dims = Dimensions::from_pairs(&[(dim, values.len() as i64)])?;
    let inner = Variable::new(inner_dims, unit, values, variances)?;
    Ok(crate::bucket::binned_view(
        outer,
        Unit::NONE,
        ranges,
        dim,
        inner,
    ))
}

fn binned_run<T: Element, O: Element>(
    f: fn(T, T) -> O,
    iter: &Dimensions,
    a: &Variable,
    b: &Variable,
) -> Result<(Vec<O>, Vec<(usize, usize)>, Dim)> {
    let ga = a.buffer().read_recursive();
    let gb = b.buffer().read_recursive();
    let bucket_a = ga.bucket();
    let bucket_b = gb.bucket();
    let iga = bucket_a.map(|bb| bb.inner.buffer().read_recursive());
    let igb = bucket_b.map(|bb| bb.inner.buffer().read_recursive());
    let av: &[T] = match &iga {
        Some(g) => values_ref::<T>(g)?,
        None => values_ref::<T>(&ga)?,
    };
    let bv: &[T] = match &igb {
        Some(g) => values_ref::<T>(g)?,
        None => values_ref::<T>(&gb)?,
    };
    let mut mi = MultiIndex::binned(iter, [side_operand(a, bucket_a)?, side_operand(b, bucket_b)?])?;
    let (src, src_bucket) = if bucket_a.is_some() {
        (a, bucket_a)
    } else {
        (b, bucket_b)
    };
    let src_bucket = src_bucket.ok_or(BinnedDataError::NotBinned)?;
    let ranges = packed_ranges(iter, src, &src_bucket.ranges)?;
    let mut out = Vec::with_capacity(mi.total());
    while !mi.is_done() {
        let [i, j] = mi.get();
        out.push(f(av[i as usize], bv[j as usize]));
        mi.increment();
    }
    Ok((out, ranges, src_bucket.dim))
}

fn binned_run_vv<T: Element>(
    f: fn(Vv<T>, Vv<T>) -> Vv<T>,
    iter: &Dimensions,
    a: &Variable,
    b: &Variable,
) -> Result<(Vec<T>, Vec<T>, Vec<(usize, usize)>, Dim)> {
    let ga = a.buffer().read_recursive();
    let gb = b.buffer().read_recursive();
    let bucket_a = ga.bucket();
    let bucket_b = gb.bucket();
    let iga = bucket_a.map(|bb| bb.inner.buffer().read_recursive());
    let igb = bucket_b.map(|bb| bb.inner.buffer().read_recursive());
    let (av, ae): (&[T], Option<&[T]>) = match &iga {
        Some(g) => (values_ref::<T>(g)?, T::variances_of(g)),
        None => (values_ref::<T>(&ga)?, T::variances_of(&ga)),
    };
    let (bv, be): (&[T], Option<&[T]>) = match &igb {
        Some(g) => (values_ref::<T>(g)?, T::variances_of(g)),
        None => (values_ref::<T>(&gb)?, T::variances_of(&gb)),
    };
    let mut mi = MultiIndex::binned(iter, [side_operand(a, bucket_a)?, side_operand(b, bucket_b)?])?;
    let (src, src_bucket) = if bucket_a.is_some() {
        (a, bucket_a)
    } else {
        (b, bucket_b)
    };
    let src_bucket = src_bucket.ok_or(BinnedDataError::NotBinned)?;
    let ranges = packed_ranges(iter, src, &src_bucket.ranges)?;
    let mut values = Vec::with_capacity(mi.total());
    let mut variances = Vec::with_capacity(mi.total());
    while !mi.is_done() {
        let [i, j] = mi.get();
        let x = Vv::new(av[i as usize], ae.map_or_else(T::default, |e| e[i as usize]));
        let y = Vv::new(bv[j as usize], be.map_or_else(T::default, |e| e[j as usize]));
        let r = f(x, y);
        values.push(r.value);
        variances.push(r.variance);
        mi.increment();
    }
    Ok((values, variances, ranges, src_bucket.dim))
}

fn binned_transform2(op: &dyn BinaryOp, a: &Variable, b: &Variable) -> Result<Variable> {
    let (dtype_a, unit_a, hv_a) = content_meta(a);
    let (dtype_b, unit_b, hv_b) = content_meta(b);
    if dtype_a != dtype_b {
        return Err(DTypeError::Mismatch {
            a: dtype_a,
            b: dtype_b,
        }
        .into());
    }
    check_values_only(op, hv_a, hv_b)?;
    let unit = op.unit(unit_a, unit_b)?;
    let kernel = resolve_binary(op, dtype_a, hv_a || hv_b, false)?;
    let iter = a.dims().merge(b.dims())?;
    match kernel {
        BinaryKernel::F64(f) => {
            let (v, r, d) = binned_run(f, &iter, a, b)?;
            assemble_binned(iter, unit, v, None, r, d)
        }
        BinaryKernel::F32(f) => {
            let (v, r, d) = binned_run(f, &iter, a, b)?;
            assemble_binned(iter, unit, v, None, r, d)
        }
        BinaryKernel::I64(f) => {
            let (v, r, d) = binned_run(f, &iter, a, b)?;
            assemble_binned(iter, unit, v, None, r, d)
        }
        BinaryKernel::I32(f) => {
            let (v, r, d) = binned_run(f, &iter, a, b)?;
            assemble_binned(iter, unit, v, None, r, d)
        }
        BinaryKernel::Bool(f) => {
            let (v, r, d) = binned_run(f, &iter, a, b)?;
            assemble_binned(iter, unit, v, None, r, d)
        }
        BinaryKernel::VvF64(f) => {
            let (v, e, r, d) = binned_run_vv(f, &iter, a, b)?;
            assemble_binned(iter, unit, v, Some(e), r, d)
        }
        BinaryKernel::VvF32(f) => {
            let (v, e, r, d) = binned_run_vv(f, &iter, a, b)?;
            assemble_binned(iter, unit, v, Some(e), r, d)
        }
        BinaryKernel::CmpF64(f) => {
            let (v, r, d) = binned_run(f, &iter, a, b)?;
            assemble_binned(iter, unit, v, None, r, d)
        }
        BinaryKernel::CmpF32(f) => {
            let (v, r, d) = binned_run(f, &iter, a, b)?;
            assemble_binned(iter, unit, v, None, r, d)
        }
        BinaryKernel::CmpI64(f) => {
            let (v, r, d) = binned_run(f, &iter, a, b)?;
            assemble_binned(iter, unit, v, None, r, d)
        }
        BinaryKernel::CmpI32(f) => {
            let (v, r, d) = binned_run(f, &iter, a, b)?;
            assemble_binned(iter, unit, v, None, r, d)
        }
        BinaryKernel::CmpBool(f) => {
            let (v, r, d) = binned_run(f, &iter, a, b)?;
            assemble_binned(iter, unit, v, None, r, d)
        }
    }
}

fn binned_in_place_values<T: Element>(
    f: fn(T, T) -> T,
    iter: &Dimensions,
    a: &Variable,
    b: &Variable,
) -> Result<()> {
    let ga = a.buffer().read_recursive();
    let gb = b.buffer().read_recursive();
    let bucket_a = ga.bucket().ok_or(BinnedDataError::NotBinned)?;
    let bucket_b = gb.bucket();
    let b_data = match bucket_b {
        Some(bb) => bb.inner.buffer(),
        None => b.buffer(),
    };
    let same = Arc::ptr_eq(bucket_a.inner.buffer(), b_data);
    let mut gia = bucket_a.inner.buffer().write();
    let out = values_mut_ref::<T>(&mut gia)?.as_mut_ptr();
    let mi = MultiIndex::binned(iter, [side_operand(a, Some(bucket_a))?, side_operand(b, bucket_b)?])?;
    let gib;
    let src = if same {
        Source::Ptr(out as *const T)
    } else {
        gib = b_data.read_recursive();
        Source::Slice(values_ref::<T>(&gib)?)
    };
    in_place_loop_values(mi, out, src, f);
    Ok(())
}

fn binned_in_place_vv<T: Element>(
    f: fn(Vv<T>, Vv<T>) -> Vv<T>,
    iter: &Dimensions,
    a: &Variable,
    b: &Variable,
) -> Result<()> {
    let ga = a.buffer().read_recursive();
    let gb = b.buffer().read_recursive();
    let bucket_a = ga.bucket().ok_or(BinnedDataError::NotBinned)?;
    let bucket_b = gb.bucket();
    let b_data = match bucket_b {
        Some(bb) => bb.inner.buffer(),
        None => b.buffer(),
    };
    let same = Arc::ptr_eq(bucket_a.inner.buffer(), b_data);
    let mut gia = bucket_a.inner.buffer().write();
    let out_v = values_mut_ref::<T>(&mut gia)?.as_mut_ptr();
    let out_e = variances_mut_ref::<T>(&mut gia)?.as_mut_ptr();
    let mi = MultiIndex::binned(iter, [side_operand(a, Some(bucket_a))?, side_operand(b, bucket_b)?])?;
    let gib;
    let (src_v, src_e) = if same {
        (Source::Ptr(out_v as *const T), Some(Source::Ptr(out_e as *const T)))
    } else {
        gib = b_data.read_recursive();
        (
            Source::Slice(values_ref::<T>(&gib)?),
            T::variances_of(&gib).map(Source::Slice),
        )
    };
    in_place_loop_vv(mi, out_v, out_e, src_v, src_e, f);
    Ok(())
}

fn binned_transform2_in_place(op: &dyn BinaryOp, a: &Variable, b: &Variable) -> Result<()> {
    if a.dtype() != DType::Bucket {
        return Err(DTypeError::NoOverload {
            op: op.name(),
            dtype: DType::Bucket,
        }
        .into());
    }
    a.ensure_writable()?;
    {
        let guard = a.buffer().read_recursive();
        let bucket = guard.bucket().ok_or(BinnedDataError::NotBinned)?;
        bucket.inner.ensure_writable()?;
    }
    let (dtype_a, unit_a, hv_a) = content_meta(a);
    let (dtype_b, unit_b, hv_b) = content_meta(b);
    if dtype_a != dtype_b {
        return Err(DTypeError::Mismatch {
            a: dtype_a,
            b: dtype_b,
        }
        .into());
    }
    check_values_only(op, hv_a, hv_b)?;
    let unit = op.unit(unit_a, unit_b)?;
    if unit != unit_a {
        return Err(UnitError::Incompatible { a: unit_a, b: unit }.into());
    }
    if hv_b && !hv_a {
        return Err(VariancesError::PresenceMismatch.into());
    }
    let kernel = resolve_binary(op, dtype_a, hv_a, true)?;
    let iter = in_place_iter(a.dims(), b.dims())?;
    match kernel {
        BinaryKernel::F64(f) => binned_in_place_values::<f64>(f, &iter, a, b),
        BinaryKernel::F32(f) => binned_in_place_values::<f32>(f, &iter, a, b),
        BinaryKernel::I64(f) => binned_in_place_values::<i64>(f, &iter, a, b),
        BinaryKernel::I32(f) => binned_in_place_values::<i32>(f, &iter, a, b),
        BinaryKernel::Bool(f) => binned_in_place_values::<bool>(f, &iter, a, b),
        BinaryKernel::VvF64(f) => binned_in_place_vv::<f64>(f, &iter, a, b),
        BinaryKernel::VvF32(f) => binned_in_place_vv::<f32>(f, &iter, a, b),
        _ => Err(DTypeError::NoOverload {
            op: op.name(),
            dtype: dtype_a,
        }
        .into()),
    }
}

fn binned_run1<T: Element, O: Element>(
    f: fn(T) -> O,
    iter: &Dimensions,
    a: &Variable,
) -> Result<(Vec<O>, Vec<(usize, usize)>, Dim)> {
    let ga = a.buffer().read_recursive();
    let bucket = ga.bucket().ok_or(BinnedDataError::NotBinned)?;
    let gia = bucket.inner.buffer().read_recursive();
    let av = values_ref::<T>(&gia)?;
    let mut mi = MultiIndex::binned(iter, [side_operand(a, Some(bucket))?])?;
    let ranges = packed_ranges(iter, a, &bucket.ranges)?;
    let mut out = Vec::with_capacity(mi.total());
    while !mi.is_done() {
        out.push(f(av[mi.get()[0] as usize]));
        mi.increment();
    }
    Ok((out, ranges, bucket.dim))
}

fn binned_run1_vv<T: Element>(
    f: fn(Vv<T>) -> Vv<T>,
    iter: &Dimensions,
    a: &Variable,
) -> Result<(Vec<T>, Vec<T>, Vec<(usize, usize)>, Dim)> {
    let ga = a.buffer().read_recursive();
    let bucket = ga.bucket().ok_or(BinnedDataError::NotBinned)?;
    let gia = bucket.inner.buffer().read_recursive();
    let av = values_ref::<T>(&gia)?;
    let ae = T::variances_of(&gia);
    let mut mi = MultiIndex::binned(iter, [side_operand(a, Some(bucket))?])?;
    let ranges = packed_ranges(iter, a, &bucket.ranges)?;
    let mut values = Vec::with_capacity(mi.total());
    let mut variances = Vec::with_capacity(mi.total());
    while !mi.is_done() {
        let i = mi.get()[0];
        let r = f(Vv::new(av[i as usize], ae.map_or_else(T::default, |e| e[i as usize])));
        values.push(r.value);
        variances.push(r.variance);
        mi.increment();
    }
    Ok((values, variances, ranges, bucket.dim))
}

fn binned_transform(op: &dyn UnaryOp, a: &Variable) -> Result<Variable> {
    let (dtype, unit_a, hv) = content_meta(a);
    if op.values_only() && hv {
        return Err(VariancesError::ValuesOnlyArgument {
            op: op.name(),
            argument: 0,
        }
        .into());
    }
    let unit = op.unit(unit_a)?;
    let kernel = resolve_unary(op, dtype, hv)?;
    let iter = *a.dims();
    match kernel {
        UnaryKernel::F64(f) => {
            let (v, r, d) = binned_run1(f, &iter, a)?;
            assemble_binned(iter, unit, v, None, r, d)
        }
        UnaryKernel::F32(f) => {
            let (v, r, d) = binned_run1(f, &iter, a)?;
            assemble_binned(iter, unit, v, None, r, d)
        }
        UnaryKernel::I64(f) => {
            let (v, r, d) = binned_run1(f, &iter, a)?;
            assemble_binned(iter, unit, v, None, r, d)
        }
        UnaryKernel::I32(f) => {
            let (v, r, d) = binned_run1(f, &iter, a)?;
            assemble_binned(iter, unit, v, None, r, d)
        }
        UnaryKernel::VvF64(f) => {
            let (v, e, r, d) = binned_run1_vv(f, &iter, a)?;
            assemble_binned(iter, unit, v, Some(e), r, d)
        }
        UnaryKernel::VvF32(f) => {
            let (v, e, r, d) = binned_run1_vv(f, &iter, a)?;
            assemble_binned(iter, unit, v, Some(e), r, d)
        }
    }
}

fn binned_in_place1_values<T: Element>(f: fn(T) -> T, iter: &Dimensions, a: &Variable) -> Result<()> {
    let ga = a.buffer().read_recursive();
    let bucket = ga.bucket().ok_or(BinnedDataError::NotBinned)?;
    let op = side_operand(a, Some(bucket))?;
    let mut gia = bucket.inner.buffer().write();
    let out = values_mut_ref::<T>(&mut gia)?.as_mut_ptr();
    let mut mi = MultiIndex::binned(iter, [op])?;
    while !mi.is_done() {
        let i = mi.get()[0];
        unsafe { *out.offset(i) = f(*out.offset(i)) };
        mi.increment();
    }
    Ok(())
}

fn binned_in_place1_vv<T: Element>(
    f: fn(Vv<T>) -> Vv<T>,
    iter: &Dimensions,
    a: &Variable,
) -> Result<()> {
    let ga = a.buffer().read_recursive();
    let bucket = ga.bucket().ok_or(BinnedDataError::NotBinned)?;
    let op = side_operand(a, Some(bucket))?;
    let mut gia = bucket.inner.buffer().write();
    let out_v = values_mut_ref::<T>(&mut gia)?.as_mut_ptr();
    let out_e = variances_mut_ref::<T>(&mut gia)?.as_mut_ptr();
    let mut mi = MultiIndex::binned(iter, [op])?;
    while !mi.is_done() {
        let i = mi.get()[0];
        unsafe {
            let r = f(Vv::new(*out_v.offset(i), *out_e.offset(i)));
            *out_v.offset(i) = r.value;
            *out_e.offset(i) = r.variance;
        }
        mi.increment();
    }
    Ok(())
}

fn binned_transform_in_place(op: &dyn UnaryOp, a: &Variable) -> Result<()> {
    a.ensure_writable()?;
    {
        let guard = a.buffer().read_recursive();
        let bucket = guard.bucket().ok_or(BinnedDataError::NotBinned)?;
        bucket.inner.ensure_writable()?;
    }
    let (dtype, unit_a, hv) = content_meta(a);
    if op.values_only() && hv {
        return Err(VariancesError::ValuesOnlyArgument {
            op: op.name(),
            argument: 0,
        }
        .into());
    }
    let unit = op.unit(unit_a)?;
    if unit != unit_a {
        return Err(UnitError::Incompatible { a: unit_a, b: unit }.into());
    }
    let kernel = resolve_unary(op, dtype, hv)?;
    let iter = *a.dims();
    match kernel {
        UnaryKernel::F64(f) => binned_in_place1_values::<f64>(f, &iter, a),
        UnaryKernel::F32(f) => binned_in_place1_values::<f32>(f, &iter, a),
        UnaryKernel::I64(f) => binned_in_place1_values::<i64>(f, &iter, a),
        UnaryKernel::I32(f) => binned_in_place1_values::<i32>(f, &iter, a),
        UnaryKernel::VvF64(f) => binned_in_place1_vv::<f64>(f, &iter, a),
        UnaryKernel::VvF32(f) => binned_in_place1_vv::<f32>(f, &iter, a),
    }
}
