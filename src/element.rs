//! Element types and the type-erased buffer.
//!
//! The engine supports a small closed set of element types ([`DType`]).
//! Buffers are type-erased behind an enum; the [`Element`] trait is the
//! typed doorway in and out. Unsupported combinations surface as
//! `DTypeError`, never as a crash or silent coercion.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::dim::Dim;
use crate::error::VariancesError;
use crate::variable::Variable;

/// The closed set of supported element types.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DType {
    Float64,
    Float32,
    Int64,
    Int32,
    Bool,
    /// Elements are `(begin, end)` ranges into a shared inner buffer.
    Bucket,
}

impl DType {
    /// Whether buffers of this dtype may carry variances.
    pub fn supports_variances(&self) -> bool {
        matches!(self, DType::Float64 | DType::Float32)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Float64 => "float64",
            DType::Float32 => "float32",
            DType::Int64 => "int64",
            DType::Int32 => "int32",
            DType::Bool => "bool",
            DType::Bucket => "bucket",
        };
        f.write_str(name)
    }
}

/// Typed storage: a values array and an optional variances array of
/// identical length.
#[derive(Clone, Debug, PartialEq)]
#[doc(hidden)]
pub struct TypedBuffer<T> {
    pub(crate) values: Vec<T>,
    pub(crate) variances: Option<Vec<T>>,
}

/// Storage of a binned variable: one `(begin, end)` range per outer element,
/// all addressing one shared inner buffer sliced along `dim`.
#[derive(Clone, Debug)]
#[doc(hidden)]
pub struct BucketBuffer {
    pub(crate) ranges: Vec<(usize, usize)>,
    pub(crate) dim: Dim,
    pub(crate) inner: Variable,
}

/// Type-erased buffer contents.
#[derive(Clone, Debug)]
#[doc(hidden)]
pub enum BufferData {
    F64(TypedBuffer<f64>),
    F32(TypedBuffer<f32>),
    I64(TypedBuffer<i64>),
    I32(TypedBuffer<i32>),
    Bool(TypedBuffer<bool>),
    Bucket(BucketBuffer),
}

impl BufferData {
    pub fn dtype(&self) -> DType {
        match self {
            BufferData::F64(_) => DType::Float64,
            BufferData::F32(_) => DType::Float32,
            BufferData::I64(_) => DType::Int64,
            BufferData::I32(_) => DType::Int32,
            BufferData::Bool(_) => DType::Bool,
            BufferData::Bucket(_) => DType::Bucket,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BufferData::F64(b) => b.values.len(),
            BufferData::F32(b) => b.values.len(),
            BufferData::I64(b) => b.values.len(),
            BufferData::I32(b) => b.values.len(),
            BufferData::Bool(b) => b.values.len(),
            BufferData::Bucket(b) => b.ranges.len(),
        }
    }

    pub fn has_variances(&self) -> bool {
        match self {
            BufferData::F64(b) => b.variances.is_some(),
            BufferData::F32(b) => b.variances.is_some(),
            BufferData::I64(b) => b.variances.is_some(),
            BufferData::I32(b) => b.variances.is_some(),
            BufferData::Bool(b) => b.variances.is_some(),
            BufferData::Bucket(b) => b.inner.has_variances(),
        }
    }

    pub fn bucket(&self) -> Option<&BucketBuffer> {
        match self {
            BufferData::Bucket(b) => Some(b),
            _ => None,
        }
    }

    pub fn bucket_mut(&mut self) -> Option<&mut BucketBuffer> {
        match self {
            BufferData::Bucket(b) => Some(b),
            _ => None,
        }
    }
}

/// Reference-counted handle to a shared, type-erased buffer.
pub(crate) type BufferHandle = Arc<RwLock<BufferData>>;

pub(crate) fn new_handle(data: BufferData) -> BufferHandle {
    Arc::new(RwLock::new(data))
}

/// Typed access to the type-erased buffer. Implemented for the dense members
/// of the closed dtype set; bucket contents go through their own path.
pub trait Element: Copy + PartialEq + Default + Send + Sync + 'static {
    const DTYPE: DType;

    #[doc(hidden)]
    fn make_buffer(values: Vec<Self>, variances: Option<Vec<Self>>) -> BufferData;
    #[doc(hidden)]
    fn values_of(buffer: &BufferData) -> Option<&[Self]>;
    #[doc(hidden)]
    fn values_mut_of(buffer: &mut BufferData) -> Option<&mut [Self]>;
    #[doc(hidden)]
    fn variances_of(buffer: &BufferData) -> Option<&[Self]>;
    #[doc(hidden)]
    fn variances_mut_of(buffer: &mut BufferData) -> Option<&mut [Self]>;
    #[doc(hidden)]
    fn set_variances_of(
        buffer: &mut BufferData,
        variances: Option<Vec<Self>>,
    ) -> Result<(), VariancesError>;

    /// Equality treating matching NaN patterns as equal; plain `==` for
    /// non-float types.
    fn equals_nan(a: Self, b: Self) -> bool;
}

macro_rules! impl_element {
    ($t:ty, $dtype:expr, $variant:ident, $eqnan:expr) => {
        impl Element for $t {
            const DTYPE: DType = $dtype;

            fn make_buffer(values: Vec<Self>, variances: Option<Vec<Self>>) -> BufferData {
                BufferData::$variant(TypedBuffer { values, variances })
            }

            fn values_of(buffer: &BufferData) -> Option<&[Self]> {
                match buffer {
                    BufferData::$variant(b) => Some(&b.values),
                    _ => None,
                }
            }

            fn values_mut_of(buffer: &mut BufferData) -> Option<&mut [Self]> {
                match buffer {
                    BufferData::$variant(b) => Some(&mut b.values),
                    _ => None,
                }
            }

            fn variances_of(buffer: &BufferData) -> Option<&[Self]> {
                match buffer {
                    BufferData::$variant(b) => b.variances.as_deref(),
                    _ => None,
                }
            }

            fn variances_mut_of(buffer: &mut BufferData) -> Option<&mut [Self]> {
                match buffer {
                    BufferData::$variant(b) => b.variances.as_deref_mut(),
                    _ => None,
                }
            }

            fn set_variances_of(
                buffer: &mut BufferData,
                variances: Option<Vec<Self>>,
            ) -> Result<(), VariancesError> {
                match buffer {
                    BufferData::$variant(b) => {
                        if let Some(v) = &variances {
                            if !Self::DTYPE.supports_variances() {
                                return Err(VariancesError::Unsupported(Self::DTYPE));
                            }
                            if v.len() != b.values.len() {
                                return Err(VariancesError::LengthMismatch {
                                    values: b.values.len(),
                                    variances: v.len(),
                                });
                            }
                        }
                        b.variances = variances;
                        Ok(())
                    }
                    other => Err(VariancesError::Unsupported(other.dtype())),
                }
            }

            fn equals_nan(a: Self, b: Self) -> bool {
                ($eqnan)(a, b)
            }
        }
    };
}

impl_element!(f64, DType::Float64, F64, |a: f64, b: f64| a == b
    || (a.is_nan() && b.is_nan()));
impl_element!(f32, DType::Float32, F32, |a: f32, b: f32| a == b
    || (a.is_nan() && b.is_nan()));
impl_element!(i64, DType::Int64, I64, |a, b| a == b);
impl_element!(i32, DType::Int32, I32, |a, b| a == b);
impl_element!(bool, DType::Bool, Bool, |a, b| a == b);
