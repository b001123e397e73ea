//! Labeled multi-dimensional arrays for scientific data reduction.
//!
//! Arrays carry named dimensions instead of positional axes: operands align
//! by label, transposition is metadata, and broadcasting falls out of the
//! dimension merge. Each array also carries a physical unit and, optionally,
//! per-element variances that propagate to first order through arithmetic.
//!
//! # Core Types
//!
//! - [`Dim`] / [`Dimensions`] / [`Sizes`]: interned dimension labels and the
//!   fixed-capacity labeled shape (up to [`NDIM_MAX`] dimensions)
//! - [`Variable`]: a type-erased, unit- and variance-aware array; slicing,
//!   broadcasting and transposition are zero-copy views over a shared buffer
//! - [`Unit`]: a vector of base-unit exponents with checked arithmetic
//! - [`MultiIndex`]: strided co-iteration over N operands, including binned
//!   (ragged) operands
//!
//! # Operations
//!
//! - [`transform`] / [`transform2`]: apply a [`UnaryOp`] or [`BinaryOp`]
//!   elementwise into a fresh packed variable
//! - [`transform_in_place`] / [`transform2_in_place`]: the same, mutating the
//!   first operand
//! - [`accumulate_in_place`]: reduce one variable into another, with a
//!   relaxed broadcast direction so output elements may be visited repeatedly
//!
//! Operation descriptors live in [`ops`]; an operation is a table of
//! per-dtype function pointers plus a unit rule, and the engine resolves
//! exactly one slot per call before touching any data.
//!
//! # Example
//!
//! ```rust
//! use dimvar::ops::Plus;
//! use dimvar::{transform2, Dim, Dimensions, Unit, Variable};
//!
//! let x = Dim::new("x");
//! let y = Dim::new("y");
//! let a = Variable::new(
//!     Dimensions::from_pairs(&[(y, 2), (x, 3)]).unwrap(),
//!     Unit::M,
//!     vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
//!     None,
//! )
//! .unwrap();
//!
//! // Slicing is a zero-copy view; operands align by label, so the row
//! // broadcasts across `y`.
//! let row = a.slice_point(y, 0).unwrap();
//! let sum = transform2(&Plus, &a, &row).unwrap();
//! assert_eq!(sum.unit(), Unit::M);
//! assert_eq!(
//!     sum.values::<f64>().unwrap(),
//!     vec![2.0, 4.0, 6.0, 5.0, 7.0, 9.0]
//! );
//! ```
//!
//! # Binned data
//!
//! A bucket-typed [`Variable`] maps each outer element to a `(begin, end)`
//! range of a shared inner event list. Transforms recurse into the matched
//! ranges after validating bin sizes once:
//!
//! ```rust
//! use dimvar::ops::Times;
//! use dimvar::{transform2, Dim, Dimensions, Unit, Variable};
//!
//! let event = Dim::new("event");
//! let spectrum = Dim::new("spectrum");
//! let events = Variable::new(
//!     Dimensions::from_pairs(&[(event, 4)]).unwrap(),
//!     Unit::COUNTS,
//!     vec![1.0, 2.0, 3.0, 4.0],
//!     None,
//! )
//! .unwrap();
//! let binned = Variable::binned(
//!     Dimensions::from_pairs(&[(spectrum, 2)]).unwrap(),
//!     vec![(0, 1), (1, 4)],
//!     event,
//!     events,
//! )
//! .unwrap();
//! let scale = Variable::new(
//!     Dimensions::from_pairs(&[(spectrum, 2)]).unwrap(),
//!     Unit::NONE,
//!     vec![10.0, 100.0],
//!     None,
//! )
//! .unwrap();
//! let scaled = transform2(&Times, &binned, &scale).unwrap();
//! assert_eq!(
//!     scaled.bin_inner().unwrap().values::<f64>().unwrap(),
//!     vec![10.0, 200.0, 300.0, 400.0]
//! );
//! ```
//!
//! # Concurrency
//!
//! Buffers are shared behind a reader-writer lock; dense transforms over
//! large iteration spaces fork into the rayon pool (feature `parallel`, on
//! by default) and join before returning. Accumulation only takes the
//! chunked-parallel path when a dry run proves the operation idempotent, so
//! results never depend on thread count.

mod bucket;
mod dim;
mod dimensions;
mod element;
mod error;
mod multi_index;
pub mod ops;
mod strides;
mod transform;
mod unit;
mod value_and_variance;
mod variable;

pub use dim::Dim;
pub use dimensions::{Dimensions, Sizes, NDIM_MAX};
pub use element::{DType, Element};
pub use error::{
    BinnedDataError, DTypeError, DimensionError, Error, Result, UnitError, VariableError,
    VariancesError,
};
pub use multi_index::{BinnedOperand, DenseOperand, MultiIndex};
pub use ops::{BinaryOp, UnaryOp};
pub use strides::Strides;
pub use transform::{
    accumulate_in_place, transform, transform2, transform2_in_place, transform_in_place,
};
pub use unit::Unit;
pub use value_and_variance::ValueAndVariance;
pub use variable::Variable;
