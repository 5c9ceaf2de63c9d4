//! Numerical primitives for the coincidence pipeline.

pub mod binning;
pub mod smooth;
pub mod stable;
pub mod tailfit;

pub use binning::{AtanLogBins, Bins2d};
pub use smooth::{filter_2d, gaussian_kernel};
pub use stable::*;
pub use tailfit::{ExpTail, TailFitError};
