//! Exact diffuse Kalman filtering and smoothing with the augmented filter.
//!
//! The core engine lives in [`akf`]; [`toolkit`] composes it into likelihood
//! functions and smoothing entry points. SARIMA models, estimation and batch
//! processing sit on top.

pub mod error;
pub mod linalg;
pub mod ssf;
pub mod akf;
pub mod likelihood;
pub mod toolkit;
pub mod multivariate;
pub mod types;
pub mod params;
pub mod polynomial;
pub mod state_space;
pub mod initialization;
pub mod kalman;
pub mod optimizer;
pub mod batch;

pub use error::{AkfError, Result};
pub use ssf::{DenseModel, Observations, StateSpaceModel, TimeSeries};
pub use types::{AkfConfig, ArimaOrder, EstimationConfig, FitResult};

/// Crate version string.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
