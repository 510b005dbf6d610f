//! Diffuse augmented Kalman filter and smoother.
//!
//! Two estimators of the diffuse effects are available and can be checked
//! against each other:
//!
//! - [`AugmentedFilter`] carries the diffuse constraints in the state and
//!   accumulates their sufficient statistics in a [`QAugmentation`]; with
//!   collapsing enabled it turns into an ordinary filter as soon as the
//!   diffuse effects are estimable.
//! - [`QrFilter`] treats the diffuse effects as GLS regressors of the
//!   ordinary innovations and solves for them by Householder QR.

pub mod augmentation;
pub mod filter;
pub mod prediction_error;
pub mod qr;
pub mod results;
pub mod smoother;
pub mod state;

pub use augmentation::QAugmentation;
pub use filter::AugmentedFilter;
pub use prediction_error::AugmentedPredictionError;
pub use qr::{QrEstimate, QrFilter, QrSmoother};
pub use results::{FilteringResults, Recording, StateSnapshot};
pub use smoother::{AugmentedSmoother, SmoothingResults};
pub use state::AugmentedState;
