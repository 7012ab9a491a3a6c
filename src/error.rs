use core::fmt;

/// Identifies which noise variance was rejected at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Variance {
    /// Accelerometer-derived angle measurement variance (R).
    Measurement,
    /// Gyroscope bias random-walk variance (lower block of W).
    BiasProcess,
    /// Quaternion process variance (upper block of W).
    QuatProcess,
}

/// Errors reported by [`AttitudeFilter`](crate::AttitudeFilter).
///
/// None of these are fatal: after any error the filter state is exactly what
/// it was before the failing call, so the caller may skip the cycle and keep
/// predicting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A noise variance was zero, negative or not finite.
    NonPositiveVariance(Variance),

    /// `predict` or `update` was called before a successful `init`.
    Uninitialized,

    /// The elapsed time handed to `predict` was not a finite positive number.
    InvalidTimeStep,

    /// A gyro sample, angle measurement or start value contained NaN or Inf.
    NonFiniteInput,

    /// The innovation covariance could not be inverted, or the correction it
    /// produced was not finite. The correction was discarded.
    DegenerateUpdate,

    /// Time propagation produced a non-finite state or covariance. The
    /// propagation was discarded.
    Divergence,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NonPositiveVariance(Variance::Measurement) => {
                f.write_str("measurement variance must be positive")
            }
            Error::NonPositiveVariance(Variance::BiasProcess) => {
                f.write_str("bias process variance must be positive")
            }
            Error::NonPositiveVariance(Variance::QuatProcess) => {
                f.write_str("quaternion process variance must be positive")
            }
            Error::Uninitialized => f.write_str("filter used before initialization"),
            Error::InvalidTimeStep => f.write_str("time step must be finite and positive"),
            Error::NonFiniteInput => f.write_str("input contains a non-finite value"),
            Error::DegenerateUpdate => {
                f.write_str("innovation covariance is singular, update skipped")
            }
            Error::Divergence => f.write_str("state propagation is no longer finite"),
        }
    }
}

impl core::error::Error for Error {}
