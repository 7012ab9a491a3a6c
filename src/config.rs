use nalgebra::{convert, RealField, Vector3};

use crate::error::{Error, Variance};
use crate::math::EulerAngles;

/// Initial attitude, bias and noise tuning of an
/// [`AttitudeFilter`](crate::AttitudeFilter).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(bound(
        serialize = "T: nalgebra::Scalar + serde::Serialize",
        deserialize = "T: nalgebra::Scalar + serde::Deserialize<'de>"
    ))
)]
pub struct FilterConfig<T> {
    /// Attitude the filter starts from (radians).
    pub start_angle: EulerAngles<T>,

    /// Initial gyroscope bias guess (rad/s).
    pub start_bias: Vector3<T>,

    /// Variance of each accelerometer-derived angle (rad²).
    pub meas_variance: T,

    /// Per-step random-walk variance of the gyroscope bias.
    pub bias_process_variance: T,

    /// Per-step variance of each quaternion component.
    pub quat_process_variance: T,
}

impl<T: RealField + Copy> Default for FilterConfig<T> {
    fn default() -> Self {
        FilterConfig {
            start_angle: EulerAngles::zero(),
            start_bias: Vector3::zeros(),
            meas_variance: convert(0.01),
            bias_process_variance: convert(1e-6),
            quat_process_variance: convert(1e-4),
        }
    }
}

impl<T: RealField + Copy> FilterConfig<T> {
    /// Checks that every variance is finite and strictly positive and that
    /// the start values are finite.
    pub fn validate(&self) -> Result<(), Error> {
        check_variance(self.meas_variance, Variance::Measurement)?;
        check_variance(self.bias_process_variance, Variance::BiasProcess)?;
        check_variance(self.quat_process_variance, Variance::QuatProcess)?;

        if !self.start_angle.is_finite() || !self.start_bias.iter().all(|v| v.is_finite()) {
            return Err(Error::NonFiniteInput);
        }
        Ok(())
    }
}

fn check_variance<T: RealField + Copy>(value: T, which: Variance) -> Result<(), Error> {
    if value.is_finite() && value > T::zero() {
        Ok(())
    } else {
        Err(Error::NonPositiveVariance(which))
    }
}
