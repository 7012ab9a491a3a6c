use log::{debug, trace, warn};
use nalgebra::{
    convert, Dim, Matrix, Matrix3, Matrix4, Matrix4x3, RealField, SMatrix, SVector, Storage,
    UnitQuaternion, Vector3, Vector4,
};

use crate::config::FilterConfig;
use crate::error::Error;
use crate::math::{self, EulerAngles};

pub type StateVector<T> = SVector<T, 7>;
pub type StateMatrix<T> = SMatrix<T, 7, 7>;
pub type MeasurementMatrix<T> = SMatrix<T, 3, 7>;
pub type GainMatrix<T> = SMatrix<T, 7, 3>;

/// 7-state extended Kalman filter fusing gyro rates with accelerometer
/// derived attitude angles.
///
/// State `X = [q0, q1, q2, q3, bx, by, bz]`: a unit quaternion rotating the
/// body frame into the reference frame followed by the gyroscope bias.
/// Call [`predict`](Self::predict) once per gyro sample and
/// [`update`](Self::update) whenever a fresh accelerometer reading is
/// available.
///
/// The instance is not internally synchronized; share it between threads only
/// behind a lock.
#[derive(Debug, Clone)]
pub struct AttitudeFilter<T: RealField + Copy> {
    // state
    X: StateVector<T>,
    P: StateMatrix<T>,
    // working matrices of the last step
    A: StateMatrix<T>,
    H: MeasurementMatrix<T>,
    K: GainMatrix<T>,
    innovation: Vector3<T>,
    // constants
    I: StateMatrix<T>,
    W: StateMatrix<T>,
    R: Matrix3<T>,
    initialized: bool,
}

impl<T: RealField + Copy> Default for AttitudeFilter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RealField + Copy> AttitudeFilter<T> {
    /// Uninitialized filter. Every call other than `init` fails with
    /// [`Error::Uninitialized`] until it is initialized.
    pub fn new() -> Self {
        let mut X = StateVector::zeros();
        X[0] = T::one();
        AttitudeFilter {
            X,
            P: StateMatrix::identity(),
            A: StateMatrix::identity(),
            H: MeasurementMatrix::zeros(),
            K: GainMatrix::zeros(),
            innovation: Vector3::zeros(),
            I: StateMatrix::identity(),
            W: StateMatrix::zeros(),
            R: Matrix3::zeros(),
            initialized: false,
        }
    }

    /// Creates a filter initialized from `config`.
    pub fn with_config(config: &FilterConfig<T>) -> Result<Self, Error> {
        let mut filter = Self::new();
        filter.init_with(config)?;
        Ok(filter)
    }

    /// Sets the start attitude, start bias and noise model. Resets the
    /// covariance to identity.
    ///
    /// The variances must be strictly positive. A rejected call leaves the
    /// filter exactly as it was.
    pub fn init(
        &mut self,
        start_angle: &EulerAngles<T>,
        start_bias: &Vector3<T>,
        meas_variance: T,
        bias_process_variance: T,
        quat_process_variance: T,
    ) -> Result<(), Error> {
        self.init_with(&FilterConfig {
            start_angle: *start_angle,
            start_bias: *start_bias,
            meas_variance,
            bias_process_variance,
            quat_process_variance,
        })
    }

    /// Same as [`init`](Self::init) with the parameters bundled.
    pub fn init_with(&mut self, config: &FilterConfig<T>) -> Result<(), Error> {
        if let Err(e) = config.validate() {
            debug!("rejected filter configuration: {}", e);
            return Err(e);
        }

        self.I = StateMatrix::identity();
        self.P = StateMatrix::identity();
        self.A = StateMatrix::identity();
        self.H = MeasurementMatrix::zeros();
        self.K = GainMatrix::zeros();
        self.innovation = Vector3::zeros();
        self.R = Matrix3::identity() * config.meas_variance;

        self.W = StateMatrix::identity() * config.quat_process_variance;
        for i in 4..7 {
            self.W[(i, i)] = config.bias_process_variance;
        }

        self.X
            .fixed_rows_mut::<4>(0)
            .copy_from(&math::euler_to_quaternion(&config.start_angle));
        self.X.fixed_rows_mut::<3>(4).copy_from(&config.start_bias);
        self.initialized = true;

        debug!(
            "filter initialized: meas_var={} bias_var={} quat_var={}",
            config.meas_variance, config.bias_process_variance, config.quat_process_variance
        );
        Ok(())
    }

    /// Time update: integrates the bias-corrected gyro rate over `dt` seconds
    /// and grows the covariance by the process noise.
    ///
    /// `dt` has to be the real time elapsed since the previous call.
    pub fn predict(&mut self, gyro: &Vector3<T>, dt: T) -> Result<(), Error> {
        self.ensure_initialized()?;
        if !(dt.is_finite() && dt > T::zero()) {
            return Err(Error::InvalidTimeStep);
        }
        if !all_finite(gyro) {
            return Err(Error::NonFiniteInput);
        }

        let half_dt = dt * convert::<f64, T>(0.5);
        let q = self.quaternion();
        let rate = gyro - self.bias();
        let omega = math::kinematics_operator(&rate);

        // Jacobian at the state before propagation
        let mut A = StateMatrix::identity();
        A.fixed_view_mut::<4, 4>(0, 0)
            .copy_from(&(Matrix4::identity() + omega * half_dt));
        #[rustfmt::skip]
        let dq_db = Matrix4x3::new(
             q[1],  q[2],  q[3],
            -q[0],  q[3], -q[2],
            -q[3], -q[0],  q[1],
             q[2], -q[1], -q[0],
        ) * half_dt;
        A.fixed_view_mut::<4, 3>(0, 4).copy_from(&dq_db);

        // bias is a random walk, only the quaternion moves
        let q_next = match normalized(&(q + omega * q * half_dt)) {
            Some(q_next) => q_next,
            None => {
                warn!("quaternion diverged during predict, dt={}", dt);
                return Err(Error::Divergence);
            }
        };
        let P_next = A * self.P * A.transpose() + self.W;
        if !all_finite(&P_next) {
            warn!("covariance diverged during predict, dt={}", dt);
            return Err(Error::Divergence);
        }

        self.A = A;
        self.X.fixed_rows_mut::<4>(0).copy_from(&q_next);
        self.P = P_next;
        trace!("predict dt={}", dt);
        Ok(())
    }

    /// Measurement update with roll, pitch and yaw derived from the
    /// accelerometer.
    ///
    /// On [`Error::DegenerateUpdate`] the correction is dropped and state and
    /// covariance keep their values from before the call. The filter stays
    /// usable; keep calling `predict`.
    pub fn update(&mut self, measured: &EulerAngles<T>) -> Result<(), Error> {
        self.ensure_initialized()?;
        if !measured.is_finite() {
            return Err(Error::NonFiniteInput);
        }

        let q = normalized(&self.quaternion()).ok_or_else(degenerate)?;

        let mut H = MeasurementMatrix::zeros();
        H.fixed_view_mut::<3, 4>(0, 0)
            .copy_from(&math::measurement_jacobian(&q));
        let Ht = H.transpose();

        let S = H * self.P * Ht + self.R;
        let S_inv = match S.try_inverse() {
            Some(inv) if all_finite(&inv) => inv,
            _ => return Err(degenerate()),
        };
        let K = self.P * Ht * S_inv;

        let predicted = math::quaternion_to_euler(&q);
        let innovation = Vector3::new(
            math::wrap_angle_difference(measured.roll, predicted.roll),
            math::wrap_angle_difference(measured.pitch, predicted.pitch),
            math::wrap_angle_difference(measured.yaw, predicted.yaw),
        );

        let mut X = self.X;
        X.fixed_rows_mut::<4>(0).copy_from(&q);
        X += K * innovation;
        let q_next = normalized(&X.fixed_rows::<4>(0).into_owned()).ok_or_else(degenerate)?;
        X.fixed_rows_mut::<4>(0).copy_from(&q_next);

        // Joseph form keeps P symmetric and positive semi-definite
        let IKH = self.I - K * H;
        let P = IKH * self.P * IKH.transpose() + K * self.R * K.transpose();

        if !all_finite(&X) || !all_finite(&P) {
            return Err(degenerate());
        }

        self.X = X;
        self.P = P;
        self.H = H;
        self.K = K;
        self.innovation = innovation;
        trace!(
            "update innovation=({}, {}, {})",
            innovation[0],
            innovation[1],
            innovation[2]
        );
        Ok(())
    }

    /// One control cycle: `predict`, then `update` if a fresh measurement
    /// is available.
    pub fn step(
        &mut self,
        gyro: &Vector3<T>,
        dt: T,
        measured: Option<&EulerAngles<T>>,
    ) -> Result<(), Error> {
        self.predict(gyro, dt)?;
        match measured {
            Some(angles) => self.update(angles),
            None => Ok(()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Attitude quaternion `(q0, q1, q2, q3)`, scalar first.
    pub fn quaternion(&self) -> Vector4<T> {
        self.X.fixed_rows::<4>(0).into_owned()
    }

    pub fn unit_quaternion(&self) -> UnitQuaternion<T> {
        let q = self.quaternion();
        UnitQuaternion::new_normalize(nalgebra::Quaternion::new(q[0], q[1], q[2], q[3]))
    }

    /// Attitude as roll, pitch and yaw.
    pub fn euler(&self) -> EulerAngles<T> {
        math::quaternion_to_euler(&self.quaternion())
    }

    /// Gyroscope bias estimate (rad/s).
    pub fn bias(&self) -> Vector3<T> {
        self.X.fixed_rows::<3>(4).into_owned()
    }

    pub fn state(&self) -> &StateVector<T> {
        &self.X
    }

    pub fn covariance(&self) -> &StateMatrix<T> {
        &self.P
    }

    pub fn transition_jacobian(&self) -> &StateMatrix<T> {
        &self.A
    }

    pub fn measurement_jacobian(&self) -> &MeasurementMatrix<T> {
        &self.H
    }

    pub fn gain(&self) -> &GainMatrix<T> {
        &self.K
    }

    /// Wrapped angle error of the last successful update.
    pub fn innovation(&self) -> &Vector3<T> {
        &self.innovation
    }

    fn ensure_initialized(&self) -> Result<(), Error> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::Uninitialized)
        }
    }
}

fn degenerate() -> Error {
    warn!("degenerate measurement update, correction skipped");
    Error::DegenerateUpdate
}

fn normalized<T: RealField + Copy>(q: &Vector4<T>) -> Option<Vector4<T>> {
    let norm = q.norm();
    if norm.is_finite() && norm > T::default_epsilon() {
        Some(q / norm)
    } else {
        None
    }
}

fn all_finite<T, R, C, S>(m: &Matrix<T, R, C, S>) -> bool
where
    T: RealField + Copy,
    R: Dim,
    C: Dim,
    S: Storage<T, R, C>,
{
    m.iter().all(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn stationary() -> AttitudeFilter<f64> {
        AttitudeFilter::with_config(&FilterConfig::default()).unwrap()
    }

    #[test]
    fn init_sets_noise_model() {
        let mut filter = AttitudeFilter::<f64>::new();
        filter
            .init(
                &EulerAngles::new(0.1, 0.2, 0.3),
                &Vector3::new(0.01, 0.02, 0.03),
                0.5,
                1e-6,
                1e-4,
            )
            .unwrap();

        assert!(filter.is_initialized());
        assert_relative_eq!(filter.R, Matrix3::<f64>::identity() * 0.5);
        assert_relative_eq!(filter.P, StateMatrix::<f64>::identity());
        for i in 0..4 {
            assert_eq!(filter.W[(i, i)], 1e-4);
        }
        for i in 4..7 {
            assert_eq!(filter.W[(i, i)], 1e-6);
        }
        assert_eq!(filter.W[(0, 1)], 0.0);
        assert_relative_eq!(filter.bias(), Vector3::new(0.01, 0.02, 0.03));

        let angles = filter.euler();
        assert_abs_diff_eq!(angles.roll, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(angles.pitch, 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(angles.yaw, 0.3, epsilon = 1e-12);
    }

    #[test]
    fn rejected_config_keeps_filter_uninitialized() {
        let mut filter = AttitudeFilter::<f64>::new();
        let err = filter
            .init(&EulerAngles::zero(), &Vector3::zeros(), 0.0, 1e-6, 1e-4)
            .unwrap_err();
        assert_eq!(
            err,
            Error::NonPositiveVariance(crate::error::Variance::Measurement)
        );
        assert!(!filter.is_initialized());
        assert_eq!(
            filter.predict(&Vector3::zeros(), 0.01),
            Err(Error::Uninitialized)
        );
    }

    #[test]
    fn rejected_reinit_keeps_previous_state() {
        let mut filter = stationary();
        filter.predict(&Vector3::new(0.1, 0.0, 0.0), 0.01).unwrap();
        let before = filter.clone();
        assert!(filter
            .init(&EulerAngles::zero(), &Vector3::zeros(), 0.01, -1.0, 1e-4)
            .is_err());
        assert!(filter.is_initialized());
        assert_eq!(filter.X, before.X);
        assert_eq!(filter.P, before.P);
    }

    #[test]
    fn use_before_init_is_reported() {
        let mut filter = AttitudeFilter::<f32>::new();
        assert_eq!(
            filter.predict(&Vector3::zeros(), 0.01),
            Err(Error::Uninitialized)
        );
        assert_eq!(
            filter.update(&EulerAngles::zero()),
            Err(Error::Uninitialized)
        );
    }

    #[test]
    fn predict_rejects_bad_time_step_and_input() {
        let mut filter = stationary();
        let gyro = Vector3::zeros();
        assert_eq!(filter.predict(&gyro, 0.0), Err(Error::InvalidTimeStep));
        assert_eq!(filter.predict(&gyro, -0.01), Err(Error::InvalidTimeStep));
        assert_eq!(filter.predict(&gyro, f64::NAN), Err(Error::InvalidTimeStep));
        assert_eq!(
            filter.predict(&Vector3::new(f64::NAN, 0.0, 0.0), 0.01),
            Err(Error::NonFiniteInput)
        );
        assert_eq!(
            filter.update(&EulerAngles::new(0.0, f64::INFINITY, 0.0)),
            Err(Error::NonFiniteInput)
        );
    }

    #[test]
    fn transition_jacobian_layout() {
        let mut filter = AttitudeFilter::<f64>::with_config(&FilterConfig {
            start_angle: EulerAngles::new(0.3, -0.4, 1.0),
            start_bias: Vector3::new(0.01, -0.02, 0.03),
            ..Default::default()
        })
        .unwrap();
        let q = filter.quaternion();
        let gyro = Vector3::new(0.5, 0.2, -0.1);
        let dt = 0.02;
        filter.predict(&gyro, dt).unwrap();

        let A = filter.transition_jacobian();
        let omega = math::kinematics_operator(&(gyro - Vector3::new(0.01, -0.02, 0.03)));
        let top_left = Matrix4::identity() + omega * (dt / 2.0);
        assert_relative_eq!(A.fixed_view::<4, 4>(0, 0).into_owned(), top_left);

        assert_relative_eq!(A[(0, 4)], dt * q[1] / 2.0);
        assert_relative_eq!(A[(1, 5)], dt * q[3] / 2.0);
        assert_relative_eq!(A[(2, 4)], -dt * q[3] / 2.0);
        assert_relative_eq!(A[(3, 6)], -dt * q[0] / 2.0);

        assert_relative_eq!(
            A.fixed_view::<3, 3>(4, 4).into_owned(),
            Matrix3::identity()
        );
        assert!(A.fixed_view::<3, 4>(4, 0).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn transition_jacobian_matches_finite_differences() {
        // propagate X by hand without normalization and differentiate
        let dt = 0.05;
        let gyro = Vector3::new(0.7, -0.3, 0.4);
        let f = |x: &StateVector<f64>| -> StateVector<f64> {
            let q: Vector4<f64> = x.fixed_rows::<4>(0).into_owned();
            let b: Vector3<f64> = x.fixed_rows::<3>(4).into_owned();
            let omega = math::kinematics_operator(&(gyro - b));
            let mut out = *x;
            out.fixed_rows_mut::<4>(0)
                .copy_from(&(q + omega * q * (dt / 2.0)));
            out
        };

        let mut filter = AttitudeFilter::<f64>::with_config(&FilterConfig {
            start_angle: EulerAngles::new(0.2, 0.1, -0.5),
            start_bias: Vector3::new(0.02, 0.01, -0.03),
            ..Default::default()
        })
        .unwrap();
        let x0 = *filter.state();
        filter.predict(&gyro, dt).unwrap();
        let A = *filter.transition_jacobian();

        let h = 1e-6;
        for col in 0..7 {
            let mut plus = x0;
            let mut minus = x0;
            plus[col] += h;
            minus[col] -= h;
            let d = (f(&plus) - f(&minus)) / (2.0 * h);
            for row in 0..7 {
                assert_abs_diff_eq!(A[(row, col)], d[row], epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn update_with_matching_measurement_only_shrinks_covariance() {
        let mut filter = stationary();
        filter.predict(&Vector3::zeros(), 0.01).unwrap();
        let trace_before = filter.P.trace();
        filter.update(&EulerAngles::zero()).unwrap();

        assert_relative_eq!(filter.quaternion(), Vector4::new(1.0, 0.0, 0.0, 0.0));
        assert_relative_eq!(*filter.innovation(), Vector3::<f64>::zeros());
        assert!(filter.P.trace() < trace_before);
        assert_relative_eq!(filter.P, filter.P.transpose(), epsilon = 1e-12);
    }

    #[test]
    fn update_pulls_toward_measurement() {
        let mut filter = stationary();
        let target = EulerAngles::new(0.2, -0.1, 0.3);
        for _ in 0..50 {
            filter.step(&Vector3::zeros(), 0.01, Some(&target)).unwrap();
        }
        let angles = filter.euler();
        // part of the initial jump is taken up by the bias states
        assert_abs_diff_eq!(angles.roll, target.roll, epsilon = 1e-2);
        assert_abs_diff_eq!(angles.pitch, target.pitch, epsilon = 1e-2);
        assert_abs_diff_eq!(angles.yaw, target.yaw, epsilon = 1e-2);
    }

    #[test]
    fn yaw_measurement_across_the_seam() {
        use core::f64::consts::PI;
        let start = EulerAngles::new(0.0, 0.0, PI - 0.01);
        let mut filter = AttitudeFilter::with_config(&FilterConfig {
            start_angle: start,
            ..Default::default()
        })
        .unwrap();
        filter.predict(&Vector3::zeros(), 0.01).unwrap();
        filter.update(&EulerAngles::new(0.0, 0.0, -PI + 0.01)).unwrap();

        // 0.02 rad the short way round, not almost a full turn back
        assert_abs_diff_eq!(filter.innovation()[2], 0.02, epsilon = 1e-9);
        let yaw = filter.euler().yaw;
        assert!(yaw < 0.0 && yaw.abs() > 3.0);
    }

    #[test]
    fn singular_innovation_covariance_leaves_state_untouched() {
        let mut filter = stationary();
        filter.predict(&Vector3::new(0.1, 0.0, 0.0), 0.01).unwrap();
        filter.update(&EulerAngles::zero()).unwrap();

        // no prior uncertainty and no measurement noise: S = H·P·Hᵀ + R = 0
        filter.P = StateMatrix::zeros();
        filter.R = Matrix3::zeros();
        let X = filter.X;
        let P = filter.P;
        let K = filter.K;

        assert_eq!(
            filter.update(&EulerAngles::new(0.3, 0.1, 0.2)),
            Err(Error::DegenerateUpdate)
        );
        assert_eq!(filter.X, X);
        assert_eq!(filter.P, P);
        assert_eq!(filter.K, K);

        // the filter keeps predicting afterwards
        filter.predict(&Vector3::zeros(), 0.01).unwrap();
        assert!(all_finite(&filter.P));
    }

    #[test]
    fn covariance_overflow_is_reported_as_divergence() {
        let mut filter = stationary();
        filter.P = StateMatrix::identity() * f64::MAX;
        let X = filter.X;
        assert_eq!(
            filter.predict(&Vector3::new(1.0, 1.0, 1.0), 10.0),
            Err(Error::Divergence)
        );
        assert_eq!(filter.X, X);
    }

    #[test]
    fn quaternion_overflow_is_reported_as_divergence() {
        let mut filter = stationary();
        let X = filter.X;
        let P = filter.P;
        assert_eq!(
            filter.predict(&Vector3::new(1e308, -1e308, 1e308), 1e10),
            Err(Error::Divergence)
        );
        assert_eq!(filter.X, X);
        assert_eq!(filter.P, P);
    }

    #[test]
    fn unit_quaternion_accessor() {
        let filter = AttitudeFilter::<f64>::with_config(&FilterConfig {
            start_angle: EulerAngles::new(0.1, 0.2, 0.3),
            ..Default::default()
        })
        .unwrap();
        let (roll, pitch, yaw) = filter.unit_quaternion().euler_angles();
        assert_abs_diff_eq!(roll, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(pitch, 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(yaw, 0.3, epsilon = 1e-12);
    }
}
