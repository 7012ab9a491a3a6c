//! Quaternion helpers used by the filter.
//!
//! Quaternions are stored as `Vector4` in `(q0, q1, q2, q3) = (w, x, y, z)`
//! order and rotate body frame vectors into the reference frame. Euler angles
//! follow the aerospace ZYX sequence. All angles are in radians.

use nalgebra::{convert, Matrix3x4, Matrix4, RealField, Vector3, Vector4};

/// Represents three dimensions:
///  * roll, rotation about an axis running from nose to tail;
///  * pitch, nose up or down about an axis running from wing to wing;
///  * yaw, nose left or right about an axis running up and down.
/// The axes are alternatively designated as
/// longitudinal, transverse, and vertical respectively.
/// See https://en.wikipedia.org/wiki/Euler_angles#Tait%E2%80%93Bryan_angles
/// and https://en.wikipedia.org/wiki/Aircraft_principal_axes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EulerAngles<T> {
    pub roll: T,
    pub pitch: T,
    pub yaw: T,
}

impl<T: RealField + Copy> EulerAngles<T> {
    pub fn new(roll: T, pitch: T, yaw: T) -> Self {
        EulerAngles { roll, pitch, yaw }
    }

    pub fn zero() -> Self {
        Self::new(T::zero(), T::zero(), T::zero())
    }

    pub fn is_finite(&self) -> bool {
        self.roll.is_finite() && self.pitch.is_finite() && self.yaw.is_finite()
    }

    /// `(roll, pitch, yaw)` as a column vector.
    pub fn to_vector(&self) -> Vector3<T> {
        Vector3::new(self.roll, self.pitch, self.yaw)
    }
}

impl<T: RealField + Copy> From<Vector3<T>> for EulerAngles<T> {
    fn from(v: Vector3<T>) -> Self {
        EulerAngles::new(v[0], v[1], v[2])
    }
}

impl<T: RealField + Copy> From<EulerAngles<T>> for Vector3<T> {
    fn from(angles: EulerAngles<T>) -> Self {
        angles.to_vector()
    }
}

/// Unit quaternion for the given roll, pitch and yaw.
pub fn euler_to_quaternion<T: RealField + Copy>(angles: &EulerAngles<T>) -> Vector4<T> {
    let half: T = convert(0.5);
    let (sr, cr) = ((angles.roll * half).sin(), (angles.roll * half).cos());
    let (sp, cp) = ((angles.pitch * half).sin(), (angles.pitch * half).cos());
    let (sy, cy) = ((angles.yaw * half).sin(), (angles.yaw * half).cos());

    Vector4::new(
        cr * cp * cy + sr * sp * sy,
        sr * cp * cy - cr * sp * sy,
        cr * sp * cy + sr * cp * sy,
        cr * cp * sy - sr * sp * cy,
    )
}

/// Roll, pitch and yaw of a unit quaternion.
///
/// Pitch saturates at ±π/2; at that point roll and yaw are not separable and
/// the returned split between them is arbitrary.
pub fn quaternion_to_euler<T: RealField + Copy>(q: &Vector4<T>) -> EulerAngles<T> {
    let one = T::one();
    let two: T = convert(2.0);
    let (q0, q1, q2, q3) = (q[0], q[1], q[2], q[3]);

    let roll = (two * (q0 * q1 + q2 * q3)).atan2(one - two * (q1 * q1 + q2 * q2));
    let sinp = (two * (q0 * q2 - q1 * q3)).max(-one).min(one);
    let yaw = (two * (q0 * q3 + q1 * q2)).atan2(one - two * (q2 * q2 + q3 * q3));

    EulerAngles::new(roll, sinp.asin(), yaw)
}

/// Skew operator `Ω(ω)` of the quaternion kinematics `dq/dt = ½·Ω(ω)·q` for
/// body rate `ω = (p, q, r)`.
#[rustfmt::skip]
pub fn kinematics_operator<T: RealField + Copy>(rate: &Vector3<T>) -> Matrix4<T> {
    let zero = T::zero();
    let (p, q, r) = (rate[0], rate[1], rate[2]);
    Matrix4::new(
        zero, -p,   -q,   -r,
        p,    zero,  r,   -q,
        q,    -r,    zero, p,
        r,     q,   -p,    zero,
    )
}

/// Jacobian of [`quaternion_to_euler`] with respect to the quaternion
/// components, rows ordered roll, pitch, yaw.
///
/// The pitch row is scaled by `1 / cos(pitch)` and becomes non-finite at
/// gimbal lock (pitch = ±π/2). Callers have to check the result.
pub fn measurement_jacobian<T: RealField + Copy>(q: &Vector4<T>) -> Matrix3x4<T> {
    let zero = T::zero();
    let one = T::one();
    let two: T = convert(2.0);
    let four: T = convert(4.0);
    let (q0, q1, q2, q3) = (q[0], q[1], q[2], q[3]);

    // roll = atan2(n, d)
    let n = two * (q0 * q1 + q2 * q3);
    let d = one - two * (q1 * q1 + q2 * q2);
    let den = n * n + d * d;
    let dn = [two * q1, two * q0, two * q3, two * q2];
    let dd = [zero, -four * q1, -four * q2, zero];
    let roll = |i: usize| (d * dn[i] - n * dd[i]) / den;

    // pitch = asin(s)
    let s = two * (q0 * q2 - q1 * q3);
    let cos_pitch = (one - s * s).max(zero).sqrt();
    let ds = [two * q2, -two * q3, two * q0, -two * q1];
    let pitch = |i: usize| ds[i] / cos_pitch;

    // yaw = atan2(m, e)
    let m = two * (q0 * q3 + q1 * q2);
    let e = one - two * (q2 * q2 + q3 * q3);
    let yden = m * m + e * e;
    let dm = [two * q3, two * q2, two * q1, two * q0];
    let de = [zero, zero, -four * q2, -four * q3];
    let yaw = |i: usize| (e * dm[i] - m * de[i]) / yden;

    Matrix3x4::new(
        roll(0), roll(1), roll(2), roll(3),
        pitch(0), pitch(1), pitch(2), pitch(3),
        yaw(0), yaw(1), yaw(2), yaw(3),
    )
}

/// `measured - predicted` wrapped into `(-π, π]`, so that readings on either
/// side of ±π give a small error instead of one close to a full turn.
pub fn wrap_angle_difference<T: RealField + Copy>(measured: T, predicted: T) -> T {
    let diff = measured - predicted;
    diff - T::two_pi() * ((diff - T::pi()) / T::two_pi()).ceil()
}

/// Roll and pitch sensed by an accelerometer at rest, in any unit, combined
/// with the given yaw. Gravity carries no heading information, so the caller
/// decides where yaw comes from (usually the filter's own estimate).
pub fn tilt_from_accel<T: RealField + Copy>(accel: &Vector3<T>, yaw: T) -> EulerAngles<T> {
    let (ax, ay, az) = (accel[0], accel[1], accel[2]);
    let roll = ay.atan2(az);
    let pitch = (-ax).atan2((ay * ay + az * az).sqrt());
    EulerAngles::new(roll, pitch, yaw)
}
