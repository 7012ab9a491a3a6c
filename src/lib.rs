//! no_std 7-state quaternion extended Kalman filter for IMU attitude.
//!
//! Gyroscope rates drive the time update of an attitude quaternion; roll,
//! pitch and yaw derived from the accelerometer correct it. The gyroscope
//! bias is estimated jointly as a random walk, and the covariance update uses
//! the Joseph form so the covariance stays symmetric under rounding.
//!
//! The filter is generic over the scalar type (`f32` or `f64`) and uses only
//! fixed-size, stack-allocated nalgebra matrices.
//!
//! # Usage
//! ```
//! use nalgebra::Vector3;
//! use quatimu::{math, AttitudeFilter, FilterConfig};
//!
//! let mut filter = AttitudeFilter::<f32>::with_config(&FilterConfig::default()).unwrap();
//!
//! // one sensor cycle, dt in seconds, gyro in rad/s
//! let gyro = Vector3::new(0.01, -0.02, 0.0);
//! let accel = Vector3::new(0.0, 0.0, 9.81);
//! filter.predict(&gyro, 0.01).unwrap();
//!
//! // heading is not observable from gravity, feed back the current yaw
//! let measured = math::tilt_from_accel(&accel, filter.euler().yaw);
//! if let Err(e) = filter.update(&measured) {
//!     // the correction was skipped, the filter keeps running on the gyro
//!     println!("update skipped: {}", e);
//! }
//!
//! let angles = filter.euler();
//! println!("Roll: {}; pitch: {}; yaw: {}", angles.roll, angles.pitch, angles.yaw);
//! println!("Bias: {:?}", filter.bias());
//! ```
//!
//! # Gimbal lock
//! The state is a quaternion, but the measurement is a set of Euler angles,
//! which is singular at pitch = ±90°. Close to that point the measurement
//! Jacobian grows without bound; at the singularity `update` reports
//! [`Error::DegenerateUpdate`] and the filter keeps integrating the gyro.

#![cfg_attr(not(test), no_std)]
#![allow(non_snake_case)]
#![deny(warnings)]

pub mod config;
pub mod error;
pub mod filter;
pub mod math;

pub use config::FilterConfig;
pub use error::{Error, Variance};
pub use filter::{AttitudeFilter, GainMatrix, MeasurementMatrix, StateMatrix, StateVector};
pub use math::EulerAngles;
