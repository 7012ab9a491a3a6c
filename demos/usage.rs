extern crate quatimu;

use nalgebra::Vector3;
use quatimu::{math, AttitudeFilter, FilterConfig};

fn main() {
    let mut imu = AttitudeFilter::<f32>::with_config(&FilterConfig::default()).unwrap();
    let gyro = Vector3::new(0.0, 0.0, 0.0);
    let accel = Vector3::new(0.0, 0.0, 9.81);
    imu.predict(&gyro, 0.1).unwrap();
    let measured = math::tilt_from_accel(&accel, imu.euler().yaw);
    imu.update(&measured).unwrap();
    println!("{:?}", imu.euler());
}
