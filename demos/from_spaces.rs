extern crate quatimu;

use nalgebra::Vector3;
use quatimu::{math, AttitudeFilter, FilterConfig};
use std::io;
use std::io::BufRead;
use std::str::FromStr;

fn parse_floats(line: &str) -> Option<Vec<f32>> {
    line.split_whitespace()
        .map(|s| f32::from_str(s).ok())
        .collect()
}

// format:
// ax ay az gx gy gz dt_s y p r
fn main() {
    let mut imu = AttitudeFilter::<f32>::with_config(&FilterConfig::default()).unwrap();
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let l = match line {
            Ok(ll) => ll,
            Err(_e) => return,
        };
        let vec = match parse_floats(&l) {
            Some(v) if v.len() >= 10 => v,
            _ => {
                eprintln!("skipping malformed line: {}", l);
                continue;
            }
        };
        let accel = Vector3::new(vec[0], vec[1], vec[2]);
        let gyro = Vector3::new(vec[3], vec[4], vec[5]);
        let dt_s = vec[6];
        let (ry, rp, rr) = (vec[7], vec[8], vec[9]);

        let measured = math::tilt_from_accel(&accel, imu.euler().yaw);
        if let Err(e) = imu.step(&gyro, dt_s, Some(&measured)) {
            eprintln!("{}", e);
        }
        let angles = imu.euler();

        for f in [angles.yaw, angles.pitch, angles.roll, ry, rp, rr].iter() {
            let mut b = ryu::Buffer::new();
            let s = b.format(*f);
            print!("{}, ", s);
        }
        println!();
    }
}
