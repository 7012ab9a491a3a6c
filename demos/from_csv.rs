extern crate csv;
extern crate quatimu;

use nalgebra::Vector3;
use quatimu::{math, AttitudeFilter, FilterConfig};
use std::error::Error;
use std::io;
use std::str::FromStr;

fn field<T: FromStr>(sr: &csv::StringRecord, i: usize) -> Result<T, Box<dyn Error>>
where
    T::Err: Error + 'static,
{
    let raw = sr.get(i).ok_or_else(|| format!("missing column {}", i))?;
    Ok(T::from_str(raw.trim())?)
}

fn time(sr: &csv::StringRecord) -> Result<f64, Box<dyn Error>> {
    let tv_sec: u32 = field(sr, 0)?;
    let tv_usec: u32 = field(sr, 1)?;
    Ok(tv_sec as f64 + tv_usec as f64 / 1000000.0)
}

fn triple(sr: &csv::StringRecord, first: usize) -> Result<Vector3<f32>, Box<dyn Error>> {
    Ok(Vector3::new(
        field(sr, first)?,
        field(sr, first + 1)?,
        field(sr, first + 2)?,
    ))
}

// CSV should be formated as follows:
// "tsecs","tusec","gx","gy","gz","ax","ay","az","yaw","pitch","roll",
// where yaw,pitch,roll are expected results to compare againts.
// Gyro in rad/s, angles in radians.
fn main() -> Result<(), Box<dyn Error>> {
    let mut imu = AttitudeFilter::<f32>::with_config(&FilterConfig::default())?;
    let mut rdr = csv::Reader::from_reader(io::stdin());
    let mut prev_t: Option<f64> = None;
    for result in rdr.records() {
        let record = result?;
        let time = time(&record)?;
        let gyro = triple(&record, 2)?;
        let accel = triple(&record, 5)?;
        let reference = triple(&record, 8)?;

        // the first sample only establishes the time base
        if let Some(prev) = prev_t {
            let dt = (time - prev) as f32;
            let measured = math::tilt_from_accel(&accel, imu.euler().yaw);
            if let Err(e) = imu.step(&gyro, dt, Some(&measured)) {
                eprintln!("t={:.6}: {}", time, e);
            }
        }
        prev_t = Some(time);

        let angles = imu.euler();
        println!(
            "{:2.8},{:2.8},{:2.8},{:2.8},{:2.8},{:2.8}",
            angles.yaw, angles.pitch, angles.roll, reference[0], reference[1], reference[2]
        );
    }
    Ok(())
}
