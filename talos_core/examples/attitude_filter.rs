// talos_core/examples/attitude_filter.rs
//
// Minimal attitude filter: one orientation sensor, one biased gyro, no CoM
// chain. The "sensors" here are constants standing in for the host dataflow.

use std::sync::Arc;

use nalgebra::{UnitQuaternion, Vector3};
use talos_core::prelude::*;

fn main() {
    let dt = 0.005;
    let parameters = EstimatorNoiseParameters::default();

    let orientation_port = MeasurementPort::new();
    let gyro_port = MeasurementPort::new();

    let mut estimator = EstimatorBuilder::new(
        dt,
        diagonal_covariance(parameters.angular_acceleration_process_std_dev, 3),
    )
    .add_orientation_sensor(OrientationSensorConfiguration {
        name: "imuOrientation".to_owned(),
        estimation_to_measurement: UnitQuaternion::identity(),
        noise_covariance: diagonal_covariance(parameters.orientation_measurement_std_dev, 3),
        port: orientation_port.clone(),
    })
    .add_angular_velocity_sensor(AngularVelocitySensorConfiguration {
        name: "imuAngularVelocity".to_owned(),
        estimation_to_measurement: UnitQuaternion::identity(),
        noise_covariance: diagonal_covariance(parameters.angular_velocity_measurement_std_dev, 3),
        bias_process_noise_covariance: diagonal_covariance(
            parameters.angular_velocity_bias_process_std_dev,
            3,
        ),
        twist_provider: Arc::new(RigidMountKinematics::default()),
        port: gyro_port.clone(),
    })
    .build()
    .expect("valid estimator configuration");

    // A robot holding a 10° yaw, seen through a gyro with a constant bias.
    let truth = UnitQuaternion::from_scaled_axis(Vector3::new(0.0, 0.0, 10f64.to_radians()));
    let gyro_bias = Vector3::new(0.02, -0.01, 0.03);

    let orientation_writer = orientation_port.writer();
    let gyro_writer = gyro_port.writer();
    for tick in 0..2000 {
        orientation_writer.set(truth);
        gyro_writer.set(gyro_bias);

        estimator.predict();
        if estimator.correct().is_err() {
            eprintln!("tick {tick}: degenerate update skipped");
        }
    }

    let attitude = estimator.estimated_orientation();
    println!(
        "estimated yaw: {:.4}° (truth 10°)",
        attitude.scaled_axis().z.to_degrees()
    );
    println!(
        "estimated gyro bias: {:?} (truth {:?})",
        estimator
            .filter()
            .slot_state(SlotHandle(2))
            .map(|b| [b[0], b[1], b[2]]),
        [gyro_bias.x, gyro_bias.y, gyro_bias.z]
    );
}
