// talos_core/src/models/measurement/orientation.rs

use nalgebra::{DMatrix, DVector, UnitQuaternion};

use crate::models::measurement::MeasurementModelElement;
use crate::ports::{MeasurementPort, StatePort};
use crate::slots::SlotHandle;
use crate::types::VECTOR3_SIZE;

/// Observation model for an orientation sensor (e.g. an IMU's fused attitude
/// output).
///
/// The sensor reports the orientation of its own measurement frame in the
/// world; the predicted reading composes the estimated body orientation with
/// the fixed body-to-measurement mount rotation. The innovation is the
/// world-frame rotation-vector error, so the Jacobian with respect to the
/// orientation slot is the identity.
#[derive(Debug, Clone)]
pub struct OrientationMeasurementModelElement {
    name: String,
    read: [SlotHandle; 1],
    orientation: StatePort<UnitQuaternion<f64>>,
    measurement: MeasurementPort<UnitQuaternion<f64>>,
    /// Fixed mount rotation from the estimation (body) frame to the sensor's
    /// measurement frame.
    estimation_to_measurement: UnitQuaternion<f64>,
    orientation_block: DMatrix<f64>,
    noise: DMatrix<f64>,
}

impl OrientationMeasurementModelElement {
    pub fn new(
        name: &str,
        orientation_slot: SlotHandle,
        orientation: StatePort<UnitQuaternion<f64>>,
        measurement: MeasurementPort<UnitQuaternion<f64>>,
        estimation_to_measurement: UnitQuaternion<f64>,
        noise_covariance: DMatrix<f64>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            read: [orientation_slot],
            orientation,
            measurement,
            estimation_to_measurement,
            orientation_block: DMatrix::identity(VECTOR3_SIZE, VECTOR3_SIZE),
            noise: noise_covariance,
        }
    }

    fn predicted_measurement(&self) -> UnitQuaternion<f64> {
        self.orientation.get() * self.estimation_to_measurement
    }
}

impl MeasurementModelElement for OrientationMeasurementModelElement {
    fn name(&self) -> &str {
        &self.name
    }

    fn measurement_size(&self) -> usize {
        VECTOR3_SIZE
    }

    fn read_slots(&self) -> &[SlotHandle] {
        &self.read
    }

    fn has_new_measurement(&self) -> bool {
        self.measurement.has_new_data()
    }

    fn compute_matrix_blocks(&mut self) {
        // A world-frame perturbation of the body orientation rotates the
        // predicted sensor orientation identically: the block stays identity.
    }

    fn observation_block(&self, slot: SlotHandle) -> Option<&DMatrix<f64>> {
        (slot == self.read[0]).then_some(&self.orientation_block)
    }

    fn noise_covariance(&self) -> &DMatrix<f64> {
        &self.noise
    }

    fn compute_residual(&self) -> DVector<f64> {
        let Some(measured) = self.measurement.latest() else {
            return DVector::zeros(VECTOR3_SIZE);
        };
        // World-frame rotation error between the measured and predicted
        // sensor orientation.
        let error = measured * self.predicted_measurement().inverse();
        DVector::from_column_slice(error.scaled_axis().as_slice())
    }

    fn mark_measurement_consumed(&self) {
        self.measurement.mark_consumed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector3;
    use crate::types::diagonal_covariance;

    #[test]
    fn residual_is_the_world_frame_rotation_error() {
        let orientation = StatePort::new(UnitQuaternion::identity());
        let port = MeasurementPort::new();
        let element = OrientationMeasurementModelElement::new(
            "imuOrientation",
            SlotHandle(0),
            orientation.clone(),
            port.clone(),
            UnitQuaternion::identity(),
            diagonal_covariance(0.1, 3),
        );

        let yaw = UnitQuaternion::from_scaled_axis(Vector3::new(0.0, 0.0, 0.2));
        port.writer().set(yaw);
        assert!(element.has_new_measurement());

        let residual = element.compute_residual();
        assert_abs_diff_eq!(residual[2], 0.2, epsilon = 1e-12);

        element.mark_measurement_consumed();
        assert!(!element.has_new_measurement());
    }

    #[test]
    fn mount_rotation_enters_the_prediction() {
        let mount = UnitQuaternion::from_scaled_axis(Vector3::new(0.0, 0.0, 0.1));
        let orientation = StatePort::new(UnitQuaternion::identity());
        let port = MeasurementPort::new();
        let element = OrientationMeasurementModelElement::new(
            "imuOrientation",
            SlotHandle(0),
            orientation,
            port.clone(),
            mount,
            diagonal_covariance(0.1, 3),
        );

        // the sensor reads exactly its mount rotation: zero residual
        port.writer().set(mount);
        assert_abs_diff_eq!(element.compute_residual().norm(), 0.0, epsilon = 1e-12);
    }
}
