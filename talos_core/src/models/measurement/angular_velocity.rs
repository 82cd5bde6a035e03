// talos_core/src/models/measurement/angular_velocity.rs

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector, UnitQuaternion, Vector3};

use crate::kinematics::TwistProvider;
use crate::models::measurement::MeasurementModelElement;
use crate::ports::{MeasurementPort, StatePort};
use crate::slots::SlotHandle;
use crate::types::VECTOR3_SIZE;

/// Observation model for a rate gyro.
///
/// The gyro senses the total angular velocity of its mounting link in its own
/// measurement frame, plus a slowly varying bias:
///
/// `z = R_me · (ω + ω_rel) + b`
///
/// where `ω` is the estimation link's angular velocity (the state), `ω_rel`
/// the mounting link's angular velocity relative to the estimation link
/// (pulled from the rigid-body twist collaborator), `R_me` the fixed mount
/// rotation, and `b` the bias slot estimated alongside.
#[derive(Debug, Clone)]
pub struct AngularVelocityMeasurementModelElement {
    name: String,
    read: [SlotHandle; 2],
    angular_velocity: StatePort<Vector3<f64>>,
    bias: StatePort<Vector3<f64>>,
    measurement: MeasurementPort<Vector3<f64>>,
    estimation_to_measurement: UnitQuaternion<f64>,
    twist_provider: Arc<dyn TwistProvider>,
    blocks: HashMap<SlotHandle, DMatrix<f64>>,
    noise: DMatrix<f64>,
}

impl AngularVelocityMeasurementModelElement {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        angular_velocity_slot: SlotHandle,
        bias_slot: SlotHandle,
        angular_velocity: StatePort<Vector3<f64>>,
        bias: StatePort<Vector3<f64>>,
        measurement: MeasurementPort<Vector3<f64>>,
        estimation_to_measurement: UnitQuaternion<f64>,
        twist_provider: Arc<dyn TwistProvider>,
        noise_covariance: DMatrix<f64>,
    ) -> Self {
        let mut blocks = HashMap::new();
        // Coordinate mapping from the estimation frame into the measurement
        // frame is the inverse of the mount's frame rotation.
        let rotation = estimation_to_measurement.inverse().to_rotation_matrix();
        let mut rate_block = DMatrix::zeros(VECTOR3_SIZE, VECTOR3_SIZE);
        rate_block.copy_from(rotation.matrix());
        blocks.insert(angular_velocity_slot, rate_block);
        blocks.insert(bias_slot, DMatrix::identity(VECTOR3_SIZE, VECTOR3_SIZE));

        Self {
            name: name.to_owned(),
            read: [angular_velocity_slot, bias_slot],
            angular_velocity,
            bias,
            measurement,
            estimation_to_measurement,
            twist_provider,
            blocks,
            noise: noise_covariance,
        }
    }

    fn predicted_measurement(&self) -> Vector3<f64> {
        let total_rate = self.angular_velocity.get() + self.twist_provider.relative_angular_velocity();
        self.estimation_to_measurement.inverse() * total_rate + self.bias.get()
    }
}

impl MeasurementModelElement for AngularVelocityMeasurementModelElement {
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
        // Both blocks are fixed by the mount rotation; nothing to refresh.
    }

    fn observation_block(&self, slot: SlotHandle) -> Option<&DMatrix<f64>> {
        self.blocks.get(&slot)
    }

    fn noise_covariance(&self) -> &DMatrix<f64> {
        &self.noise
    }

    fn compute_residual(&self) -> DVector<f64> {
        let Some(measured) = self.measurement.latest() else {
            return DVector::zeros(VECTOR3_SIZE);
        };
        let residual = measured - self.predicted_measurement();
        DVector::from_column_slice(residual.as_slice())
    }

    fn mark_measurement_consumed(&self) {
        self.measurement.mark_consumed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::kinematics::RigidMountKinematics;
    use crate::types::diagonal_covariance;

    #[test]
    fn residual_subtracts_rate_and_bias() {
        let omega = StatePort::new(Vector3::new(0.1, 0.0, 0.0));
        let bias = StatePort::new(Vector3::new(0.0, 0.02, 0.0));
        let port = MeasurementPort::new();
        let element = AngularVelocityMeasurementModelElement::new(
            "imuAngularVelocity",
            SlotHandle(1),
            SlotHandle(2),
            omega,
            bias,
            port.clone(),
            UnitQuaternion::identity(),
            Arc::new(RigidMountKinematics::default()),
            diagonal_covariance(0.05, 3),
        );

        port.writer().set(Vector3::new(0.1, 0.02, 0.3));
        let residual = element.compute_residual();
        assert_abs_diff_eq!(residual[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(residual[1], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(residual[2], 0.3, epsilon = 1e-12);
    }

    #[test]
    fn blocks_cover_exactly_the_read_set() {
        let element = AngularVelocityMeasurementModelElement::new(
            "imuAngularVelocity",
            SlotHandle(1),
            SlotHandle(2),
            StatePort::new(Vector3::zeros()),
            StatePort::new(Vector3::zeros()),
            MeasurementPort::new(),
            UnitQuaternion::identity(),
            Arc::new(RigidMountKinematics::default()),
            diagonal_covariance(0.05, 3),
        );

        assert!(element.observation_block(SlotHandle(1)).is_some());
        assert!(element.observation_block(SlotHandle(2)).is_some());
        assert!(element.observation_block(SlotHandle(0)).is_none());
    }
}
