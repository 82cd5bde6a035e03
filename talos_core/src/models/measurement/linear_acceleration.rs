// talos_core/src/models/measurement/linear_acceleration.rs

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Matrix3, UnitQuaternion, Vector3};

use crate::kinematics::SpatialKinematicsProvider;
use crate::models::measurement::MeasurementModelElement;
use crate::ports::{MeasurementPort, StatePort};
use crate::slots::SlotHandle;
use crate::types::VECTOR3_SIZE;

/// State slots read by [`LinearAccelerationMeasurementModelElement`], bundled
/// because specific-force measurements couple every rigid-body kinematic
/// quantity in the filter.
#[derive(Debug, Clone, Copy)]
pub struct LinearAccelerationReadSlots {
    pub com_position: SlotHandle,
    pub com_velocity: SlotHandle,
    pub com_acceleration: SlotHandle,
    pub orientation: SlotHandle,
    pub angular_velocity: SlotHandle,
    pub angular_acceleration: SlotHandle,
    pub bias: SlotHandle,
}

/// Observation model for an accelerometer.
///
/// The sensor measures specific force at its measurement point:
///
/// `z = R_mw · (a_p − g) + b`,  `a_p = a_com + R_wb · (α×ρ + ω×(ω×ρ))`
///
/// with `ρ` the CoM-to-sensor lever arm from the spatial kinematics
/// collaborator, expressed in the estimation frame. The CoM position and
/// velocity slots are read (the lever arm is defined relative to the CoM) but
/// do not influence the linearization; their blocks are zero.
#[derive(Debug, Clone)]
pub struct LinearAccelerationMeasurementModelElement {
    name: String,
    read: [SlotHandle; 7],
    slots: LinearAccelerationReadSlots,
    orientation: StatePort<UnitQuaternion<f64>>,
    angular_velocity: StatePort<Vector3<f64>>,
    angular_acceleration: StatePort<Vector3<f64>>,
    com_acceleration: StatePort<Vector3<f64>>,
    bias: StatePort<Vector3<f64>>,
    measurement: MeasurementPort<Vector3<f64>>,
    estimation_to_measurement: UnitQuaternion<f64>,
    kinematics: Arc<dyn SpatialKinematicsProvider>,
    gravity: Vector3<f64>,
    blocks: HashMap<SlotHandle, DMatrix<f64>>,
    noise: DMatrix<f64>,
}

impl LinearAccelerationMeasurementModelElement {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        slots: LinearAccelerationReadSlots,
        orientation: StatePort<UnitQuaternion<f64>>,
        angular_velocity: StatePort<Vector3<f64>>,
        angular_acceleration: StatePort<Vector3<f64>>,
        com_acceleration: StatePort<Vector3<f64>>,
        bias: StatePort<Vector3<f64>>,
        measurement: MeasurementPort<Vector3<f64>>,
        estimation_to_measurement: UnitQuaternion<f64>,
        kinematics: Arc<dyn SpatialKinematicsProvider>,
        gravity_z: f64,
        noise_covariance: DMatrix<f64>,
    ) -> Self {
        let read = [
            slots.com_position,
            slots.com_velocity,
            slots.com_acceleration,
            slots.orientation,
            slots.angular_velocity,
            slots.angular_acceleration,
            slots.bias,
        ];

        let mut blocks = HashMap::new();
        // Read but uncoupled: explicit zero block.
        blocks.insert(slots.com_velocity, DMatrix::zeros(VECTOR3_SIZE, VECTOR3_SIZE));
        blocks.insert(slots.bias, DMatrix::identity(VECTOR3_SIZE, VECTOR3_SIZE));
        for slot in [
            slots.com_acceleration,
            slots.orientation,
            slots.angular_velocity,
            slots.angular_acceleration,
        ] {
            blocks.insert(slot, DMatrix::zeros(VECTOR3_SIZE, VECTOR3_SIZE));
        }

        Self {
            name: name.to_owned(),
            read,
            slots,
            orientation,
            angular_velocity,
            angular_acceleration,
            com_acceleration,
            bias,
            measurement,
            estimation_to_measurement,
            kinematics,
            gravity: Vector3::new(0.0, 0.0, -gravity_z),
            blocks,
            noise: noise_covariance,
        }
    }

    /// Rotation from world to measurement frame at the current estimate.
    fn world_to_measurement(&self) -> Matrix3<f64> {
        let body_to_measurement = self.estimation_to_measurement.inverse();
        (body_to_measurement * self.orientation.get().inverse())
            .to_rotation_matrix()
            .into_inner()
    }

    fn predicted_measurement(&self) -> Vector3<f64> {
        let rho = self.kinematics.com_to_measurement_point();
        let omega = self.angular_velocity.get();
        let alpha = self.angular_acceleration.get();
        let lever_body = alpha.cross(&rho) + omega.cross(&omega.cross(&rho));

        let point_accel_world =
            self.com_acceleration.get() + self.orientation.get() * lever_body;
        self.world_to_measurement() * (point_accel_world - self.gravity) + self.bias.get()
    }
}

impl MeasurementModelElement for LinearAccelerationMeasurementModelElement {
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
        let rho = self.kinematics.com_to_measurement_point();
        let omega = self.angular_velocity.get();
        let r_mw = self.world_to_measurement();
        let r_mb = self
            .estimation_to_measurement
            .inverse()
            .to_rotation_matrix()
            .into_inner();

        // ∂h/∂a_com
        if let Some(block) = self.blocks.get_mut(&self.slots.com_acceleration) {
            block.copy_from(&r_mw);
        }

        // ∂h/∂θ for a world-frame orientation perturbation: only the
        // world-frame part of the specific force is affected.
        if let Some(block) = self.blocks.get_mut(&self.slots.orientation) {
            let specific_force_world = self.com_acceleration.get() - self.gravity;
            block.copy_from(&(r_mw * specific_force_world.cross_matrix()));
        }

        // ∂h/∂ω of the centripetal term ω×(ω×ρ) = ω(ωᵀρ) − ρ(ωᵀω)
        if let Some(block) = self.blocks.get_mut(&self.slots.angular_velocity) {
            let centripetal_jacobian = omega * rho.transpose()
                + Matrix3::identity() * omega.dot(&rho)
                - 2.0 * rho * omega.transpose();
            block.copy_from(&(r_mb * centripetal_jacobian));
        }

        // ∂h/∂α of the tangential term α×ρ = −[ρ]×·α
        if let Some(block) = self.blocks.get_mut(&self.slots.angular_acceleration) {
            block.copy_from(&(-r_mb * rho.cross_matrix()));
        }
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

    const GRAVITY: f64 = 9.81;

    fn slots() -> LinearAccelerationReadSlots {
        LinearAccelerationReadSlots {
            com_position: SlotHandle(2),
            com_velocity: SlotHandle(3),
            com_acceleration: SlotHandle(6),
            orientation: SlotHandle(0),
            angular_velocity: SlotHandle(1),
            angular_acceleration: SlotHandle(5),
            bias: SlotHandle(4),
        }
    }

    fn element(
        lever_arm: Vector3<f64>,
    ) -> (
        LinearAccelerationMeasurementModelElement,
        MeasurementPort<Vector3<f64>>,
    ) {
        let port = MeasurementPort::new();
        let element = LinearAccelerationMeasurementModelElement::new(
            "imuLinearAcceleration",
            slots(),
            StatePort::new(UnitQuaternion::identity()),
            StatePort::new(Vector3::zeros()),
            StatePort::new(Vector3::zeros()),
            StatePort::new(Vector3::zeros()),
            StatePort::new(Vector3::zeros()),
            port.clone(),
            UnitQuaternion::identity(),
            Arc::new(RigidMountKinematics::new(lever_arm)),
            GRAVITY,
            diagonal_covariance(0.1, 3),
        );
        (element, port)
    }

    #[test]
    fn at_rest_the_sensor_sees_minus_gravity() {
        let (element, port) = element(Vector3::zeros());
        // a stationary accelerometer reads +g on the up axis
        port.writer().set(Vector3::new(0.0, 0.0, GRAVITY));
        let residual = element.compute_residual();
        assert_abs_diff_eq!(residual.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn spinning_about_the_lever_arm_axis_adds_no_centripetal_term() {
        let (mut element, port) = element(Vector3::new(0.0, 0.0, 0.2));
        element.angular_velocity.set(Vector3::new(0.0, 0.0, 5.0));
        port.writer().set(Vector3::new(0.0, 0.0, GRAVITY));
        assert_abs_diff_eq!(element.compute_residual().norm(), 0.0, epsilon = 1e-12);

        // ...but an orthogonal lever arm does feel it: ω×(ω×ρ) = −ω²·ρ
        element.kinematics = Arc::new(RigidMountKinematics::new(Vector3::new(0.1, 0.0, 0.0)));
        let predicted = element.predicted_measurement();
        assert_abs_diff_eq!(predicted.x, -25.0 * 0.1, epsilon = 1e-12);
    }

    #[test]
    fn read_set_includes_zero_blocks_for_uncoupled_slots() {
        let (mut element, _port) = element(Vector3::new(0.1, 0.0, 0.0));
        element.compute_matrix_blocks();

        // explicit zero block for CoM velocity
        let com_vel = element.observation_block(SlotHandle(3)).unwrap();
        assert_abs_diff_eq!(com_vel.norm(), 0.0, epsilon = 1e-12);
        // CoM position is read but has no block at all
        assert!(element.observation_block(SlotHandle(2)).is_none());
        assert_eq!(element.read_slots().len(), 7);
    }

    #[test]
    fn orientation_block_matches_a_finite_difference() {
        let (mut element, _port) = element(Vector3::zeros());
        element
            .orientation
            .set(UnitQuaternion::from_scaled_axis(Vector3::new(0.2, -0.1, 0.4)));
        element.com_acceleration.set(Vector3::new(0.5, -0.3, 1.2));
        element.compute_matrix_blocks();
        let block = element.observation_block(SlotHandle(0)).unwrap().clone();

        let eps = 1e-7;
        let base = element.predicted_measurement();
        for axis in 0..3 {
            let mut delta = Vector3::zeros();
            delta[axis] = eps;
            let q = element.orientation.get();
            element
                .orientation
                .set(UnitQuaternion::from_scaled_axis(delta) * q);
            let perturbed = element.predicted_measurement();
            element.orientation.set(q);

            let column = (perturbed - base) / eps;
            for row in 0..3 {
                assert_abs_diff_eq!(block[(row, axis)], column[row], epsilon = 1e-5);
            }
        }
    }
}
