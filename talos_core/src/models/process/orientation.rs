// talos_core/src/models/process/orientation.rs

use nalgebra::{DMatrix, DVector, DVectorView, UnitQuaternion, Vector3};

use crate::models::process::{ProcessModelElement, TimeDomain};
use crate::ports::StatePort;
use crate::slots::SlotHandle;
use crate::types::VECTOR3_SIZE;

/// Advances the orientation slot by integrating the angular-velocity slot.
///
/// The orientation is a body-to-world `UnitQuaternion`; its slice of the
/// global state vector is the rotation-vector log. Corrections compose
/// multiplicatively as world-frame perturbations (`q ← exp(δθ) ⊗ q`), and the
/// coupling block to the angular-velocity slot is the body-to-world rotation
/// matrix, so this element is time-varying.
///
/// The angular-velocity coupling is optional: without it the orientation is a
/// standalone slot held in place between corrections (a pure
/// measurement-driven attitude filter).
#[derive(Debug)]
pub struct OrientationProcessModelElement {
    name: String,
    orientation_slot: SlotHandle,
    coupled: Vec<SlotHandle>,
    orientation: StatePort<UnitQuaternion<f64>>,
    angular_velocity: Option<StatePort<Vector3<f64>>>,
    angular_velocity_block: DMatrix<f64>,
    noise_block: DMatrix<f64>,
}

impl OrientationProcessModelElement {
    pub fn new(
        name: &str,
        orientation_slot: SlotHandle,
        orientation: StatePort<UnitQuaternion<f64>>,
        angular_velocity: Option<(SlotHandle, StatePort<Vector3<f64>>)>,
    ) -> Self {
        let (coupled, angular_velocity) = match angular_velocity {
            Some((slot, port)) => (vec![slot], Some(port)),
            None => (Vec::new(), None),
        };
        Self {
            name: name.to_owned(),
            orientation_slot,
            coupled,
            orientation,
            angular_velocity,
            angular_velocity_block: DMatrix::zeros(VECTOR3_SIZE, VECTOR3_SIZE),
            // Noise enters this chain through the angular-velocity slot.
            noise_block: DMatrix::zeros(VECTOR3_SIZE, VECTOR3_SIZE),
        }
    }
}

impl ProcessModelElement for OrientationProcessModelElement {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_slot(&self) -> SlotHandle {
        self.orientation_slot
    }

    fn coupled_slots(&self) -> &[SlotHandle] {
        &self.coupled
    }

    fn time_domain(&self) -> TimeDomain {
        TimeDomain::Continuous
    }

    fn is_time_variant(&self) -> bool {
        true
    }

    fn compute_matrix_blocks(&mut self) {
        // A world-frame orientation perturbation integrates the body-frame
        // angular velocity through the current body-to-world rotation.
        let rotation = self.orientation.get().to_rotation_matrix();
        self.angular_velocity_block.copy_from(rotation.matrix());
    }

    fn state_transition_block(&self, slot: SlotHandle) -> Option<&DMatrix<f64>> {
        (self.coupled.first() == Some(&slot)).then_some(&self.angular_velocity_block)
    }

    fn process_noise_block(&self) -> &DMatrix<f64> {
        &self.noise_block
    }

    fn propagate_state(&mut self, dt: f64) {
        if let Some(angular_velocity) = &self.angular_velocity {
            let omega_body = angular_velocity.get();
            let q = self.orientation.get();
            let delta = UnitQuaternion::from_scaled_axis(omega_body * dt);
            self.orientation.set(q * delta);
        }
    }

    fn correct_state(&mut self, correction: DVectorView<'_, f64>) {
        let delta_world =
            UnitQuaternion::from_scaled_axis(Vector3::new(correction[0], correction[1], correction[2]));
        let q = self.orientation.get();
        self.orientation.set(delta_world * q);
    }

    fn state_vector(&self) -> DVector<f64> {
        DVector::from_column_slice(self.orientation.get().scaled_axis().as_slice())
    }

    fn set_state_vector(&mut self, value: DVectorView<'_, f64>) {
        let axis = Vector3::new(value[0], value[1], value[2]);
        self.orientation.set(UnitQuaternion::from_scaled_axis(axis));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_2;

    fn element() -> OrientationProcessModelElement {
        OrientationProcessModelElement::new(
            "orientation",
            SlotHandle(0),
            StatePort::new(UnitQuaternion::identity()),
            Some((SlotHandle(1), StatePort::new(Vector3::zeros()))),
        )
    }

    #[test]
    fn propagation_integrates_body_rates() {
        let mut element = element();
        element
            .angular_velocity
            .as_ref()
            .unwrap()
            .set(Vector3::new(0.0, 0.0, FRAC_PI_2));
        // 1 s at pi/2 rad/s about z
        for _ in 0..100 {
            element.propagate_state(0.01);
        }
        let q = element.orientation.get();
        assert_abs_diff_eq!(q.scaled_axis().z, FRAC_PI_2, epsilon = 1e-9);
    }

    #[test]
    fn correction_is_multiplicative() {
        let mut element = element();
        let correction = DVector::from_column_slice(&[0.0, 0.0, 0.1]);
        element.correct_state(correction.rows(0, 3));
        assert_abs_diff_eq!(element.orientation.get().scaled_axis().z, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn coupling_block_is_the_body_to_world_rotation() {
        let mut element = element();
        let q = UnitQuaternion::from_scaled_axis(Vector3::new(0.3, -0.2, 0.5));
        element.orientation.set(q);
        element.compute_matrix_blocks();
        let block = element.state_transition_block(SlotHandle(1)).unwrap();
        let rotation = q.to_rotation_matrix();
        for i in 0..3 {
            for j in 0..3 {
                assert_abs_diff_eq!(block[(i, j)], rotation.matrix()[(i, j)], epsilon = 1e-12);
            }
        }
        assert!(element.state_transition_block(SlotHandle(0)).is_none());
    }
}
