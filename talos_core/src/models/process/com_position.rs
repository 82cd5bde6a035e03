// talos_core/src/models/process/com_position.rs

use nalgebra::{DMatrix, DVector, DVectorView, Vector3};

use crate::models::process::{ProcessModelElement, TimeDomain};
use crate::ports::StatePort;
use crate::slots::SlotHandle;
use crate::types::VECTOR3_SIZE;

/// Advances the center-of-mass position from the CoM velocity slot
/// (`ṙ = v`), both in the world frame. Pure kinematic integration, no
/// process noise of its own.
#[derive(Debug)]
pub struct CenterOfMassPositionProcessModelElement {
    name: String,
    position_slot: SlotHandle,
    coupled: [SlotHandle; 1],
    position: StatePort<Vector3<f64>>,
    velocity: StatePort<Vector3<f64>>,
    velocity_block: DMatrix<f64>,
    noise_block: DMatrix<f64>,
}

impl CenterOfMassPositionProcessModelElement {
    pub fn new(
        name: &str,
        position_slot: SlotHandle,
        velocity_slot: SlotHandle,
        position: StatePort<Vector3<f64>>,
        velocity: StatePort<Vector3<f64>>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            position_slot,
            coupled: [velocity_slot],
            position,
            velocity,
            velocity_block: DMatrix::identity(VECTOR3_SIZE, VECTOR3_SIZE),
            noise_block: DMatrix::zeros(VECTOR3_SIZE, VECTOR3_SIZE),
        }
    }
}

impl ProcessModelElement for CenterOfMassPositionProcessModelElement {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_slot(&self) -> SlotHandle {
        self.position_slot
    }

    fn coupled_slots(&self) -> &[SlotHandle] {
        &self.coupled
    }

    fn time_domain(&self) -> TimeDomain {
        TimeDomain::Continuous
    }

    fn is_time_variant(&self) -> bool {
        false
    }

    fn compute_matrix_blocks(&mut self) {}

    fn state_transition_block(&self, slot: SlotHandle) -> Option<&DMatrix<f64>> {
        (slot == self.coupled[0]).then_some(&self.velocity_block)
    }

    fn process_noise_block(&self) -> &DMatrix<f64> {
        &self.noise_block
    }

    fn propagate_state(&mut self, dt: f64) {
        let r = self.position.get();
        self.position.set(r + self.velocity.get() * dt);
    }

    fn correct_state(&mut self, correction: DVectorView<'_, f64>) {
        let r = self.position.get();
        self.position
            .set(r + Vector3::new(correction[0], correction[1], correction[2]));
    }

    fn state_vector(&self) -> DVector<f64> {
        DVector::from_column_slice(self.position.get().as_slice())
    }

    fn set_state_vector(&mut self, value: DVectorView<'_, f64>) {
        self.position
            .set(Vector3::new(value[0], value[1], value[2]));
    }
}
