// talos_core/src/models/process/com_velocity.rs

use nalgebra::{DMatrix, DVector, DVectorView, Vector3};

use crate::models::process::{ProcessModelElement, TimeDomain};
use crate::ports::{InputPort, PortId, StatePort};
use crate::slots::SlotHandle;
use crate::types::VECTOR3_SIZE;

/// Advances the center-of-mass velocity from the desired-CoM-acceleration
/// input port (`v̇ = a_ff`), in the world frame. The configured CoM
/// acceleration covariance accounts for the controller not tracking its
/// desired acceleration exactly.
#[derive(Debug)]
pub struct CenterOfMassVelocityProcessModelElement {
    name: String,
    slot: SlotHandle,
    velocity: StatePort<Vector3<f64>>,
    feed_forward_port: PortId,
    feed_forward: InputPort<Vector3<f64>>,
    port_ids: [PortId; 1],
    input_block: DMatrix<f64>,
    noise_block: DMatrix<f64>,
}

impl CenterOfMassVelocityProcessModelElement {
    pub fn new(
        name: &str,
        slot: SlotHandle,
        velocity: StatePort<Vector3<f64>>,
        feed_forward_port: PortId,
        feed_forward: InputPort<Vector3<f64>>,
        com_acceleration_noise_covariance: DMatrix<f64>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            slot,
            velocity,
            feed_forward_port,
            feed_forward,
            port_ids: [feed_forward_port],
            input_block: DMatrix::identity(VECTOR3_SIZE, VECTOR3_SIZE),
            noise_block: com_acceleration_noise_covariance,
        }
    }
}

impl ProcessModelElement for CenterOfMassVelocityProcessModelElement {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_slot(&self) -> SlotHandle {
        self.slot
    }

    fn input_ports(&self) -> &[PortId] {
        &self.port_ids
    }

    fn time_domain(&self) -> TimeDomain {
        TimeDomain::Continuous
    }

    fn is_time_variant(&self) -> bool {
        false
    }

    fn compute_matrix_blocks(&mut self) {}

    fn state_transition_block(&self, _slot: SlotHandle) -> Option<&DMatrix<f64>> {
        None
    }

    fn input_block(&self, port: PortId) -> Option<&DMatrix<f64>> {
        (port == self.feed_forward_port).then_some(&self.input_block)
    }

    fn process_noise_block(&self) -> &DMatrix<f64> {
        &self.noise_block
    }

    fn propagate_state(&mut self, dt: f64) {
        if let Some(accel) = self.feed_forward.latest() {
            let v = self.velocity.get();
            self.velocity.set(v + accel * dt);
        }
    }

    fn correct_state(&mut self, correction: DVectorView<'_, f64>) {
        let v = self.velocity.get();
        self.velocity
            .set(v + Vector3::new(correction[0], correction[1], correction[2]));
    }

    fn state_vector(&self) -> DVector<f64> {
        DVector::from_column_slice(self.velocity.get().as_slice())
    }

    fn set_state_vector(&mut self, value: DVectorView<'_, f64>) {
        self.velocity
            .set(Vector3::new(value[0], value[1], value[2]));
    }
}
