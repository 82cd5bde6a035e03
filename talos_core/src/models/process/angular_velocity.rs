// talos_core/src/models/process/angular_velocity.rs

use nalgebra::{DMatrix, DVector, DVectorView, Vector3};

use crate::models::process::{ProcessModelElement, TimeDomain};
use crate::ports::{InputPort, PortId, StatePort};
use crate::slots::SlotHandle;
use crate::types::VECTOR3_SIZE;

/// Advances the angular-velocity slot, optionally driven by a feed-forward
/// angular-acceleration input port (`ω̇ = α_ff`). Without the port the slot
/// is a random walk whose uncertainty grows with the configured
/// angular-acceleration process noise.
#[derive(Debug)]
pub struct AngularVelocityProcessModelElement {
    name: String,
    slot: SlotHandle,
    angular_velocity: StatePort<Vector3<f64>>,
    feed_forward: Option<(PortId, InputPort<Vector3<f64>>)>,
    port_ids: Vec<PortId>,
    input_block: DMatrix<f64>,
    noise_block: DMatrix<f64>,
}

impl AngularVelocityProcessModelElement {
    pub fn new(
        name: &str,
        slot: SlotHandle,
        angular_velocity: StatePort<Vector3<f64>>,
        feed_forward: Option<(PortId, InputPort<Vector3<f64>>)>,
        angular_acceleration_noise_covariance: DMatrix<f64>,
    ) -> Self {
        let port_ids = feed_forward.iter().map(|(id, _)| *id).collect();
        Self {
            name: name.to_owned(),
            slot,
            angular_velocity,
            feed_forward,
            port_ids,
            input_block: DMatrix::identity(VECTOR3_SIZE, VECTOR3_SIZE),
            noise_block: angular_acceleration_noise_covariance,
        }
    }
}

impl ProcessModelElement for AngularVelocityProcessModelElement {
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

    fn compute_matrix_blocks(&mut self) {
        // All blocks are constant; nothing to refresh.
    }

    fn state_transition_block(&self, _slot: SlotHandle) -> Option<&DMatrix<f64>> {
        None
    }

    fn input_block(&self, port: PortId) -> Option<&DMatrix<f64>> {
        match &self.feed_forward {
            Some((id, _)) if *id == port => Some(&self.input_block),
            _ => None,
        }
    }

    fn process_noise_block(&self) -> &DMatrix<f64> {
        &self.noise_block
    }

    fn propagate_state(&mut self, dt: f64) {
        if let Some((_, port)) = &self.feed_forward {
            if let Some(alpha) = port.latest() {
                let omega = self.angular_velocity.get();
                self.angular_velocity.set(omega + alpha * dt);
            }
        }
    }

    fn correct_state(&mut self, correction: DVectorView<'_, f64>) {
        let omega = self.angular_velocity.get();
        self.angular_velocity.set(
            omega + Vector3::new(correction[0], correction[1], correction[2]),
        );
    }

    fn state_vector(&self) -> DVector<f64> {
        DVector::from_column_slice(self.angular_velocity.get().as_slice())
    }

    fn set_state_vector(&mut self, value: DVectorView<'_, f64>) {
        self.angular_velocity
            .set(Vector3::new(value[0], value[1], value[2]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::types::diagonal_covariance;

    #[test]
    fn feed_forward_drives_propagation() {
        let port = InputPort::new();
        let mut element = AngularVelocityProcessModelElement::new(
            "angularVelocity",
            SlotHandle(1),
            StatePort::new(Vector3::zeros()),
            Some((PortId(0), port.clone())),
            diagonal_covariance(0.1, 3),
        );

        // no data on the port yet: constant angular velocity
        element.propagate_state(0.01);
        assert_abs_diff_eq!(element.angular_velocity.get().norm(), 0.0, epsilon = 1e-12);

        port.writer().set(Vector3::new(0.0, 0.0, 2.0));
        element.propagate_state(0.5);
        assert_abs_diff_eq!(element.angular_velocity.get().z, 1.0, epsilon = 1e-12);
        assert!(element.input_block(PortId(0)).is_some());
        assert!(element.input_block(PortId(1)).is_none());
    }
}
