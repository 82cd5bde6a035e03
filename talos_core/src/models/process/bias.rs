// talos_core/src/models/process/bias.rs

use nalgebra::{DMatrix, DVector, DVectorView, Vector3};

use crate::models::process::{ProcessModelElement, TimeDomain};
use crate::ports::StatePort;
use crate::slots::SlotHandle;

/// Random-walk model for a slowly varying sensor offset, one instance per
/// biased sensor. The bias is expressed in the sensor's measurement frame.
/// Zero dynamics; the configured process noise sets how fast the filter lets
/// the estimate drift.
#[derive(Debug)]
pub struct BiasProcessModelElement {
    name: String,
    slot: SlotHandle,
    bias: StatePort<Vector3<f64>>,
    noise_block: DMatrix<f64>,
}

impl BiasProcessModelElement {
    pub fn new(
        name: &str,
        slot: SlotHandle,
        bias: StatePort<Vector3<f64>>,
        process_noise_covariance: DMatrix<f64>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            slot,
            bias,
            noise_block: process_noise_covariance,
        }
    }
}

impl ProcessModelElement for BiasProcessModelElement {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_slot(&self) -> SlotHandle {
        self.slot
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

    fn process_noise_block(&self) -> &DMatrix<f64> {
        &self.noise_block
    }

    fn propagate_state(&mut self, _dt: f64) {
        // ḃ = 0: the mean does not move, only the covariance grows.
    }

    fn correct_state(&mut self, correction: DVectorView<'_, f64>) {
        let bias = self.bias.get();
        self.bias
            .set(bias + Vector3::new(correction[0], correction[1], correction[2]));
    }

    fn state_vector(&self) -> DVector<f64> {
        DVector::from_column_slice(self.bias.get().as_slice())
    }

    fn set_state_vector(&mut self, value: DVectorView<'_, f64>) {
        self.bias.set(Vector3::new(value[0], value[1], value[2]));
    }
}
