// talos_core/src/models/process/mod.rs

use std::fmt::Debug;

use nalgebra::{DMatrix, DVector, DVectorView};

use crate::ports::PortId;
use crate::slots::SlotHandle;

/// Whether an element's dynamics are expressed in continuous time (`ẋ = A x
/// + G u`, requires discretization) or directly as a discrete-time transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeDomain {
    Continuous,
    Discrete,
}

/// One slot's contribution to the process model.
///
/// An element owns exactly one state slot: it advances the slot's value
/// through its own (possibly nonlinear) dynamics, and supplies the linearized
/// matrix blocks the group assembles into the global `(F, G, Q)`. It may read
/// other slots for coupling terms and input ports for feed-forward signals.
///
/// For fixed elements all blocks are computed once at initialization; for
/// time-varying elements `compute_matrix_blocks` runs every tick.
pub trait ProcessModelElement: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// The slot this element advances.
    fn output_slot(&self) -> SlotHandle;

    /// Slots this element reads for coupling terms, not including its own.
    fn coupled_slots(&self) -> &[SlotHandle] {
        &[]
    }

    /// Input ports this element is driven by.
    fn input_ports(&self) -> &[PortId] {
        &[]
    }

    fn time_domain(&self) -> TimeDomain;

    /// True if the matrix blocks depend on the current state and must be
    /// recomputed every tick.
    fn is_time_variant(&self) -> bool;

    /// (Re)computes all matrix blocks at the current state.
    fn compute_matrix_blocks(&mut self);

    /// Partial derivative of this slot's dynamics with respect to `slot`
    /// (its own slot or a coupled one). `None` means the zero block.
    fn state_transition_block(&self, slot: SlotHandle) -> Option<&DMatrix<f64>>;

    /// Partial derivative with respect to an input port. `None` means the
    /// zero block.
    fn input_block(&self, _port: PortId) -> Option<&DMatrix<f64>> {
        None
    }

    /// Symmetric positive-semidefinite process noise for this slot alone.
    fn process_noise_block(&self) -> &DMatrix<f64>;

    /// Advances the slot's value in place over `dt` using the element's own
    /// dynamics. Independent of the linearized blocks used for covariance
    /// propagation.
    fn propagate_state(&mut self, dt: f64);

    /// Applies this slot's slice of a global EKF correction, using the
    /// composition rule of the slot's manifold (additive for Euclidean slots,
    /// multiplicative for orientation).
    fn correct_state(&mut self, correction: DVectorView<'_, f64>);

    /// The slot's current value in its vector parameterization (rotation
    /// vector for orientation slots), used to mirror element state into the
    /// global state vector.
    fn state_vector(&self) -> DVector<f64>;

    /// Overwrites the slot's value from its vector parameterization.
    fn set_state_vector(&mut self, value: DVectorView<'_, f64>);
}

pub mod angular_acceleration;
pub mod angular_velocity;
pub mod bias;
pub mod com_acceleration;
pub mod com_position;
pub mod com_velocity;
pub mod orientation;
