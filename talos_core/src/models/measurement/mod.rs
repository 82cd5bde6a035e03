// talos_core/src/models/measurement/mod.rs

use std::fmt::Debug;

use dyn_clone::DynClone;
use nalgebra::{DMatrix, DVector};

use crate::slots::SlotHandle;

// --- MEASUREMENT MODEL ELEMENT TRAIT ---
// Represents the mathematical model of one sensor: `z = h(x) + v`.
//
// An element reads some set of state slots, pulls its sensor reading from a
// measurement port, and supplies per-slot Jacobian blocks plus the innovation
// on the measurement's own manifold. A slot outside the read set always maps
// to the zero block.
pub trait MeasurementModelElement: DynClone + Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Number of rows this sensor contributes to a stacked update.
    fn measurement_size(&self) -> usize;

    /// The state slots this sensor observes.
    fn read_slots(&self) -> &[SlotHandle];

    /// True if the sensor's port holds a reading that has not been consumed
    /// by a stacked update yet. False drops this sensor from the current
    /// tick's update; it is never an error.
    fn has_new_measurement(&self) -> bool;

    /// (Re)computes the Jacobian blocks at the current state. Called once per
    /// tick for every element entering the stacked update.
    fn compute_matrix_blocks(&mut self);

    /// Jacobian block `∂h/∂slot`. `None` for any slot outside the read set
    /// (the zero block of the right shape, by contract).
    fn observation_block(&self, slot: SlotHandle) -> Option<&DMatrix<f64>>;

    /// The sensor's measurement noise covariance `R`.
    fn noise_covariance(&self) -> &DMatrix<f64>;

    /// Innovation `ν = z ⊖ h(x)` on the measurement manifold (plain
    /// difference for vector sensors, rotation-vector error for orientation).
    fn compute_residual(&self) -> DVector<f64>;

    /// Marks the port value consumed once the stacked update has used it.
    fn mark_measurement_consumed(&self);
}

// Generates `Clone` for `Box<dyn MeasurementModelElement>`, so a wired sensor
// stack can be duplicated for evaluation harnesses.
dyn_clone::clone_trait_object!(MeasurementModelElement);

pub mod angular_velocity;
pub mod linear_acceleration;
pub mod orientation;
