// talos_core/src/kinematics.rs

use std::fmt::Debug;

use nalgebra::Vector3;

// Contracts for the rigid-body kinematics collaborators that live outside
// this crate. The host control process owns the kinematic chain and the
// calculators that walk it; the estimator only ever pulls two quantities from
// them, both expressed in the estimation (body) frame and already updated for
// the current tick.

/// Supplies the angular velocity of a sensor's mounting link relative to the
/// estimation link. Zero for a sensor mounted directly on the estimation
/// link.
pub trait TwistProvider: Debug + Send + Sync {
    fn relative_angular_velocity(&self) -> Vector3<f64>;
}

/// Supplies the lever arm from the center of mass to a sensor's measurement
/// point, in the estimation frame.
pub trait SpatialKinematicsProvider: Debug + Send + Sync {
    fn com_to_measurement_point(&self) -> Vector3<f64>;
}

/// Collaborator stand-in for rigidly attached sensors: no relative motion,
/// fixed lever arm.
#[derive(Debug, Clone, Default)]
pub struct RigidMountKinematics {
    pub lever_arm: Vector3<f64>,
}

impl RigidMountKinematics {
    pub fn new(lever_arm: Vector3<f64>) -> Self {
        Self { lever_arm }
    }
}

impl TwistProvider for RigidMountKinematics {
    fn relative_angular_velocity(&self) -> Vector3<f64> {
        Vector3::zeros()
    }
}

impl SpatialKinematicsProvider for RigidMountKinematics {
    fn com_to_measurement_point(&self) -> Vector3<f64> {
        self.lever_arm
    }
}
