// talos_core/src/prelude.rs

// --- Core Abstractions (The main contracts of the library) ---
pub use crate::errors::{ConfigurationError, NumericalError};
pub use crate::kinematics::{RigidMountKinematics, SpatialKinematicsProvider, TwistProvider};
pub use crate::models::measurement::MeasurementModelElement;
pub use crate::models::process::{ProcessModelElement, TimeDomain};

// --- Core Data Structures (The "nouns" of the library) ---
pub use crate::ports::{InputPort, MeasurementPort, PortId, PortRegistry, StatePort};
pub use crate::slots::{SlotHandle, SlotRegistry};
pub use crate::types::{diagonal_covariance, Covariance, State};

// --- Estimation machinery ---
pub use crate::estimation::discretization::SplitUpMatrixExponentialDiscretizer;
pub use crate::estimation::filters::ekf::ComposableEkf;
pub use crate::estimation::group::ProcessModelElementGroup;
pub use crate::estimation::process_model::ProcessModel;

// --- Configuration surface ---
pub use crate::builder::{
    AngularVelocitySensorConfiguration, EstimatorBuilder, EstimatorNoiseParameters,
    LinearAccelerationSensorConfiguration, OrientationComEstimator,
    OrientationSensorConfiguration,
};
