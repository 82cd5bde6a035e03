// talos_core/src/builder.rs

use std::sync::Arc;

use log::debug;
use nalgebra::{DMatrix, DVector, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigurationError, NumericalError};
use crate::estimation::filters::ekf::ComposableEkf;
use crate::estimation::group::ProcessModelElementGroup;
use crate::estimation::process_model::ProcessModel;
use crate::kinematics::{SpatialKinematicsProvider, TwistProvider};
use crate::models::measurement::angular_velocity::AngularVelocityMeasurementModelElement;
use crate::models::measurement::linear_acceleration::{
    LinearAccelerationMeasurementModelElement, LinearAccelerationReadSlots,
};
use crate::models::measurement::orientation::OrientationMeasurementModelElement;
use crate::models::measurement::MeasurementModelElement;
use crate::models::process::angular_acceleration::AngularAccelerationProcessModelElement;
use crate::models::process::angular_velocity::AngularVelocityProcessModelElement;
use crate::models::process::bias::BiasProcessModelElement;
use crate::models::process::com_acceleration::CenterOfMassAccelerationProcessModelElement;
use crate::models::process::com_position::CenterOfMassPositionProcessModelElement;
use crate::models::process::com_velocity::CenterOfMassVelocityProcessModelElement;
use crate::models::process::orientation::OrientationProcessModelElement;
use crate::models::process::ProcessModelElement;
use crate::ports::{InputPort, MeasurementPort, PortRegistry, StatePort};
use crate::slots::SlotRegistry;
use crate::types::{diagonal_covariance, VECTOR3_SIZE};

/// Scalar noise magnitudes for a full estimator, loadable from host config
/// files. Covariances are built from these as `σ²·I`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EstimatorNoiseParameters {
    pub angular_acceleration_process_std_dev: f64,
    pub com_acceleration_process_std_dev: f64,
    pub orientation_measurement_std_dev: f64,
    pub angular_velocity_measurement_std_dev: f64,
    pub angular_velocity_bias_process_std_dev: f64,
    pub linear_acceleration_measurement_std_dev: f64,
    pub linear_acceleration_bias_process_std_dev: f64,
}

impl Default for EstimatorNoiseParameters {
    fn default() -> Self {
        Self {
            angular_acceleration_process_std_dev: 1.0,
            com_acceleration_process_std_dev: 1.0,
            orientation_measurement_std_dev: 0.1,
            angular_velocity_measurement_std_dev: 0.1,
            angular_velocity_bias_process_std_dev: 1e-3,
            linear_acceleration_measurement_std_dev: 0.3,
            linear_acceleration_bias_process_std_dev: 1e-3,
        }
    }
}

// --- Sensor configuration records ---
//
// One record per physical sensor, carrying its mount frame, noise, and the
// measurement port the host dataflow feeds. Configuration is immutable once
// the builder consumes it.

#[derive(Debug, Clone)]
pub struct OrientationSensorConfiguration {
    pub name: String,
    /// Fixed mount rotation from the estimation (body) frame to the sensor's
    /// measurement frame.
    pub estimation_to_measurement: UnitQuaternion<f64>,
    pub noise_covariance: DMatrix<f64>,
    pub port: MeasurementPort<UnitQuaternion<f64>>,
}

#[derive(Debug, Clone)]
pub struct AngularVelocitySensorConfiguration {
    pub name: String,
    pub estimation_to_measurement: UnitQuaternion<f64>,
    pub noise_covariance: DMatrix<f64>,
    /// Random-walk intensity of the gyro bias estimated alongside.
    pub bias_process_noise_covariance: DMatrix<f64>,
    /// Kinematics collaborator for the link the sensor is mounted on.
    pub twist_provider: Arc<dyn TwistProvider>,
    pub port: MeasurementPort<Vector3<f64>>,
}

#[derive(Debug, Clone)]
pub struct LinearAccelerationSensorConfiguration {
    pub name: String,
    pub estimation_to_measurement: UnitQuaternion<f64>,
    /// Magnitude of gravity along world −z, non-negative.
    pub gravity_z: f64,
    pub noise_covariance: DMatrix<f64>,
    pub bias_process_noise_covariance: DMatrix<f64>,
    pub kinematics: Arc<dyn SpatialKinematicsProvider>,
    pub port: MeasurementPort<Vector3<f64>>,
}

/// Configuration-time factory for the composed estimator.
///
/// Accumulates sensor configurations and feed-forward port wiring, then is
/// consumed exactly once by [`EstimatorBuilder::build`]: it registers one
/// state slot per physical quantity and one per sensor bias, constructs the
/// matching process and measurement model elements, and assembles group →
/// model → filter. All topology errors surface here, before an estimator
/// exists.
#[derive(Debug)]
pub struct EstimatorBuilder {
    control_dt: f64,
    initial_covariance: f64,
    angular_acceleration_noise_covariance: DMatrix<f64>,
    /// CoM-chain process noise; `Some` enables CoM estimation.
    com_acceleration_noise_covariance: Option<DMatrix<f64>>,
    orientation_sensors: Vec<OrientationSensorConfiguration>,
    angular_velocity_sensors: Vec<AngularVelocitySensorConfiguration>,
    linear_acceleration_sensors: Vec<LinearAccelerationSensorConfiguration>,
    desired_angular_acceleration: Option<InputPort<Vector3<f64>>>,
    desired_com_acceleration: Option<InputPort<Vector3<f64>>>,
}

impl EstimatorBuilder {
    pub fn new(control_dt: f64, angular_acceleration_noise_covariance: DMatrix<f64>) -> Self {
        Self {
            control_dt,
            initial_covariance: 1.0,
            angular_acceleration_noise_covariance,
            com_acceleration_noise_covariance: None,
            orientation_sensors: Vec::new(),
            angular_velocity_sensors: Vec::new(),
            linear_acceleration_sensors: Vec::new(),
            desired_angular_acceleration: None,
            desired_com_acceleration: None,
        }
    }

    /// Adds the center-of-mass chain (position, velocity, acceleration
    /// slots) to the filter. Requires the desired-CoM-acceleration and
    /// desired-angular-acceleration ports to be wired.
    pub fn with_com_estimation(mut self, com_acceleration_noise_covariance: DMatrix<f64>) -> Self {
        self.com_acceleration_noise_covariance = Some(com_acceleration_noise_covariance);
        self
    }

    /// Scales the initial covariance `P₀ = value·I`.
    pub fn with_initial_covariance(mut self, value: f64) -> Self {
        self.initial_covariance = value;
        self
    }

    pub fn with_desired_angular_acceleration(mut self, port: InputPort<Vector3<f64>>) -> Self {
        self.desired_angular_acceleration = Some(port);
        self
    }

    pub fn with_desired_com_acceleration(mut self, port: InputPort<Vector3<f64>>) -> Self {
        self.desired_com_acceleration = Some(port);
        self
    }

    pub fn add_orientation_sensor(mut self, configuration: OrientationSensorConfiguration) -> Self {
        self.orientation_sensors.push(configuration);
        self
    }

    pub fn add_angular_velocity_sensor(
        mut self,
        configuration: AngularVelocitySensorConfiguration,
    ) -> Self {
        self.angular_velocity_sensors.push(configuration);
        self
    }

    pub fn add_linear_acceleration_sensor(
        mut self,
        configuration: LinearAccelerationSensorConfiguration,
    ) -> Self {
        self.linear_acceleration_sensors.push(configuration);
        self
    }

    pub fn build(self) -> Result<OrientationComEstimator, ConfigurationError> {
        self.validate_covariances()?;

        let estimate_com = self.com_acceleration_noise_covariance.is_some();
        if !estimate_com {
            if let Some(sensor) = self.linear_acceleration_sensors.first() {
                return Err(ConfigurationError::SensorRequiresComEstimation {
                    sensor: sensor.name.clone(),
                });
            }
        }
        if estimate_com && self.desired_com_acceleration.is_none() {
            return Err(ConfigurationError::MissingPort {
                sensor: "CoMVelocity".to_owned(),
                port: "desiredCenterOfMassAcceleration".to_owned(),
            });
        }
        if estimate_com && self.desired_angular_acceleration.is_none() {
            return Err(ConfigurationError::MissingPort {
                sensor: "angularAcceleration".to_owned(),
                port: "desiredAngularAcceleration".to_owned(),
            });
        }

        // Slot layout: continuous quantities first, discrete last, so the
        // registry's registration order matches the group's matrix order.
        let mut slots = SlotRegistry::new();
        let orientation_slot = slots.register("orientation", VECTOR3_SIZE)?;
        let angular_velocity_slot = slots.register("angularVelocity", VECTOR3_SIZE)?;
        let com_slots = if estimate_com {
            Some((
                slots.register("comPosition", VECTOR3_SIZE)?,
                slots.register("comVelocity", VECTOR3_SIZE)?,
            ))
        } else {
            None
        };

        let mut ports = PortRegistry::new();
        let angular_acceleration_port_id = self
            .desired_angular_acceleration
            .as_ref()
            .map(|_| ports.register("desiredAngularAcceleration", VECTOR3_SIZE))
            .transpose()?;
        let com_acceleration_port_id = estimate_com
            .then(|| ports.register("desiredCenterOfMassAcceleration", VECTOR3_SIZE))
            .transpose()?;

        // State ports, shared between elements and the facade.
        let orientation_port = StatePort::new(UnitQuaternion::identity());
        let angular_velocity_port = StatePort::new(Vector3::zeros());
        let angular_acceleration_port = StatePort::new(Vector3::zeros());
        let com_position_port = StatePort::new(Vector3::zeros());
        let com_velocity_port = StatePort::new(Vector3::zeros());
        let com_acceleration_port = StatePort::new(Vector3::zeros());

        let mut elements: Vec<Box<dyn ProcessModelElement>> = Vec::new();
        elements.push(Box::new(OrientationProcessModelElement::new(
            "orientation",
            orientation_slot,
            orientation_port.clone(),
            Some((angular_velocity_slot, angular_velocity_port.clone())),
        )));
        elements.push(Box::new(AngularVelocityProcessModelElement::new(
            "angularVelocity",
            angular_velocity_slot,
            angular_velocity_port.clone(),
            angular_acceleration_port_id
                .zip(self.desired_angular_acceleration.clone()),
            self.angular_acceleration_noise_covariance.clone(),
        )));

        if let (Some((position_slot, velocity_slot)), Some(port_id), Some(com_noise)) = (
            com_slots,
            com_acceleration_port_id,
            self.com_acceleration_noise_covariance.clone(),
        ) {
            let feed_forward = self
                .desired_com_acceleration
                .clone()
                .ok_or(ConfigurationError::MissingPort {
                    sensor: "CoMVelocity".to_owned(),
                    port: "desiredCenterOfMassAcceleration".to_owned(),
                })?;
            elements.push(Box::new(CenterOfMassPositionProcessModelElement::new(
                "comPosition",
                position_slot,
                velocity_slot,
                com_position_port.clone(),
                com_velocity_port.clone(),
            )));
            elements.push(Box::new(CenterOfMassVelocityProcessModelElement::new(
                "comVelocity",
                velocity_slot,
                com_velocity_port.clone(),
                port_id,
                feed_forward,
                com_noise,
            )));
        }

        // Measurement models, plus one bias slot/element per biased sensor.
        let mut measurements: Vec<Box<dyn MeasurementModelElement>> = Vec::new();
        for sensor in &self.orientation_sensors {
            measurements.push(Box::new(OrientationMeasurementModelElement::new(
                &sensor.name,
                orientation_slot,
                orientation_port.clone(),
                sensor.port.clone(),
                sensor.estimation_to_measurement,
                sensor.noise_covariance.clone(),
            )));
        }
        for sensor in &self.angular_velocity_sensors {
            let bias_name = format!("{}BiasEstimate", sensor.name);
            let bias_slot = slots.register(&bias_name, VECTOR3_SIZE)?;
            let bias_port = StatePort::new(Vector3::zeros());
            elements.push(Box::new(BiasProcessModelElement::new(
                &bias_name,
                bias_slot,
                bias_port.clone(),
                sensor.bias_process_noise_covariance.clone(),
            )));
            measurements.push(Box::new(AngularVelocityMeasurementModelElement::new(
                &sensor.name,
                angular_velocity_slot,
                bias_slot,
                angular_velocity_port.clone(),
                bias_port,
                sensor.port.clone(),
                sensor.estimation_to_measurement,
                Arc::clone(&sensor.twist_provider),
                sensor.noise_covariance.clone(),
            )));
        }

        let mut linear_acceleration_wiring = Vec::new();
        for sensor in &self.linear_acceleration_sensors {
            let bias_name = format!("{}BiasEstimate", sensor.name);
            let bias_slot = slots.register(&bias_name, VECTOR3_SIZE)?;
            let bias_port = StatePort::new(Vector3::zeros());
            elements.push(Box::new(BiasProcessModelElement::new(
                &bias_name,
                bias_slot,
                bias_port.clone(),
                sensor.bias_process_noise_covariance.clone(),
            )));
            linear_acceleration_wiring.push((sensor, bias_slot, bias_port));
        }

        // Discrete-time tail of the slot layout.
        if let Some((com_position_slot, com_velocity_slot)) = com_slots {
            let angular_acceleration_slot = slots.register("angularAcceleration", VECTOR3_SIZE)?;
            let com_acceleration_slot = slots.register("comAcceleration", VECTOR3_SIZE)?;
            let alpha_port_id = angular_acceleration_port_id.ok_or(
                ConfigurationError::MissingPort {
                    sensor: "angularAcceleration".to_owned(),
                    port: "desiredAngularAcceleration".to_owned(),
                },
            )?;
            let alpha_feed_forward = self
                .desired_angular_acceleration
                .clone()
                .ok_or(ConfigurationError::MissingPort {
                    sensor: "angularAcceleration".to_owned(),
                    port: "desiredAngularAcceleration".to_owned(),
                })?;
            let com_port_id = com_acceleration_port_id.ok_or(ConfigurationError::MissingPort {
                sensor: "comAcceleration".to_owned(),
                port: "desiredCenterOfMassAcceleration".to_owned(),
            })?;
            let com_feed_forward = self
                .desired_com_acceleration
                .clone()
                .ok_or(ConfigurationError::MissingPort {
                    sensor: "comAcceleration".to_owned(),
                    port: "desiredCenterOfMassAcceleration".to_owned(),
                })?;
            elements.push(Box::new(AngularAccelerationProcessModelElement::new(
                "angularAcceleration",
                angular_acceleration_slot,
                angular_acceleration_port.clone(),
                alpha_port_id,
                alpha_feed_forward,
                self.angular_acceleration_noise_covariance.clone(),
            )));
            elements.push(Box::new(CenterOfMassAccelerationProcessModelElement::new(
                "comAcceleration",
                com_acceleration_slot,
                com_acceleration_port.clone(),
                com_port_id,
                com_feed_forward,
                self.com_acceleration_noise_covariance.clone().ok_or(
                    ConfigurationError::MissingPort {
                        sensor: "comAcceleration".to_owned(),
                        port: "desiredCenterOfMassAcceleration".to_owned(),
                    },
                )?,
            )));

            for (sensor, bias_slot, bias_port) in linear_acceleration_wiring {
                let read_slots = LinearAccelerationReadSlots {
                    com_position: com_position_slot,
                    com_velocity: com_velocity_slot,
                    com_acceleration: com_acceleration_slot,
                    orientation: orientation_slot,
                    angular_velocity: angular_velocity_slot,
                    angular_acceleration: angular_acceleration_slot,
                    bias: bias_slot,
                };
                measurements.push(Box::new(LinearAccelerationMeasurementModelElement::new(
                    &sensor.name,
                    read_slots,
                    orientation_port.clone(),
                    angular_velocity_port.clone(),
                    angular_acceleration_port.clone(),
                    com_acceleration_port.clone(),
                    bias_port,
                    sensor.port.clone(),
                    sensor.estimation_to_measurement,
                    Arc::clone(&sensor.kinematics),
                    sensor.gravity_z,
                    sensor.noise_covariance.clone(),
                )));
            }
        }

        debug!(
            "building estimator: {} slots, {} process elements, {} sensors",
            slots.len(),
            elements.len(),
            measurements.len()
        );

        let group = ProcessModelElementGroup::new(elements, &slots, &ports, self.control_dt)?;
        let model = ProcessModel::new(vec![group], &mut slots)?;
        let state_size = model.state_size();
        let mut ekf = ComposableEkf::new(slots, model, measurements)?;
        ekf.initialize(Some(
            DMatrix::identity(state_size, state_size) * self.initial_covariance,
        ))?;

        Ok(OrientationComEstimator {
            ekf,
            control_dt: self.control_dt,
            orientation: orientation_port,
            angular_velocity: angular_velocity_port,
            com_position: estimate_com.then_some(com_position_port),
            com_velocity: estimate_com.then_some(com_velocity_port),
        })
    }

    fn validate_covariances(&self) -> Result<(), ConfigurationError> {
        let check = |name: &str, covariance: &DMatrix<f64>| {
            if covariance.nrows() != VECTOR3_SIZE || covariance.ncols() != VECTOR3_SIZE {
                Err(ConfigurationError::CovarianceDimensionMismatch {
                    name: name.to_owned(),
                    rows: covariance.nrows(),
                    cols: covariance.ncols(),
                    expected: VECTOR3_SIZE,
                })
            } else {
                Ok(())
            }
        };

        check(
            "angularAccelerationProcessNoise",
            &self.angular_acceleration_noise_covariance,
        )?;
        if let Some(com_noise) = &self.com_acceleration_noise_covariance {
            check("comAccelerationProcessNoise", com_noise)?;
        }
        for sensor in &self.orientation_sensors {
            check(&sensor.name, &sensor.noise_covariance)?;
        }
        for sensor in &self.angular_velocity_sensors {
            check(&sensor.name, &sensor.noise_covariance)?;
            check(
                &format!("{}BiasProcessNoise", sensor.name),
                &sensor.bias_process_noise_covariance,
            )?;
        }
        for sensor in &self.linear_acceleration_sensors {
            check(&sensor.name, &sensor.noise_covariance)?;
            check(
                &format!("{}BiasProcessNoise", sensor.name),
                &sensor.bias_process_noise_covariance,
            )?;
        }
        Ok(())
    }
}

/// The wired, running estimator: the composed EKF plus typed access to the
/// physical quantities it tracks.
#[derive(Debug)]
pub struct OrientationComEstimator {
    ekf: ComposableEkf,
    control_dt: f64,
    orientation: StatePort<UnitQuaternion<f64>>,
    angular_velocity: StatePort<Vector3<f64>>,
    com_position: Option<StatePort<Vector3<f64>>>,
    com_velocity: Option<StatePort<Vector3<f64>>>,
}

impl OrientationComEstimator {
    /// Time-update over the configured control period. Must run before
    /// `correct` within a tick.
    pub fn predict(&mut self) {
        self.ekf.predict(self.control_dt);
    }

    /// Stacked measurement-update over every sensor holding fresh data.
    pub fn correct(&mut self) -> Result<(), NumericalError> {
        self.ekf.correct()
    }

    pub fn control_dt(&self) -> f64 {
        self.control_dt
    }

    pub fn estimated_orientation(&self) -> UnitQuaternion<f64> {
        self.orientation.get()
    }

    pub fn estimated_angular_velocity(&self) -> Vector3<f64> {
        self.angular_velocity.get()
    }

    pub fn estimated_com_position(&self) -> Option<Vector3<f64>> {
        self.com_position.as_ref().map(|port| port.get())
    }

    pub fn estimated_com_velocity(&self) -> Option<Vector3<f64>> {
        self.com_velocity.as_ref().map(|port| port.get())
    }

    /// Snaps the orientation estimate, e.g. to ground truth at startup.
    pub fn set_estimated_orientation(&mut self, orientation: UnitQuaternion<f64>) {
        self.orientation.set(orientation);
        self.ekf.refresh_state_from_model();
    }

    pub fn set_estimated_angular_velocity(&mut self, angular_velocity: Vector3<f64>) {
        self.angular_velocity.set(angular_velocity);
        self.ekf.refresh_state_from_model();
    }

    pub fn set_estimated_com_position(&mut self, position: Vector3<f64>) {
        if let Some(port) = &self.com_position {
            port.set(position);
            self.ekf.refresh_state_from_model();
        }
    }

    pub fn set_estimated_com_velocity(&mut self, velocity: Vector3<f64>) {
        if let Some(port) = &self.com_velocity {
            port.set(velocity);
            self.ekf.refresh_state_from_model();
        }
    }

    pub fn state(&self) -> &DVector<f64> {
        self.ekf.state()
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        self.ekf.covariance()
    }

    pub fn set_state(
        &mut self,
        x: DVector<f64>,
        covariance: DMatrix<f64>,
    ) -> Result<(), ConfigurationError> {
        self.ekf.set_state(x, covariance)
    }

    /// The underlying filter, for slot-level reads and checkpointing.
    pub fn filter(&self) -> &ComposableEkf {
        &self.ekf
    }

    pub fn filter_mut(&mut self) -> &mut ComposableEkf {
        &mut self.ekf
    }
}

/// Shorthand for sensor configurations built from
/// [`EstimatorNoiseParameters`].
pub fn noise_covariance_from_std_dev(std_dev: f64) -> DMatrix<f64> {
    diagonal_covariance(std_dev, VECTOR3_SIZE)
}
