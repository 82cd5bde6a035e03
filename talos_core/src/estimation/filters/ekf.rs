// talos_core/src/estimation/filters/ekf.rs

use std::collections::HashMap;

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

use crate::errors::{ConfigurationError, NumericalError};
use crate::estimation::process_model::ProcessModel;
use crate::models::measurement::MeasurementModelElement;
use crate::slots::{SlotHandle, SlotRegistry};

/// The composed Extended Kalman Filter.
///
/// Owns the global mean state `x` and covariance `P`, the process model that
/// supplies the discrete-time `(F, G, Q)`, and the measurement model
/// elements. The slot set — and with it the size of `x` and `P` — is
/// immutable after construction.
///
/// `x` mirrors the element-owned slot values in their vector
/// parameterizations; it is refreshed after every propagation and correction,
/// so manifold slots (orientation) never accumulate parameterization error in
/// the filter itself.
#[derive(Debug)]
pub struct ComposableEkf {
    registry: SlotRegistry,
    model: ProcessModel,
    measurement_elements: Vec<Box<dyn MeasurementModelElement>>,
    /// Global (offset, dimension) per slot, fixed at construction.
    slot_layout: HashMap<SlotHandle, (usize, usize)>,
    x: DVector<f64>,
    p: DMatrix<f64>,
    /// Optional covariance of the process input ports, applied as
    /// `G·Qᵤ·Gᵀ` during covariance propagation.
    input_noise: Option<DMatrix<f64>>,
    initialized: bool,
}

impl ComposableEkf {
    pub fn new(
        registry: SlotRegistry,
        model: ProcessModel,
        mut measurement_elements: Vec<Box<dyn MeasurementModelElement>>,
    ) -> Result<Self, ConfigurationError> {
        if registry.is_empty() {
            return Err(ConfigurationError::EmptyStateVector);
        }

        let mut slot_layout = HashMap::new();
        for slot in registry.handles() {
            let offset = registry
                .offset_of(slot)
                .ok_or(ConfigurationError::OffsetsNotAssigned)?;
            slot_layout.insert(slot, (offset, registry.dimension(slot)));
        }

        // Fail fast on malformed sensors: noise must match the measurement
        // size, and every block must match (measurement size × slot size).
        for element in &mut measurement_elements {
            let size = element.measurement_size();
            let noise = element.noise_covariance();
            if noise.nrows() != size || noise.ncols() != size {
                return Err(ConfigurationError::CovarianceDimensionMismatch {
                    name: element.name().to_owned(),
                    rows: noise.nrows(),
                    cols: noise.ncols(),
                    expected: size,
                });
            }
            element.compute_matrix_blocks();
            for slot in element.read_slots() {
                let (_, dim) = *slot_layout
                    .get(slot)
                    .ok_or(ConfigurationError::OffsetsNotAssigned)?;
                if let Some(block) = element.observation_block(*slot) {
                    if block.nrows() != size || block.ncols() != dim {
                        return Err(ConfigurationError::BlockDimensionMismatch {
                            element: element.name().to_owned(),
                            target: registry.name(*slot).to_owned(),
                            rows: block.nrows(),
                            cols: block.ncols(),
                            expected_rows: size,
                            expected_cols: dim,
                        });
                    }
                }
            }
        }

        let n = model.state_size();
        let mut x = DVector::zeros(n);
        model.fill_state_vector(&mut x);

        Ok(Self {
            registry,
            model,
            measurement_elements,
            slot_layout,
            x,
            p: DMatrix::identity(n, n),
            input_noise: None,
            initialized: false,
        })
    }

    /// Seeds `P` (identity if `None`), forces a fresh computation of all
    /// matrix blocks, and transitions the filter to its ready state.
    pub fn initialize(
        &mut self,
        initial_covariance: Option<DMatrix<f64>>,
    ) -> Result<(), ConfigurationError> {
        let n = self.model.state_size();
        self.p = match initial_covariance {
            Some(p0) => {
                if p0.nrows() != n || p0.ncols() != n {
                    return Err(ConfigurationError::CovarianceDimensionMismatch {
                        name: "initial covariance".to_owned(),
                        rows: p0.nrows(),
                        cols: p0.ncols(),
                        expected: n,
                    });
                }
                p0
            }
            None => DMatrix::identity(n, n),
        };
        self.model.reinitialize();
        self.model.fill_state_vector(&mut self.x);
        self.initialized = true;
        debug!("filter initialized with {n} states");
        Ok(())
    }

    /// Covariance to apply to the process input ports during prediction.
    /// Must be square of the model's total input size.
    pub fn set_input_noise_covariance(
        &mut self,
        covariance: DMatrix<f64>,
    ) -> Result<(), ConfigurationError> {
        let m = self.model.input_size();
        if covariance.nrows() != m || covariance.ncols() != m {
            return Err(ConfigurationError::CovarianceDimensionMismatch {
                name: "input noise".to_owned(),
                rows: covariance.nrows(),
                cols: covariance.ncols(),
                expected: m,
            });
        }
        self.input_noise = Some(covariance);
        Ok(())
    }

    /// Time-update: refreshes time-varying blocks, propagates the nonlinear
    /// mean through the elements, then the covariance through the linearized
    /// model: `P ← F·P·Fᵀ + G·Qᵤ·Gᵀ + Q`.
    pub fn predict(&mut self, dt: f64) {
        if !self.initialized {
            warn!("predict called before initialize; ignoring");
            return;
        }
        if dt <= 0.0 {
            return;
        }

        // Linearize at the pre-update state, then move the mean.
        self.model.update(dt);
        self.model.propagate_state(dt);
        self.model.fill_state_vector(&mut self.x);

        let f = self.model.state_matrix();
        let mut p_next = f * &self.p * f.transpose() + self.model.process_noise_matrix();
        if let Some(qu) = &self.input_noise {
            let g = self.model.input_matrix();
            p_next += g * qu * g.transpose();
        }
        // F·P·Fᵀ drifts off symmetric through rounding; pin it back.
        self.p = (&p_next + p_next.transpose()) * 0.5;
    }

    /// Measurement-update: one stacked update over every element holding a
    /// fresh measurement, so cross-sensor correlations are handled in a
    /// single gain computation.
    ///
    /// An indefinite innovation covariance skips the whole update and leaves
    /// `(x, P)` untouched; estimation continuity wins over per-tick
    /// correctness.
    pub fn correct(&mut self) -> Result<(), NumericalError> {
        if !self.initialized {
            warn!("correct called before initialize; ignoring");
            return Ok(());
        }

        let active: Vec<usize> = (0..self.measurement_elements.len())
            .filter(|&i| self.measurement_elements[i].has_new_measurement())
            .collect();
        if active.is_empty() {
            return Ok(());
        }

        for &index in &active {
            self.measurement_elements[index].compute_matrix_blocks();
        }

        let n = self.model.state_size();
        let total: usize = active
            .iter()
            .map(|&i| self.measurement_elements[i].measurement_size())
            .sum();
        let mut h = DMatrix::zeros(total, n);
        let mut r = DMatrix::zeros(total, total);
        let mut innovation = DVector::zeros(total);

        let mut row = 0;
        for &index in &active {
            let element = &self.measurement_elements[index];
            let size = element.measurement_size();
            for slot in element.read_slots() {
                if let Some(block) = element.observation_block(*slot) {
                    let (offset, dim) = self.slot_layout[slot];
                    h.view_mut((row, offset), (size, dim)).copy_from(block);
                }
            }
            r.view_mut((row, row), (size, size))
                .copy_from(element.noise_covariance());
            innovation
                .rows_mut(row, size)
                .copy_from(&element.compute_residual());
            row += size;
        }

        let s = &h * &self.p * h.transpose() + r;
        let Some(cholesky) = s.cholesky() else {
            warn!("indefinite innovation covariance; skipping measurement update");
            return Err(NumericalError::IndefiniteInnovation);
        };
        // K = P·Hᵀ·S⁻¹, via the Cholesky solve of S·X = H·P.
        let gain = cholesky.solve(&(&h * &self.p)).transpose();

        let correction = &gain * &innovation;
        self.model.correct_state(&correction);
        self.model.fill_state_vector(&mut self.x);

        let identity = DMatrix::identity(n, n);
        let p_next = (identity - &gain * &h) * &self.p;
        self.p = (&p_next + p_next.transpose()) * 0.5;

        for &index in &active {
            self.measurement_elements[index].mark_measurement_consumed();
        }
        Ok(())
    }

    pub fn state(&self) -> &DVector<f64> {
        &self.x
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.p
    }

    /// Overwrites `(x, P)`, pushing the state slices back into the owning
    /// elements. For checkpoint restore and external re-initialization.
    pub fn set_state(
        &mut self,
        x: DVector<f64>,
        covariance: DMatrix<f64>,
    ) -> Result<(), ConfigurationError> {
        let n = self.model.state_size();
        if x.nrows() != n {
            return Err(ConfigurationError::CovarianceDimensionMismatch {
                name: "state".to_owned(),
                rows: x.nrows(),
                cols: 1,
                expected: n,
            });
        }
        if covariance.nrows() != n || covariance.ncols() != n {
            return Err(ConfigurationError::CovarianceDimensionMismatch {
                name: "covariance".to_owned(),
                rows: covariance.nrows(),
                cols: covariance.ncols(),
                expected: n,
            });
        }
        self.model.set_state_from_vector(&x);
        // Mirror back out of the elements so manifold slots stay normalized.
        self.model.fill_state_vector(&mut self.x);
        self.p = covariance;
        Ok(())
    }

    /// Current value of one slot's slice of `x`, for downstream consumers
    /// reading through slot handles.
    pub fn slot_state(&self, slot: SlotHandle) -> Option<DVector<f64>> {
        let (offset, dim) = *self.slot_layout.get(&slot)?;
        Some(self.x.rows(offset, dim).into_owned())
    }

    /// Re-mirrors `x` from the element-owned values, after external writes
    /// through state ports.
    pub fn refresh_state_from_model(&mut self) {
        self.model.fill_state_vector(&mut self.x);
    }

    pub fn slot_registry(&self) -> &SlotRegistry {
        &self.registry
    }

    pub fn state_size(&self) -> usize {
        self.model.state_size()
    }
}
