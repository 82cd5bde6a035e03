// talos_core/src/estimation/process_model.rs

use nalgebra::{DMatrix, DVector};

use crate::errors::ConfigurationError;
use crate::estimation::group::ProcessModelElementGroup;
use crate::slots::SlotRegistry;

/// Thin aggregator over one or more element groups.
///
/// Composes the groups' `(F, G, Q)` block-diagonally and finalizes the global
/// slot-offset layout in the registry (groups in order, each group's
/// continuous slots before its discrete ones). Estimators typically use a
/// single group; multiple groups are supported for composing independently
/// assembled models.
#[derive(Debug)]
pub struct ProcessModel {
    groups: Vec<ProcessModelElementGroup>,
    group_state_offsets: Vec<usize>,
    state_size: usize,
    input_size: usize,
    f: DMatrix<f64>,
    g: DMatrix<f64>,
    q: DMatrix<f64>,
}

impl ProcessModel {
    pub fn new(
        groups: Vec<ProcessModelElementGroup>,
        registry: &mut SlotRegistry,
    ) -> Result<Self, ConfigurationError> {
        let state_size: usize = groups.iter().map(|g| g.state_size()).sum();
        if state_size == 0 {
            return Err(ConfigurationError::EmptyStateVector);
        }
        let input_size: usize = groups.iter().map(|g| g.input_size()).sum();

        let mut group_state_offsets = Vec::with_capacity(groups.len());
        let mut offset = 0;
        for group in &groups {
            group_state_offsets.push(offset);
            for slot in group.slot_order() {
                let local = group
                    .local_offset_of(*slot)
                    .ok_or(ConfigurationError::OffsetsNotAssigned)?;
                registry.assign_offset(*slot, offset + local);
            }
            offset += group.state_size();
        }

        let mut model = Self {
            groups,
            group_state_offsets,
            state_size,
            input_size,
            f: DMatrix::zeros(state_size, state_size),
            g: DMatrix::zeros(state_size, input_size),
            q: DMatrix::zeros(state_size, state_size),
        };
        model.compose();
        Ok(model)
    }

    /// Forces a full block recomputation in every group.
    pub fn reinitialize(&mut self) {
        for group in &mut self.groups {
            group.reinitialize();
        }
        self.compose();
    }

    /// Per-tick refresh. A `dt` differing from the configured control period
    /// forces the affected groups to rediscretize.
    pub fn update(&mut self, dt: f64) {
        let mut changed = false;
        for group in &mut self.groups {
            if group.control_dt() != dt {
                group.set_control_dt(dt);
                changed = true;
            } else if group.is_time_variant() {
                group.update();
                changed = true;
            }
        }
        if changed {
            self.compose();
        }
    }

    fn compose(&mut self) {
        self.f.fill(0.0);
        self.g.fill(0.0);
        self.q.fill(0.0);

        let mut input_offset = 0;
        for (group, &state_offset) in self.groups.iter().zip(&self.group_state_offsets) {
            let n = group.state_size();
            let m = group.input_size();
            self.f
                .view_mut((state_offset, state_offset), (n, n))
                .copy_from(group.state_matrix());
            self.g
                .view_mut((state_offset, input_offset), (n, m))
                .copy_from(group.input_matrix());
            self.q
                .view_mut((state_offset, state_offset), (n, n))
                .copy_from(group.process_noise_matrix());
            input_offset += m;
        }
    }

    pub fn state_matrix(&self) -> &DMatrix<f64> {
        &self.f
    }

    pub fn input_matrix(&self) -> &DMatrix<f64> {
        &self.g
    }

    pub fn process_noise_matrix(&self) -> &DMatrix<f64> {
        &self.q
    }

    pub fn state_size(&self) -> usize {
        self.state_size
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn propagate_state(&mut self, dt: f64) {
        for group in &mut self.groups {
            group.propagate_state(dt);
        }
    }

    /// Slices a global correction vector per group and delegates.
    pub fn correct_state(&mut self, correction: &DVector<f64>) {
        for (group, &offset) in self.groups.iter_mut().zip(&self.group_state_offsets) {
            group.correct_state(correction.rows(offset, group.state_size()));
        }
    }

    pub fn fill_state_vector(&self, out: &mut DVector<f64>) {
        for (group, &offset) in self.groups.iter().zip(&self.group_state_offsets) {
            group.fill_state_vector(out, offset);
        }
    }

    pub fn set_state_from_vector(&mut self, x: &DVector<f64>) {
        for (group, &offset) in self.groups.iter_mut().zip(&self.group_state_offsets) {
            group.set_state_from_vector(x, offset);
        }
    }
}
