// talos_core/src/estimation/group.rs

use std::collections::{HashMap, HashSet};

use nalgebra::{DMatrix, DVector, DVectorView};

use crate::errors::ConfigurationError;
use crate::estimation::discretization::SplitUpMatrixExponentialDiscretizer;
use crate::models::process::{ProcessModelElement, TimeDomain};
use crate::ports::{PortId, PortRegistry};
use crate::slots::{SlotHandle, SlotRegistry};

/// Owns a set of process model elements and assembles their per-slot blocks
/// into one hybrid discrete-time model `(F, G, Q)`.
///
/// Elements are partitioned by time domain. The continuous partition is
/// assembled in `ẋ = A·x + G·u` form and discretized jointly over the control
/// period; the discrete partition is used as-is. The two are concatenated
/// block-diagonally, continuous slots first. Partitions without time-varying
/// elements are assembled once and cached.
#[derive(Debug)]
pub struct ProcessModelElementGroup {
    elements: Vec<Box<dyn ProcessModelElement>>,
    continuous: Vec<usize>,
    discrete: Vec<usize>,
    element_by_slot: HashMap<SlotHandle, usize>,

    /// Output slots in matrix order: continuous first, then discrete.
    slot_order: Vec<SlotHandle>,
    slot_dims: HashMap<SlotHandle, usize>,
    /// Offsets of each output slot within this group's state block.
    local_offsets: HashMap<SlotHandle, usize>,
    /// Offsets within each partition's own matrices.
    continuous_offsets: HashMap<SlotHandle, usize>,
    discrete_offsets: HashMap<SlotHandle, usize>,
    continuous_slots: Vec<SlotHandle>,
    discrete_slots: Vec<SlotHandle>,
    continuous_size: usize,
    discrete_size: usize,
    state_size: usize,

    inputs: Vec<PortId>,
    input_dims: HashMap<PortId, usize>,
    input_offsets: HashMap<PortId, usize>,
    input_size: usize,

    continuous_time_variant: bool,
    discrete_time_variant: bool,

    f_continuous: DMatrix<f64>,
    g_continuous: DMatrix<f64>,
    q_continuous: DMatrix<f64>,
    f_discrete: DMatrix<f64>,
    g_discrete: DMatrix<f64>,
    q_discrete: DMatrix<f64>,
    f: DMatrix<f64>,
    g: DMatrix<f64>,
    q: DMatrix<f64>,

    discretizer: SplitUpMatrixExponentialDiscretizer,
    control_dt: f64,
}

impl ProcessModelElementGroup {
    pub fn new(
        elements: Vec<Box<dyn ProcessModelElement>>,
        slots: &SlotRegistry,
        ports: &PortRegistry,
        control_dt: f64,
    ) -> Result<Self, ConfigurationError> {
        let mut continuous = Vec::new();
        let mut discrete = Vec::new();
        for (index, element) in elements.iter().enumerate() {
            match element.time_domain() {
                TimeDomain::Continuous => continuous.push(index),
                TimeDomain::Discrete => discrete.push(index),
            }
        }

        let mut element_by_slot = HashMap::new();
        for (index, element) in elements.iter().enumerate() {
            if element_by_slot.insert(element.output_slot(), index).is_some() {
                return Err(ConfigurationError::DuplicateSlotOwner {
                    name: slots.name(element.output_slot()).to_owned(),
                });
            }
        }

        // Every slot an element couples to must be advanced inside this
        // group, in the same time domain.
        let touched = |indices: &[usize]| -> HashSet<SlotHandle> {
            let mut set = HashSet::new();
            for &i in indices {
                set.insert(elements[i].output_slot());
                set.extend(elements[i].coupled_slots().iter().copied());
            }
            set
        };
        let continuous_touched = touched(&continuous);
        let discrete_touched = touched(&discrete);
        if let Some(shared) = continuous_touched.intersection(&discrete_touched).next() {
            return Err(ConfigurationError::SharedTimeDomainSlots {
                name: slots.name(*shared).to_owned(),
            });
        }
        for &index in continuous.iter().chain(discrete.iter()) {
            for slot in elements[index].coupled_slots() {
                if !element_by_slot.contains_key(slot) {
                    return Err(ConfigurationError::UnownedCoupledSlot {
                        name: slots.name(*slot).to_owned(),
                        element: elements[index].name().to_owned(),
                    });
                }
            }
        }

        let continuous_slots: Vec<SlotHandle> =
            continuous.iter().map(|&i| elements[i].output_slot()).collect();
        let discrete_slots: Vec<SlotHandle> =
            discrete.iter().map(|&i| elements[i].output_slot()).collect();

        let mut slot_dims = HashMap::new();
        for slot in continuous_slots.iter().chain(discrete_slots.iter()) {
            slot_dims.insert(*slot, slots.dimension(*slot));
        }

        let offsets_of = |list: &[SlotHandle]| -> HashMap<SlotHandle, usize> {
            let mut offsets = HashMap::new();
            let mut offset = 0;
            for slot in list {
                offsets.insert(*slot, offset);
                offset += slot_dims[slot];
            }
            offsets
        };
        let continuous_offsets = offsets_of(&continuous_slots);
        let discrete_offsets = offsets_of(&discrete_slots);
        let continuous_size: usize = continuous_slots.iter().map(|s| slot_dims[s]).sum();
        let discrete_size: usize = discrete_slots.iter().map(|s| slot_dims[s]).sum();
        let state_size = continuous_size + discrete_size;

        let mut slot_order = continuous_slots.clone();
        slot_order.extend(discrete_slots.iter().copied());
        let mut local_offsets = continuous_offsets.clone();
        for (slot, offset) in &discrete_offsets {
            local_offsets.insert(*slot, continuous_size + offset);
        }

        // Input ports, ordered by first appearance across elements.
        let mut inputs = Vec::new();
        let mut input_dims = HashMap::new();
        for element in &elements {
            for port in element.input_ports() {
                if !input_dims.contains_key(port) {
                    inputs.push(*port);
                    input_dims.insert(*port, ports.dimension(*port));
                }
            }
        }
        let mut input_offsets = HashMap::new();
        let mut input_size = 0;
        for port in &inputs {
            input_offsets.insert(*port, input_size);
            input_size += input_dims[port];
        }

        let continuous_time_variant = continuous.iter().any(|&i| elements[i].is_time_variant());
        let discrete_time_variant = discrete.iter().any(|&i| elements[i].is_time_variant());

        let mut group = Self {
            elements,
            continuous,
            discrete,
            element_by_slot,
            slot_order,
            slot_dims,
            local_offsets,
            continuous_offsets,
            discrete_offsets,
            continuous_slots,
            discrete_slots,
            continuous_size,
            discrete_size,
            state_size,
            inputs,
            input_dims,
            input_offsets,
            input_size,
            continuous_time_variant,
            discrete_time_variant,
            f_continuous: DMatrix::zeros(continuous_size, continuous_size),
            g_continuous: DMatrix::zeros(continuous_size, input_size),
            q_continuous: DMatrix::zeros(continuous_size, continuous_size),
            f_discrete: DMatrix::zeros(discrete_size, discrete_size),
            g_discrete: DMatrix::zeros(discrete_size, input_size),
            q_discrete: DMatrix::zeros(discrete_size, discrete_size),
            f: DMatrix::zeros(state_size, state_size),
            g: DMatrix::zeros(state_size, input_size),
            q: DMatrix::zeros(state_size, state_size),
            discretizer: SplitUpMatrixExponentialDiscretizer::new(continuous_size, input_size),
            control_dt,
        };

        group.validate_block_dimensions(slots, ports)?;
        group.update_internal(true);
        Ok(group)
    }

    /// Checks every element's blocks against the declared slot and port
    /// dimensions. Runs once at construction; block shapes are fixed for the
    /// life of the estimator.
    fn validate_block_dimensions(
        &mut self,
        slots: &SlotRegistry,
        ports: &PortRegistry,
    ) -> Result<(), ConfigurationError> {
        for element in &mut self.elements {
            element.compute_matrix_blocks();
        }

        for element in &self.elements {
            let output = element.output_slot();
            let rows = self.slot_dims[&output];
            let mismatch = |target: &str, block: &DMatrix<f64>, expected_cols: usize| {
                ConfigurationError::BlockDimensionMismatch {
                    element: element.name().to_owned(),
                    target: target.to_owned(),
                    rows: block.nrows(),
                    cols: block.ncols(),
                    expected_rows: rows,
                    expected_cols,
                }
            };

            for slot in std::iter::once(output).chain(element.coupled_slots().iter().copied()) {
                if let Some(block) = element.state_transition_block(slot) {
                    let cols = self.slot_dims[&slot];
                    if block.nrows() != rows || block.ncols() != cols {
                        return Err(mismatch(slots.name(slot), block, cols));
                    }
                }
            }
            for port in element.input_ports() {
                if let Some(block) = element.input_block(*port) {
                    let cols = self.input_dims[port];
                    if block.nrows() != rows || block.ncols() != cols {
                        return Err(mismatch(ports.name(*port), block, cols));
                    }
                }
            }
            let noise = element.process_noise_block();
            if noise.nrows() != rows || noise.ncols() != rows {
                return Err(mismatch("process noise", noise, rows));
            }
        }
        Ok(())
    }

    /// Refreshes whatever the time-variant flags require. Call once per tick
    /// before reading the matrices.
    pub fn update(&mut self) {
        self.update_internal(false);
    }

    /// Forces a full recomputation, e.g. after the control period changed.
    pub fn reinitialize(&mut self) {
        self.update_internal(true);
    }

    pub fn set_control_dt(&mut self, control_dt: f64) {
        if self.control_dt != control_dt {
            self.control_dt = control_dt;
            self.reinitialize();
        }
    }

    fn update_internal(&mut self, initialize: bool) {
        let mut changed = false;

        if initialize || self.continuous_time_variant {
            for &index in &self.continuous {
                self.elements[index].compute_matrix_blocks();
            }
            Self::assemble_partition(
                &mut self.f_continuous,
                &mut self.g_continuous,
                &mut self.q_continuous,
                &self.elements,
                &self.continuous,
                &self.continuous_slots,
                &self.continuous_offsets,
                &self.inputs,
                &self.input_offsets,
                &self.slot_dims,
                &self.input_dims,
            );
            self.discretizer.discretize(
                &mut self.f_continuous,
                &mut self.g_continuous,
                &mut self.q_continuous,
                self.control_dt,
            );
            changed = true;
        }

        if initialize || self.discrete_time_variant {
            for &index in &self.discrete {
                self.elements[index].compute_matrix_blocks();
            }
            Self::assemble_partition(
                &mut self.f_discrete,
                &mut self.g_discrete,
                &mut self.q_discrete,
                &self.elements,
                &self.discrete,
                &self.discrete_slots,
                &self.discrete_offsets,
                &self.inputs,
                &self.input_offsets,
                &self.slot_dims,
                &self.input_dims,
            );
            changed = true;
        }

        if changed {
            self.concatenate_partitions();
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble_partition(
        f: &mut DMatrix<f64>,
        g: &mut DMatrix<f64>,
        q: &mut DMatrix<f64>,
        elements: &[Box<dyn ProcessModelElement>],
        partition: &[usize],
        partition_slots: &[SlotHandle],
        offsets: &HashMap<SlotHandle, usize>,
        inputs: &[PortId],
        input_offsets: &HashMap<PortId, usize>,
        slot_dims: &HashMap<SlotHandle, usize>,
        input_dims: &HashMap<PortId, usize>,
    ) {
        f.fill(0.0);
        g.fill(0.0);
        q.fill(0.0);

        for &index in partition {
            let element = &elements[index];
            let row = offsets[&element.output_slot()];
            let rows = slot_dims[&element.output_slot()];

            for slot in partition_slots {
                if let Some(block) = element.state_transition_block(*slot) {
                    f.view_mut((row, offsets[slot]), (rows, slot_dims[slot]))
                        .copy_from(block);
                }
            }
            for port in inputs {
                if let Some(block) = element.input_block(*port) {
                    g.view_mut((row, input_offsets[port]), (rows, input_dims[port]))
                        .copy_from(block);
                }
            }
            q.view_mut((row, row), (rows, rows))
                .copy_from(element.process_noise_block());
        }
    }

    fn concatenate_partitions(&mut self) {
        let cs = self.continuous_size;
        let ds = self.discrete_size;
        let m = self.input_size;

        self.f.fill(0.0);
        self.f.view_mut((0, 0), (cs, cs)).copy_from(&self.f_continuous);
        self.f.view_mut((cs, cs), (ds, ds)).copy_from(&self.f_discrete);

        self.g.view_mut((0, 0), (cs, m)).copy_from(&self.g_continuous);
        self.g.view_mut((cs, 0), (ds, m)).copy_from(&self.g_discrete);

        self.q.fill(0.0);
        self.q.view_mut((0, 0), (cs, cs)).copy_from(&self.q_continuous);
        self.q.view_mut((cs, cs), (ds, ds)).copy_from(&self.q_discrete);
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

    pub fn slot_order(&self) -> &[SlotHandle] {
        &self.slot_order
    }

    pub fn local_offset_of(&self, slot: SlotHandle) -> Option<usize> {
        self.local_offsets.get(&slot).copied()
    }

    pub fn is_time_variant(&self) -> bool {
        self.continuous_time_variant || self.discrete_time_variant
    }

    pub fn control_dt(&self) -> f64 {
        self.control_dt
    }

    /// Nonlinear mean propagation: every element advances its own slot.
    pub fn propagate_state(&mut self, dt: f64) {
        for element in &mut self.elements {
            element.propagate_state(dt);
        }
    }

    /// Slices a group-local correction vector per slot and forwards each
    /// slice to the owning element.
    pub fn correct_state(&mut self, correction: DVectorView<'_, f64>) {
        for element in &mut self.elements {
            let offset = self.local_offsets[&element.output_slot()];
            let dim = self.slot_dims[&element.output_slot()];
            element.correct_state(correction.rows(offset, dim));
        }
    }

    /// Writes each element's current state into `out` at this group's base
    /// offset.
    pub fn fill_state_vector(&self, out: &mut DVector<f64>, base: usize) {
        for slot in &self.slot_order {
            let element = &self.elements[self.element_by_slot[slot]];
            let offset = base + self.local_offsets[slot];
            out.rows_mut(offset, self.slot_dims[slot])
                .copy_from(&element.state_vector());
        }
    }

    /// Pushes slices of a global state vector back into the owning elements.
    pub fn set_state_from_vector(&mut self, x: &DVector<f64>, base: usize) {
        for slot_index in 0..self.slot_order.len() {
            let slot = self.slot_order[slot_index];
            let offset = base + self.local_offsets[&slot];
            let dim = self.slot_dims[&slot];
            let element_index = self.element_by_slot[&slot];
            self.elements[element_index].set_state_vector(x.rows(offset, dim));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Minimal scripted element for exercising the assembly machinery.
    #[derive(Debug)]
    struct StubElement {
        name: String,
        output: SlotHandle,
        coupled: Vec<SlotHandle>,
        ports: Vec<PortId>,
        domain: TimeDomain,
        time_variant: bool,
        self_block: Option<DMatrix<f64>>,
        coupling_blocks: HashMap<SlotHandle, DMatrix<f64>>,
        input_blocks: HashMap<PortId, DMatrix<f64>>,
        noise: DMatrix<f64>,
        value: DVector<f64>,
        compute_calls: Arc<AtomicUsize>,
    }

    impl StubElement {
        fn new(name: &str, output: SlotHandle, dim: usize, domain: TimeDomain) -> Self {
            Self {
                name: name.to_owned(),
                output,
                coupled: Vec::new(),
                ports: Vec::new(),
                domain,
                time_variant: false,
                self_block: None,
                coupling_blocks: HashMap::new(),
                input_blocks: HashMap::new(),
                noise: DMatrix::zeros(dim, dim),
                value: DVector::zeros(dim),
                compute_calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl ProcessModelElement for StubElement {
        fn name(&self) -> &str {
            &self.name
        }
        fn output_slot(&self) -> SlotHandle {
            self.output
        }
        fn coupled_slots(&self) -> &[SlotHandle] {
            &self.coupled
        }
        fn input_ports(&self) -> &[PortId] {
            &self.ports
        }
        fn time_domain(&self) -> TimeDomain {
            self.domain
        }
        fn is_time_variant(&self) -> bool {
            self.time_variant
        }
        fn compute_matrix_blocks(&mut self) {
            self.compute_calls.fetch_add(1, Ordering::Relaxed);
        }
        fn state_transition_block(&self, slot: SlotHandle) -> Option<&DMatrix<f64>> {
            if slot == self.output {
                self.self_block.as_ref()
            } else {
                self.coupling_blocks.get(&slot)
            }
        }
        fn input_block(&self, port: PortId) -> Option<&DMatrix<f64>> {
            self.input_blocks.get(&port)
        }
        fn process_noise_block(&self) -> &DMatrix<f64> {
            &self.noise
        }
        fn propagate_state(&mut self, dt: f64) {
            self.value.add_scalar_mut(dt);
        }
        fn correct_state(&mut self, correction: DVectorView<'_, f64>) {
            self.value += correction;
        }
        fn state_vector(&self) -> DVector<f64> {
            self.value.clone()
        }
        fn set_state_vector(&mut self, value: DVectorView<'_, f64>) {
            self.value.copy_from(&value);
        }
    }

    fn registry_with(names: &[(&str, usize)]) -> (SlotRegistry, Vec<SlotHandle>) {
        let mut registry = SlotRegistry::new();
        let handles = names
            .iter()
            .map(|(name, dim)| registry.register(name, *dim).unwrap())
            .collect();
        (registry, handles)
    }

    #[test]
    fn cross_slot_blocks_land_at_their_offsets() {
        let (slots, handles) = registry_with(&[("a", 2), ("b", 1)]);
        let ports = PortRegistry::new();

        let mut first = StubElement::new("first", handles[0], 2, TimeDomain::Continuous);
        first.coupled = vec![handles[1]];
        first
            .coupling_blocks
            .insert(handles[1], DMatrix::from_row_slice(2, 1, &[3.0, 4.0]));
        let mut second = StubElement::new("second", handles[1], 1, TimeDomain::Continuous);
        second.self_block = Some(DMatrix::from_element(1, 1, -1.0));
        second.noise = DMatrix::from_element(1, 1, 0.5);

        let dt = 1e-6; // small enough that F_d ≈ I + A·dt
        let group = ProcessModelElementGroup::new(
            vec![Box::new(first), Box::new(second)],
            &slots,
            &ports,
            dt,
        )
        .unwrap();

        let f = group.state_matrix();
        assert_eq!(f.nrows(), 3);
        assert_abs_diff_eq!(f[(0, 2)], 3.0 * dt, epsilon = 1e-9);
        assert_abs_diff_eq!(f[(1, 2)], 4.0 * dt, epsilon = 1e-9);
        assert_abs_diff_eq!(f[(2, 2)], 1.0 - dt, epsilon = 1e-9);

        let q = group.process_noise_matrix();
        assert_abs_diff_eq!(q[(2, 2)], 0.5 * dt, epsilon = 1e-9);
    }

    #[test]
    fn continuous_and_discrete_partitions_concatenate_block_diagonally() {
        let (slots, handles) = registry_with(&[("disc", 1), ("cont", 1)]);
        let mut ports = PortRegistry::new();
        let port = ports.register("u", 1).unwrap();

        // register the discrete element first to prove ordering comes from
        // the partition, not the slot registry
        let mut discrete = StubElement::new("disc", handles[0], 1, TimeDomain::Discrete);
        discrete.ports = vec![port];
        discrete.input_blocks.insert(port, DMatrix::from_element(1, 1, 1.0));
        discrete.noise = DMatrix::from_element(1, 1, 0.25);
        let mut continuous = StubElement::new("cont", handles[1], 1, TimeDomain::Continuous);
        continuous.self_block = Some(DMatrix::from_element(1, 1, 0.0));

        let group = ProcessModelElementGroup::new(
            vec![Box::new(discrete), Box::new(continuous)],
            &slots,
            &ports,
            0.01,
        )
        .unwrap();

        // continuous slot comes first in the composed ordering
        assert_eq!(group.slot_order(), &[handles[1], handles[0]]);
        assert_eq!(group.local_offset_of(handles[1]), Some(0));
        assert_eq!(group.local_offset_of(handles[0]), Some(1));

        let f = group.state_matrix();
        assert_abs_diff_eq!(f[(0, 0)], 1.0, epsilon = 1e-12); // exp(0)
        assert_abs_diff_eq!(f[(1, 1)], 0.0, epsilon = 1e-12); // discrete self block

        // the discrete input block is used verbatim, not scaled by dt
        let g = group.input_matrix();
        assert_abs_diff_eq!(g[(1, 0)], 1.0, epsilon = 1e-12);
        let q = group.process_noise_matrix();
        assert_abs_diff_eq!(q[(1, 1)], 0.25, epsilon = 1e-12);
    }

    #[test]
    fn sharing_a_slot_across_time_domains_is_fatal() {
        let (slots, handles) = registry_with(&[("a", 1), ("b", 1)]);
        let ports = PortRegistry::new();

        let mut continuous = StubElement::new("cont", handles[0], 1, TimeDomain::Continuous);
        continuous.coupled = vec![handles[1]];
        continuous
            .coupling_blocks
            .insert(handles[1], DMatrix::from_element(1, 1, 1.0));
        let discrete = StubElement::new("disc", handles[1], 1, TimeDomain::Discrete);

        let err = ProcessModelElementGroup::new(
            vec![Box::new(continuous), Box::new(discrete)],
            &slots,
            &ports,
            0.01,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::SharedTimeDomainSlots { .. }));
    }

    #[test]
    fn two_elements_advancing_one_slot_is_fatal() {
        let (slots, handles) = registry_with(&[("a", 1)]);
        let ports = PortRegistry::new();
        let first = StubElement::new("first", handles[0], 1, TimeDomain::Continuous);
        let second = StubElement::new("second", handles[0], 1, TimeDomain::Continuous);

        let err = ProcessModelElementGroup::new(
            vec![Box::new(first), Box::new(second)],
            &slots,
            &ports,
            0.01,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateSlotOwner { .. }));
    }

    #[test]
    fn coupling_to_an_unowned_slot_is_fatal() {
        let (slots, handles) = registry_with(&[("a", 1), ("orphan", 1)]);
        let ports = PortRegistry::new();
        let mut element = StubElement::new("only", handles[0], 1, TimeDomain::Continuous);
        element.coupled = vec![handles[1]];
        element
            .coupling_blocks
            .insert(handles[1], DMatrix::from_element(1, 1, 1.0));

        let err =
            ProcessModelElementGroup::new(vec![Box::new(element)], &slots, &ports, 0.01).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnownedCoupledSlot { .. }));
    }

    #[test]
    fn mis_sized_blocks_are_fatal() {
        let (slots, handles) = registry_with(&[("a", 2)]);
        let ports = PortRegistry::new();
        let mut element = StubElement::new("bad", handles[0], 2, TimeDomain::Continuous);
        element.self_block = Some(DMatrix::zeros(3, 3)); // declared dimension is 2

        let err =
            ProcessModelElementGroup::new(vec![Box::new(element)], &slots, &ports, 0.01).unwrap_err();
        assert!(matches!(err, ConfigurationError::BlockDimensionMismatch { .. }));
    }

    #[test]
    fn static_partitions_are_assembled_once() {
        let (slots, handles) = registry_with(&[("fixed", 1), ("varying", 1)]);
        let ports = PortRegistry::new();

        let fixed = StubElement::new("fixed", handles[0], 1, TimeDomain::Continuous);
        let fixed_calls = Arc::clone(&fixed.compute_calls);
        let mut varying = StubElement::new("varying", handles[1], 1, TimeDomain::Discrete);
        varying.time_variant = true;
        let varying_calls = Arc::clone(&varying.compute_calls);

        let mut group = ProcessModelElementGroup::new(
            vec![Box::new(fixed), Box::new(varying)],
            &slots,
            &ports,
            0.01,
        )
        .unwrap();
        let fixed_after_init = fixed_calls.load(Ordering::Relaxed);

        for _ in 0..5 {
            group.update();
        }
        // the fixed continuous partition is cached...
        assert_eq!(fixed_calls.load(Ordering::Relaxed), fixed_after_init);
        // ...while the time-varying discrete partition recomputes every tick
        assert_eq!(
            varying_calls.load(Ordering::Relaxed),
            fixed_after_init + 5
        );
    }

    #[test]
    fn noise_assembly_is_symmetric_positive_semidefinite() {
        let (slots, handles) = registry_with(&[("a", 2), ("b", 2)]);
        let ports = PortRegistry::new();

        let mut first = StubElement::new("a", handles[0], 2, TimeDomain::Continuous);
        first.noise = DMatrix::from_row_slice(2, 2, &[2.0, 0.3, 0.3, 1.0]);
        let mut second = StubElement::new("b", handles[1], 2, TimeDomain::Continuous);
        second.noise = DMatrix::from_row_slice(2, 2, &[0.5, -0.1, -0.1, 0.7]);

        let group = ProcessModelElementGroup::new(
            vec![Box::new(first), Box::new(second)],
            &slots,
            &ports,
            0.01,
        )
        .unwrap();

        let q = group.process_noise_matrix();
        for i in 0..4 {
            for j in 0..4 {
                assert_abs_diff_eq!(q[(i, j)], q[(j, i)], epsilon = 1e-12);
            }
        }
        // PSD via Cholesky of Q + tiny jitter
        let jitter = DMatrix::identity(4, 4) * 1e-12;
        assert!((q.clone() + jitter).cholesky().is_some());
    }

    #[test]
    fn correction_slices_reach_the_owning_elements() {
        let (slots, handles) = registry_with(&[("a", 2), ("b", 1)]);
        let ports = PortRegistry::new();
        let first = StubElement::new("a", handles[0], 2, TimeDomain::Continuous);
        let second = StubElement::new("b", handles[1], 1, TimeDomain::Discrete);

        let mut group = ProcessModelElementGroup::new(
            vec![Box::new(first), Box::new(second)],
            &slots,
            &ports,
            0.01,
        )
        .unwrap();

        let correction = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        group.correct_state(correction.rows(0, 3));

        let mut state = DVector::zeros(3);
        group.fill_state_vector(&mut state, 0);
        assert_abs_diff_eq!(state[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(state[1], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(state[2], 3.0, epsilon = 1e-12);
    }
}
