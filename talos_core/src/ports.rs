// talos_core/src/ports.rs
//
// Port plumbing between the estimator core and the host dataflow. A port is a
// shared most-recent-value cell: the upstream side pushes through a writer
// handle whenever it has produced a value for the current tick, and the core
// pulls without ever blocking. Measurement ports additionally track whether
// the current value has been consumed by a stacked update yet.

use std::sync::{Arc, RwLock};

use crate::errors::ConfigurationError;

fn read_cell<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_cell<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

// --- Process input ports ---

/// A typed, externally-fed value consumed by a process model element
/// (e.g. a feed-forward angular acceleration). Not part of the state vector.
#[derive(Debug, Clone, Default)]
pub struct InputPort<T> {
    cell: Arc<RwLock<Option<T>>>,
}

impl<T: Clone> InputPort<T> {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(RwLock::new(None)),
        }
    }

    /// The writer end, handed to the upstream producer.
    pub fn writer(&self) -> InputPortWriter<T> {
        InputPortWriter {
            cell: Arc::clone(&self.cell),
        }
    }

    /// Most recent value, or `None` if nothing has been pushed yet.
    pub fn latest(&self) -> Option<T> {
        read_cell(&self.cell).clone()
    }
}

#[derive(Debug, Clone)]
pub struct InputPortWriter<T> {
    cell: Arc<RwLock<Option<T>>>,
}

impl<T> InputPortWriter<T> {
    pub fn set(&self, value: T) {
        *write_cell(&self.cell) = Some(value);
    }
}

// --- Measurement ports ---

#[derive(Debug)]
struct MeasurementCell<T> {
    value: Option<T>,
    fresh: bool,
}

/// A typed sensor-reading cell consumed by exactly one measurement model
/// element. The value may be absent or stale on any given tick; the element
/// reports "no update" through [`MeasurementPort::has_new_data`] instead of
/// fabricating data.
#[derive(Debug, Clone)]
pub struct MeasurementPort<T> {
    cell: Arc<RwLock<MeasurementCell<T>>>,
}

impl<T: Clone> MeasurementPort<T> {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(RwLock::new(MeasurementCell {
                value: None,
                fresh: false,
            })),
        }
    }

    pub fn writer(&self) -> MeasurementPortWriter<T> {
        MeasurementPortWriter {
            cell: Arc::clone(&self.cell),
        }
    }

    /// True if a value has arrived since the last stacked update consumed one.
    pub fn has_new_data(&self) -> bool {
        read_cell(&self.cell).fresh
    }

    pub fn latest(&self) -> Option<T> {
        read_cell(&self.cell).value.clone()
    }

    /// Clears the fresh flag after the value has entered a stacked update.
    /// The value itself stays readable.
    pub fn mark_consumed(&self) {
        write_cell(&self.cell).fresh = false;
    }
}

impl<T: Clone> Default for MeasurementPort<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct MeasurementPortWriter<T> {
    cell: Arc<RwLock<MeasurementCell<T>>>,
}

impl<T> MeasurementPortWriter<T> {
    pub fn set(&self, value: T) {
        let mut cell = write_cell(&self.cell);
        cell.value = Some(value);
        cell.fresh = true;
    }
}

// --- State ports ---

/// The downstream-facing handle to one state slot's current value, in its
/// natural representation (quaternion for orientation, vector otherwise).
/// The owning process model element writes it on every propagate/correct;
/// consumers hold clones.
#[derive(Debug, Clone)]
pub struct StatePort<T> {
    cell: Arc<RwLock<T>>,
}

impl<T: Clone> StatePort<T> {
    pub fn new(initial: T) -> Self {
        Self {
            cell: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn get(&self) -> T {
        read_cell(&self.cell).clone()
    }

    pub fn set(&self, value: T) {
        *write_cell(&self.cell) = value;
    }
}

// --- Port identity for matrix assembly ---

/// Registry-assigned identity for a process input port, so the group can map
/// ports to input-matrix columns without hashing writer handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(pub u32);

impl PortId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct PortInfo {
    name: String,
    dimension: usize,
}

/// Dimension bookkeeping for process input ports, mirroring the slot
/// registry. Offsets into the stacked input vector follow registration order.
#[derive(Debug, Clone, Default)]
pub struct PortRegistry {
    ports: Vec<PortInfo>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, dimension: usize) -> Result<PortId, ConfigurationError> {
        if let Some(index) = self.ports.iter().position(|p| p.name == name) {
            let existing = self.ports[index].dimension;
            if existing != dimension {
                return Err(ConfigurationError::AmbiguousPortDimension {
                    name: name.to_owned(),
                    first: existing,
                    second: dimension,
                });
            }
            return Ok(PortId(index as u32));
        }

        self.ports.push(PortInfo {
            name: name.to_owned(),
            dimension,
        });
        Ok(PortId((self.ports.len() - 1) as u32))
    }

    pub fn name(&self, port: PortId) -> &str {
        &self.ports[port.index()].name
    }

    pub fn dimension(&self, port: PortId) -> usize {
        self.ports[port.index()].dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn measurement_port_tracks_freshness() {
        let port: MeasurementPort<Vector3<f64>> = MeasurementPort::new();
        assert!(!port.has_new_data());
        assert_eq!(port.latest(), None);

        port.writer().set(Vector3::new(1.0, 2.0, 3.0));
        assert!(port.has_new_data());

        port.mark_consumed();
        assert!(!port.has_new_data());
        // the stale value stays readable
        assert_eq!(port.latest(), Some(Vector3::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn input_port_returns_most_recent_value() {
        let port: InputPort<f64> = InputPort::new();
        let writer = port.writer();
        writer.set(1.0);
        writer.set(2.0);
        assert_eq!(port.latest(), Some(2.0));
    }

    #[test]
    fn port_registry_rejects_ambiguous_dimensions() {
        let mut registry = PortRegistry::new();
        registry.register("desiredAngularAcceleration", 3).unwrap();
        assert!(registry.register("desiredAngularAcceleration", 6).is_err());
    }
}
