// talos_core/src/slots.rs

use crate::errors::ConfigurationError;

/// A small, copyable identity for one named, fixed-width piece of the global
/// state vector. Handles are arena indices assigned by the [`SlotRegistry`];
/// all cross-references between elements and the assembly machinery go
/// through them, never through pointer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle(pub u32);

impl SlotHandle {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct SlotInfo {
    name: String,
    dimension: usize,
    /// Offset into the global state vector. Assigned once by the process
    /// model (continuous slots first, then discrete), not at registration.
    offset: Option<usize>,
}

/// Identity and bookkeeping for every slice of the global state vector.
///
/// Slots are created once during estimator construction and are never
/// destroyed or resized afterwards. Registering the same name twice returns
/// the original handle as long as the dimensions agree.
#[derive(Debug, Clone, Default)]
pub struct SlotRegistry {
    slots: Vec<SlotInfo>,
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        dimension: usize,
    ) -> Result<SlotHandle, ConfigurationError> {
        if let Some(index) = self.slots.iter().position(|s| s.name == name) {
            let existing = self.slots[index].dimension;
            if existing != dimension {
                return Err(ConfigurationError::AmbiguousSlotDimension {
                    name: name.to_owned(),
                    first: existing,
                    second: dimension,
                });
            }
            return Ok(SlotHandle(index as u32));
        }

        self.slots.push(SlotInfo {
            name: name.to_owned(),
            dimension,
            offset: None,
        });
        Ok(SlotHandle((self.slots.len() - 1) as u32))
    }

    pub fn name(&self, slot: SlotHandle) -> &str {
        &self.slots[slot.index()].name
    }

    pub fn dimension(&self, slot: SlotHandle) -> usize {
        self.slots[slot.index()].dimension
    }

    /// Offset of the slot within the global state vector, or `None` if the
    /// process model has not finalized the layout yet.
    pub fn offset_of(&self, slot: SlotHandle) -> Option<usize> {
        self.slots[slot.index()].offset
    }

    pub(crate) fn assign_offset(&mut self, slot: SlotHandle, offset: usize) {
        self.slots[slot.index()].offset = Some(offset);
    }

    /// Sum of all registered slot dimensions.
    pub fn total_size(&self) -> usize {
        self.slots.iter().map(|s| s.dimension).sum()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = SlotHandle> + '_ {
        (0..self.slots.len()).map(|i| SlotHandle(i as u32))
    }
}
