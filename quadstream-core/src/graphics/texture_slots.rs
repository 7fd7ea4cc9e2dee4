use std::hash::Hash;

use rustc_hash::FxHashMap as HashMap;
use thiserror::Error;

/// Returned by [`TextureSlots::get_slot`] when the batch can't take another texture.
/// The caller is expected to flush and ask again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("all {capacity} texture slots of the batch are taken")]
pub struct SlotsExhausted {
    pub capacity: usize,
}

/// Maps the textures of the batch being built to shader texture slots, in first-seen order.
#[derive(Debug)]
pub struct TextureSlots<T> {
    slots: HashMap<T, u32>,
    order: Vec<T>,
    capacity: usize,
}
impl<T: Clone + Eq + Hash> TextureSlots<T> {
    /// One of the device's slots is always held back, so a device needs at least two.
    pub fn new(max_texture_slots: u32) -> Self {
        assert!(
            max_texture_slots >= 2,
            "a device with {max_texture_slots} texture slots can't be batched into"
        );
        let capacity = max_texture_slots as usize - 1;
        Self {
            slots: HashMap::default(),
            order: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// How many distinct textures fit into one batch.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.order.len() == self.capacity
    }

    /// The slot of `texture` in this batch, assigning the next free one on first use.
    pub fn get_slot(&mut self, texture: &T) -> Result<u32, SlotsExhausted> {
        if let Some(&slot) = self.slots.get(texture) {
            return Ok(slot);
        }
        if self.is_full() {
            return Err(SlotsExhausted { capacity: self.capacity });
        }
        let slot = self.order.len() as u32;
        self.slots.insert(texture.clone(), slot);
        self.order.push(texture.clone());
        Ok(slot)
    }

    /// Textures indexed by slot.
    pub fn textures(&self) -> &[T] {
        &self.order
    }

    /// Empties the table and returns the textures by slot.
    pub fn take(&mut self) -> Vec<T> {
        self.slots.clear();
        std::mem::replace(&mut self.order, Vec::with_capacity(self.capacity))
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.order.clear();
    }
}
