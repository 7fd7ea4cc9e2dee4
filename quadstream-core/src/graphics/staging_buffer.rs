use std::ops::Range;

use super::device::{BufferDescriptor, DeviceBuffer, DeviceError, GraphicsDevice, COPY_ALIGNMENT};
use crate::utils::*;

/// Keeps one device buffer mapped for CPU writes and hands out consecutive byte ranges of it.
///
/// The mapper never holds more than one buffer. Re-mapping onto another buffer hands
/// the previous one back to the caller, who decides whether it is recycled or released,
/// so pooling policy stays out of here.
#[derive(Debug)]
pub struct StagingBuffer<D: GraphicsDevice> {
    /// Every buffer this mapper maps has to match this.
    descriptor: BufferDescriptor,
    /// The underlying buffer. Swapped on every reset.
    buffer: Option<D::Buffer>,
    reserved: usize,
}
impl<D: GraphicsDevice> StagingBuffer<D> {
    pub fn new(descriptor: BufferDescriptor) -> Self {
        assert!(
            descriptor.size as usize % COPY_ALIGNMENT == 0,
            "staging buffer size {} is not a multiple of {COPY_ALIGNMENT}",
            descriptor.size
        );
        Self {
            descriptor,
            buffer: None,
            reserved: 0,
        }
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// The fixed capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.descriptor.size as usize
    }

    /// Bytes handed out since the last reset or [`Self::clear_reserved`].
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.reserved
    }

    pub fn fits(&self, bytes: usize) -> bool {
        bytes <= self.remaining()
    }

    pub fn is_mapped(&self) -> bool {
        self.buffer.as_ref().is_some_and(|b| b.is_mapped())
    }

    /// Allocates a new buffer, maps it and returns the previously held buffer (unmapped).
    pub fn reset_from_fresh_buffer(&mut self, device: &mut D) -> Result<Option<D::Buffer>, DeviceError> {
        let buffer = device.create_buffer(&self.descriptor)?;
        self.remap(device, buffer)
    }

    /// Maps `buffer` in place of the current one and returns the previously held buffer (unmapped).
    ///
    /// # Panics
    /// If `buffer` wasn't created with a descriptor compatible to this mapper's. That only
    /// happens when buffers of different roles got mixed up while pooling.
    pub fn reset_from_existing_buffer(
        &mut self,
        device: &mut D,
        buffer: D::Buffer,
    ) -> Result<Option<D::Buffer>, DeviceError> {
        assert!(
            self.descriptor.is_compatible(buffer.descriptor()),
            "staging buffer '{}' expects {:?}, got a buffer created for {:?}",
            self.descriptor.label,
            self.descriptor,
            buffer.descriptor()
        );
        self.remap(device, buffer)
    }

    fn remap(&mut self, device: &mut D, mut buffer: D::Buffer) -> Result<Option<D::Buffer>, DeviceError> {
        if let Err(err) = device.map_for_write(&mut buffer) {
            device.release_buffer(buffer);
            return Err(err);
        }

        let previous = self.buffer.replace(buffer).map(|mut previous| {
            if previous.is_mapped() {
                device.unmap(&mut previous);
            }
            previous
        });
        self.reserved = 0;
        trace!("Remapped staging buffer '{}'", self.descriptor.label);
        Ok(previous)
    }

    /// Reserves `bytes` of the mapped memory and returns their offset range. Returns `None`
    /// if the remaining capacity can't hold all of them; nothing is reserved in that case.
    ///
    /// # Panics
    /// If no buffer is mapped.
    pub fn reserve(&mut self, bytes: usize) -> Option<Range<usize>> {
        assert!(
            self.is_mapped(),
            "reserve on staging buffer '{}' while it is not mapped",
            self.descriptor.label
        );
        if !self.fits(bytes) {
            return None;
        }
        let start = self.reserved;
        self.reserved += bytes;
        Some(start..self.reserved)
    }

    /// Mutable access to an already reserved range.
    pub fn mapped_range_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        assert!(range.end <= self.reserved, "range {range:?} was never reserved");
        let label = &self.descriptor.label;
        let memory = self
            .buffer
            .as_mut()
            .and_then(|b| b.mapped_mut())
            .unwrap_or_else(|| panic!("staging buffer '{label}' is not mapped"));
        &mut memory[range]
    }

    /// The reserved bytes, padded up to the device's copy alignment.
    pub fn staged_bytes(&self) -> &[u8] {
        let memory = self
            .buffer
            .as_ref()
            .and_then(|b| b.mapped())
            .unwrap_or_else(|| panic!("staging buffer '{}' is not mapped", self.descriptor.label));
        &memory[..align_up(self.reserved, COPY_ALIGNMENT)]
    }

    /// Forgets all reservations; the buffer stays mapped.
    pub fn clear_reserved(&mut self) {
        self.reserved = 0;
    }

    /// Unmaps the current buffer. [`Self::reserve`] is invalid until the next reset.
    pub fn unmap(&mut self, device: &mut D) {
        if let Some(buffer) = self.buffer.as_mut() {
            if buffer.is_mapped() {
                device.unmap(buffer);
            }
        }
        self.reserved = 0;
    }

    /// Unmaps and gives up the held buffer, leaving the mapper empty.
    pub fn take_buffer(&mut self, device: &mut D) -> Option<D::Buffer> {
        self.unmap(device);
        self.buffer.take()
    }
}
