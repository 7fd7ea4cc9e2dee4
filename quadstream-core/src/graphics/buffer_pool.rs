use std::collections::VecDeque;

use rustc_hash::FxHashMap as HashMap;

use super::device::{BufferDescriptor, BufferUsage, DeviceBuffer, DeviceError, GraphicsDevice};
use crate::utils::*;

/// Where a buffer handed out by [`BufferPool::acquire`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSource {
    Recycled,
    Fresh,
}

#[derive(Debug)]
struct FreeList<B> {
    descriptor: BufferDescriptor,
    buffers: VecDeque<B>,
}

/// Device buffers that are no longer read by the GPU, waiting to be mapped again.
///
/// Buffers are kept per role and every buffer of a role matches that role's descriptor,
/// so anything popped can stand in for a freshly created buffer. Reuse is FIFO: the
/// buffer retired longest ago is handed out first.
#[derive(Debug)]
pub struct BufferPool<D: GraphicsDevice> {
    lists: HashMap<BufferUsage, FreeList<D::Buffer>>,
}
impl<D: GraphicsDevice> BufferPool<D> {
    /// Creates an empty pool for the given roles. Each role may only appear once.
    pub fn new(descriptors: impl IntoIterator<Item = BufferDescriptor>) -> Self {
        let mut lists = HashMap::default();
        for descriptor in descriptors {
            let usage = descriptor.usage;
            let previous = lists.insert(
                usage,
                FreeList {
                    descriptor,
                    buffers: VecDeque::new(),
                },
            );
            assert!(previous.is_none(), "buffer pool got two descriptors for {usage:?} buffers");
        }
        Self { lists }
    }

    fn list(&self, usage: BufferUsage) -> &FreeList<D::Buffer> {
        self.lists
            .get(&usage)
            .unwrap_or_else(|| panic!("buffer pool does not hold {usage:?} buffers"))
    }

    fn list_mut(&mut self, usage: BufferUsage) -> &mut FreeList<D::Buffer> {
        self.lists
            .get_mut(&usage)
            .unwrap_or_else(|| panic!("buffer pool does not hold {usage:?} buffers"))
    }

    /// The descriptor every buffer of this role is created from.
    pub fn descriptor(&self, usage: BufferUsage) -> &BufferDescriptor {
        &self.list(usage).descriptor
    }

    pub fn len(&self, usage: BufferUsage) -> usize {
        self.list(usage).buffers.len()
    }

    pub fn total_len(&self) -> usize {
        self.lists.values().map(|l| l.buffers.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// Hands a retired buffer to the pool.
    ///
    /// # Panics
    /// If the buffer is still mapped or doesn't match its role's descriptor.
    pub fn push(&mut self, buffer: D::Buffer) {
        assert!(!buffer.is_mapped(), "buffer '{}' was retired while mapped", buffer.descriptor().label);
        let list = self.list_mut(buffer.usage());
        assert!(
            list.descriptor.is_compatible(buffer.descriptor()),
            "pooled {:?} buffers must match {:?}, got {:?}",
            list.descriptor.usage,
            list.descriptor,
            buffer.descriptor()
        );
        list.buffers.push_back(buffer);
    }

    pub fn pop(&mut self, usage: BufferUsage) -> Option<D::Buffer> {
        let buffer = self.list_mut(usage).buffers.pop_front();
        debug_assert!(buffer.as_ref().map_or(true, |b| b.usage() == usage));
        buffer
    }

    /// Pops a buffer of this role or, with an empty pool, creates a new one.
    pub fn acquire(&mut self, device: &mut D, usage: BufferUsage) -> Result<(D::Buffer, BufferSource), DeviceError> {
        if let Some(buffer) = self.pop(usage) {
            return Ok((buffer, BufferSource::Recycled));
        }
        let buffer = device.create_buffer(self.descriptor(usage))?;
        Ok((buffer, BufferSource::Fresh))
    }

    /// Allocates buffers until `count` of this role are pooled.
    pub fn prewarm(&mut self, device: &mut D, usage: BufferUsage, count: usize) -> Result<(), DeviceError> {
        while self.len(usage) < count {
            let buffer = device.create_buffer(self.descriptor(usage))?;
            self.list_mut(usage).buffers.push_back(buffer);
        }
        Ok(())
    }

    /// Releases pooled buffers of every role until at most `max` per role remain.
    /// Returns how many were released.
    pub fn trim(&mut self, device: &mut D, max: usize) -> usize {
        let mut released = 0;
        for list in self.lists.values_mut() {
            while list.buffers.len() > max {
                // Newest first, so the oldest stay at the front for reuse
                if let Some(buffer) = list.buffers.pop_back() {
                    device.release_buffer(buffer);
                    released += 1;
                }
            }
        }
        if released > 0 {
            debug!("Trimmed {released} pooled buffers down to {max} per role");
        }
        released
    }

    /// Releases every pooled buffer back to the device.
    pub fn release_all(&mut self, device: &mut D) {
        self.trim(device, 0);
    }
}
impl<D: GraphicsDevice> Drop for BufferPool<D> {
    fn drop(&mut self) {
        let leaked = self.total_len();
        if leaked > 0 {
            warn!("Buffer pool dropped while still holding {leaked} buffers");
        }
    }
}
