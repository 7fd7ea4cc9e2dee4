//! A CPU-only device. Buffers live in host memory, every draw is validated and
//! recorded as a [`DrawCall`] instead of being rasterized.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashSet as HashSet;

use super::device::{BufferDescriptor, DeviceBuffer, DeviceError, GraphicsDevice, COPY_ALIGNMENT};
use super::vertex::{Index, Vertex, INDEX_SIZE, VERTEX_SIZE};
use crate::utils::*;

/// Resource and command counters of a [`SoftwareDevice`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStats {
    pub buffers_created: u64,
    pub buffers_released: u64,
    pub maps: u64,
    pub unmaps: u64,
    pub bytes_copied: u64,
    pub textures_created: u64,
    pub textures_released: u64,
    pub draw_calls: u64,
}
impl DeviceStats {
    pub fn live_buffers(&self) -> u64 {
        self.buffers_created - self.buffers_released
    }

    pub fn live_textures(&self) -> u64 {
        self.textures_created - self.textures_released
    }
}

#[derive(Debug)]
pub struct SoftwareBuffer {
    id: u64,
    descriptor: BufferDescriptor,
    // Stored as words so the memory is always 4-byte aligned
    memory: Vec<u32>,
    mapped: bool,
}
impl SoftwareBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.memory)
    }
}
impl DeviceBuffer for SoftwareBuffer {
    fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    fn mapped(&self) -> Option<&[u8]> {
        self.mapped.then(|| self.bytes())
    }

    fn mapped_mut(&mut self) -> Option<&mut [u8]> {
        if self.mapped {
            Some(bytemuck::cast_slice_mut(&mut self.memory))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SoftwareTexture {
    id: u64,
    width: u32,
    height: u32,
}
impl SoftwareTexture {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Snapshot of what a buffer held when it was bound.
#[derive(Debug)]
struct Binding {
    id: u64,
    words: Vec<u32>,
}
impl Binding {
    fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }
}

/// One recorded `draw_indexed` together with the state it was issued against.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub vertex_buffer: u64,
    pub index_buffer: u64,
    pub base_vertex: i32,
    /// The indices that were drawn, as stored in the index buffer.
    pub indices: Vec<Index>,
    /// The bound vertices up to the highest one referenced.
    pub vertices: Vec<Vertex>,
    /// Texture bindings by slot.
    pub textures: Vec<Option<SoftwareTexture>>,
}
impl DrawCall {
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn texture(&self, slot: usize) -> Option<&SoftwareTexture> {
        self.textures.get(slot).and_then(Option::as_ref)
    }

    /// The vertices in the order the indices reference them.
    pub fn indexed_vertices(&self) -> impl Iterator<Item = &Vertex> + '_ {
        self.indices
            .iter()
            .map(move |&i| &self.vertices[(i as i64 + self.base_vertex as i64) as usize])
    }
}

#[derive(Debug)]
pub struct SoftwareDevice {
    max_texture_slots: u32,
    next_id: u64,
    live_buffers: HashSet<u64>,
    live_textures: HashSet<u64>,
    /// Maximum number of live buffers before allocations fail
    buffer_budget: Option<usize>,

    vertex_binding: Option<Binding>,
    index_binding: Option<Binding>,
    texture_bindings: Vec<Option<SoftwareTexture>>,
    draw_calls: Vec<DrawCall>,

    stats: Rc<RefCell<DeviceStats>>,
}
impl SoftwareDevice {
    pub const DEFAULT_TEXTURE_SLOTS: u32 = 16;

    pub fn new() -> Self {
        Self::with_texture_slots(Self::DEFAULT_TEXTURE_SLOTS)
    }

    pub fn with_texture_slots(max_texture_slots: u32) -> Self {
        Self {
            max_texture_slots,
            next_id: 0,
            live_buffers: HashSet::default(),
            live_textures: HashSet::default(),
            buffer_budget: None,
            vertex_binding: None,
            index_binding: None,
            texture_bindings: vec![None; max_texture_slots as usize],
            draw_calls: vec![],
            stats: Rc::new(RefCell::new(DeviceStats::default())),
        }
    }

    /// Lets buffer creation fail with [`DeviceError::OutOfMemory`] once `budget` buffers are alive.
    pub fn set_buffer_budget(&mut self, budget: Option<usize>) {
        self.buffer_budget = budget;
    }

    pub fn stats(&self) -> DeviceStats {
        *self.stats.borrow()
    }

    /// The live counters, readable after the device itself is gone.
    pub fn shared_stats(&self) -> Rc<RefCell<DeviceStats>> {
        self.stats.clone()
    }

    pub fn draw_calls(&self) -> &[DrawCall] {
        &self.draw_calls
    }

    pub fn take_draw_calls(&mut self) -> Vec<DrawCall> {
        std::mem::take(&mut self.draw_calls)
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn bind(buffer: &SoftwareBuffer) -> Result<Binding, DeviceError> {
        if buffer.mapped {
            return Err(DeviceError::Validation(format!(
                "buffer '{}' is bound while still mapped",
                buffer.descriptor.label
            )));
        }
        Ok(Binding {
            id: buffer.id,
            words: buffer.memory.clone(),
        })
    }
}
impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}
impl GraphicsDevice for SoftwareDevice {
    type Buffer = SoftwareBuffer;
    type Texture = SoftwareTexture;

    fn name(&self) -> &str {
        "software"
    }

    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<SoftwareBuffer, DeviceError> {
        if let Some(budget) = self.buffer_budget {
            if self.live_buffers.len() >= budget {
                return Err(DeviceError::OutOfMemory { requested: descriptor.size });
            }
        }
        if descriptor.size == 0 {
            return Err(DeviceError::BufferCreation {
                label: descriptor.label.to_string(),
                reason: "zero sized buffer".into(),
            });
        }

        let id = self.next_id();
        let words = (descriptor.size as usize).div_ceil(4);
        self.live_buffers.insert(id);
        self.stats.borrow_mut().buffers_created += 1;
        trace!("Software device created buffer {id} '{}' ({} bytes)", descriptor.label, descriptor.size);

        Ok(SoftwareBuffer {
            id,
            descriptor: descriptor.clone(),
            memory: vec![0; words],
            mapped: false,
        })
    }

    fn release_buffer(&mut self, buffer: SoftwareBuffer) {
        assert!(
            self.live_buffers.remove(&buffer.id),
            "buffer {} '{}' released twice or not owned by this device",
            buffer.id,
            buffer.descriptor.label
        );
        self.stats.borrow_mut().buffers_released += 1;
    }

    fn map_for_write(&mut self, buffer: &mut SoftwareBuffer) -> Result<(), DeviceError> {
        if buffer.mapped {
            return Err(DeviceError::Map {
                label: buffer.descriptor.label.to_string(),
                reason: "already mapped".into(),
            });
        }
        buffer.mapped = true;
        self.stats.borrow_mut().maps += 1;
        Ok(())
    }

    fn unmap(&mut self, buffer: &mut SoftwareBuffer) {
        if buffer.mapped {
            buffer.mapped = false;
            self.stats.borrow_mut().unmaps += 1;
        }
    }

    fn copy_bytes(&mut self, destination: &mut SoftwareBuffer, data: &[u8]) -> Result<(), DeviceError> {
        if data.len() % COPY_ALIGNMENT != 0 {
            return Err(DeviceError::CopyMisaligned {
                len: data.len() as u64,
                alignment: COPY_ALIGNMENT as u64,
            });
        }
        if data.len() as u64 > destination.descriptor.size {
            return Err(DeviceError::CopyOutOfBounds {
                label: destination.descriptor.label.to_string(),
                len: data.len() as u64,
                size: destination.descriptor.size,
            });
        }
        if destination.mapped {
            return Err(DeviceError::Validation(format!(
                "copy into buffer '{}' while it is mapped",
                destination.descriptor.label
            )));
        }

        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut destination.memory);
        bytes[..data.len()].copy_from_slice(data);
        self.stats.borrow_mut().bytes_copied += data.len() as u64;
        Ok(())
    }

    fn create_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<SoftwareTexture, DeviceError> {
        if width == 0 || height == 0 {
            return Err(DeviceError::TextureCreation(format!("invalid extent {width}x{height}")));
        }
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(DeviceError::TextureCreation(format!(
                "expected {expected} bytes of RGBA data, got {}",
                rgba.len()
            )));
        }

        let id = self.next_id();
        self.live_textures.insert(id);
        self.stats.borrow_mut().textures_created += 1;
        Ok(SoftwareTexture { id, width, height })
    }

    fn release_texture(&mut self, texture: SoftwareTexture) {
        assert!(
            self.live_textures.remove(&texture.id),
            "texture {} released twice or not owned by this device",
            texture.id
        );
        self.stats.borrow_mut().textures_released += 1;
    }

    fn bind_vertex_buffer(&mut self, buffer: &SoftwareBuffer) -> Result<(), DeviceError> {
        self.vertex_binding = Some(Self::bind(buffer)?);
        Ok(())
    }

    fn bind_index_buffer(&mut self, buffer: &SoftwareBuffer) -> Result<(), DeviceError> {
        self.index_binding = Some(Self::bind(buffer)?);
        Ok(())
    }

    fn bind_textures(&mut self, first_slot: u32, textures: &[SoftwareTexture]) -> Result<(), DeviceError> {
        let end = first_slot as usize + textures.len();
        if end > self.max_texture_slots as usize {
            return Err(DeviceError::Validation(format!(
                "binding slots {first_slot}..{end} exceeds the {} available texture slots",
                self.max_texture_slots
            )));
        }
        for (slot, texture) in self.texture_bindings[first_slot as usize..end].iter_mut().zip(textures) {
            *slot = Some(texture.clone());
        }
        Ok(())
    }

    fn draw_indexed(&mut self, index_count: u32, base_vertex: i32) -> Result<(), DeviceError> {
        let (Some(vertex_binding), Some(index_binding)) = (&self.vertex_binding, &self.index_binding) else {
            return Err(DeviceError::Validation("draw without bound vertex and index buffers".into()));
        };

        let index_bytes = index_count as usize * INDEX_SIZE;
        if index_bytes > index_binding.bytes().len() {
            return Err(DeviceError::Validation(format!(
                "drawing {index_count} indices from an index buffer of {} bytes",
                index_binding.bytes().len()
            )));
        }
        let indices: Vec<Index> = bytemuck::cast_slice(&index_binding.bytes()[..index_bytes]).to_vec();

        let vertex_capacity = vertex_binding.bytes().len() / VERTEX_SIZE;
        let mut highest = None;
        for &index in indices.iter() {
            let vertex = index as i64 + base_vertex as i64;
            if vertex < 0 || vertex as usize >= vertex_capacity {
                return Err(DeviceError::Validation(format!(
                    "index {index} with base vertex {base_vertex} is outside the {vertex_capacity} bound vertices"
                )));
            }
            highest = highest.max(Some(vertex as usize));
        }
        let referenced = highest.map_or(0, |h| h + 1);
        let vertices: Vec<Vertex> =
            bytemuck::cast_slice(&vertex_binding.bytes()[..referenced * VERTEX_SIZE]).to_vec();

        let call = DrawCall {
            vertex_buffer: vertex_binding.id,
            index_buffer: index_binding.id,
            base_vertex,
            indices,
            vertices,
            textures: self.texture_bindings.clone(),
        };
        for vertex in call.indexed_vertices() {
            let slot = vertex.slot();
            if call.texture(slot as usize).is_none() {
                return Err(DeviceError::Validation(format!("vertex samples unbound texture slot {slot}")));
            }
        }

        self.stats.borrow_mut().draw_calls += 1;
        self.draw_calls.push(call);
        Ok(())
    }

    fn max_texture_slots(&self) -> u32 {
        self.max_texture_slots
    }
}
impl Drop for SoftwareDevice {
    fn drop(&mut self) {
        if !self.live_buffers.is_empty() || !self.live_textures.is_empty() {
            warn!(
                "Software device dropped with {} live buffers and {} live textures",
                self.live_buffers.len(),
                self.live_textures.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::device::BufferUsage;

    fn descriptor(size: u64, usage: BufferUsage) -> BufferDescriptor {
        BufferDescriptor::new("test", size, usage)
    }

    #[test]
    fn buffers_are_only_writable_while_mapped() {
        let mut device = SoftwareDevice::new();
        let mut buffer = device.create_buffer(&descriptor(64, BufferUsage::Vertex)).unwrap();
        assert!(buffer.mapped_mut().is_none());

        device.map_for_write(&mut buffer).unwrap();
        buffer.mapped_mut().unwrap()[..4].copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(&buffer.mapped().unwrap()[..4], &[1, 2, 3, 4]);
        assert!(device.map_for_write(&mut buffer).is_err());

        device.unmap(&mut buffer);
        assert!(!buffer.is_mapped());
        device.release_buffer(buffer);

        let stats = device.stats();
        assert_eq!((stats.maps, stats.unmaps), (1, 1));
        assert_eq!(stats.live_buffers(), 0);
    }

    #[test]
    fn copies_are_checked() {
        let mut device = SoftwareDevice::new();
        let mut buffer = device.create_buffer(&descriptor(8, BufferUsage::Index)).unwrap();

        assert_eq!(
            device.copy_bytes(&mut buffer, &[0; 6]),
            Err(DeviceError::CopyMisaligned { len: 6, alignment: 4 })
        );
        assert!(matches!(
            device.copy_bytes(&mut buffer, &[0; 12]),
            Err(DeviceError::CopyOutOfBounds { len: 12, size: 8, .. })
        ));
        device.copy_bytes(&mut buffer, &[7; 8]).unwrap();
        assert_eq!(device.stats().bytes_copied, 8);
        device.release_buffer(buffer);
    }

    #[test]
    fn budget_limits_live_buffers() {
        let mut device = SoftwareDevice::new();
        device.set_buffer_budget(Some(1));
        let first = device.create_buffer(&descriptor(16, BufferUsage::Vertex)).unwrap();
        assert_eq!(
            device.create_buffer(&descriptor(16, BufferUsage::Vertex)).unwrap_err(),
            DeviceError::OutOfMemory { requested: 16 }
        );
        device.release_buffer(first);
        let second = device.create_buffer(&descriptor(16, BufferUsage::Vertex)).unwrap();
        device.release_buffer(second);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn unknown_buffers_cannot_be_released() {
        let mut device = SoftwareDevice::new();
        let mut buffer = device.create_buffer(&descriptor(16, BufferUsage::Vertex)).unwrap();
        buffer.id = 42;
        device.release_buffer(buffer);
    }

    #[test]
    fn draws_are_validated_and_recorded() {
        let mut device = SoftwareDevice::with_texture_slots(4);
        let texture = device.create_texture(1, 1, &[255; 4]).unwrap();

        let vertices = [Vertex::new(glam::Vec2::ZERO, glam::Vec2::ZERO, [1.0; 4], 0); 3];
        let mut vertex_buffer = device.create_buffer(&descriptor(120, BufferUsage::Vertex)).unwrap();
        device.copy_bytes(&mut vertex_buffer, bytemuck::cast_slice(&vertices)).unwrap();
        let mut index_buffer = device.create_buffer(&descriptor(8, BufferUsage::Index)).unwrap();
        device.copy_bytes(&mut index_buffer, bytemuck::cast_slice(&[0u16, 1, 2, 0])).unwrap();

        device.bind_vertex_buffer(&vertex_buffer).unwrap();
        device.bind_index_buffer(&index_buffer).unwrap();
        // Slot 0 is not bound yet
        assert!(matches!(device.draw_indexed(3, 0), Err(DeviceError::Validation(_))));

        device.bind_textures(0, &[texture.clone()]).unwrap();
        device.draw_indexed(3, 0).unwrap();
        // Base vertex pushes index 2 past the three bound vertices
        assert!(device.draw_indexed(3, 1).is_err());
        assert!(device.bind_textures(2, &[texture.clone(), texture.clone(), texture.clone()]).is_err());

        let calls = device.take_draw_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].indices, vec![0, 1, 2]);
        assert_eq!(calls[0].vertices.len(), 3);
        assert_eq!(calls[0].texture(0), Some(&texture));

        device.release_buffer(vertex_buffer);
        device.release_buffer(index_buffer);
        device.release_texture(texture);
        assert_eq!(device.stats().draw_calls, 1);
    }

    #[test]
    fn mapped_buffers_cannot_be_bound() {
        let mut device = SoftwareDevice::new();
        let mut buffer = device.create_buffer(&descriptor(40, BufferUsage::Vertex)).unwrap();
        device.map_for_write(&mut buffer).unwrap();
        assert!(device.bind_vertex_buffer(&buffer).is_err());
        device.unmap(&mut buffer);
        device.bind_vertex_buffer(&buffer).unwrap();
        device.release_buffer(buffer);
    }

    #[test]
    fn texture_data_must_match_extent() {
        let mut device = SoftwareDevice::new();
        assert!(device.create_texture(2, 2, &[0; 4]).is_err());
        assert!(device.create_texture(0, 1, &[]).is_err());
        let texture = device.create_texture(2, 1, &[0; 8]).unwrap();
        assert_eq!((texture.width(), texture.height()), (2, 1));
        device.release_texture(texture);
        assert_eq!(device.stats().live_textures(), 0);
    }
}
