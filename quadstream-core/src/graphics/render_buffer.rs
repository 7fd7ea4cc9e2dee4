use super::buffer_pool::BufferPool;
use super::device::{DeviceError, GraphicsDevice};

/// A finalized batch: device buffers holding its geometry and the textures by slot.
#[derive(Debug)]
pub struct RenderBuffer<D: GraphicsDevice> {
    vertex_buffer: D::Buffer,
    index_buffer: D::Buffer,
    vertex_count: u32,
    index_count: u32,
    textures: Vec<D::Texture>,
}
impl<D: GraphicsDevice> RenderBuffer<D> {
    pub(crate) fn new(
        vertex_buffer: D::Buffer,
        index_buffer: D::Buffer,
        vertex_count: u32,
        index_count: u32,
        textures: Vec<D::Texture>,
    ) -> Self {
        Self {
            vertex_buffer,
            index_buffer,
            vertex_count,
            index_count,
            textures,
        }
    }

    pub fn vertex_buffer(&self) -> &D::Buffer {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &D::Buffer {
        &self.index_buffer
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Textures indexed by slot.
    pub fn textures(&self) -> &[D::Texture] {
        &self.textures
    }

    pub fn used_textures(&self) -> usize {
        self.textures.len()
    }

    fn submit(&self, device: &mut D) -> Result<(), DeviceError> {
        device.bind_vertex_buffer(&self.vertex_buffer)?;
        device.bind_index_buffer(&self.index_buffer)?;
        device.bind_textures(0, &self.textures)?;
        device.draw_indexed(self.index_count, 0)
    }

    fn into_buffers(self) -> [D::Buffer; 2] {
        [self.vertex_buffer, self.index_buffer]
    }
}

/// The batches of one frame, in the order they were flushed.
#[derive(Debug)]
pub struct DrawList<D: GraphicsDevice> {
    buffers: Vec<RenderBuffer<D>>,
}
impl<D: GraphicsDevice> DrawList<D> {
    pub fn new() -> Self {
        Self { buffers: vec![] }
    }

    pub fn push(&mut self, buffer: RenderBuffer<D>) {
        self.buffers.push(buffer);
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn as_slice(&self) -> &[RenderBuffer<D>] {
        &self.buffers
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderBuffer<D>> {
        self.buffers.iter()
    }

    /// Issues one indexed draw per batch, in insertion order.
    pub fn submit(&self, device: &mut D) -> Result<(), DeviceError> {
        self.buffers.iter().try_for_each(|buffer| buffer.submit(device))
    }

    /// Moves the device buffers of every batch into the pool and empties the list.
    pub fn retire_into(&mut self, pool: &mut BufferPool<D>) {
        for buffer in self.buffers.drain(..).flat_map(RenderBuffer::into_buffers) {
            pool.push(buffer);
        }
    }

    pub fn release_all(&mut self, device: &mut D) {
        for buffer in self.buffers.drain(..).flat_map(RenderBuffer::into_buffers) {
            device.release_buffer(buffer);
        }
    }
}
impl<D: GraphicsDevice> Default for DrawList<D> {
    fn default() -> Self {
        Self::new()
    }
}
