use bytemuck_derive::{Pod, Zeroable};
use glam::Vec2;
use palette::Srgba;

/// Index type written into the index staging buffer.
pub type Index = u16;

/// Largest number of vertices a single batch can address with [`Index`].
pub const MAX_ADDRESSABLE_VERTICES: usize = Index::MAX as usize + 1;

/// The vertex every batch is made of. The layout is part of the pipeline contract:
///
/// | location | field       | format      | offset |
/// |----------|-------------|-------------|--------|
/// | 0        | `position`  | `f32 x 2`   | 0      |
/// | 1        | `tex_coord` | `f32 x 2`   | 8      |
/// | 2        | `color`     | `f32 x 4`   | 16     |
/// | 3        | `tex_slot`  | `u32 x 2`   | 32     |
///
/// The texture slot is a 64-bit id split into low/high words, since not every
/// pipeline accepts a 64-bit vertex attribute.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
    pub color: [f32; 4],
    pub tex_slot: [u32; 2],
}
impl Vertex {
    pub fn new(position: Vec2, tex_coord: Vec2, color: [f32; 4], tex_slot: u64) -> Self {
        Self {
            position: position.to_array(),
            tex_coord: tex_coord.to_array(),
            color,
            tex_slot: [tex_slot as u32, (tex_slot >> 32) as u32],
        }
    }

    /// Reassembles the split texture slot id.
    pub fn slot(&self) -> u64 {
        self.tex_slot[0] as u64 | ((self.tex_slot[1] as u64) << 32)
    }

    #[cfg(feature = "wgpu-backend")]
    const ATTRIBUTES: [wgpu::VertexAttribute; 4] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2, 2 => Float32x4, 3 => Uint32x2];

    /// The vertex buffer layout a pipeline consuming batches has to declare.
    #[cfg(feature = "wgpu-backend")]
    pub fn buffer_layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: VERTEX_SIZE as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}
pub const VERTEX_SIZE: usize = std::mem::size_of::<Vertex>();
pub const INDEX_SIZE: usize = std::mem::size_of::<Index>();

/// Typical quad indexing (0-1-2, 2-3-0), relative to the quad's first vertex
pub const QUAD_INDICES: [Index; 6] = [0, 1, 2, 2, 3, 0];
pub const QUAD_VERTEX_COUNT: usize = 4;
pub const QUAD_INDEX_COUNT: usize = QUAD_INDICES.len();

/// An axis aligned quad. `size` holds the half extents.
#[derive(Debug, Clone, Copy)]
pub struct Quad {
    pub center: Vec2,
    pub size: Vec2,
    /// If there is a texture set, this tints the texture
    pub color: Srgba,
}
impl Quad {
    pub fn new(center: Vec2, size: Vec2, color: Srgba) -> Self {
        Self { center, size, color }
    }

    /// A unit quad centered on the origin in opaque white.
    pub fn unit() -> Self {
        Self::new(Vec2::ZERO, Vec2::splat(0.5), Srgba::new(1.0, 1.0, 1.0, 1.0))
    }

    pub fn vertices(&self, tex_slot: u64) -> [Vertex; QUAD_VERTEX_COUNT] {
        let (x, y) = (self.center.x, self.center.y);
        let (w, h) = (self.size.x, self.size.y);
        let color: [f32; 4] = self.color.into();
        [
            Vertex::new(Vec2::new(x - w, y - h), Vec2::new(0.0, 1.0), color, tex_slot),
            Vertex::new(Vec2::new(x - w, y + h), Vec2::new(0.0, 0.0), color, tex_slot),
            Vertex::new(Vec2::new(x + w, y + h), Vec2::new(1.0, 0.0), color, tex_slot),
            Vertex::new(Vec2::new(x + w, y - h), Vec2::new(1.0, 1.0), color, tex_slot),
        ]
    }
}
