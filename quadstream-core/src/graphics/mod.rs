mod vertex;
pub use vertex::{Index, Quad, Vertex, INDEX_SIZE, MAX_ADDRESSABLE_VERTICES, QUAD_INDEX_COUNT, QUAD_INDICES, QUAD_VERTEX_COUNT, VERTEX_SIZE};

mod device;
pub use device::{BufferDescriptor, BufferUsage, DeviceBuffer, DeviceError, GraphicsDevice, COPY_ALIGNMENT};

mod staging_buffer;
pub use staging_buffer::StagingBuffer;

mod buffer_pool;
pub use buffer_pool::{BufferPool, BufferSource};

mod texture_slots;
pub use texture_slots::{SlotsExhausted, TextureSlots};

mod render_buffer;
pub use render_buffer::{DrawList, RenderBuffer};

mod config;
pub use config::RendererConfig;

mod batchrenderer;
pub use batchrenderer::{BatchRenderer, FlushReason, FrameState, FrameStats, MappedRegion};

pub mod software;
pub use software::SoftwareDevice;

#[cfg(feature = "wgpu-backend")]
mod texture_bundle;
#[cfg(feature = "wgpu-backend")]
pub use texture_bundle::TextureBundle;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_device;
#[cfg(feature = "wgpu-backend")]
pub use wgpu_device::WgpuDevice;
