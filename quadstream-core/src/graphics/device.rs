//! The contract a graphics device has to fulfil so the batch renderer can stream into it.
//!
//! The renderer is written once against [`GraphicsDevice`]; every backend only has to
//! provide buffer allocation, write-mapping, a byte copy and indexed drawing with a
//! set of bound textures. Binding state lives inside the device value that is passed
//! around, never in globals.

use std::borrow::Cow;
use std::fmt::Debug;
use std::hash::Hash;

use thiserror::Error;

/// What a device buffer is bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub label: Cow<'static, str>,
    /// Size in bytes.
    pub size: u64,
    pub usage: BufferUsage,
    /// Whether the CPU is going to map and rewrite the buffer repeatedly.
    pub dynamic_write: bool,
}
impl BufferDescriptor {
    pub fn new(label: impl Into<Cow<'static, str>>, size: u64, usage: BufferUsage) -> Self {
        Self {
            label: label.into(),
            size,
            usage,
            dynamic_write: true,
        }
    }

    /// Whether a buffer created from `other` can stand in for one created from `self`.
    /// Labels are cosmetic and ignored.
    pub fn is_compatible(&self, other: &BufferDescriptor) -> bool {
        self.size == other.size
            && self.usage == other.usage
            && self.dynamic_write == other.dynamic_write
    }
}

/// Errors reported by a device. The renderer treats all of them as unrecoverable
/// and hands them to the caller as is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("out of device memory (requested {requested} bytes)")]
    OutOfMemory { requested: u64 },
    #[error("failed to create buffer '{label}': {reason}")]
    BufferCreation { label: String, reason: String },
    #[error("failed to map buffer '{label}': {reason}")]
    Map { label: String, reason: String },
    #[error("copy of {len} bytes does not fit into buffer '{label}' of {size} bytes")]
    CopyOutOfBounds { label: String, len: u64, size: u64 },
    #[error("copy of {len} bytes is not a multiple of {alignment}")]
    CopyMisaligned { len: u64, alignment: u64 },
    #[error("failed to create texture: {0}")]
    TextureCreation(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unsupported by this device: {0}")]
    Unsupported(String),
}

/// A device owned buffer. Mapped memory has to be at least 4-byte aligned so vertices
/// and indices can be written into it in place.
pub trait DeviceBuffer: Debug {
    fn descriptor(&self) -> &BufferDescriptor;

    /// The CPU visible bytes while the buffer is mapped for writing.
    fn mapped(&self) -> Option<&[u8]>;

    fn mapped_mut(&mut self) -> Option<&mut [u8]>;

    fn is_mapped(&self) -> bool {
        self.mapped().is_some()
    }

    fn size(&self) -> u64 {
        self.descriptor().size
    }

    fn usage(&self) -> BufferUsage {
        self.descriptor().usage
    }
}

pub trait GraphicsDevice {
    type Buffer: DeviceBuffer;
    /// Textures are compared by identity (handle equality), never by content.
    type Texture: Clone + Eq + Hash + Debug;

    /// A human readable backend name, used for logging.
    fn name(&self) -> &str;

    /// Allocates a new, unmapped buffer.
    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<Self::Buffer, DeviceError>;

    /// Gives a buffer back to the device. Every created buffer must be released exactly once.
    fn release_buffer(&mut self, buffer: Self::Buffer);

    /// Maps the buffer so [`DeviceBuffer::mapped_mut`] exposes its memory.
    fn map_for_write(&mut self, buffer: &mut Self::Buffer) -> Result<(), DeviceError>;

    fn unmap(&mut self, buffer: &mut Self::Buffer);

    /// Uploads `data` to the start of `destination`. `data.len()` must be a multiple of
    /// [`COPY_ALIGNMENT`].
    fn copy_bytes(&mut self, destination: &mut Self::Buffer, data: &[u8]) -> Result<(), DeviceError>;

    /// Creates a texture from tightly packed RGBA8 pixels.
    fn create_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<Self::Texture, DeviceError>;

    fn release_texture(&mut self, texture: Self::Texture);

    fn bind_vertex_buffer(&mut self, buffer: &Self::Buffer) -> Result<(), DeviceError>;

    fn bind_index_buffer(&mut self, buffer: &Self::Buffer) -> Result<(), DeviceError>;

    /// Binds `textures` to the consecutive slots starting at `first_slot`.
    fn bind_textures(&mut self, first_slot: u32, textures: &[Self::Texture]) -> Result<(), DeviceError>;

    /// Draws `index_count` indices from the bound index buffer, offsetting every index
    /// by `base_vertex`.
    fn draw_indexed(&mut self, index_count: u32, base_vertex: i32) -> Result<(), DeviceError>;

    /// How many textures a single draw can sample from.
    fn max_texture_slots(&self) -> u32;
}

/// Alignment every [`GraphicsDevice::copy_bytes`] length has to honour.
pub const COPY_ALIGNMENT: usize = 4;
