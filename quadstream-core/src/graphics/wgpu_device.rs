//! [`GraphicsDevice`] on top of wgpu.
//!
//! wgpu has no persistently mapped buffers on most backends, so every buffer carries a
//! host shadow that acts as its mapped memory and gets uploaded through the queue on
//! unmap. Binds and draws are recorded and replayed into a render pass by
//! [`WgpuDevice::encode_pass`], because a wgpu render pass can't outlive the calls
//! that would otherwise feed it.

use std::hash::{Hash, Hasher};
use std::num::NonZeroU32;
use std::sync::Arc;

use rustc_hash::FxHashSet as HashSet;
use wgpu::{BindGroup, BindGroupLayout, CommandEncoder, RenderPipeline, TextureView};

use super::device::{BufferDescriptor, BufferUsage, DeviceBuffer, DeviceError, GraphicsDevice, COPY_ALIGNMENT};
use super::texture_bundle::TextureBundle;
use crate::utils::*;

#[derive(Debug)]
pub struct WgpuBuffer {
    id: u64,
    raw: Arc<wgpu::Buffer>,
    descriptor: BufferDescriptor,
    // Words keep the mapped bytes 4-byte aligned
    shadow: Vec<u32>,
    mapped: bool,
}
impl WgpuBuffer {
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.raw
    }
}
impl DeviceBuffer for WgpuBuffer {
    fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    fn mapped(&self) -> Option<&[u8]> {
        self.mapped.then(|| bytemuck::cast_slice(&self.shadow))
    }

    fn mapped_mut(&mut self) -> Option<&mut [u8]> {
        if self.mapped {
            Some(bytemuck::cast_slice_mut(&mut self.shadow))
        } else {
            None
        }
    }
}

/// A texture handle. Two handles are equal when they refer to the same upload.
#[derive(Debug, Clone)]
pub struct WgpuTexture {
    id: u64,
    bundle: Arc<TextureBundle>,
}
impl WgpuTexture {
    pub fn bundle(&self) -> &TextureBundle {
        &self.bundle
    }
}
impl PartialEq for WgpuTexture {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for WgpuTexture {}
impl Hash for WgpuTexture {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[derive(Debug)]
enum WgpuCommand {
    SetVertexBuffer(Arc<wgpu::Buffer>),
    SetIndexBuffer(Arc<wgpu::Buffer>),
    SetTextures(BindGroup),
    DrawIndexed { index_count: u32, base_vertex: i32 },
}

#[derive(Debug)]
pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    texture_layout: BindGroupLayout,
    max_texture_slots: u32,

    next_id: u64,
    live_buffers: HashSet<u64>,
    commands: Vec<WgpuCommand>,
}
impl WgpuDevice {
    /// Upper bound for the slot count, independent of what the adapter supports.
    pub const MAX_TEXTURE_SLOTS: u32 = 16;
    /// The bind group index the texture arrays are bound at.
    pub const TEXTURE_BIND_GROUP: u32 = 0;

    /// Features the `wgpu::Device` has to be requested with.
    pub fn required_features() -> wgpu::Features {
        wgpu::Features::TEXTURE_BINDING_ARRAY
            | wgpu::Features::SAMPLED_TEXTURE_AND_STORAGE_BUFFER_ARRAY_NON_UNIFORM_INDEXING
    }

    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Result<Self, DeviceError> {
        let missing = Self::required_features() - device.features();
        if !missing.is_empty() {
            return Err(DeviceError::Unsupported(format!("missing device features {missing:?}")));
        }

        let limits = device.limits();
        let max_texture_slots = Self::MAX_TEXTURE_SLOTS
            .min(limits.max_sampled_textures_per_shader_stage)
            .min(limits.max_samplers_per_shader_stage);
        let texture_layout = Self::create_bind_group_layout(&device, max_texture_slots);

        Ok(Self {
            device,
            queue,
            texture_layout,
            max_texture_slots,
            next_id: 0,
            live_buffers: HashSet::default(),
            commands: vec![],
        })
    }

    /// The layout of the texture bind group, for the caller's pipeline layout.
    pub fn texture_bind_group_layout(&self) -> &BindGroupLayout {
        &self.texture_layout
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Texture view array at binding 0, sampler array at binding 1.
    fn create_bind_group_layout(device: &wgpu::Device, slots: u32) -> BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("batch texture bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: NonZeroU32::new(slots),
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: NonZeroU32::new(slots),
                },
            ],
        })
    }

    /// Replays everything recorded since the last call into one render pass on `target`.
    /// `extra_bind_groups` are set once up front, e.g. a camera uniform.
    pub fn encode_pass(
        &mut self,
        encoder: &mut CommandEncoder,
        target: &TextureView,
        pipeline: &RenderPipeline,
        clear: Option<wgpu::Color>,
        extra_bind_groups: &[(u32, &BindGroup)],
    ) {
        #[cfg(feature = "trace")]
        let _span = info_span!("WgpuDevice::encode_pass").entered();

        let commands = std::mem::take(&mut self.commands);
        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("BatchRenderer render pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: clear.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rpass.set_pipeline(pipeline);
        for (index, bind_group) in extra_bind_groups {
            rpass.set_bind_group(*index, bind_group, &[]);
        }

        for command in commands.iter() {
            match command {
                WgpuCommand::SetVertexBuffer(buffer) => rpass.set_vertex_buffer(0, buffer.slice(..)),
                WgpuCommand::SetIndexBuffer(buffer) => {
                    rpass.set_index_buffer(buffer.slice(..), wgpu::IndexFormat::Uint16)
                }
                WgpuCommand::SetTextures(bind_group) => {
                    rpass.set_bind_group(Self::TEXTURE_BIND_GROUP, bind_group, &[])
                }
                WgpuCommand::DrawIndexed {
                    index_count,
                    base_vertex,
                } => rpass.draw_indexed(0..*index_count, *base_vertex, 0..1),
            }
        }
        trace!("Encoded {} batch commands", commands.len());
    }
}
impl GraphicsDevice for WgpuDevice {
    type Buffer = WgpuBuffer;
    type Texture = WgpuTexture;

    fn name(&self) -> &str {
        "wgpu"
    }

    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<WgpuBuffer, DeviceError> {
        if descriptor.size > self.device.limits().max_buffer_size {
            return Err(DeviceError::OutOfMemory { requested: descriptor.size });
        }
        let usage = match descriptor.usage {
            BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
            BufferUsage::Index => wgpu::BufferUsages::INDEX,
        } | wgpu::BufferUsages::COPY_DST;
        let size = align_up(descriptor.size as usize, COPY_ALIGNMENT);

        let raw = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(descriptor.label.as_ref()),
            size: size as u64,
            usage,
            mapped_at_creation: false,
        });
        let id = self.next_id();
        self.live_buffers.insert(id);

        Ok(WgpuBuffer {
            id,
            raw: Arc::new(raw),
            descriptor: descriptor.clone(),
            shadow: vec![0; size / 4],
            mapped: false,
        })
    }

    fn release_buffer(&mut self, buffer: WgpuBuffer) {
        assert!(
            self.live_buffers.remove(&buffer.id),
            "buffer '{}' released twice or not owned by this device",
            buffer.descriptor.label
        );
        // Recorded commands may still hold the buffer, wgpu frees it once they are gone
    }

    fn map_for_write(&mut self, buffer: &mut WgpuBuffer) -> Result<(), DeviceError> {
        if buffer.mapped {
            return Err(DeviceError::Map {
                label: buffer.descriptor.label.to_string(),
                reason: "already mapped".into(),
            });
        }
        buffer.mapped = true;
        Ok(())
    }

    fn unmap(&mut self, buffer: &mut WgpuBuffer) {
        if buffer.mapped {
            self.queue
                .write_buffer(&buffer.raw, 0, bytemuck::cast_slice(&buffer.shadow));
            buffer.mapped = false;
        }
    }

    fn copy_bytes(&mut self, destination: &mut WgpuBuffer, data: &[u8]) -> Result<(), DeviceError> {
        if data.len() % COPY_ALIGNMENT != 0 {
            return Err(DeviceError::CopyMisaligned {
                len: data.len() as u64,
                alignment: COPY_ALIGNMENT as u64,
            });
        }
        if data.len() as u64 > destination.raw.size() {
            return Err(DeviceError::CopyOutOfBounds {
                label: destination.descriptor.label.to_string(),
                len: data.len() as u64,
                size: destination.raw.size(),
            });
        }
        if !data.is_empty() {
            self.queue.write_buffer(&destination.raw, 0, data);
        }
        Ok(())
    }

    fn create_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<WgpuTexture, DeviceError> {
        if width == 0 || height == 0 || rgba.len() != width as usize * height as usize * 4 {
            return Err(DeviceError::TextureCreation(format!(
                "{} bytes don't describe a {width}x{height} RGBA texture",
                rgba.len()
            )));
        }
        let id = self.next_id();
        let bundle = TextureBundle::from_rgba(
            &self.device,
            &self.queue,
            &format!("batch texture {id}"),
            width,
            height,
            rgba,
        );
        Ok(WgpuTexture {
            id,
            bundle: Arc::new(bundle),
        })
    }

    fn release_texture(&mut self, texture: WgpuTexture) {
        drop(texture);
    }

    fn bind_vertex_buffer(&mut self, buffer: &WgpuBuffer) -> Result<(), DeviceError> {
        self.commands.push(WgpuCommand::SetVertexBuffer(buffer.raw.clone()));
        Ok(())
    }

    fn bind_index_buffer(&mut self, buffer: &WgpuBuffer) -> Result<(), DeviceError> {
        self.commands.push(WgpuCommand::SetIndexBuffer(buffer.raw.clone()));
        Ok(())
    }

    fn bind_textures(&mut self, first_slot: u32, textures: &[WgpuTexture]) -> Result<(), DeviceError> {
        if first_slot != 0 {
            return Err(DeviceError::Unsupported("texture sets have to start at slot 0".into()));
        }
        let Some(first) = textures.first() else {
            return Err(DeviceError::Validation("binding an empty texture set".into()));
        };
        if textures.len() > self.max_texture_slots as usize {
            return Err(DeviceError::Validation(format!(
                "{} textures exceed the {} texture slots",
                textures.len(),
                self.max_texture_slots
            )));
        }

        // Every array element has to be bound, the unused tail repeats the first texture
        let bundles = textures
            .iter()
            .chain(std::iter::repeat(first))
            .take(self.max_texture_slots as usize)
            .map(|t| t.bundle());
        let (views, samplers): (Vec<_>, Vec<_>) = bundles.map(|b| (b.view(), b.sampler())).unzip();

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("batch texture bind group"),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureViewArray(&views),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::SamplerArray(&samplers),
                },
            ],
        });
        self.commands.push(WgpuCommand::SetTextures(bind_group));
        Ok(())
    }

    fn draw_indexed(&mut self, index_count: u32, base_vertex: i32) -> Result<(), DeviceError> {
        self.commands.push(WgpuCommand::DrawIndexed {
            index_count,
            base_vertex,
        });
        Ok(())
    }

    fn max_texture_slots(&self) -> u32 {
        self.max_texture_slots
    }
}
