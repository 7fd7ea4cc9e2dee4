use wgpu::{
    Device, Extent3d, Queue, Sampler, SamplerDescriptor, Texture, TextureView, TextureViewDescriptor,
};

/// A texture together with the view and sampler a batch binds it through.
#[derive(Debug)]
pub struct TextureBundle {
    extent: Extent3d,
    texture: Texture,
    view: TextureView,
    sampler: Sampler,
}
impl TextureBundle {
    /// Uploads tightly packed RGBA8 pixels into a new sRGB texture.
    pub fn new(
        device: &Device,
        queue: &Queue,
        label: &str,
        extent: Extent3d,
        rgba: &[u8],
        sampler_descriptor: &SamplerDescriptor,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor::default());
        let sampler = device.create_sampler(sampler_descriptor);

        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * extent.width),
                rows_per_image: Some(extent.height),
            },
            extent,
        );

        Self {
            extent,
            texture,
            view,
            sampler,
        }
    }

    /// A clamped, linearly magnified texture, which is what sprites usually want.
    pub fn from_rgba(device: &Device, queue: &Queue, label: &str, width: u32, height: u32, rgba: &[u8]) -> Self {
        let extent = Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let sampler_descriptor = wgpu::SamplerDescriptor {
            label: Some(label),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        };
        Self::new(device, queue, label, extent, rgba, &sampler_descriptor)
    }

    pub fn view(&self) -> &TextureView {
        &self.view
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }
    pub fn height(&self) -> u32 {
        self.extent.height
    }
}
impl PartialEq for TextureBundle {
    fn eq(&self, other: &Self) -> bool {
        self.extent == other.extent
            && self.texture.global_id() == other.texture.global_id()
            && self.sampler.global_id() == other.sampler.global_id()
    }
}
