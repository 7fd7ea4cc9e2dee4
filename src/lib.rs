pub mod prelude {
    pub use quadstream_core::graphics::{
        self, BatchRenderer, DeviceError, FrameStats, GraphicsDevice, MappedRegion, Quad, RendererConfig, SoftwareDevice,
        Vertex,
    };
}
