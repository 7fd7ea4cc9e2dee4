//! Streaming quad batching over any [`GraphicsDevice`](graphics::GraphicsDevice).

pub mod graphics;
mod utils;

pub use graphics::{BatchRenderer, MappedRegion, RendererConfig};
