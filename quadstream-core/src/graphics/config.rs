use std::borrow::Cow;

use super::vertex::{MAX_ADDRESSABLE_VERTICES, QUAD_INDEX_COUNT, QUAD_VERTEX_COUNT};

/// Sizing of a [`BatchRenderer`](super::BatchRenderer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererConfig {
    /// Staging capacity in quads. Also the largest single reservation.
    pub quads_per_batch: usize,
    /// Buffers per role allocated into the recycle pool up front.
    pub prewarm_buffers: usize,
    /// Buffers per role kept for reuse, the rest is released at `begin`.
    pub max_pooled_buffers: usize,
    /// Prefix of every device buffer label.
    pub label: Cow<'static, str>,
}
impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            quads_per_batch: 256,
            prewarm_buffers: 0,
            max_pooled_buffers: 32,
            label: Cow::Borrowed("batch renderer"),
        }
    }
}
impl RendererConfig {
    pub fn with_quads_per_batch(mut self, quads_per_batch: usize) -> Self {
        self.quads_per_batch = quads_per_batch;
        self
    }

    pub fn with_prewarm_buffers(mut self, prewarm_buffers: usize) -> Self {
        self.prewarm_buffers = prewarm_buffers;
        self
    }

    pub fn with_max_pooled_buffers(mut self, max_pooled_buffers: usize) -> Self {
        self.max_pooled_buffers = max_pooled_buffers;
        self
    }

    pub fn with_label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = label.into();
        self
    }

    pub fn vertex_capacity(&self) -> usize {
        self.quads_per_batch * QUAD_VERTEX_COUNT
    }

    pub fn index_capacity(&self) -> usize {
        self.quads_per_batch * QUAD_INDEX_COUNT
    }

    /// # Panics
    /// On a configuration the renderer can't work with.
    pub fn validate(&self) {
        assert!(self.quads_per_batch > 0, "quads_per_batch must be at least 1");
        assert!(
            self.vertex_capacity() <= MAX_ADDRESSABLE_VERTICES,
            "{} quads per batch need {} vertices, 16-bit indices address at most {MAX_ADDRESSABLE_VERTICES}",
            self.quads_per_batch,
            self.vertex_capacity()
        );
        assert!(
            self.prewarm_buffers <= self.max_pooled_buffers,
            "prewarming {} buffers exceeds the pool limit of {}",
            self.prewarm_buffers,
            self.max_pooled_buffers
        );
    }
}
