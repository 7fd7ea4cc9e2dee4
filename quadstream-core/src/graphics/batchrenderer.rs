use std::thread::ThreadId;

use super::buffer_pool::{BufferPool, BufferSource};
use super::config::RendererConfig;
use super::device::{BufferDescriptor, BufferUsage, DeviceError, GraphicsDevice, COPY_ALIGNMENT};
use super::render_buffer::{DrawList, RenderBuffer};
use super::staging_buffer::StagingBuffer;
use super::texture_slots::TextureSlots;
use super::vertex::{Index, Quad, Vertex, INDEX_SIZE, QUAD_INDEX_COUNT, QUAD_INDICES, QUAD_VERTEX_COUNT, VERTEX_SIZE};
use crate::utils::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// No frame was started yet.
    Idle,
    /// Between `begin` and `end`, reservations are accepted.
    Begun,
    /// The frame's batches are final and can be drawn.
    Ended,
}

/// Why a batch was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The next texture didn't fit into the batch's slots.
    TextureSlots,
    /// The staging buffers couldn't hold the next reservation.
    Capacity,
    EndOfFrame,
    /// The caller asked for it through [`BatchRenderer::flush`].
    Requested,
}

/// Counters of the current (or last finished) frame. Reset by `begin`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub reservations: usize,
    pub texture_slot_flushes: usize,
    pub capacity_flushes: usize,
    pub end_of_frame_flushes: usize,
    pub requested_flushes: usize,
    /// Device buffers allocated this frame.
    pub fresh_buffers: usize,
    /// Device buffers taken from the recycle pool this frame.
    pub recycled_buffers: usize,
    pub vertices: usize,
    pub indices: usize,
}
impl FrameStats {
    /// Flushes that produced a batch.
    pub fn flushes(&self) -> usize {
        self.texture_slot_flushes + self.capacity_flushes + self.end_of_frame_flushes + self.requested_flushes
    }

    fn count_flush(&mut self, reason: FlushReason) {
        match reason {
            FlushReason::TextureSlots => self.texture_slot_flushes += 1,
            FlushReason::Capacity => self.capacity_flushes += 1,
            FlushReason::EndOfFrame => self.end_of_frame_flushes += 1,
            FlushReason::Requested => self.requested_flushes += 1,
        }
    }

    fn count_buffer(&mut self, source: BufferSource) {
        match source {
            BufferSource::Fresh => self.fresh_buffers += 1,
            BufferSource::Recycled => self.recycled_buffers += 1,
        }
    }
}

/// Writable view of one reservation, handed out by [`BatchRenderer::reserve`].
///
/// Indices are written relative to the reservation, `0` being its first vertex. The
/// renderer moves them to their place in the batch once the region is done, so
/// [`MappedRegion::base_vertex`] is only informational.
#[derive(Debug)]
pub struct MappedRegion<'a> {
    vertices: &'a mut [Vertex],
    indices: &'a mut [Index],
    base_vertex: u32,
    texture_slot: u32,
}
impl MappedRegion<'_> {
    pub fn vertices_mut(&mut self) -> &mut [Vertex] {
        self.vertices
    }

    pub fn indices_mut(&mut self) -> &mut [Index] {
        self.indices
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Where the region's first vertex ends up inside its batch.
    pub fn base_vertex(&self) -> u32 {
        self.base_vertex
    }

    /// The slot the reserved texture is bound to. Vertices have to carry it.
    pub fn texture_slot(&self) -> u32 {
        self.texture_slot
    }

    /// Writes the `n`-th quad of the region: 4 vertices and 6 indices.
    pub fn write_quad(&mut self, n: usize, quad: &Quad) {
        let (first_vertex, first_index) = (n * QUAD_VERTEX_COUNT, n * QUAD_INDEX_COUNT);
        assert!(
            first_vertex + QUAD_VERTEX_COUNT <= self.vertices.len()
                && first_index + QUAD_INDEX_COUNT <= self.indices.len(),
            "quad {n} doesn't fit a region of {} vertices and {} indices",
            self.vertices.len(),
            self.indices.len()
        );
        self.vertices[first_vertex..first_vertex + QUAD_VERTEX_COUNT]
            .copy_from_slice(&quad.vertices(self.texture_slot as u64));
        for (dst, src) in self.indices[first_index..first_index + QUAD_INDEX_COUNT].iter_mut().zip(QUAD_INDICES) {
            *dst = src + first_vertex as Index;
        }
    }
}

/// The last reservation, whose indices are still relative to its first vertex.
#[derive(Debug, Clone, Copy)]
struct PendingRegion {
    first_index: usize,
    index_count: usize,
    base_vertex: usize,
    vertex_count: usize,
}

/// Streams quads into device buffers, one batch per texture set or filled staging buffer.
///
/// A frame goes `begin`, any number of `reserve`s, `end`, then `draw` as often as needed.
/// Batches are copied out of the two persistently mapped staging buffers into buffers
/// from the recycle pool; those are handed back to the pool at the next `begin`, so a
/// steady workload stops allocating after its first frame.
///
/// All calls have to come from the thread that created the renderer.
#[derive(Debug)]
pub struct BatchRenderer<D: GraphicsDevice> {
    device: D,
    config: RendererConfig,

    vertex_staging: StagingBuffer<D>,
    index_staging: StagingBuffer<D>,
    pool: BufferPool<D>,
    slots: TextureSlots<D::Texture>,
    render_buffers: DrawList<D>,
    /// Stands in for untextured draws
    white_pixel: D::Texture,

    state: FrameState,
    // Running totals of the open batch
    vertex_count: usize,
    index_count: usize,
    pending: Option<PendingRegion>,

    stats: FrameStats,
    owner: ThreadId,
}
impl<D: GraphicsDevice> BatchRenderer<D> {
    pub fn new(mut device: D, config: RendererConfig) -> Result<Self, DeviceError> {
        #[cfg(feature = "trace")]
        let _span = info_span!("BatchRenderer::new").entered();

        config.validate();
        let slots = TextureSlots::new(device.max_texture_slots());

        let vertex_descriptor = BufferDescriptor::new(
            format!("{} vertices", config.label),
            align_up(config.vertex_capacity() * VERTEX_SIZE, COPY_ALIGNMENT) as u64,
            BufferUsage::Vertex,
        );
        let index_descriptor = BufferDescriptor::new(
            format!("{} indices", config.label),
            align_up(config.index_capacity() * INDEX_SIZE, COPY_ALIGNMENT) as u64,
            BufferUsage::Index,
        );

        let white_pixel = device.create_texture(1, 1, &[255, 255, 255, 255])?;

        info!(
            "Created batch renderer on the {} device: {} quads per batch, {} usable texture slots",
            device.name(),
            config.quads_per_batch,
            slots.capacity()
        );

        // From here on Drop cleans up whatever got allocated
        let mut renderer = Self {
            device,
            vertex_staging: StagingBuffer::new(vertex_descriptor.clone()),
            index_staging: StagingBuffer::new(index_descriptor.clone()),
            pool: BufferPool::new([vertex_descriptor, index_descriptor]),
            slots,
            render_buffers: DrawList::new(),
            white_pixel,
            state: FrameState::Idle,
            vertex_count: 0,
            index_count: 0,
            pending: None,
            stats: FrameStats::default(),
            owner: std::thread::current().id(),
            config,
        };
        for usage in [BufferUsage::Vertex, BufferUsage::Index] {
            renderer
                .pool
                .prewarm(&mut renderer.device, usage, renderer.config.prewarm_buffers)?;
        }
        Ok(renderer)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// The largest number of vertices a single reservation can ask for.
    pub fn max_reserved_vertices(&self) -> usize {
        self.config.vertex_capacity()
    }

    /// The largest number of indices a single reservation can ask for.
    pub fn max_reserved_indices(&self) -> usize {
        self.config.index_capacity()
    }

    /// How many distinct textures fit into one batch.
    pub fn texture_slot_capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// The 1x1 opaque white texture used for untextured reservations.
    pub fn white_texture(&self) -> &D::Texture {
        &self.white_pixel
    }

    /// The batches of the current frame, in draw order.
    pub fn render_buffers(&self) -> &[RenderBuffer<D>] {
        self.render_buffers.as_slice()
    }

    pub fn frame_stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Buffers (of all roles) waiting in the recycle pool.
    pub fn pooled_buffers(&self) -> usize {
        self.pool.total_len()
    }

    fn assert_owner_thread(&self) {
        debug_assert_eq!(
            self.owner,
            std::thread::current().id(),
            "batch renderer used from a thread other than the one that created it"
        );
    }

    /// Starts a frame. The previous frame's batches go back to the recycle pool and both
    /// staging buffers get mapped again, preferring pooled buffers over new ones.
    pub fn begin(&mut self) -> Result<(), DeviceError> {
        #[cfg(feature = "trace")]
        let _span = info_span!("BatchRenderer::begin").entered();
        self.assert_owner_thread();
        assert!(self.state != FrameState::Begun, "begin called twice without end");

        self.stats = FrameStats::default();
        self.render_buffers.retire_into(&mut self.pool);
        self.pool.trim(&mut self.device, self.config.max_pooled_buffers);
        self.slots.clear();

        for staging in [&mut self.vertex_staging, &mut self.index_staging] {
            let usage = staging.descriptor().usage;
            let previous = match self.pool.pop(usage) {
                Some(buffer) => {
                    self.stats.count_buffer(BufferSource::Recycled);
                    staging.reset_from_existing_buffer(&mut self.device, buffer)?
                }
                None => {
                    self.stats.count_buffer(BufferSource::Fresh);
                    staging.reset_from_fresh_buffer(&mut self.device)?
                }
            };
            if let Some(previous) = previous {
                self.pool.push(previous);
            }
        }

        self.vertex_count = 0;
        self.index_count = 0;
        self.pending = None;
        self.state = FrameState::Begun;
        Ok(())
    }

    /// Reserves room for `vertex_count` vertices and `index_count` indices drawn with
    /// `texture` (or the white pixel for `None`). Closes the open batch first if the
    /// staging buffers or the texture slots are full.
    ///
    /// # Panics
    /// Outside of `begin`/`end`, on empty reservations, and on reservations larger
    /// than [`Self::max_reserved_vertices`]/[`Self::max_reserved_indices`].
    pub fn reserve(
        &mut self,
        vertex_count: usize,
        index_count: usize,
        texture: Option<&D::Texture>,
    ) -> Result<MappedRegion<'_>, DeviceError> {
        #[cfg(feature = "trace")]
        let _span = info_span!("BatchRenderer::reserve").entered();
        self.assert_owner_thread();
        assert!(self.state == FrameState::Begun, "reserve called outside of begin/end");
        assert!(
            vertex_count > 0 && index_count > 0,
            "empty reservation ({vertex_count} vertices, {index_count} indices)"
        );
        assert!(
            vertex_count <= self.max_reserved_vertices() && index_count <= self.max_reserved_indices(),
            "reservation of {vertex_count} vertices/{index_count} indices exceeds the capacity of {}/{}",
            self.max_reserved_vertices(),
            self.max_reserved_indices()
        );

        self.seal_pending();
        let texture = texture.unwrap_or(&self.white_pixel).clone();
        let (vertex_bytes, index_bytes) = (vertex_count * VERTEX_SIZE, index_count * INDEX_SIZE);

        let mut retries = 0;
        let texture_slot = loop {
            let reason = if !self.vertex_staging.fits(vertex_bytes) || !self.index_staging.fits(index_bytes) {
                FlushReason::Capacity
            } else {
                match self.slots.get_slot(&texture) {
                    Ok(slot) => break slot,
                    Err(_) => FlushReason::TextureSlots,
                }
            };
            // An empty batch always fits a valid reservation
            assert!(
                retries < 1,
                "reservation of {vertex_count} vertices/{index_count} indices doesn't fit an empty batch"
            );
            retries += 1;
            self.flush_batch(reason)?;
        };

        let (Some(vertex_range), Some(index_range)) = (
            self.vertex_staging.reserve(vertex_bytes),
            self.index_staging.reserve(index_bytes),
        ) else {
            unreachable!("staging space was checked before reserving");
        };

        let base_vertex = self.vertex_count;
        self.pending = Some(PendingRegion {
            first_index: self.index_count,
            index_count,
            base_vertex,
            vertex_count,
        });
        self.vertex_count += vertex_count;
        self.index_count += index_count;
        self.stats.reservations += 1;
        self.stats.vertices += vertex_count;
        self.stats.indices += index_count;

        Ok(MappedRegion {
            vertices: bytemuck::cast_slice_mut(self.vertex_staging.mapped_range_mut(vertex_range)),
            indices: bytemuck::cast_slice_mut(self.index_staging.mapped_range_mut(index_range)),
            base_vertex: base_vertex as u32,
            texture_slot,
        })
    }

    /// Convenience over [`Self::reserve`] for a single quad.
    pub fn draw_quad(&mut self, quad: &Quad, texture: Option<&D::Texture>) -> Result<(), DeviceError> {
        let mut region = self.reserve(QUAD_VERTEX_COUNT, QUAD_INDEX_COUNT, texture)?;
        region.write_quad(0, quad);
        Ok(())
    }

    /// Closes the open batch early, e.g. before the caller changes pipeline state.
    /// Does nothing if nothing was reserved since the last flush.
    pub fn flush(&mut self) -> Result<(), DeviceError> {
        #[cfg(feature = "trace")]
        let _span = info_span!("BatchRenderer::flush").entered();
        self.assert_owner_thread();
        assert!(self.state == FrameState::Begun, "flush called outside of begin/end");
        self.flush_batch(FlushReason::Requested)
    }

    /// Finishes the frame: the open batch is flushed and the staging buffers are unmapped.
    pub fn end(&mut self) -> Result<(), DeviceError> {
        #[cfg(feature = "trace")]
        let _span = info_span!("BatchRenderer::end").entered();
        self.assert_owner_thread();
        assert!(self.state == FrameState::Begun, "end called without begin");

        self.flush_batch(FlushReason::EndOfFrame)?;
        self.vertex_staging.unmap(&mut self.device);
        self.index_staging.unmap(&mut self.device);
        self.state = FrameState::Ended;

        debug!(
            "Frame ended with {} batches: {:?}",
            self.render_buffers.len(),
            self.stats
        );
        Ok(())
    }

    /// Draws the frame's batches in the order they were flushed. May be repeated until
    /// the next `begin`.
    pub fn draw(&mut self) -> Result<(), DeviceError> {
        #[cfg(feature = "trace")]
        let _span = info_span!("BatchRenderer::draw").entered();
        self.assert_owner_thread();
        assert!(
            self.state != FrameState::Begun,
            "draw called between begin and end, the frame's batches aren't final yet"
        );
        self.render_buffers.submit(&mut self.device)
    }

    /// Moves the last reservation's indices from region-local to batch-global values.
    fn seal_pending(&mut self) {
        let Some(region) = self.pending.take() else {
            return;
        };
        let bytes = region.first_index * INDEX_SIZE..(region.first_index + region.index_count) * INDEX_SIZE;
        let indices: &mut [Index] = bytemuck::cast_slice_mut(self.index_staging.mapped_range_mut(bytes));
        for index in indices {
            debug_assert!(
                (*index as usize) < region.vertex_count,
                "index {} is outside its reservation of {} vertices",
                index,
                region.vertex_count
            );
            *index += region.base_vertex as Index;
        }
    }

    /// Copies the open batch into device buffers and appends it to the frame's batches.
    fn flush_batch(&mut self, reason: FlushReason) -> Result<(), DeviceError> {
        self.seal_pending();
        if self.vertex_count == 0 {
            return Ok(());
        }

        let (mut vertex_buffer, vertex_source) = self.pool.acquire(&mut self.device, BufferUsage::Vertex)?;
        let (mut index_buffer, index_source) = match self.pool.acquire(&mut self.device, BufferUsage::Index) {
            Ok(acquired) => acquired,
            Err(err) => {
                self.pool.push(vertex_buffer);
                return Err(err);
            }
        };
        let copied = self
            .device
            .copy_bytes(&mut vertex_buffer, self.vertex_staging.staged_bytes())
            .and_then(|()| self.device.copy_bytes(&mut index_buffer, self.index_staging.staged_bytes()));
        if let Err(err) = copied {
            self.pool.push(vertex_buffer);
            self.pool.push(index_buffer);
            return Err(err);
        }
        self.stats.count_buffer(vertex_source);
        self.stats.count_buffer(index_source);
        self.stats.count_flush(reason);

        let textures = self.slots.take();
        trace!("Flushing batch");
        trace!("    - Reason: {:?}", reason);
        trace!("    - Vertices: {}, indices: {}", self.vertex_count, self.index_count);
        trace!("    - Num textures: {}", textures.len());
        trace!("    - Buffers: vertex {:?}, index {:?}", vertex_source, index_source);

        self.render_buffers.push(RenderBuffer::new(
            vertex_buffer,
            index_buffer,
            self.vertex_count as u32,
            self.index_count as u32,
            textures,
        ));
        self.vertex_staging.clear_reserved();
        self.index_staging.clear_reserved();
        self.vertex_count = 0;
        self.index_count = 0;
        Ok(())
    }
}
impl<D: GraphicsDevice> Drop for BatchRenderer<D> {
    fn drop(&mut self) {
        self.render_buffers.release_all(&mut self.device);
        self.pool.release_all(&mut self.device);
        for staging in [&mut self.vertex_staging, &mut self.index_staging] {
            if let Some(buffer) = staging.take_buffer(&mut self.device) {
                self.device.release_buffer(buffer);
            }
        }
        self.device.release_texture(self.white_pixel.clone());
        debug!("Batch renderer released its device resources");
    }
}
