use std::cell::RefCell;
use std::rc::Rc;

use glam::Vec2;
use palette::Srgba;
use quadstream_core::graphics::software::{DeviceStats, SoftwareTexture};
use quadstream_core::graphics::*;
use rstest::rstest;

fn renderer(texture_slots: u32, quads_per_batch: usize) -> (BatchRenderer<SoftwareDevice>, Rc<RefCell<DeviceStats>>) {
    let device = SoftwareDevice::with_texture_slots(texture_slots);
    let stats = device.shared_stats();
    let config = RendererConfig::default().with_quads_per_batch(quads_per_batch);
    (BatchRenderer::new(device, config).unwrap(), stats)
}

fn textures(renderer: &mut BatchRenderer<SoftwareDevice>, count: usize) -> Vec<SoftwareTexture> {
    (0..count)
        .map(|_| renderer.device_mut().create_texture(1, 1, &[255, 0, 0, 255]).unwrap())
        .collect()
}

fn release(renderer: &mut BatchRenderer<SoftwareDevice>, textures: Vec<SoftwareTexture>) {
    for texture in textures {
        renderer.device_mut().release_texture(texture);
    }
}

fn quad_at(x: f32) -> Quad {
    Quad::new(Vec2::new(x, 0.0), Vec2::splat(0.5), Srgba::new(1.0, 1.0, 1.0, 1.0))
}

#[test]
fn single_textured_quad_makes_one_batch() {
    let (mut renderer, _) = renderer(16, 256);
    let texture = textures(&mut renderer, 1);

    renderer.begin().unwrap();
    let mut region = renderer.reserve(4, 6, Some(&texture[0])).unwrap();
    region.write_quad(0, &Quad::unit());
    renderer.end().unwrap();
    renderer.draw().unwrap();

    let batches = renderer.render_buffers();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].index_count(), 6);
    assert_eq!(batches[0].used_textures(), 1);
    assert_eq!(batches[0].textures()[0], texture[0]);

    let calls = renderer.device_mut().take_draw_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].indices, vec![0, 1, 2, 2, 3, 0]);
    assert_eq!(calls[0].texture(0), Some(&texture[0]));
    assert!(calls[0].indexed_vertices().all(|v| v.slot() == 0));

    release(&mut renderer, texture);
}

#[rstest]
#[case(2)]
#[case(4)]
#[case(16)]
#[case(32)]
fn running_out_of_texture_slots_flushes_once(#[case] device_slots: u32) {
    let (mut renderer, _) = renderer(device_slots, 256);
    let max_slots = renderer.texture_slot_capacity();
    assert_eq!(max_slots, device_slots as usize - 1);
    let textures = textures(&mut renderer, max_slots + 1);

    renderer.begin().unwrap();
    for (i, texture) in textures[..max_slots].iter().enumerate() {
        renderer.draw_quad(&quad_at(i as f32), Some(texture)).unwrap();
    }
    assert!(renderer.render_buffers().is_empty());

    let mut region = renderer.reserve(4, 6, Some(&textures[max_slots])).unwrap();
    assert_eq!(region.texture_slot(), 0);
    region.write_quad(0, &Quad::unit());
    assert_eq!(renderer.frame_stats().texture_slot_flushes, 1);
    assert_eq!(renderer.render_buffers().len(), 1);

    renderer.end().unwrap();
    let batches = renderer.render_buffers();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].textures(), &textures[..max_slots]);
    assert_eq!(batches[1].textures(), &textures[max_slots..]);

    renderer.draw().unwrap();
    assert_eq!(renderer.device().draw_calls().len(), 2);
    release(&mut renderer, textures);
}

#[rstest]
#[case(1)]
#[case(16)]
#[case(256)]
fn exceeding_the_staging_capacity_flushes_once(#[case] quads_per_batch: usize) {
    let (mut renderer, _) = renderer(16, quads_per_batch);

    renderer.begin().unwrap();
    for i in 0..quads_per_batch {
        renderer.draw_quad(&quad_at(i as f32), None).unwrap();
    }
    assert_eq!(renderer.frame_stats().capacity_flushes, 0);
    renderer.draw_quad(&quad_at(-1.0), None).unwrap();
    assert_eq!(renderer.frame_stats().capacity_flushes, 1);
    renderer.end().unwrap();

    let batches = renderer.render_buffers();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].index_count() as usize, quads_per_batch * 6);
    assert_eq!(batches[1].index_count(), 6);
    let total: u32 = batches.iter().map(RenderBuffer::index_count).sum();
    assert_eq!(total as usize, (quads_per_batch + 1) * 6);
}

#[rstest]
#[case::single_quads(&[1, 1, 1, 1, 1, 1, 1, 1, 1, 1])]
#[case::mixed(&[1, 3, 2, 4, 1, 8, 1, 1])]
#[case::full_batches(&[8, 8, 8])]
fn batches_never_exceed_the_staging_capacity(#[case] quads: &[usize]) {
    let (mut renderer, _) = renderer(16, 8);

    renderer.begin().unwrap();
    for &count in quads {
        let mut region = renderer.reserve(count * 4, count * 6, None).unwrap();
        for n in 0..count {
            region.write_quad(n, &Quad::unit());
        }
    }
    renderer.end().unwrap();

    for batch in renderer.render_buffers() {
        assert!(batch.vertex_count() as usize <= renderer.max_reserved_vertices());
        assert!(batch.index_count() as usize <= renderer.max_reserved_indices());
    }
    let vertices: u32 = renderer.render_buffers().iter().map(RenderBuffer::vertex_count).sum();
    assert_eq!(vertices as usize, quads.iter().sum::<usize>() * 4);

    // Every batch is drawable, so no index escaped its batch
    renderer.draw().unwrap();
}

#[test]
fn second_frame_reuses_every_buffer() {
    let (mut renderer, stats) = renderer(16, 2);

    let frame = |renderer: &mut BatchRenderer<SoftwareDevice>| {
        renderer.begin().unwrap();
        for i in 0..5 {
            renderer.draw_quad(&quad_at(i as f32), None).unwrap();
        }
        renderer.end().unwrap();
        renderer.draw().unwrap();
    };

    frame(&mut renderer);
    assert_eq!(renderer.render_buffers().len(), 3);
    let created = stats.borrow().buffers_created;
    // Two staging buffers plus a vertex and index buffer per batch
    assert_eq!(created, 2 + 3 * 2);

    for _ in 0..3 {
        frame(&mut renderer);
        assert_eq!(stats.borrow().buffers_created, created);
        assert_eq!(renderer.frame_stats().fresh_buffers, 0);
        assert_eq!(renderer.frame_stats().recycled_buffers, 2 + 3 * 2);
    }
}

#[test]
fn pool_is_trimmed_to_its_limit() {
    let device = SoftwareDevice::new();
    let stats = device.shared_stats();
    let config = RendererConfig::default()
        .with_quads_per_batch(1)
        .with_max_pooled_buffers(1);
    let mut renderer = BatchRenderer::new(device, config).unwrap();

    renderer.begin().unwrap();
    for i in 0..3 {
        renderer.draw_quad(&quad_at(i as f32), None).unwrap();
    }
    renderer.end().unwrap();
    assert_eq!(renderer.render_buffers().len(), 3);

    renderer.begin().unwrap();
    // 3 retired per role, trimmed to 1, which then became the staging buffer while
    // the previous staging buffer went into the pool
    assert_eq!(stats.borrow().buffers_released, 4);
    assert_eq!(renderer.pooled_buffers(), 2);
    renderer.end().unwrap();
}

#[test]
fn batches_draw_in_flush_order() {
    let (mut renderer, _) = renderer(16, 1);

    renderer.begin().unwrap();
    for i in 0..4 {
        renderer.draw_quad(&quad_at(i as f32 * 10.0), None).unwrap();
    }
    renderer.end().unwrap();
    renderer.draw().unwrap();

    let buffer_ids: Vec<u64> = renderer.render_buffers().iter().map(|b| b.vertex_buffer().id()).collect();
    let calls = renderer.device_mut().take_draw_calls();
    assert_eq!(calls.iter().map(|c| c.vertex_buffer).collect::<Vec<_>>(), buffer_ids);
    let centers: Vec<f32> = calls.iter().map(|c| (c.vertices[0].position[0] + 0.5) / 10.0).collect();
    assert_eq!(centers, vec![0.0, 1.0, 2.0, 3.0]);
}

#[test]
fn draw_can_be_repeated_until_the_next_begin() {
    let (mut renderer, _) = renderer(16, 1);
    renderer.begin().unwrap();
    renderer.draw_quad(&quad_at(0.0), None).unwrap();
    renderer.draw_quad(&quad_at(1.0), None).unwrap();
    renderer.end().unwrap();

    renderer.draw().unwrap();
    let first = renderer.device_mut().take_draw_calls();
    renderer.draw().unwrap();
    let second = renderer.device_mut().take_draw_calls();
    assert_eq!(first, second);
    assert_eq!(renderer.state(), FrameState::Ended);
    assert_eq!(renderer.render_buffers().len(), 2);
}

#[test]
fn untextured_quads_sample_the_white_pixel() {
    let (mut renderer, _) = renderer(16, 8);
    let textures = textures(&mut renderer, 2);

    renderer.begin().unwrap();
    renderer.draw_quad(&quad_at(0.0), Some(&textures[0])).unwrap();
    renderer.draw_quad(&quad_at(1.0), Some(&textures[1])).unwrap();
    renderer.draw_quad(&quad_at(2.0), Some(&textures[0])).unwrap();
    renderer.draw_quad(&quad_at(3.0), None).unwrap();
    renderer.draw_quad(&quad_at(4.0), None).unwrap();
    renderer.end().unwrap();

    let batches = renderer.render_buffers();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        batches[0].textures(),
        &[textures[0].clone(), textures[1].clone(), renderer.white_texture().clone()]
    );

    renderer.draw().unwrap();
    let calls = renderer.device_mut().take_draw_calls();
    let slots: Vec<u64> = calls[0].vertices.chunks(4).map(|quad| quad[0].slot()).collect();
    assert_eq!(slots, vec![0, 1, 0, 2, 2]);
    let white = calls[0].texture(2).unwrap();
    assert_eq!((white.width(), white.height()), (1, 1));

    release(&mut renderer, textures);
}

#[test]
fn regions_write_local_indices_across_flushes() {
    let (mut renderer, _) = renderer(16, 3);

    renderer.begin().unwrap();
    let mut region = renderer.reserve(8, 12, None).unwrap();
    region.write_quad(0, &quad_at(0.0));
    region.write_quad(1, &quad_at(1.0));
    let mut region = renderer.reserve(4, 6, None).unwrap();
    assert_eq!(region.base_vertex(), 8);
    region.write_quad(0, &quad_at(2.0));
    // Doesn't fit the remaining quad: starts a new batch at vertex 0
    let mut region = renderer.reserve(8, 12, None).unwrap();
    assert_eq!(region.base_vertex(), 0);
    region.write_quad(0, &quad_at(3.0));
    region.write_quad(1, &quad_at(4.0));
    renderer.end().unwrap();
    renderer.draw().unwrap();

    let calls = renderer.device_mut().take_draw_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].indices[12..], [8, 9, 10, 10, 11, 8]);
    assert_eq!(calls[1].indices[..6], [0, 1, 2, 2, 3, 0]);
    assert_eq!(calls[1].indices[6..], [4, 5, 6, 6, 7, 4]);
}

#[test]
fn frame_stats_describe_the_last_frame() {
    // Two usable slots, four quads per batch
    let (mut renderer, _) = renderer(3, 4);
    let textures = textures(&mut renderer, 3);

    renderer.begin().unwrap();
    renderer.draw_quad(&quad_at(0.0), Some(&textures[0])).unwrap();
    renderer.draw_quad(&quad_at(1.0), Some(&textures[1])).unwrap();
    renderer.draw_quad(&quad_at(2.0), Some(&textures[2])).unwrap();
    assert_eq!(renderer.frame_stats().texture_slot_flushes, 1);
    for i in 3..7 {
        renderer.draw_quad(&quad_at(i as f32), Some(&textures[2])).unwrap();
    }
    assert_eq!(renderer.frame_stats().capacity_flushes, 1);
    renderer.end().unwrap();

    let stats = *renderer.frame_stats();
    assert_eq!(stats.reservations, 7);
    assert_eq!(stats.end_of_frame_flushes, 1);
    assert_eq!(stats.flushes(), 3);
    assert_eq!((stats.vertices, stats.indices), (28, 42));
    assert_eq!(renderer.render_buffers().len(), 3);

    renderer.begin().unwrap();
    assert_eq!(renderer.frame_stats().reservations, 0);
    renderer.end().unwrap();
    release(&mut renderer, textures);
}

#[rstest]
#[case::after_draw(true)]
#[case::mid_frame(false)]
fn teardown_releases_every_resource(#[case] finish_frame: bool) {
    let (mut renderer, stats) = renderer(4, 2);
    renderer.begin().unwrap();
    for i in 0..7 {
        renderer.draw_quad(&quad_at(i as f32), None).unwrap();
    }
    if finish_frame {
        renderer.end().unwrap();
        renderer.draw().unwrap();
        renderer.begin().unwrap();
        renderer.draw_quad(&quad_at(0.0), None).unwrap();
        renderer.end().unwrap();
    }
    assert!(stats.borrow().live_buffers() > 0);

    drop(renderer);
    let stats = *stats.borrow();
    assert_eq!(stats.live_buffers(), 0);
    assert_eq!(stats.live_textures(), 0);
    assert_eq!(stats.maps, stats.unmaps);
}

#[test]
fn device_errors_reach_the_caller() {
    let mut device = SoftwareDevice::new();
    // Just the two staging buffers
    device.set_buffer_budget(Some(2));
    let stats = device.shared_stats();
    let mut renderer = BatchRenderer::new(device, RendererConfig::default()).unwrap();

    renderer.begin().unwrap();
    renderer.draw_quad(&Quad::unit(), None).unwrap();
    assert!(matches!(renderer.end(), Err(DeviceError::OutOfMemory { .. })));

    drop(renderer);
    assert_eq!(stats.borrow().live_buffers(), 0);
}

#[test]
#[should_panic(expected = "outside of begin/end")]
fn reserve_before_begin_panics() {
    let (mut renderer, _) = renderer(16, 4);
    let _ = renderer.reserve(4, 6, None);
}

#[test]
#[should_panic(expected = "outside of begin/end")]
fn reserve_after_end_panics() {
    let (mut renderer, _) = renderer(16, 4);
    renderer.begin().unwrap();
    renderer.end().unwrap();
    let _ = renderer.reserve(4, 6, None);
}

#[rstest]
#[case::no_vertices(0, 6)]
#[case::no_indices(4, 0)]
#[should_panic(expected = "empty reservation")]
fn empty_reservations_panic(#[case] vertices: usize, #[case] indices: usize) {
    let (mut renderer, _) = renderer(16, 4);
    renderer.begin().unwrap();
    let _ = renderer.reserve(vertices, indices, None);
}

#[rstest]
#[case::vertices(17, 6)]
#[case::indices(4, 25)]
#[should_panic(expected = "exceeds the capacity")]
fn oversized_reservations_panic(#[case] vertices: usize, #[case] indices: usize) {
    let (mut renderer, _) = renderer(16, 4);
    renderer.begin().unwrap();
    let _ = renderer.reserve(vertices, indices, None);
}

#[test]
#[should_panic(expected = "begin called twice")]
fn double_begin_panics() {
    let (mut renderer, _) = renderer(16, 4);
    renderer.begin().unwrap();
    renderer.begin().unwrap();
}

#[test]
#[should_panic(expected = "end called without begin")]
fn end_without_begin_panics() {
    let (mut renderer, _) = renderer(16, 4);
    renderer.end().unwrap();
}

#[test]
#[should_panic(expected = "between begin and end")]
fn draw_while_begun_panics() {
    let (mut renderer, _) = renderer(16, 4);
    renderer.begin().unwrap();
    renderer.draw_quad(&Quad::unit(), None).unwrap();
    renderer.draw().unwrap();
}

#[test]
#[should_panic(expected = "can't be batched into")]
fn devices_need_two_texture_slots() {
    let _ = renderer(1, 4);
}
