use anyhow::{ensure, Context};
use glam::Vec2;
use palette::Srgba;
use quadstream::prelude::*;
use time::macros::format_description;
use tracing::{info, info_span};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "quadstream=info,quadstream_core=debug";

const FRAMES: usize = 3;
const GRID: usize = 24;
const TEXTURES: usize = 20;

fn init_logging() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::registry();
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let subscriber = subscriber.with(filter_layer);
    let timer = fmt::time::LocalTime::new(format_description!(
        "[hour]:[minute]:[second].[subsecond digits:3]"
    ));
    let show_spans = false;
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_filter(tracing_subscriber::filter::filter_fn(move |meta| {
            !meta.is_span() || show_spans
        }));
    let subscriber = subscriber.with(fmt_layer);

    #[cfg(feature = "tracy")]
    let subscriber = subscriber.with(tracing_tracy::TracyLayer::default());
    tracing::subscriber::set_global_default(subscriber).context("installing the log subscriber")?;
    Ok(())
}

/// One frame of the workload: a grid of quads, every third one untextured, the rest
/// cycling through more textures than a batch can bind.
fn draw_frame(
    renderer: &mut BatchRenderer<SoftwareDevice>,
    textures: &[<SoftwareDevice as GraphicsDevice>::Texture],
    frame: usize,
) -> Result<(), DeviceError> {
    let _span = info_span!("frame", frame).entered();
    renderer.begin()?;
    for row in 0..GRID {
        for column in 0..GRID {
            let n = row * GRID + column;
            let color = Srgba::new(column as f32 / GRID as f32, row as f32 / GRID as f32, 0.5, 1.0);
            let quad = Quad::new(Vec2::new(column as f32, row as f32), Vec2::splat(0.45), color);
            let texture = (n % 3 != 0).then(|| &textures[(n + frame) % textures.len()]);
            renderer.draw_quad(&quad, texture)?;
        }
    }
    renderer.end()?;
    renderer.draw()
}

fn main() -> anyhow::Result<()> {
    init_logging()?;

    let device = SoftwareDevice::new();
    let ledger = device.shared_stats();
    let mut renderer = BatchRenderer::new(device, RendererConfig::default().with_prewarm_buffers(2))?;

    let textures = (0..TEXTURES)
        .map(|i| {
            let shade = (i * 255 / TEXTURES) as u8;
            renderer.device_mut().create_texture(2, 2, &[shade, 255 - shade, 128, 255].repeat(4))
        })
        .collect::<Result<Vec<_>, _>>()?;

    for frame in 0..FRAMES {
        draw_frame(&mut renderer, &textures, frame)?;
        let draws = renderer.device_mut().take_draw_calls();
        let stats = renderer.frame_stats();
        info!(
            "Frame {frame}: {} quads in {} draws ({} texture, {} capacity flushes), {} fresh and {} recycled buffers",
            stats.reservations,
            draws.len(),
            stats.texture_slot_flushes,
            stats.capacity_flushes,
            stats.fresh_buffers,
            stats.recycled_buffers
        );
    }

    for texture in textures {
        renderer.device_mut().release_texture(texture);
    }
    drop(renderer);

    let ledger = *ledger.borrow();
    info!(
        "Device ledger: {} buffers created, {} released, {} bytes copied, {} draws",
        ledger.buffers_created, ledger.buffers_released, ledger.bytes_copied, ledger.draw_calls
    );
    ensure!(
        ledger.live_buffers() == 0 && ledger.live_textures() == 0,
        "{} buffers and {} textures leaked",
        ledger.live_buffers(),
        ledger.live_textures()
    );
    Ok(())
}
