use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lamina::{Session, populate_sample_scene};
use renderer::RenderConfig;

#[derive(Parser)]
#[command(author, version, about = "Render a sample layered scene to a PNG file")]
struct Arguments {
    /// Document width in document units.
    #[arg(long, default_value_t = 640)]
    width: u32,
    /// Document height in document units.
    #[arg(long, default_value_t = 480)]
    height: u32,
    /// Canvas pixels per document unit.
    #[arg(long, default_value_t = 1.0)]
    zoom: f64,
    /// Render worker threads; defaults to the available parallelism.
    #[arg(long)]
    workers: Option<NonZeroUsize>,
    /// Destination PNG path.
    #[arg(long, short = 'o', value_parser, default_value = "lamina.png")]
    output: PathBuf,
    /// Seconds to wait for rendering to settle.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let arguments = Arguments::parse();

    let config = RenderConfig {
        worker_count: arguments.workers,
        initial_zoom: arguments.zoom,
        ..RenderConfig::default()
    };
    let session =
        Session::new(arguments.width, arguments.height, config).context("start render session")?;
    session
        .edit(populate_sample_scene)
        .context("build sample scene")?;

    let frame = session
        .capture(Duration::from_secs(arguments.timeout))
        .context("rendering did not finish in time")?;
    let width = frame.bounds.width();
    let height = frame.bounds.height();
    let image = image::RgbaImage::from_raw(width, height, frame.rgba)
        .context("front buffer size does not match its bounds")?;
    image
        .save(&arguments.output)
        .with_context(|| format!("write {}", arguments.output.display()))?;
    log::info!(
        "[session] wrote {width}x{height} image to {}",
        arguments.output.display()
    );
    Ok(())
}
