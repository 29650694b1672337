//! Capture video from a ZWO camera into a SER container.
//!
//! The main thread is the producer: it owns the camera, pumps frames out of
//! the pool and fans them out to the disk, preview and AGC workers. SIGINT
//! flips the shutdown flag and wakes every queue; the workers drain or drop
//! per their policy and the SER file is closed last.

use anyhow::{bail, Context, Result};
use camera::select::{select_device, CameraProvider, StdinPrompter};
use camera::sim::SimProvider;
use camera::{limits, StaticConfig};
use capture::agc::AgcConfig;
use capture::pool::FramePool;
use capture::preview::{NullSink, PreviewConfig};
use capture::runtime::{ControlsInit, Runtime};
use capture::{agc, disk, preview, producer, sched, FRAME_POOL_SIZE};
use clap::Parser;
use serfile::{ColorId, SerConfig, SerWriter};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "sercap")]
#[command(about = "Capture video from a ZWO camera.", long_about = None)]
struct Args {
    /// Camera name (substring match)
    #[arg(long)]
    camera: Option<String>,

    /// Output SER filename
    #[arg(long)]
    file: Option<PathBuf>,

    /// Initial camera gain
    #[arg(long, default_value_t = limits::GAIN_MAX,
          value_parser = clap::value_parser!(i64).range(limits::GAIN_MIN..=limits::GAIN_MAX))]
    gain: i64,

    /// Initial camera exposure time [us]
    #[arg(long, default_value_t = limits::EXPOSURE_DEFAULT_US,
          value_parser = clap::value_parser!(i64).range(limits::EXPOSURE_MIN_US..=limits::EXPOSURE_MAX_US))]
    exposure: i64,

    /// Camera binning
    #[arg(long, default_value_t = 1)]
    binning: usize,

    /// Max preview window refresh rate [frames/s]
    #[arg(long, default_value_t = 30.0)]
    max_preview_fps: f64,

    /// Max histogram refresh rate [updates/s]
    #[arg(long, default_value_t = 4.0)]
    max_histogram_fps: f64,

    /// Start writing to disk immediately
    #[arg(long)]
    write_at_startup: bool,

    /// Enable automatic gain control
    #[arg(long)]
    agc: bool,

    /// Observer name recorded in the SER header
    #[arg(long, default_value = "")]
    observer: String,

    /// Telescope name recorded in the SER header
    #[arg(long, default_value = "")]
    telescope: String,

    /// Skip the per-frame timestamp trailer
    #[arg(long)]
    no_trailer: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let provider = SimProvider::asi178_rig();
    let descriptor = select_device(&provider, args.camera.as_deref(), &mut StdinPrompter)?;
    let static_config = StaticConfig {
        binning: args.binning,
        ..StaticConfig::default()
    };
    let mut camera = provider
        .open(&descriptor, &static_config)
        .with_context(|| format!("opening camera '{}'", descriptor.name))?;
    let (width, height) = (camera.width(), camera.height());
    info!(
        "Capturing from '{}' at {width}x{height} (binning {}).",
        descriptor.name, args.binning
    );

    let ser_file = match &args.file {
        Some(path) => {
            confirm_overwrite(path)?;
            let writer = SerWriter::create(
                path,
                SerConfig {
                    width: width as i32,
                    height: height as i32,
                    color_id: if descriptor.is_color {
                        ColorId::BayerRggb
                    } else {
                        ColorId::Mono
                    },
                    pixel_depth: 8,
                    observer: args.observer.clone(),
                    instrument: descriptor.name.clone(),
                    telescope: args.telescope.clone(),
                    add_trailer: !args.no_trailer,
                },
            )
            .with_context(|| format!("creating output file {}", path.display()))?;
            info!("Creating output file {}.", path.display());
            Some(writer)
        }
        None => {
            info!("No output SER filename provided.");
            if args.write_at_startup {
                warn!("--write-at-startup has no effect without --file.");
            }
            None
        }
    };

    let runtime = Arc::new(Runtime::new(
        FramePool::new(width, height, FRAME_POOL_SIZE),
        ControlsInit {
            gain: args.gain,
            exposure_us: args.exposure,
            agc_enabled: args.agc,
            disk_write_enabled: args.write_at_startup && ser_file.is_some(),
            disk_file_configured: ser_file.is_some(),
        },
    ));

    {
        let runtime = Arc::clone(&runtime);
        ctrlc::set_handler(move || runtime.shutdown()).context("installing SIGINT handler")?;
    }

    let disk_thread = {
        let runtime = Arc::clone(&runtime);
        std::thread::Builder::new()
            .name("disk".to_string())
            .spawn(move || {
                sched::promote_current_thread_best_effort("disk");
                disk::run(&runtime, ser_file)
            })
            .context("spawning disk thread")?
    };

    let preview_thread = {
        let runtime = Arc::clone(&runtime);
        let config = PreviewConfig {
            max_preview_fps: args.max_preview_fps,
            max_histogram_fps: args.max_histogram_fps,
        };
        std::thread::Builder::new()
            .name("preview".to_string())
            .spawn(move || {
                let mut sink = NullSink;
                preview::run(&runtime, &mut sink, &config)
            })
            .context("spawning preview thread")?
    };

    let agc_thread = {
        let runtime = Arc::clone(&runtime);
        std::thread::Builder::new()
            .name("agc".to_string())
            .spawn(move || agc::run(&runtime, &AgcConfig::default()))
            .context("spawning AGC thread")?
    };

    sched::set_current_thread_name("camera(main)");
    sched::promote_current_thread_best_effort("camera");
    camera.start_stream().context("starting camera stream")?;

    // Main thread is the producer; returns on shutdown or device removal.
    let stats = producer::run(&runtime, camera.as_mut());
    runtime.shutdown();

    info!("Main (camera) thread done, waiting for others to finish.");
    join_worker(disk_thread, "disk")??;
    join_worker(preview_thread, "preview")?;
    join_worker(agc_thread, "agc")?;

    if stats.pool_stalls > 0 || stats.fetch_errors > 0 {
        warn!(
            "Capture finished with {} pool stalls and {} fetch errors.",
            stats.pool_stalls, stats.fetch_errors
        );
    }
    info!("Main thread ending.");
    Ok(())
}

fn join_worker<T>(handle: JoinHandle<T>, name: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow::anyhow!("{name} thread panicked"))
}

fn confirm_overwrite(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!(
            "{} already exists. Do you want to overwrite it? [y/N] ",
            path.display()
        );
        let _ = std::io::stdout().flush();

        let line = match lines.next() {
            Some(line) => line.context("reading overwrite confirmation")?,
            None => bail!(
                "File {} exists and user declined to overwrite it.",
                path.display()
            ),
        };
        match line.trim() {
            "y" | "Y" => {
                info!("User approved overwriting {}.", path.display());
                return Ok(());
            }
            "" | "n" | "N" => bail!(
                "File {} exists and user declined to overwrite it.",
                path.display()
            ),
            _ => println!("Invalid selection."),
        }
    }
}
