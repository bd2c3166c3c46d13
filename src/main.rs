//! Binary entrypoint for the photo kiosk.
//!
//! Delegates all logic to the library crate; no local modules here.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt};

use photo_kiosk::config::{self, Configuration};
use photo_kiosk::controller::SlideshowController;
use photo_kiosk::corrections::SidecarCorrections;
use photo_kiosk::overlay::ClockDraw;
use photo_kiosk::power::{DisplayPower, NoopPower, XsetPower};
use photo_kiosk::render::window::WindowSurface;

/// Simple CLI
#[derive(Debug, Parser)]
#[command(name = "photo-kiosk", about = "Fullscreen photo slideshow kiosk")]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Override the picture library root
    #[arg(long, value_name = "DIR")]
    library: Option<PathBuf>,

    /// Keep the monitor on forever
    #[arg(long)]
    stay_on: bool,

    /// Disable display power control (for platforms without DPMS)
    #[arg(long)]
    no_power_control: bool,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("photo_kiosk={level}").parse()?)
        .add_directive("wgpu=warn".parse()?)
        .add_directive("winit=warn".parse()?);
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut cfg = if cli.config.exists() {
        config::from_yaml_file(&cli.config)
            .with_context(|| format!("loading config from {}", cli.config.display()))?
    } else if let Some(library) = cli.library.clone() {
        Configuration::with_library(library)
    } else {
        bail!(
            "config file {} not found and no --library given",
            cli.config.display()
        );
    };
    if let Some(library) = cli.library {
        cfg.library_path = library;
    }
    if cli.stay_on {
        cfg.stay_on = true;
    }
    cfg.validate().context("validating configuration")?;

    let surface = WindowSurface::new().context("initializing display surface")?;
    let power: Box<dyn DisplayPower> = if cli.no_power_control {
        Box::new(NoopPower)
    } else {
        Box::new(XsetPower::new(cfg.time_to_sleep))
    };

    info!(library = %cfg.library_path.display(), "starting slideshow");
    let mut controller = SlideshowController::new(
        cfg,
        Box::new(surface),
        power,
        Box::new(ClockDraw::new()),
        Arc::new(SidecarCorrections),
    );
    controller.run()?;
    Ok(())
}
