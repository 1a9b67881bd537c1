use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kvm_pipeline::config::{AppConfig, CaptureSourceKind};
use kvm_pipeline::video::{
    CaptureSource, FileReplayCapture, FramePipeline, FramePool, JpegDecoder, JpegEncoder,
    V4l2Capture,
};
use kvm_pipeline::AppError;

/// Exit status when the capture source cannot be started
const EXIT_CAPTURE_START: u8 = 2;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// kvm-pipeline command line arguments
#[derive(Parser, Debug)]
#[command(name = "kvm-pipeline")]
#[command(version, about = "MJPEG capture, decode and re-encode pipeline", long_about = None)]
struct CliArgs {
    /// JSON configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Video device path (overrides config)
    #[arg(short = 'd', long, value_name = "DEVICE", conflicts_with = "replay")]
    device: Option<String>,

    /// Replay JPEG files from a file or directory instead of a device
    #[arg(short = 'r', long, value_name = "PATH")]
    replay: Option<PathBuf>,

    /// Replay passes (0 = loop until interrupted)
    #[arg(long, value_name = "N", requires = "replay")]
    loops: Option<u32>,

    /// Capture width
    #[arg(long)]
    width: Option<u32>,

    /// Capture height
    #[arg(long)]
    height: Option<u32>,

    /// Frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Decode straight to YUV planes instead of RGB24
    #[arg(long)]
    fast_yuv: bool,

    /// JPEG output quality (1-100)
    #[arg(short = 'q', long)]
    quality: Option<u32>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose, args.log_json);

    tracing::info!("Starting kvm-pipeline v{}", env!("CARGO_PKG_VERSION"));

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            match e.downcast_ref::<AppError>() {
                Some(AppError::CaptureStart { .. }) => ExitCode::from(EXIT_CAPTURE_START),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let config = load_config(&args)?;

    let pool = Arc::new(FramePool::new(config.pool_config()));
    let decoder = JpegDecoder::new(pool, config.decoder_config());
    let encoder =
        JpegEncoder::new(config.encoder_config()).context("Failed to create JPEG encoder")?;

    let mut capture: Box<dyn CaptureSource> = match config.capture.source {
        CaptureSourceKind::V4l2 => Box::new(V4l2Capture::new(config.v4l2_config())),
        CaptureSourceKind::Replay => {
            let replay = config
                .replay_config()
                .context("Replay source selected without a replay path")?;
            Box::new(FileReplayCapture::new(replay))
        }
    };

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for CTRL+C: {}", e),
        }
        signal_token.cancel();
    });

    let pipeline = FramePipeline::new(
        config.pipeline_config(),
        decoder,
        Box::new(encoder),
        shutdown,
    );
    pipeline.run(&mut *capture).await?;

    tracing::info!("kvm-pipeline stopped");
    Ok(())
}

/// Load the config file, then apply command line overrides
fn load_config(args: &CliArgs) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;

    if let Some(device) = &args.device {
        config.capture.source = CaptureSourceKind::V4l2;
        config.capture.device = device.clone();
    }
    if let Some(path) = &args.replay {
        config.capture.source = CaptureSourceKind::Replay;
        config.capture.replay_path = Some(path.clone());
    }
    if let Some(loops) = args.loops {
        config.capture.replay_loops = (loops > 0).then_some(loops);
    }
    if let Some(width) = args.width {
        config.capture.width = width;
    }
    if let Some(height) = args.height {
        config.capture.height = height;
    }
    if let Some(fps) = args.fps {
        config.capture.fps = fps;
    }
    if args.fast_yuv {
        config.decoder.fast_yuv = true;
    }
    if let Some(quality) = args.quality {
        config.encoder.quality = quality;
    }

    config.validate().context("Invalid configuration")?;

    match config.capture.source {
        CaptureSourceKind::V4l2 => tracing::info!(
            "Capture: {} {}x{} @ {} fps",
            config.capture.device,
            config.capture.width,
            config.capture.height,
            config.capture.fps
        ),
        CaptureSourceKind::Replay => tracing::info!(
            "Replay: {:?} @ {} fps",
            config.capture.replay_path,
            config.capture.fps
        ),
    }
    tracing::info!(
        "Decoder output: {}, JPEG quality {}",
        if config.decoder.fast_yuv { "YUV planes" } else { "RGB24" },
        config.encoder.quality
    );

    Ok(config)
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8, json: bool) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "kvm_pipeline=error",
        LogLevel::Warn => "kvm_pipeline=warn",
        LogLevel::Info => "kvm_pipeline=info",
        LogLevel::Verbose => "kvm_pipeline=debug,v4l=info",
        LogLevel::Debug => "kvm_pipeline=debug,v4l=debug",
        LogLevel::Trace => "kvm_pipeline=trace,v4l=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
