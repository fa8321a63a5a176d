//! v4l1-capture binary: bind a camera and grab a few frames.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use v4l1_capture::config::{DEFAULT_DEVICE, DEFAULT_FRAME_COUNT};
use v4l1_capture::traits::Result;
use v4l1_capture::v4l2::Format;
use v4l1_capture::{CaptureConfig, FourCC, Session, StreamingDevice, V4l1Device, VideoBackend};

#[derive(Debug, Parser)]
#[command(version, about = "Grab frames from a Video4Linux camera")]
struct Args {
    /// Video device node.
    #[arg(short, long, default_value = DEFAULT_DEVICE)]
    device: PathBuf,

    /// Frame buffers to keep in flight.
    #[arg(short, long, default_value_t = DEFAULT_FRAME_COUNT)]
    frames: usize,

    /// Encoding to select, e.g. YUYV or GREY. Keeps the current one if unset.
    #[arg(long)]
    fourcc: Option<FourCC>,

    /// Number of frames to grab.
    #[arg(short = 'n', long, default_value_t = 10)]
    count: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, kind = ?err.kind(), "capture failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let config = CaptureConfig::new()
        .with_device(&args.device)
        .with_frame_count(args.frames)
        .with_encoding(args.fourcc);

    let backend = VideoBackend::open(&config)?;
    info!(generation = %backend.generation(), "device bound");

    match backend {
        VideoBackend::Streaming(device) => grab_streaming(device, &config, args.count),
        VideoBackend::Legacy(session) => grab_legacy(session, &config, args.count),
    }
}

fn grab_streaming(mut device: StreamingDevice, config: &CaptureConfig, count: usize) -> Result<()> {
    info!(
        card = %device.capabilities().card,
        driver = %device.capabilities().driver,
        "V4L2 device"
    );

    let mut format = device.format()?;
    if let Some(fourcc) = config.encoding() {
        format = device.set_format(&Format::new(format.width, format.height, fourcc))?;
    }
    info!(
        width = format.width,
        height = format.height,
        fourcc = %format.fourcc,
        "format"
    );

    let buffers = u32::try_from(config.frame_count()).unwrap_or(1);
    device.capture(buffers, count, |bytes, meta| {
        info!(
            sequence = meta.sequence,
            bytes = bytes.len(),
            used = meta.bytes_used,
            timestamp = ?meta.timestamp,
            "frame"
        );
    })
}

fn grab_legacy(mut session: Session<V4l1Device>, config: &CaptureConfig, count: usize) -> Result<()> {
    session.configure(config.encoding())?;
    info!(
        window = %session.window(),
        encoding = ?session.encoding(),
        io_mode = %session.io_mode(),
        frames = session.frame_count(),
        frame_len = session.frame_len(),
        "V4L1 session configured"
    );

    session.start()?;
    for _ in 0..count {
        let buffer = session.retrieve()?;
        let mean = session.with_frame(&buffer, mean_level)?;
        info!(
            sequence = buffer.sequence(),
            slot = buffer.slot(),
            bytes = buffer.len(),
            mean,
            "frame"
        );
        session.submit(buffer)?;
    }
    session.close()
}

#[allow(clippy::cast_possible_truncation)]
fn mean_level(bytes: &[u8]) -> u8 {
    if bytes.is_empty() {
        return 0;
    }
    let sum: u64 = bytes.iter().map(|&b| u64::from(b)).sum();
    (sum / bytes.len() as u64) as u8
}
