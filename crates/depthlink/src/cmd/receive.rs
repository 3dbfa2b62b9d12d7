use std::ops::ControlFlow;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use depthlink_frame::{COLOR_HEIGHT, COLOR_WIDTH};
use depthlink_peer::{FrameReceiver, ReceivedFrame, ReceiverConfig};
use tracing::{info, warn};

use crate::cmd::{duration_arg, ReceiveArgs};
use crate::exit::{io_error, peer_error, CliError, CliResult, SUCCESS};
use crate::output::{millis, now_unix_seconds, print_frame_summary, FrameSummary, OutputFormat};

pub fn run(args: ReceiveArgs, format: OutputFormat) -> CliResult<i32> {
    let io_timeout = duration_arg("io-timeout", &args.io_timeout)?;
    let config = ReceiverConfig {
        max_payload_size: args.max_payload,
        io_timeout: (!io_timeout.is_zero()).then_some(io_timeout),
        ..ReceiverConfig::default()
    };

    if let Some(dir) = &args.preview_dir {
        std::fs::create_dir_all(dir)
            .map_err(|err| io_error(&format!("failed creating {}", dir.display()), err))?;
    }

    let receiver =
        FrameReceiver::bind(&args.bind, config).map_err(|err| peer_error("bind failed", err))?;
    info!(addr = %receiver.local_addr(), "waiting for sender");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut received = 0u64;

    while running.load(Ordering::SeqCst) {
        let mut session = receiver
            .accept()
            .map_err(|err| peer_error("accept failed", err))?;
        let peer = session.peer_addr().to_string();

        let outcome = session.run(|frame| {
            if !running.load(Ordering::SeqCst) {
                return ControlFlow::Break(());
            }
            received = received.saturating_add(1);

            let summary = summarize(&frame, received, &peer, &args);
            print_frame_summary(&summary, format);

            if let Some(dir) = &args.preview_dir {
                if let Err(err) = write_previews(dir, received, &frame, &args) {
                    warn!(frame = received, error = %err, "preview not written");
                }
            }

            match args.count {
                Some(count) if received >= count => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }
        });

        if let Err(err) = outcome {
            warn!(%peer, error = %err, "dropping sender");
        }
        session.shutdown();

        if matches!(args.count, Some(count) if received >= count) {
            break;
        }
    }

    Ok(SUCCESS)
}

fn summarize(frame: &ReceivedFrame, sequence: u64, peer: &str, args: &ReceiveArgs) -> FrameSummary {
    let depth = frame.depth_map(args.depth_width, args.depth_height).ok();
    if depth.is_none() {
        warn!(
            frame = sequence,
            samples = frame.depth_samples(),
            expected = args.depth_width * args.depth_height,
            "depth payload does not match the configured grid"
        );
    }

    FrameSummary {
        event: "frame",
        sequence,
        peer: peer.to_string(),
        color_bytes: frame.color.len(),
        canonical_color: frame.has_canonical_color(),
        depth_bytes: frame.depth.len(),
        depth_width: args.depth_width,
        depth_height: args.depth_height,
        depth_valid_ratio: depth.as_ref().map(|d| d.valid_ratio()),
        center_distance_m: depth.as_ref().and_then(|d| {
            d.distance_at_color(COLOR_WIDTH / 2, COLOR_HEIGHT / 2, COLOR_WIDTH, COLOR_HEIGHT)
        }),
        elapsed_ms: millis(frame.elapsed),
        timestamp: now_unix_seconds(),
    }
}

fn write_previews(
    dir: &Path,
    sequence: u64,
    frame: &ReceivedFrame,
    args: &ReceiveArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    if frame.has_canonical_color() {
        frame
            .color_image()?
            .save(dir.join(format!("frame-{sequence:06}-color.png")))?;
    }
    frame
        .depth_map(args.depth_width, args.depth_height)?
        .preview()?
        .save(dir.join(format!("frame-{sequence:06}-depth.png")))?;
    Ok(())
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
