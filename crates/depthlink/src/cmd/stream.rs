use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use depthlink_capture::{ColorBuffer, DepthBuffer, PixelFormat, SensorCapabilities};
use depthlink_peer::{
    FrameDisposition, FrameOutcome, SessionConfig, SessionStats, StreamingSession,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::cmd::{duration_arg, StreamArgs};
use crate::exit::{
    capture_error, io_error, peer_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS,
    TIMEOUT,
};
use crate::output::{millis, print_json, OutputFormat};

#[derive(Debug, Serialize)]
struct OutcomeOutput {
    event: &'static str,
    sequence: u64,
    color_bytes: Option<usize>,
    depth_bytes: Option<usize>,
    elapsed_ms: Option<f64>,
    stage: Option<&'static str>,
    reason: Option<String>,
}

impl From<&FrameOutcome> for OutcomeOutput {
    fn from(outcome: &FrameOutcome) -> Self {
        match &outcome.result {
            Ok(report) => Self {
                event: "delivered",
                sequence: outcome.sequence,
                color_bytes: Some(report.color_bytes),
                depth_bytes: Some(report.depth_bytes),
                elapsed_ms: Some(millis(report.elapsed)),
                stage: None,
                reason: None,
            },
            Err(failure) => Self {
                event: "failed",
                sequence: outcome.sequence,
                color_bytes: None,
                depth_bytes: None,
                elapsed_ms: None,
                stage: Some(failure.stage.name()),
                reason: Some(failure.reason.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct StreamReport {
    event: &'static str,
    frames: u64,
    delivered: u64,
    failed: u64,
    elapsed_ms: f64,
    stats: SessionStats,
}

pub fn run(args: StreamArgs, format: OutputFormat) -> CliResult<i32> {
    let config = session_config(&args)?;
    let wait = duration_arg("wait", &args.wait)?;
    let outcome_timeout = config.io_timeout * 4 + Duration::from_secs(1);

    let session = StreamingSession::start(config, SensorCapabilities::with_depth())
        .map_err(|err| peer_error("session start failed", err))?;
    let outcomes = session.outcomes();

    if !session.wait_ready(wait) {
        return Err(CliError::new(
            TIMEOUT,
            format!("no receiver reachable within {wait:?}"),
        ));
    }

    let scene = SyntheticScene::from_args(&args);
    let started = Instant::now();
    let mut delivered = 0u64;
    let mut failed = 0u64;
    let mut results = Vec::new();

    for index in 0..args.frames {
        let (color, depth) = scene.frame(index);
        let color = ColorBuffer::packed(
            &color,
            scene.color_width,
            scene.color_height,
            PixelFormat::Bgra8,
        )
        .map_err(|err| capture_error("synthetic color frame", err))?;
        let depth = DepthBuffer::from_samples(&depth, scene.depth_width, scene.depth_height)
            .map_err(|err| capture_error("synthetic depth frame", err))?;

        let sequence = submit(&session, started, &color, &depth, wait)?;
        debug!(index, sequence, "frame submitted");

        let outcome = match outcomes.recv_timeout(outcome_timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("frame {sequence} did not finish within {outcome_timeout:?}"),
                ))
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CliError::new(FAILURE, "transmitter stopped"))
            }
        };

        if outcome.result.is_ok() {
            delivered += 1;
        } else {
            failed += 1;
        }
        let output = OutcomeOutput::from(&outcome);
        print_outcome(&output, format);
        results.push(output);
    }

    let report = StreamReport {
        event: "summary",
        frames: args.frames,
        delivered,
        failed,
        elapsed_ms: millis(started.elapsed()),
        stats: session.stats(),
    };
    info!(delivered, failed, "stream finished");
    print_report(&report, &results, format);
    session.close();

    Ok(if failed == 0 { SUCCESS } else { FAILURE })
}

fn session_config(args: &StreamArgs) -> CliResult<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path).map_err(|err| {
                io_error(&format!("failed reading {}", path.display()), err)
            })?;
            SessionConfig::from_json(&json)
                .map_err(|err| peer_error(&format!("invalid config {}", path.display()), err))?
        }
        None => SessionConfig::default(),
    };

    if !args.hosts.is_empty() {
        config.hosts = args.hosts.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(policy) = args.retry_policy {
        config.retry_policy = policy.into();
    }
    if let Some(interval) = &args.interval {
        config.min_interval = duration_arg("interval", interval)?;
    }

    config
        .validate()
        .map_err(|err| peer_error("invalid session configuration", err))?;
    Ok(config)
}

/// Offer the frame until the session accepts it. Throttled and busy frames
/// are retried with the same buffers.
fn submit(
    session: &StreamingSession,
    started: Instant,
    color: &ColorBuffer<'_>,
    depth: &DepthBuffer<'_>,
    wait: Duration,
) -> CliResult<u64> {
    loop {
        match session.submit(started.elapsed(), color, depth) {
            FrameDisposition::Submitted(sequence) => return Ok(sequence),
            FrameDisposition::Throttled | FrameDisposition::Busy => {
                std::thread::sleep(Duration::from_millis(5));
            }
            FrameDisposition::NotReady => {
                if !session.wait_ready(wait) {
                    return Err(CliError::new(
                        TIMEOUT,
                        format!("connection not restored within {wait:?}"),
                    ));
                }
            }
            FrameDisposition::BufferError => {
                return Err(CliError::new(
                    DATA_INVALID,
                    "synthetic frame could not be normalized",
                ))
            }
        }
    }
}

fn print_outcome(output: &OutcomeOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Pretty => match (&output.stage, &output.reason) {
            (Some(stage), Some(reason)) => {
                println!("frame={} failed at {stage}: {reason}", output.sequence)
            }
            _ => println!(
                "frame={} delivered color={} depth={} elapsed={:.2}ms",
                output.sequence,
                output.color_bytes.unwrap_or_default(),
                output.depth_bytes.unwrap_or_default(),
                output.elapsed_ms.unwrap_or_default()
            ),
        },
        OutputFormat::Raw => println!("{}\t{}", output.sequence, output.event),
        OutputFormat::Table => {}
    }
}

fn print_report(report: &StreamReport, results: &[OutcomeOutput], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FRAME", "RESULT", "BYTES", "ELAPSED", "DETAIL"]);
            for output in results {
                let bytes = match (output.color_bytes, output.depth_bytes) {
                    (Some(color), Some(depth)) => (color + depth).to_string(),
                    _ => "-".to_string(),
                };
                table.add_row(vec![
                    output.sequence.to_string(),
                    output.event.to_string(),
                    bytes,
                    output
                        .elapsed_ms
                        .map(|ms| format!("{ms:.2}ms"))
                        .unwrap_or_else(|| "-".to_string()),
                    output.reason.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
            println!(
                "{} of {} frames delivered in {:.2}ms ({} throttled)",
                report.delivered, report.frames, report.elapsed_ms, report.stats.throttled
            );
        }
        OutputFormat::Pretty => println!(
            "delivered={} failed={} throttled={} elapsed={:.2}ms",
            report.delivered, report.failed, report.stats.throttled, report.elapsed_ms
        ),
        OutputFormat::Raw => {}
    }
}

/// Moving test pattern: a color gradient and a tilted depth plane.
struct SyntheticScene {
    color_width: usize,
    color_height: usize,
    depth_width: usize,
    depth_height: usize,
}

impl SyntheticScene {
    fn from_args(args: &StreamArgs) -> Self {
        Self {
            color_width: args.color_width,
            color_height: args.color_height,
            depth_width: args.depth_width,
            depth_height: args.depth_height,
        }
    }

    /// BGRA pixels and depth samples in meters for frame `index`.
    fn frame(&self, index: u64) -> (Vec<u8>, Vec<f32>) {
        let shift = (index % 256) as usize;
        let mut color = Vec::with_capacity(self.color_width * self.color_height * 4);
        for y in 0..self.color_height {
            for x in 0..self.color_width {
                let b = (x * 255 / self.color_width.max(1)) as u8;
                let g = (y * 255 / self.color_height.max(1)) as u8;
                let r = ((x + y + shift) % 256) as u8;
                color.extend_from_slice(&[b, g, r, 0xFF]);
            }
        }

        let offset = (index % 50) as f32 * 0.01;
        let mut depth = Vec::with_capacity(self.depth_width * self.depth_height);
        for y in 0..self.depth_height {
            for x in 0..self.depth_width {
                // Top row has no return, like glass or sky.
                if y == 0 {
                    depth.push(0.0);
                    continue;
                }
                let ramp = x as f32 / self.depth_width.max(1) as f32;
                depth.push(0.5 + 2.5 * ramp + offset);
            }
        }
        (color, depth)
    }
}
