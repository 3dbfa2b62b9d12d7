use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One received frame, as reported by `receive`.
#[derive(Debug, Serialize)]
pub struct FrameSummary {
    pub event: &'static str,
    pub sequence: u64,
    pub peer: String,
    pub color_bytes: usize,
    pub canonical_color: bool,
    pub depth_bytes: usize,
    pub depth_width: usize,
    pub depth_height: usize,
    /// Fraction of depth samples holding a reading.
    pub depth_valid_ratio: Option<f64>,
    /// Distance in meters under the center of the color image.
    pub center_distance_m: Option<f32>,
    pub elapsed_ms: f64,
    pub timestamp: String,
}

pub fn print_frame_summary(summary: &FrameSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(summary),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FRAME", "PEER", "COLOR", "DEPTH", "VALID", "CENTER"])
                .add_row(vec![
                    summary.sequence.to_string(),
                    summary.peer.clone(),
                    summary.color_bytes.to_string(),
                    format!(
                        "{} ({}x{})",
                        summary.depth_bytes, summary.depth_width, summary.depth_height
                    ),
                    ratio_cell(summary.depth_valid_ratio),
                    distance_cell(summary.center_distance_m),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "frame={} peer={} color={}{} depth={} ({}x{}) valid={} center={} elapsed={:.2}ms",
                summary.sequence,
                summary.peer,
                summary.color_bytes,
                if summary.canonical_color { "" } else { " (non-canonical)" },
                summary.depth_bytes,
                summary.depth_width,
                summary.depth_height,
                ratio_cell(summary.depth_valid_ratio),
                distance_cell(summary.center_distance_m),
                summary.elapsed_ms,
            );
        }
        OutputFormat::Raw => {
            println!(
                "{}\t{}\t{}",
                summary.sequence, summary.color_bytes, summary.depth_bytes
            );
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn ratio_cell(ratio: Option<f64>) -> String {
    match ratio {
        Some(r) => format!("{:.1}%", r * 100.0),
        None => "-".to_string(),
    }
}

pub fn distance_cell(distance: Option<f32>) -> String {
    match distance {
        Some(d) => format!("{d:.3}m"),
        None => "-".to_string(),
    }
}

pub fn millis(duration: std::time::Duration) -> f64 {
    (duration.as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

pub fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn cells_render_missing_values() {
        assert_eq!(ratio_cell(None), "-");
        assert_eq!(ratio_cell(Some(0.5)), "50.0%");
        assert_eq!(distance_cell(Some(1.25)), "1.250m");
        assert_eq!(distance_cell(None), "-");
    }

    #[test]
    fn millis_rounds_to_hundredths() {
        assert_eq!(millis(Duration::from_micros(1_234_567)), 1234.57);
    }

    #[test]
    fn summary_serializes_event_name() {
        let summary = FrameSummary {
            event: "frame",
            sequence: 1,
            peer: "127.0.0.1:5000".into(),
            color_bytes: 4,
            canonical_color: false,
            depth_bytes: 4,
            depth_width: 1,
            depth_height: 1,
            depth_valid_ratio: Some(1.0),
            center_distance_m: Some(0.5),
            elapsed_ms: 0.1,
            timestamp: "0".into(),
        };
        let json = serde_json::to_string(&summary).expect("summary should serialize");
        assert!(json.contains("\"event\":\"frame\""));
        assert!(json.contains("\"center_distance_m\":0.5"));
    }
}
