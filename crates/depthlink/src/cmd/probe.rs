use std::time::{Duration, Instant};

use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use depthlink_transport::endpoint::candidates;
use depthlink_transport::{Endpoint, TcpTransport, DEFAULT_HOSTS};
use serde::Serialize;
use tracing::debug;

use crate::cmd::{duration_arg, ProbeArgs};
use crate::exit::{transport_error, CliResult, SUCCESS, TRANSPORT_ERROR};
use crate::output::{millis, print_json, OutputFormat};

#[derive(Debug, Serialize)]
struct ProbeResult {
    endpoint: String,
    reachable: bool,
    connect_ms: Option<f64>,
    peer_addr: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProbeOutput {
    event: &'static str,
    results: Vec<ProbeResult>,
    reachable: Option<String>,
}

pub fn run(args: ProbeArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = duration_arg("timeout", &args.timeout)?;
    let endpoints = probe_targets(&args)?;

    let mut results = Vec::with_capacity(endpoints.len());
    for endpoint in &endpoints {
        let result = probe(endpoint, timeout);
        let reachable = result.reachable;
        results.push(result);
        if reachable && !args.all {
            break;
        }
    }

    let reachable = results
        .iter()
        .find(|r| r.reachable)
        .map(|r| r.endpoint.clone());
    let output = ProbeOutput {
        event: "probe",
        results,
        reachable,
    };
    print_probe(&output, format);

    if output.reachable.is_some() {
        Ok(SUCCESS)
    } else {
        Ok(TRANSPORT_ERROR)
    }
}

fn probe_targets(args: &ProbeArgs) -> CliResult<Vec<Endpoint>> {
    if args.endpoints.is_empty() {
        return Ok(candidates(&DEFAULT_HOSTS, args.port));
    }
    args.endpoints
        .iter()
        .map(|input| {
            Endpoint::parse_with_default_port(input, args.port)
                .map_err(|err| transport_error("invalid endpoint", err))
        })
        .collect()
}

fn probe(endpoint: &Endpoint, timeout: Duration) -> ProbeResult {
    let started = Instant::now();
    match TcpTransport::connect(endpoint, timeout) {
        Ok(conn) => {
            let elapsed = started.elapsed();
            let peer_addr = conn.peer_addr().ok().map(|a| a.to_string());
            conn.shutdown();
            debug!(%endpoint, ?elapsed, "endpoint reachable");
            ProbeResult {
                endpoint: endpoint.to_string(),
                reachable: true,
                connect_ms: Some(millis(elapsed)),
                peer_addr,
                error: None,
            }
        }
        Err(err) => ProbeResult {
            endpoint: endpoint.to_string(),
            reachable: false,
            connect_ms: None,
            peer_addr: None,
            error: Some(err.to_string()),
        },
    }
}

fn print_probe(output: &ProbeOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ENDPOINT", "REACHABLE", "CONNECT", "DETAIL"]);
            for r in &output.results {
                table.add_row(vec![
                    r.endpoint.clone(),
                    if r.reachable { "yes" } else { "no" }.to_string(),
                    r.connect_ms
                        .map(|ms| format!("{ms:.2}ms"))
                        .unwrap_or_else(|| "-".to_string()),
                    r.peer_addr
                        .clone()
                        .or_else(|| r.error.clone())
                        .unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for r in &output.results {
                match (&r.connect_ms, &r.error) {
                    (Some(ms), _) => println!("{}: reachable ({ms:.2}ms)", r.endpoint),
                    (None, Some(err)) => println!("{}: unreachable ({err})", r.endpoint),
                    (None, None) => println!("{}: unreachable", r.endpoint),
                }
            }
        }
        OutputFormat::Raw => {
            if let Some(endpoint) = &output.reachable {
                println!("{endpoint}");
            }
        }
    }
}
