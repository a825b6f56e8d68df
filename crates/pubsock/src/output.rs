use std::io::{IsTerminal, Write};
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

#[derive(Serialize)]
struct MessageOutput<'a> {
    event: &'static str,
    topic: &'a str,
    peer: &'a str,
    size: usize,
    payload: String,
    timestamp: String,
}

#[derive(Serialize)]
struct DeliveryOutput<'a> {
    event: &'static str,
    topic: &'a str,
    peer: Option<&'a str>,
    bytes: usize,
    timestamp: String,
}

/// Print a received frame or control line.
pub fn print_message(topic: &str, peer: &str, payload: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                event: "received",
                topic,
                peer,
                size: payload.len(),
                payload: payload_preview(payload),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            print_table(
                vec!["TOPIC", "PEER", "SIZE", "PAYLOAD"],
                vec![
                    topic.to_string(),
                    peer.to_string(),
                    payload.len().to_string(),
                    payload_preview(payload),
                ],
            );
        }
        OutputFormat::Pretty => {
            println!(
                "topic={topic} peer={peer} size={} payload={}",
                payload.len(),
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => {
            print_raw(payload);
            print_raw(b"\n");
        }
    }
}

/// Print the outcome of a send. `peer` is `None` when nobody took the frame.
pub fn print_delivery(topic: &str, peer: Option<&str>, bytes: usize, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = DeliveryOutput {
                event: if peer.is_some() { "delivered" } else { "dropped" },
                topic,
                peer,
                bytes,
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            print_table(
                vec!["TOPIC", "PEER", "BYTES"],
                vec![
                    topic.to_string(),
                    peer.unwrap_or("-").to_string(),
                    bytes.to_string(),
                ],
            );
        }
        OutputFormat::Pretty => {
            println!("topic={topic} peer={} bytes={bytes}", peer.unwrap_or("-"));
        }
        OutputFormat::Raw => {}
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json(value: &impl Serialize) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn print_table(header: Vec<&str>, row: Vec<String>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header)
        .add_row(row);
    println!("{table}");
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
