use std::io::{IsTerminal, Write};

use bytes::Bytes;
use cbc_frame::{Frame, FrameBuffer, LinkStats};
use cbc_mux::{channel_info, ChannelInfo, ChannelKind};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::{Serialize, Serializer};

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
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

fn as_hex<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

/// One frame as seen by a reader of its channel.
#[derive(Debug, Clone, Serialize)]
pub struct FrameRecord {
    pub channel: usize,
    pub channel_name: &'static str,
    pub kind: ChannelKind,
    pub priority: u8,
    pub sequence: u8,
    pub frame_length: usize,
    #[serde(serialize_with = "as_hex")]
    pub payload: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl FrameRecord {
    pub fn from_buffer(buffer: &FrameBuffer) -> Option<Self> {
        let frame = Frame::from_buffer(buffer)?;
        let channel = usize::from(frame.channel);
        let info = channel_info(channel)?;
        let payload = info.kind.payload_view(buffer);
        Some(Self {
            channel,
            channel_name: info.name,
            kind: info.kind,
            priority: frame.priority,
            sequence: frame.sequence,
            frame_length: frame.frame_length,
            text: text_preview(&payload),
            payload,
        })
    }
}

/// An encoded frame ready for the wire.
#[derive(Debug, Clone, Serialize)]
pub struct EncodedFrame {
    pub channel: usize,
    pub channel_name: &'static str,
    pub priority: u8,
    pub sequence: u8,
    pub frame_length: usize,
    #[serde(serialize_with = "as_hex")]
    pub frame: Bytes,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendReport {
    pub device: String,
    pub channel: usize,
    pub channel_name: &'static str,
    pub bytes: usize,
    pub frames: u64,
}

#[derive(Serialize)]
struct StatsOutput<'a> {
    stats: &'a LinkStats,
    incomplete_bytes: usize,
}

#[derive(Serialize)]
struct ChannelRow<'a> {
    #[serde(flatten)]
    info: &'a ChannelInfo,
    priority: u8,
}

fn text_preview(payload: &[u8]) -> Option<String> {
    let trimmed = match payload.iter().rposition(|b| *b != cbc_frame::FILL_BYTE) {
        Some(end) => &payload[..=end],
        None => &[][..],
    };
    std::str::from_utf8(trimmed)
        .ok()
        .filter(|text| !text.is_empty() && !text.chars().any(char::is_control))
        .map(str::to_string)
}

fn payload_preview(record: &FrameRecord) -> String {
    match &record.text {
        Some(text) => text.clone(),
        None => hex::encode(&record.payload),
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub fn print_frame(record: &FrameRecord, format: OutputFormat) {
    print_frames(std::slice::from_ref(record), format);
}

pub fn print_frames(records: &[FrameRecord], format: OutputFormat) {
    match format {
        OutputFormat::Json => records.iter().for_each(print_json),
        OutputFormat::Table => {
            if records.is_empty() {
                return;
            }
            let mut table = new_table(vec!["CHANNEL", "NAME", "PRIO", "SEQ", "LEN", "PAYLOAD"]);
            for record in records {
                table.add_row(vec![
                    record.channel.to_string(),
                    record.channel_name.to_string(),
                    record.priority.to_string(),
                    record.sequence.to_string(),
                    record.frame_length.to_string(),
                    payload_preview(record),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for record in records {
                println!(
                    "channel={} ({}) priority={} seq={} len={} payload={}",
                    record.channel,
                    record.channel_name,
                    record.priority,
                    record.sequence,
                    record.frame_length,
                    payload_preview(record)
                );
            }
        }
        OutputFormat::Raw => {
            for record in records {
                print_raw(&record.payload);
            }
        }
    }
}

pub fn print_encoded(frame: &EncodedFrame, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(frame),
        OutputFormat::Table => {
            let mut table = new_table(vec!["CHANNEL", "PRIO", "SEQ", "LEN", "FRAME"]);
            table.add_row(vec![
                format!("{} ({})", frame.channel, frame.channel_name),
                frame.priority.to_string(),
                frame.sequence.to_string(),
                frame.frame_length.to_string(),
                hex::encode(&frame.frame),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", hex::encode(&frame.frame)),
        OutputFormat::Raw => print_raw(&frame.frame),
    }
}

pub fn print_stats(stats: &LinkStats, incomplete_bytes: usize, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&StatsOutput {
            stats,
            incomplete_bytes,
        }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["COUNTER", "VALUE"]);
            for (name, value) in stats_rows(stats, incomplete_bytes) {
                table.add_row(vec![name.to_string(), value.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line: Vec<String> = stats_rows(stats, incomplete_bytes)
                .into_iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            println!("{}", line.join(" "));
        }
        OutputFormat::Raw => {}
    }
}

fn stats_rows(stats: &LinkStats, incomplete_bytes: usize) -> Vec<(&'static str, u64)> {
    vec![
        ("frames_received", stats.frames_received),
        ("frames_sent", stats.frames_sent),
        ("bytes_skipped", stats.bytes_skipped),
        ("checksum_errors", stats.checksum_errors),
        ("sequence_errors", stats.sequence_errors),
        ("oversize_frames", stats.oversize_frames),
        ("send_failures", stats.send_failures),
        ("pool_exhausted", stats.pool_exhausted),
        ("queue_full", stats.queue_full),
        ("incomplete_bytes", incomplete_bytes as u64),
    ]
}

pub fn print_channels(channels: &[(&ChannelInfo, u8)], format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => {
            let rows: Vec<ChannelRow<'_>> = channels
                .iter()
                .map(|(info, priority)| ChannelRow {
                    info,
                    priority: *priority,
                })
                .collect();
            print_json(&rows);
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["ID", "NAME", "KIND", "DEFAULT", "PRIORITY"]);
            for (info, priority) in channels {
                table.add_row(vec![
                    info.id.to_string(),
                    info.name.to_string(),
                    info.kind.to_string(),
                    info.default_priority.to_string(),
                    priority.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (info, priority) in channels {
                println!(
                    "{:>2} {:<18} {:<7} priority={}",
                    info.id, info.name, info.kind, priority
                );
            }
        }
    }
}

pub fn print_send_report(report: &SendReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let mut table = new_table(vec!["DEVICE", "CHANNEL", "BYTES", "FRAMES"]);
            table.add_row(vec![
                report.device.clone(),
                format!("{} ({})", report.channel, report.channel_name),
                report.bytes.to_string(),
                report.frames.to_string(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!(
            "sent {} bytes in {} frame(s) on {} to {}",
            report.bytes, report.frames, report.channel_name, report.device
        ),
        OutputFormat::Raw => {}
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_preview_strips_fill_and_rejects_binary() {
        assert_eq!(text_preview(b"hello\xff\xff").as_deref(), Some("hello"));
        assert_eq!(text_preview(&[0x00, 0x01]), None);
        assert_eq!(text_preview(&[0xFF, 0xFF]), None);
    }

    #[test]
    fn record_serializes_payload_as_hex() {
        let record = FrameRecord {
            channel: 1,
            channel_name: "cbc-lifecycle",
            kind: ChannelKind::Default,
            priority: 6,
            sequence: 0,
            frame_length: 8,
            payload: Bytes::from_static(&[0xDE, 0xAD, 0xFF, 0xFF]),
            text: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"payload\":\"deadffff\""));
        assert!(json.contains("\"kind\":\"default\""));
        assert!(!json.contains("\"text\""));
    }
}
