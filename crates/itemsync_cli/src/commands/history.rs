//! History commands implementation.

use bytes::Bytes;
use itemsync_codec::{decode_history, encode_history, HistoryRecord, RECORD_HEADER_LEN};
use serde::Serialize;

/// History record representation for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Byte offset of the record in the buffer.
    pub offset: usize,
    /// Record kind.
    pub kind: i64,
    /// Record id.
    pub record_id: i32,
    /// Payload size in bytes.
    pub length: usize,
    /// Payload, hex-encoded.
    pub payload: String,
}

/// Runs `history decode`.
pub fn decode(input: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let records = decode_hex(input)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        print_text_output(&records);
    }
    Ok(())
}

/// Runs `history encode`.
pub fn encode(inputs: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", encode_inputs(inputs)?);
    Ok(())
}

fn decode_hex(input: &str) -> Result<Vec<RecordInfo>, Box<dyn std::error::Error>> {
    let bytes = Bytes::from(hex::decode(input.trim())?);
    let records = decode_history(&bytes)?;
    let mut offset = 0;
    Ok(records
        .into_iter()
        .map(|record| {
            let info = RecordInfo {
                offset,
                kind: record.kind(),
                record_id: record.record_id(),
                length: record.payload().len(),
                payload: hex::encode(record.payload()),
            };
            offset += record.encoded_len();
            info
        })
        .collect())
}

fn encode_inputs(inputs: &[String]) -> Result<String, Box<dyn std::error::Error>> {
    let records = inputs
        .iter()
        .map(|input| parse_record(input))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(hex::encode(encode_history(&records)?))
}

fn parse_record(input: &str) -> Result<HistoryRecord, Box<dyn std::error::Error>> {
    let mut parts = input.splitn(3, ':');
    let (Some(kind), Some(id)) = (parts.next(), parts.next()) else {
        return Err(format!("expected kind:id[:payload], got {input:?}").into());
    };
    let payload = hex::decode(parts.next().unwrap_or(""))?;
    Ok(HistoryRecord::new(kind.parse()?, id.parse()?, payload))
}

fn print_text_output(records: &[RecordInfo]) {
    if records.is_empty() {
        println!("Empty history");
        return;
    }
    println!("{:>8}  {:>6}  {:>6}  {:>6}  Payload", "Offset", "Kind", "Id", "Length");
    for record in records {
        println!(
            "{:>8}  {:>6}  {:>6}  {:>6}  {}",
            record.offset, record.kind, record.record_id, record.length, record.payload
        );
    }
    let bytes: usize = records
        .iter()
        .map(|record| RECORD_HEADER_LEN + record.length)
        .sum();
    println!();
    println!("{} records, {} bytes", records.len(), bytes);
}
