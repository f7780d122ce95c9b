//! Partition file format.
//!
//! A partition file holds one frame:
//!
//! ```text
//! "DFCH" | version: u8 | header_len: u32 LE | header (JSON ChunkMeta) | body
//! ```
//!
//! The body is a sequence of sections addressed by `(offset, encoded_size)`
//! from the header. The time index is a Gorilla stream of
//! `(utc nanos, utc offset seconds)`, numeric columns are Gorilla streams of
//! `(utc nanos, value)`, and text columns are bincode-encoded string vectors.

use crate::encoding::{GorillaDecoder, GorillaEncoder, Sample};
use crate::frame::{Column, ColumnKind, Frame};
use crate::mmap::PlatformMmap;
use crate::{DfCacheError, Result, Timestamp};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::SystemTime;

pub const CHUNK_MAGIC: &[u8; 4] = b"DFCH";
pub const CHUNK_VERSION: u8 = 1;

const PREAMBLE_LEN: usize = CHUNK_MAGIC.len() + 1 + 4;

/// Header of a partition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub start: Timestamp,
    pub end: Timestamp,
    pub num_rows: usize,
    pub index_name: String,
    pub index: Section,
    pub columns: Vec<ChunkColumn>,
    pub created_at: SystemTime,
}

/// Location of an encoded section inside the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub offset: u64,
    pub encoded_size: u64,
}

/// Metadata for one column of a partition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkColumn {
    pub name: String,
    pub kind: ColumnKind,
    pub section: Section,
}

fn to_nanos(t: &Timestamp) -> Result<i64> {
    t.timestamp_nanos_opt()
        .ok_or(DfCacheError::TimestampOutOfRange { timestamp: *t })
}

fn from_sample(sample: &Sample) -> Result<Timestamp> {
    let offset = FixedOffset::east_opt(sample.value as i32).ok_or_else(|| {
        DfCacheError::DataCorruption(format!("invalid utc offset {}", sample.value))
    })?;
    Ok(DateTime::from_timestamp_nanos(sample.timestamp).with_timezone(&offset))
}

fn push_section(body: &mut Vec<u8>, bytes: &[u8]) -> Section {
    let section = Section {
        offset: body.len() as u64,
        encoded_size: bytes.len() as u64,
    };
    body.extend_from_slice(bytes);
    section
}

fn section_slice<'a>(body: &'a [u8], section: &Section, what: &str) -> Result<&'a [u8]> {
    let start = section.offset as usize;
    let end = start.saturating_add(section.encoded_size as usize);
    if end > body.len() {
        return Err(DfCacheError::DataCorruption(format!(
            "{what} section [{start}, {end}) exceeds body of {} bytes",
            body.len()
        )));
    }
    Ok(&body[start..end])
}

/// Encodes a non-empty frame into partition file bytes.
pub fn encode_chunk(frame: &Frame) -> Result<Vec<u8>> {
    let (Some(start), Some(end)) = (frame.first_timestamp(), frame.last_timestamp()) else {
        return Err(DfCacheError::EmptyFrame);
    };

    let nanos = frame
        .index()
        .iter()
        .map(to_nanos)
        .collect::<Result<Vec<i64>>>()?;

    let mut body = Vec::new();

    let mut encoder = GorillaEncoder::new();
    for (t, ts) in nanos.iter().zip(frame.index()) {
        encoder.encode(Sample::new(*t, ts.offset().local_minus_utc() as f64));
    }
    let index = push_section(&mut body, &encoder.finish());

    let mut columns = Vec::with_capacity(frame.columns().len());
    for (name, column) in frame.columns() {
        let bytes = match column {
            Column::Float(values) => {
                let mut encoder = GorillaEncoder::new();
                for (t, v) in nanos.iter().zip(values) {
                    encoder.encode(Sample::new(*t, *v));
                }
                encoder.finish()
            }
            Column::Text(values) => bincode::serialize(values)?,
        };
        columns.push(ChunkColumn {
            name: name.clone(),
            kind: column.kind(),
            section: push_section(&mut body, &bytes),
        });
    }

    let meta = ChunkMeta {
        start,
        end,
        num_rows: frame.len(),
        index_name: frame.index_name().to_string(),
        index,
        columns,
        created_at: SystemTime::now(),
    };
    let header = serde_json::to_vec(&meta)?;

    let mut out = Vec::with_capacity(PREAMBLE_LEN + header.len() + body.len());
    out.extend_from_slice(CHUNK_MAGIC);
    out.push(CHUNK_VERSION);
    out.extend_from_slice(&(header.len() as u32).to_le_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Splits partition file bytes into the parsed header and the body.
fn split_chunk(bytes: &[u8]) -> Result<(ChunkMeta, &[u8])> {
    if bytes.len() < PREAMBLE_LEN || &bytes[..CHUNK_MAGIC.len()] != CHUNK_MAGIC {
        return Err(DfCacheError::DataCorruption(
            "missing partition file magic".to_string(),
        ));
    }

    let version = bytes[CHUNK_MAGIC.len()];
    if version != CHUNK_VERSION {
        return Err(DfCacheError::DataCorruption(format!(
            "unsupported partition file version {version}"
        )));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[CHUNK_MAGIC.len() + 1..PREAMBLE_LEN]);
    let header_len = u32::from_le_bytes(len_bytes) as usize;

    let body_start = PREAMBLE_LEN.saturating_add(header_len);
    if body_start > bytes.len() {
        return Err(DfCacheError::DataCorruption(format!(
            "header length {header_len} exceeds file size {}",
            bytes.len()
        )));
    }

    let meta: ChunkMeta = serde_json::from_slice(&bytes[PREAMBLE_LEN..body_start])?;
    Ok((meta, &bytes[body_start..]))
}

/// Decodes partition file bytes back into a frame.
pub fn decode_chunk(bytes: &[u8]) -> Result<(ChunkMeta, Frame)> {
    let (meta, body) = split_chunk(bytes)?;

    let samples = GorillaDecoder::new(section_slice(body, &meta.index, "index")?)
        .decode_all(meta.num_rows)?;
    let index = samples
        .iter()
        .map(from_sample)
        .collect::<Result<Vec<Timestamp>>>()?;

    let mut columns = Vec::with_capacity(meta.columns.len());
    for col in &meta.columns {
        let data = section_slice(body, &col.section, &col.name)?;
        let column = match col.kind {
            ColumnKind::Float => {
                let decoded = GorillaDecoder::new(data).decode_all(meta.num_rows)?;
                if decoded
                    .iter()
                    .zip(&samples)
                    .any(|(v, t)| v.timestamp != t.timestamp)
                {
                    return Err(DfCacheError::DataCorruption(format!(
                        "column '{}' is not aligned with the index",
                        col.name
                    )));
                }
                Column::Float(decoded.into_iter().map(|s| s.value).collect())
            }
            ColumnKind::Text => Column::Text(bincode::deserialize::<Vec<String>>(data)?),
        };
        columns.push((col.name.clone(), column));
    }

    let frame = Frame::from_parts(meta.index_name.clone(), index, columns).map_err(|e| {
        DfCacheError::DataCorruption(format!("inconsistent partition contents: {e}"))
    })?;
    Ok((meta, frame))
}

/// Writes `frame` to `path`.
///
/// The bytes go to a hidden sibling file first and are renamed into place, so
/// readers never observe a half-written partition under its final name.
pub fn write_chunk_file(path: &Path, frame: &Frame) -> Result<u64> {
    let bytes = encode_chunk(frame)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DfCacheError::InvalidPartition {
            path: path.to_path_buf(),
        })?;
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let mut file = File::create(&tmp_path).map_err(|e| DfCacheError::io_at(&tmp_path, e))?;
    file.write_all(&bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| DfCacheError::io_at(&tmp_path, e))?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|e| DfCacheError::io_at(path, e))?;
    Ok(bytes.len() as u64)
}

/// Reads and decodes the partition file at `path`.
pub fn read_chunk_file(path: &Path) -> Result<(ChunkMeta, Frame)> {
    let len = fs::metadata(path)
        .map_err(|e| DfCacheError::io_at(path, e))?
        .len();
    if len == 0 {
        return Err(DfCacheError::InvalidPartition {
            path: path.to_path_buf(),
        });
    }

    let mapped = PlatformMmap::open(path).map_err(|e| DfCacheError::io_at(path, e))?;
    decode_chunk(mapped.as_slice())
}

/// Reads only the header of the partition file at `path`.
pub fn read_chunk_meta(path: &Path) -> Result<ChunkMeta> {
    let mut file = File::open(path).map_err(|e| DfCacheError::io_at(path, e))?;

    let mut preamble = [0u8; PREAMBLE_LEN];
    file.read_exact(&mut preamble)
        .map_err(|e| DfCacheError::io_at(path, e))?;

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&preamble[CHUNK_MAGIC.len() + 1..]);
    let header_len = u32::from_le_bytes(len_bytes) as usize;

    let file_len = file
        .metadata()
        .map_err(|e| DfCacheError::io_at(path, e))?
        .len();
    if (PREAMBLE_LEN + header_len) as u64 > file_len {
        return Err(DfCacheError::DataCorruption(format!(
            "header length {header_len} exceeds file size {file_len}"
        )));
    }

    let mut bytes = preamble.to_vec();
    bytes.resize(PREAMBLE_LEN + header_len, 0);
    file.read_exact(&mut bytes[PREAMBLE_LEN..])
        .map_err(|e| DfCacheError::io_at(path, e))?;

    split_chunk(&bytes).map(|(meta, _)| meta)
}
