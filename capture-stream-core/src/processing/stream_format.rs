//! Stream container format codec.
//!
//! Pure encode/decode for the on-disk format: the fixed info descriptor
//! with its trailing name/date blocks, and the length-tagged frame prefix
//! in both historical field orders. Holds no buffering policy; callers
//! bring their own `Read`/`Write`.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::models::error::StreamFileError;
use crate::models::frame::FrameTag;
use crate::models::stream_info::StreamInfo;

/// File signature, `"CSF"` in the first three bytes on disk.
pub const STREAM_MAGIC: u32 = 0x0046_5343;

/// Version stamped on every file this build writes.
pub const STREAM_VERSION: u32 = 0x4;

/// Last version to order the frame prefix tag-first. The only difference
/// from the current layout is the prefix field order.
pub const STREAM_VERSION_LEGACY: u32 = 0x3;

/// Size of the fixed info descriptor in bytes.
pub const STREAM_INFO_SIZE: usize = 32;

/// Size of a frame prefix (8-byte length + 1-byte tag) in bytes.
pub const FRAME_PREFIX_SIZE: usize = 9;

/// Whether a header version can be parsed by this build.
pub fn supports_version(version: u32) -> bool {
    version == STREAM_VERSION || version == STREAM_VERSION_LEGACY
}

/// Frame prefix field order, fixed for a whole file by its header version
/// and bound once per session after the header has been validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `length(8) | tag(1)`, the order container payloads always use.
    Current,
    /// `tag(1) | length(8)`.
    Legacy,
}

impl Framing {
    pub fn for_version(version: u32) -> Option<Self> {
        match version {
            STREAM_VERSION => Some(Self::Current),
            STREAM_VERSION_LEGACY => Some(Self::Legacy),
            _ => None,
        }
    }

    /// Read one frame prefix in this order.
    pub fn read_prefix(self, reader: &mut impl Read) -> io::Result<(FrameTag, u64)> {
        match self {
            Self::Current => {
                let length = reader.read_u64::<LittleEndian>()?;
                let tag = FrameTag::from_u8(reader.read_u8()?);
                Ok((tag, length))
            }
            Self::Legacy => {
                let tag = FrameTag::from_u8(reader.read_u8()?);
                let length = reader.read_u64::<LittleEndian>()?;
                Ok((tag, length))
            }
        }
    }

    /// Write one frame prefix in this order.
    pub fn write_prefix(self, writer: &mut impl Write, tag: FrameTag, length: u64) -> io::Result<()> {
        match self {
            Self::Current => {
                writer.write_u64::<LittleEndian>(length)?;
                writer.write_u8(tag.as_u8())
            }
            Self::Legacy => {
                writer.write_u8(tag.as_u8())?;
                writer.write_u64::<LittleEndian>(length)
            }
        }
    }

    /// Write a whole frame: prefix in this order, then the payload.
    pub fn write_frame(self, writer: &mut impl Write, tag: FrameTag, payload: &[u8]) -> io::Result<()> {
        self.write_prefix(writer, tag, payload.len() as u64)?;
        if !payload.is_empty() {
            writer.write_all(payload)?;
        }
        Ok(())
    }
}

/// Serialize the info descriptor plus its name/date blocks.
///
/// Always stamps the current stream version; legacy order is read-side
/// compatibility only. Non-empty blocks are NUL-terminated.
pub fn encode_info(info: &StreamInfo) -> Vec<u8> {
    let name_size = block_size(&info.name);
    let date_size = block_size(&info.date);

    let mut out = Vec::with_capacity(STREAM_INFO_SIZE + name_size as usize + date_size as usize);
    out.extend_from_slice(&STREAM_MAGIC.to_le_bytes());
    out.extend_from_slice(&STREAM_VERSION.to_le_bytes());
    out.extend_from_slice(&info.fps.to_le_bytes());
    out.extend_from_slice(&info.flags.to_le_bytes());
    out.extend_from_slice(&info.pid.to_le_bytes());
    out.extend_from_slice(&name_size.to_le_bytes());
    out.extend_from_slice(&date_size.to_le_bytes());

    append_block(&mut out, &info.name);
    append_block(&mut out, &info.date);
    out
}

/// Parse and validate the info descriptor.
///
/// Returns the descriptor plus the framing the rest of the file uses.
/// Magic and version are checked before the variable blocks are touched.
pub fn decode_info(reader: &mut impl Read) -> Result<(StreamInfo, Framing), StreamFileError> {
    let mut fixed = [0u8; STREAM_INFO_SIZE];
    reader.read_exact(&mut fixed)?;

    let magic = u32::from_le_bytes(fixed[0..4].try_into().unwrap());
    if magic != STREAM_MAGIC {
        return Err(StreamFileError::BadMagic(magic));
    }

    let version = u32::from_le_bytes(fixed[4..8].try_into().unwrap());
    let framing = Framing::for_version(version).ok_or(StreamFileError::UnsupportedVersion(version))?;

    let fps = f64::from_le_bytes(fixed[8..16].try_into().unwrap());
    let flags = u32::from_le_bytes(fixed[16..20].try_into().unwrap());
    let pid = u32::from_le_bytes(fixed[20..24].try_into().unwrap());
    let name_size = u32::from_le_bytes(fixed[24..28].try_into().unwrap());
    let date_size = u32::from_le_bytes(fixed[28..32].try_into().unwrap());

    let name = read_block(reader, name_size)?;
    let date = read_block(reader, date_size)?;

    Ok((
        StreamInfo {
            fps,
            flags,
            pid,
            name,
            date,
        },
        framing,
    ))
}

fn block_size(value: &str) -> u32 {
    if value.is_empty() {
        0
    } else {
        value.len() as u32 + 1
    }
}

fn append_block(out: &mut Vec<u8>, value: &str) {
    if !value.is_empty() {
        out.extend_from_slice(value.as_bytes());
        out.push(0);
    }
}

fn read_block(reader: &mut impl Read, size: u32) -> Result<String, StreamFileError> {
    if size == 0 {
        return Ok(String::new());
    }
    let mut raw = vec![0u8; size as usize];
    reader.read_exact(&mut raw)?;
    // Drop the NUL terminator and anything after it.
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    raw.truncate(end);
    Ok(String::from_utf8_lossy(&raw).into_owned())
}
