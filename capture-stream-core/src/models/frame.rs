/// Stream protocol tags, one byte each on the wire.
///
/// Tags this build does not know are carried through as `Other`; the
/// container never interprets payloads, so unknown traffic survives a
/// write/read cycle unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameTag {
    /// End of stream. A zero-length close frame terminates every read loop.
    Close,
    Picture,
    /// Declares a video context (geometry, format) for one channel.
    VideoContext,
    /// Frame-compressed payload, primary codec.
    Compressed,
    /// Declares the sample format for one audio channel.
    AudioFormat,
    AudioData,
    /// Frame-compressed payload, alternate codec.
    CompressedAlt,
    /// Color correction parameters for one video channel.
    ColorCorrection,
    /// An already-framed message passed through verbatim.
    Container,
    /// External control-point injection; dispatched to the registered
    /// callback, never persisted.
    CallbackRequest,
    Other(u8),
}

impl FrameTag {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Close => 0x01,
            Self::Picture => 0x02,
            Self::VideoContext => 0x03,
            Self::Compressed => 0x04,
            Self::AudioFormat => 0x05,
            Self::AudioData => 0x06,
            Self::CompressedAlt => 0x07,
            Self::ColorCorrection => 0x08,
            Self::Container => 0x09,
            Self::CallbackRequest => 0x0a,
            Self::Other(raw) => raw,
        }
    }

    /// Total mapping: reserved values get their named variant, everything
    /// else becomes `Other`. `Other` is never constructed for a reserved
    /// value, so `as_u8`/`from_u8` round-trip.
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0x01 => Self::Close,
            0x02 => Self::Picture,
            0x03 => Self::VideoContext,
            0x04 => Self::Compressed,
            0x05 => Self::AudioFormat,
            0x06 => Self::AudioData,
            0x07 => Self::CompressedAlt,
            0x08 => Self::ColorCorrection,
            0x09 => Self::Container,
            0x0a => Self::CallbackRequest,
            raw => Self::Other(raw),
        }
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close)
    }
}

/// One length-delimited, type-tagged unit of the stream protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: FrameTag,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(tag: FrameTag, payload: Vec<u8>) -> Self {
        Self { tag, payload }
    }

    /// The zero-length end-of-stream marker.
    pub fn close() -> Self {
        Self {
            tag: FrameTag::Close,
            payload: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Wrap this frame into a container frame. The payload becomes
    /// `inner_length(8, LE) | inner_tag(1) | inner_payload`, which is also
    /// the current on-disk frame image: writing a container payload
    /// verbatim yields a plain frame.
    pub fn into_container(self) -> Frame {
        let mut payload = Vec::with_capacity(8 + 1 + self.payload.len());
        payload.extend_from_slice(&(self.payload.len() as u64).to_le_bytes());
        payload.push(self.tag.as_u8());
        payload.extend_from_slice(&self.payload);
        Frame {
            tag: FrameTag::Container,
            payload,
        }
    }

    /// Channel id carried in the payload's leading four bytes, used by
    /// declaration messages (video context, audio format, color).
    pub fn channel_id(payload: &[u8]) -> Option<u32> {
        let head: [u8; 4] = payload.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(head))
    }
}
