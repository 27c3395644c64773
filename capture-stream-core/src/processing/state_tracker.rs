use crate::models::error::StreamFileError;
use crate::models::frame::{Frame, FrameTag};
use crate::traits::state_tracker::StateTracker;

/// Default state tracker, keyed per channel.
///
/// Retains the latest declaration per (tag, channel) for the tags that
/// describe stream setup rather than stream content: video context, audio
/// format, and color correction. Payload traffic (pictures, audio data,
/// compressed frames), containers, control requests, and close markers are
/// observed but never retained. Iteration order is first-seen, so replay
/// reproduces the original declaration order.
pub struct ChannelTracker {
    entries: Vec<Entry>,
}

struct Entry {
    tag: FrameTag,
    channel: u32,
    payload: Vec<u8>,
}

fn is_replayable(tag: FrameTag) -> bool {
    matches!(
        tag,
        FrameTag::VideoContext | FrameTag::AudioFormat | FrameTag::ColorCorrection
    )
}

impl ChannelTracker {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Number of live declarations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ChannelTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker for ChannelTracker {
    fn ingest(&mut self, tag: FrameTag, payload: &[u8]) {
        if !is_replayable(tag) {
            return;
        }

        // Declarations carry their channel id in the leading word.
        let channel = Frame::channel_id(payload).unwrap_or(0);
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.tag == tag && entry.channel == channel)
        {
            Some(entry) => entry.payload = payload.to_vec(),
            None => self.entries.push(Entry {
                tag,
                channel,
                payload: payload.to_vec(),
            }),
        }
    }

    fn iterate(
        &self,
        emit: &mut dyn FnMut(FrameTag, &[u8]) -> Result<(), StreamFileError>,
    ) -> Result<(), StreamFileError> {
        for entry in &self.entries {
            emit(entry.tag, &entry.payload)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declaration(channel: u32, body: &[u8]) -> Vec<u8> {
        let mut payload = channel.to_le_bytes().to_vec();
        payload.extend_from_slice(body);
        payload
    }

    fn collect(tracker: &ChannelTracker) -> Vec<(FrameTag, Vec<u8>)> {
        let mut seen = Vec::new();
        tracker
            .iterate(&mut |tag, payload| {
                seen.push((tag, payload.to_vec()));
                Ok(())
            })
            .unwrap();
        seen
    }

    #[test]
    fn replays_declarations_in_first_seen_order() {
        let mut tracker = ChannelTracker::new();
        tracker.ingest(FrameTag::VideoContext, &declaration(1, b"ctx"));
        tracker.ingest(FrameTag::AudioFormat, &declaration(1, b"fmt"));
        tracker.ingest(FrameTag::Picture, &declaration(1, b"px"));
        tracker.ingest(FrameTag::AudioData, &declaration(1, b"pcm"));

        let seen = collect(&tracker);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, FrameTag::VideoContext);
        assert_eq!(seen[1].0, FrameTag::AudioFormat);
    }

    #[test]
    fn updated_declaration_keeps_its_slot() {
        let mut tracker = ChannelTracker::new();
        tracker.ingest(FrameTag::VideoContext, &declaration(1, b"old"));
        tracker.ingest(FrameTag::AudioFormat, &declaration(1, b"fmt"));
        tracker.ingest(FrameTag::VideoContext, &declaration(1, b"new"));

        let seen = collect(&tracker);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, FrameTag::VideoContext);
        assert_eq!(&seen[0].1[4..], b"new");
        assert_eq!(seen[1].0, FrameTag::AudioFormat);
    }

    #[test]
    fn channels_are_tracked_separately() {
        let mut tracker = ChannelTracker::new();
        tracker.ingest(FrameTag::VideoContext, &declaration(1, b"one"));
        tracker.ingest(FrameTag::VideoContext, &declaration(2, b"two"));

        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn control_and_close_traffic_is_not_retained() {
        let mut tracker = ChannelTracker::new();
        tracker.ingest(FrameTag::CallbackRequest, b"arg");
        tracker.ingest(FrameTag::Container, &[0; 16]);
        tracker.ingest(FrameTag::Close, &[]);

        assert!(tracker.is_empty());
    }
}
