//! # capture-stream-core
//!
//! Persistent stream-file subsystem for the real-time capture pipeline.
//!
//! Records the synchronized video/audio traffic of a live producer-consumer
//! pipeline into a versioned, self-describing binary container, and plays
//! such a container back into the same pipeline. Capture backends, codecs,
//! and playback rendering live elsewhere; this crate owns the on-disk
//! format, the single-writer locking discipline, the background write pump,
//! and stream-state replay.
//!
//! ## Architecture
//!
//! ```text
//! capture-stream-core (this crate)
//! ├── models/       ← StreamFileError, FileState, Frame/FrameTag, StreamInfo
//! ├── processing/   ← stream format codec, PacketBuffer, ChannelTracker
//! ├── session/      ← PumpTask + PumpWorker (worker-thread abstraction)
//! ├── storage/      ← StreamFile controller, locking/permission helpers
//! └── traits/       ← StateTracker contract, control callback hooks
//! ```
//!
//! Write data flow: live `PacketBuffer` → pump worker → state tracker →
//! framer → file. Read data flow: file → parser → zero-copy slot in the
//! destination `PacketBuffer` → pipeline consumers.

pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at the crate root for convenience.
pub use models::error::StreamFileError;
pub use models::frame::{Frame, FrameTag};
pub use models::state::FileState;
pub use models::stream_info::StreamInfo;
pub use processing::packet_buffer::{BufferError, PacketBuffer, Slot};
pub use processing::state_tracker::ChannelTracker;
pub use processing::stream_format::{
    supports_version, Framing, STREAM_MAGIC, STREAM_VERSION, STREAM_VERSION_LEGACY,
};
pub use session::worker::{PumpControl, PumpTask, PumpWorker};
pub use storage::stream_file::StreamFile;
pub use traits::callback::{ControlCallback, StopFlag};
pub use traits::state_tracker::StateTracker;
