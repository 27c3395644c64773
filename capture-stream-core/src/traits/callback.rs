use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::storage::stream_file::StreamFile;

/// Control-point callback dispatched by the write pump when a
/// callback-request frame arrives.
///
/// Runs synchronously on the pump worker thread with the frame's opaque
/// payload. The controller handle passed in is the legal route for
/// reentrant calls: the pump leaves the running state for the duration of
/// the dispatch, so the callback may write accumulated state, write an EOF
/// marker, or close and re-target the file.
pub type ControlCallback = Arc<dyn Fn(&StreamFile, &[u8]) + Send + Sync>;

/// Process-wide cooperative cancellation flag, queried by value once per
/// completed frame on the read path.
pub type StopFlag = Arc<AtomicBool>;
