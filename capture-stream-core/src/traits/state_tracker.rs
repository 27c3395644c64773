use crate::models::error::StreamFileError;
use crate::models::frame::FrameTag;

/// Accumulates replayable declarative messages observed in a stream.
///
/// The write pump hands every frame it moves to `ingest`, regardless of
/// type; which tags qualify as replayable is entirely the tracker's
/// decision. `iterate` re-emits the live state so a target attached
/// mid-capture can still carry full context (see
/// `StreamFile::write_state`).
///
/// `ingest` is called from the pump worker thread while the controller
/// core is held, so implementations must not call back into the
/// controller.
pub trait StateTracker: Send {
    /// Observe one frame.
    fn ingest(&mut self, tag: FrameTag, payload: &[u8]);

    /// Invoke `emit` once per live piece of state, in first-seen order.
    /// The first emission error aborts the iteration.
    fn iterate(
        &self,
        emit: &mut dyn FnMut(FrameTag, &[u8]) -> Result<(), StreamFileError>,
    ) -> Result<(), StreamFileError>;
}
