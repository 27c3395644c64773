use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::error::StreamFileError;
use crate::models::frame::{Frame, FrameTag};
use crate::models::state::FileState;
use crate::models::stream_info::StreamInfo;
use crate::processing::packet_buffer::PacketBuffer;
use crate::processing::state_tracker::ChannelTracker;
use crate::processing::stream_format::{self, Framing};
use crate::session::worker::{PumpControl, PumpTask, PumpWorker};
use crate::storage::lock;
use crate::traits::callback::{ControlCallback, StopFlag};
use crate::traits::state_tracker::StateTracker;

enum Handle {
    None,
    Writer(BufWriter<File>),
    Reader(BufReader<File>),
}

/// Controller core, shared with the pump worker behind one mutex.
struct Core {
    state: FileState,
    handle: Handle,
    /// Prefix order for the attached read source, bound by `read_info`.
    /// Write sessions always stamp the current layout.
    framing: Framing,
    sync: bool,
    callback: Option<ControlCallback>,
    tracker: Box<dyn StateTracker>,
    worker: Option<PumpWorker>,
}

/// Persistent stream-file controller.
///
/// Records the live capture pipeline into a versioned, self-describing
/// container and plays such a container back into the pipeline:
/// ```text
/// write: PacketBuffer → pump worker → tracker → framer → file
/// read:  file → parser → zero-copy slot in the destination PacketBuffer
/// ```
/// One controller serves one session at a time (read or write); callers
/// serialize their own access. Clones share the same controller, which is
/// how the control callback legally reenters it from the pump thread.
#[derive(Clone)]
pub struct StreamFile {
    inner: Arc<Mutex<Core>>,
}

impl StreamFile {
    pub fn new() -> Self {
        Self::with_tracker(Box::new(ChannelTracker::new()))
    }

    pub fn with_tracker(tracker: Box<dyn StateTracker>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Core {
                state: FileState::Idle,
                handle: Handle::None,
                framing: Framing::Current,
                sync: false,
                callback: None,
                tracker,
                worker: None,
            })),
        }
    }

    /// Flush after every written frame (and open targets with `O_SYNC`).
    pub fn set_sync(&self, sync: bool) {
        self.inner.lock().sync = sync;
    }

    /// Register the control-point callback dispatched for
    /// callback-request frames.
    pub fn set_callback(&self, callback: ControlCallback) {
        self.inner.lock().callback = Some(callback);
    }

    /// Whether the write pump worker is live. A control callback sees
    /// `false` here for the duration of its dispatch.
    pub fn is_running(&self) -> bool {
        self.inner.lock().state.is_running()
    }

    // --- Write side ---

    /// Create (or truncate) `path` and attach it as the write target.
    pub fn open_target(&self, path: impl AsRef<Path>) -> Result<(), StreamFileError> {
        let path = path.as_ref();
        let mut core = self.inner.lock();
        if !core.state.is_idle() {
            return Err(StreamFileError::Busy);
        }

        log::info!(
            "Opening {} for writing stream ({})",
            path.display(),
            if core.sync { "sync" } else { "no sync" }
        );

        let mut options = OpenOptions::new();
        options.create(true).write(true).mode(0o640);
        if core.sync {
            options.custom_flags(libc::O_SYNC);
        }
        let file = match options.open(path) {
            Ok(file) => file,
            Err(e) => {
                log::error!("Can't open {}: {e}", path.display());
                return Err(e.into());
            }
        };

        core.attach_target(file)
    }

    /// Attach an already-open descriptor as the write target.
    pub fn set_target(&self, file: File) -> Result<(), StreamFileError> {
        let mut core = self.inner.lock();
        if !core.state.is_idle() {
            return Err(StreamFileError::Busy);
        }
        core.attach_target(file)
    }

    /// Write the stream info descriptor and its name/date blocks. Must
    /// happen exactly once per write session, before the pump starts.
    pub fn write_info(&self, info: &StreamInfo) -> Result<(), StreamFileError> {
        let mut core = self.inner.lock();
        match core.state {
            FileState::WriteAttached => {}
            FileState::WriteInfoWritten => {
                return Err(StreamFileError::InvalidState("stream info already written"))
            }
            FileState::Running => {
                return Err(StreamFileError::InvalidState("write pump is running"))
            }
            _ => return Err(StreamFileError::InvalidState("no write target attached")),
        }

        let encoded = stream_format::encode_info(info);
        if let Err(e) = core.write_raw(&encoded) {
            log::error!("Can't write stream information: {e}");
            return Err(e);
        }
        core.state = FileState::WriteInfoWritten;
        Ok(())
    }

    /// Spawn the single pump worker moving frames from `source` into the
    /// file until the source ends or a close frame passes through.
    pub fn start_write_pump(&self, source: Arc<PacketBuffer>) -> Result<(), StreamFileError> {
        let mut core = self.inner.lock();
        match core.state {
            FileState::WriteInfoWritten => {}
            FileState::Running => {
                return Err(StreamFileError::InvalidState("write pump already running"))
            }
            FileState::WriteAttached => {
                return Err(StreamFileError::InvalidState("stream info not written"))
            }
            _ => return Err(StreamFileError::InvalidState("no write target attached")),
        }
        if core.worker.is_some() {
            return Err(StreamFileError::InvalidState(
                "previous pump worker not yet joined",
            ));
        }

        let task = WritePump {
            core: Arc::clone(&self.inner),
        };
        let worker = PumpWorker::spawn("stream-write-pump", source, task)?;
        core.worker = Some(worker);
        core.state = FileState::Running;
        Ok(())
    }

    /// Block until the pump worker exits. The session drops back to
    /// write-attached: a new session must rewrite the info descriptor.
    pub fn wait_write_pump(&self) -> Result<(), StreamFileError> {
        let worker = {
            let mut core = self.inner.lock();
            match core.worker.take() {
                Some(worker) => worker,
                None => {
                    return Err(StreamFileError::InvalidState("write pump is not running"))
                }
            }
        };

        worker.wait();

        let mut core = self.inner.lock();
        if matches!(core.state, FileState::Running | FileState::WriteInfoWritten) {
            core.state = FileState::WriteAttached;
        }
        Ok(())
    }

    /// Emit the zero-length end-of-stream marker.
    pub fn write_eof(&self) -> Result<(), StreamFileError> {
        let mut core = self.inner.lock();
        core.guard_write_quiescent()?;

        if let Err(e) = core.write_frame(FrameTag::Close, &[]) {
            log::error!("Can't write end of stream: {e}");
            return Err(e);
        }
        Ok(())
    }

    /// Re-emit every declaration the tracker has accumulated, in
    /// first-seen order. Lets a target attached mid-capture still carry
    /// full context.
    pub fn write_state(&self) -> Result<(), StreamFileError> {
        let mut core = self.inner.lock();
        core.guard_write_quiescent()?;

        let sync = core.sync;
        let Core { tracker, handle, .. } = &mut *core;
        let writer = match handle {
            Handle::Writer(writer) => writer,
            _ => return Err(StreamFileError::InvalidState("no write target attached")),
        };

        let result = tracker.iterate(&mut |tag, payload| {
            Framing::Current.write_frame(&mut *writer, tag, payload)?;
            if sync {
                writer.flush()?;
            }
            Ok(())
        });
        if let Err(e) = &result {
            log::error!("Can't write accumulated state: {e}");
        }
        result
    }

    /// Detach the write target, flushing buffered frames. The advisory
    /// lock releases with the descriptor.
    pub fn close_target(&self) -> Result<(), StreamFileError> {
        let mut core = self.inner.lock();
        if core.state.is_running() {
            return Err(StreamFileError::InvalidState("write pump is running"));
        }
        if !core.state.is_writing() {
            return Err(StreamFileError::InvalidState("no write target attached"));
        }

        if let Handle::Writer(mut writer) = std::mem::replace(&mut core.handle, Handle::None) {
            if let Err(e) = writer.flush() {
                log::error!("Can't flush stream file: {e}");
            }
        }
        core.state = FileState::Idle;
        Ok(())
    }

    // --- Read side ---

    /// Open `path` read-only and attach it as the read source, hinting
    /// the kernel about the sequential access pattern.
    pub fn open_source(&self, path: impl AsRef<Path>) -> Result<(), StreamFileError> {
        let path = path.as_ref();
        let mut core = self.inner.lock();
        if !core.state.is_idle() {
            return Err(StreamFileError::Busy);
        }

        log::info!("Opening {} for reading stream", path.display());
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                log::error!("Can't open {}: {e}", path.display());
                return Err(e.into());
            }
        };
        lock::advise_sequential(&file);
        core.attach_source(file);
        Ok(())
    }

    /// Attach an already-open descriptor as the read source.
    pub fn set_source(&self, file: File) -> Result<(), StreamFileError> {
        let mut core = self.inner.lock();
        if !core.state.is_idle() {
            return Err(StreamFileError::Busy);
        }
        core.attach_source(file);
        Ok(())
    }

    /// Read and validate the stream info descriptor. On success the
    /// detected frame layout is bound for the rest of the session; on any
    /// failure bulk reading stays gated.
    pub fn read_info(&self) -> Result<StreamInfo, StreamFileError> {
        let mut core = self.inner.lock();
        match core.state {
            FileState::ReadAttached => {}
            FileState::ReadInfoValid => {
                return Err(StreamFileError::InvalidState("stream info already read"))
            }
            _ => return Err(StreamFileError::InvalidState("no read source attached")),
        }

        let Core { handle, .. } = &mut *core;
        let reader = match handle {
            Handle::Reader(reader) => reader,
            _ => return Err(StreamFileError::InvalidState("no read source attached")),
        };

        match stream_format::decode_info(reader) {
            Ok((info, framing)) => {
                if framing == Framing::Legacy {
                    log::info!("Legacy frame layout detected");
                }
                core.framing = framing;
                core.state = FileState::ReadInfoValid;
                Ok(info)
            }
            Err(e) => {
                log::error!("Can't read stream information: {e}");
                Err(e)
            }
        }
    }

    /// Pump frames from the file into `to` until the close frame, end of
    /// file, or cancellation. Runs on the caller thread.
    ///
    /// A file that ends mid-frame is not an error: a synthetic close
    /// frame is forwarded and the read reports success. Any other I/O
    /// failure forwards a close frame, cancels `to` so blocked consumers
    /// are released, and propagates. The cancel flag is polled once per
    /// completed frame and forwards nothing by itself.
    pub fn read_into(&self, to: &PacketBuffer, cancel: &StopFlag) -> Result<(), StreamFileError> {
        let mut core = self.inner.lock();
        match core.state {
            FileState::ReadInfoValid => {}
            FileState::ReadAttached => {
                return Err(StreamFileError::InvalidState("stream info header not read"))
            }
            _ => return Err(StreamFileError::InvalidState("no read source attached")),
        }

        let framing = core.framing;
        let result = {
            let Core { handle, .. } = &mut *core;
            let reader = match handle {
                Handle::Reader(reader) => reader,
                _ => return Err(StreamFileError::InvalidState("no read source attached")),
            };
            pump_frames(reader, framing, to, cancel)
        };

        // The next session must validate the descriptor again.
        core.state = FileState::ReadAttached;
        result
    }

    /// Detach the read source.
    pub fn close_source(&self) -> Result<(), StreamFileError> {
        let mut core = self.inner.lock();
        if !core.state.is_reading() {
            return Err(StreamFileError::InvalidState("no read source attached"));
        }

        core.handle = Handle::None;
        core.state = FileState::Idle;
        Ok(())
    }
}

impl Default for StreamFile {
    fn default() -> Self {
        Self::new()
    }
}

impl Core {
    fn guard_write_quiescent(&self) -> Result<(), StreamFileError> {
        match self.state {
            FileState::WriteAttached | FileState::WriteInfoWritten => Ok(()),
            FileState::Running => Err(StreamFileError::InvalidState("write pump is running")),
            _ => Err(StreamFileError::InvalidState("no write target attached")),
        }
    }

    fn attach_target(&mut self, file: File) -> Result<(), StreamFileError> {
        if let Err(e) = lock::set_mandatory_lock_bits(&file) {
            log::error!("Can't set lock permission bits: {e}");
            return Err(e.into());
        }
        if let Err(e) = lock::try_lock_exclusive(&file) {
            log::error!("Can't lock stream file: {e}");
            return Err(e.into());
        }

        // Truncate only once the lock is ours.
        let mut file = file;
        if let Err(e) = file.set_len(0) {
            log::error!("Can't truncate stream file: {e}");
            return Err(e.into());
        }
        if let Err(e) = file.seek(SeekFrom::Start(0)) {
            log::error!("Can't rewind stream file: {e}");
            return Err(e.into());
        }

        self.handle = Handle::Writer(BufWriter::new(file));
        self.state = FileState::WriteAttached;
        Ok(())
    }

    fn attach_source(&mut self, mut file: File) {
        // Non-seekable sources (pipes) keep their position.
        let _ = file.seek(SeekFrom::Start(0));
        self.handle = Handle::Reader(BufReader::new(file));
        self.state = FileState::ReadAttached;
    }

    fn writer_mut(&mut self) -> Result<&mut BufWriter<File>, StreamFileError> {
        match &mut self.handle {
            Handle::Writer(writer) => Ok(writer),
            _ => Err(StreamFileError::InvalidState("no write target attached")),
        }
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), StreamFileError> {
        let sync = self.sync;
        let writer = self.writer_mut()?;
        writer.write_all(bytes)?;
        if sync {
            writer.flush()?;
        }
        Ok(())
    }

    fn write_frame(&mut self, tag: FrameTag, payload: &[u8]) -> Result<(), StreamFileError> {
        let sync = self.sync;
        let writer = self.writer_mut()?;
        Framing::Current.write_frame(writer, tag, payload)?;
        if sync {
            writer.flush()?;
        }
        Ok(())
    }
}

/// The write-pump task: one frame from the shared buffer per call.
struct WritePump {
    core: Arc<Mutex<Core>>,
}

impl PumpTask for WritePump {
    fn process(&mut self, frame: Frame) -> Result<PumpControl, StreamFileError> {
        let mut core = self.core.lock();

        // The tracker observes everything, including traffic that is
        // never persisted.
        core.tracker.ingest(frame.tag, &frame.payload);

        match frame.tag {
            FrameTag::CallbackRequest => {
                let Some(callback) = core.callback.clone() else {
                    return Ok(PumpControl::Continue);
                };

                // Leave the running state so the callback may legally
                // reenter the controller, then restore it.
                core.state = FileState::WriteInfoWritten;
                drop(core);

                let controller = StreamFile {
                    inner: Arc::clone(&self.core),
                };
                callback(&controller, &frame.payload);

                let mut core = self.core.lock();
                if core.state == FileState::WriteInfoWritten {
                    core.state = FileState::Running;
                    Ok(PumpControl::Continue)
                } else {
                    log::debug!("Control callback re-targeted the stream; stopping pump");
                    Ok(PumpControl::Stop)
                }
            }
            FrameTag::Container => {
                // The payload is already a complete frame image; pass it
                // through untouched.
                core.write_raw(&frame.payload)?;
                Ok(PumpControl::Continue)
            }
            tag => {
                core.write_frame(tag, &frame.payload)?;
                if tag.is_close() {
                    Ok(PumpControl::Stop)
                } else {
                    Ok(PumpControl::Continue)
                }
            }
        }
    }

    fn finished(&mut self, result: Result<(), StreamFileError>) {
        if let Err(e) = result {
            log::error!("Write pump failed: {e}");
        }
    }
}

fn pump_frames(
    reader: &mut BufReader<File>,
    framing: Framing,
    to: &PacketBuffer,
    cancel: &StopFlag,
) -> Result<(), StreamFileError> {
    loop {
        let (tag, length) = match framing.read_prefix(reader) {
            Ok(prefix) => prefix,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return forward_synthetic_close(to),
            Err(e) => return Err(fail_read(to, e)),
        };

        let size = match usize::try_from(length) {
            Ok(size) => size,
            Err(_) => {
                let e = io::Error::new(
                    ErrorKind::InvalidData,
                    format!("frame length {length} exceeds the address space"),
                );
                return Err(fail_read(to, e));
            }
        };

        let mut slot = match to.open_slot(tag, size) {
            Ok(slot) => slot,
            Err(e) => {
                // Consumers tore the destination down; end like a cancel.
                log::debug!("Destination buffer unavailable: {e}");
                return Ok(());
            }
        };
        match reader.read_exact(slot.payload_mut()) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                drop(slot);
                return forward_synthetic_close(to);
            }
            Err(e) => {
                drop(slot);
                return Err(fail_read(to, e));
            }
        }
        if slot.commit().is_err() {
            log::debug!("Destination buffer cancelled");
            return Ok(());
        }

        if tag.is_close() {
            return Ok(());
        }
        if cancel.load(Ordering::Relaxed) {
            // Cancellation forwards nothing by itself.
            return Ok(());
        }
    }
}

fn forward_synthetic_close(to: &PacketBuffer) -> Result<(), StreamFileError> {
    log::error!("Unexpected end of stream");
    let _ = to.push(Frame::close());
    Ok(())
}

fn fail_read(to: &PacketBuffer, err: io::Error) -> StreamFileError {
    log::error!("Can't read stream: {err}");
    let _ = to.push(Frame::close());
    to.cancel();
    err.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::{Duration, Instant};

    fn temp_file_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("capture_stream_test_{name}"))
    }

    fn no_cancel() -> StopFlag {
        Arc::new(AtomicBool::new(false))
    }

    fn sample_info() -> StreamInfo {
        StreamInfo {
            fps: 30.0,
            flags: 0,
            pid: 1000,
            name: "/usr/bin/demo".into(),
            date: "Thu Aug  6 12:00:00 2026".into(),
        }
    }

    /// Parse every frame in a finished stream file.
    fn frames_on_disk(path: &PathBuf) -> Vec<(FrameTag, Vec<u8>)> {
        let mut reader = BufReader::new(File::open(path).unwrap());
        let (_, framing) = stream_format::decode_info(&mut reader).unwrap();

        let mut frames = Vec::new();
        loop {
            let (tag, length) = match framing.read_prefix(&mut reader) {
                Ok(prefix) => prefix,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => panic!("unexpected read error: {e}"),
            };
            let mut payload = vec![0u8; length as usize];
            reader.read_exact(&mut payload).unwrap();
            frames.push((tag, payload));
        }
        frames
    }

    fn pump_session(path: &PathBuf, frames: Vec<Frame>) -> StreamFile {
        let file = StreamFile::new();
        file.open_target(path).unwrap();
        file.write_info(&sample_info()).unwrap();

        let source = Arc::new(PacketBuffer::new());
        file.start_write_pump(Arc::clone(&source)).unwrap();
        for frame in frames {
            source.push(frame).unwrap();
        }
        source.push(Frame::close()).unwrap();
        file.wait_write_pump().unwrap();
        file
    }

    fn drain(buffer: &PacketBuffer) -> Vec<(FrameTag, Vec<u8>)> {
        let mut out = Vec::new();
        while let Some(frame) = buffer.try_pop() {
            out.push((frame.tag, frame.payload));
        }
        out
    }

    #[test]
    fn round_trip_mixed_frames() {
        let path = temp_file_path("round_trip.csf");
        let writer = pump_session(
            &path,
            vec![
                Frame::new(FrameTag::Picture, vec![1, 2, 3]),
                Frame::new(FrameTag::AudioData, vec![4, 5]),
                Frame::new(FrameTag::Other(0x42), vec![6]),
            ],
        );
        writer.close_target().unwrap();

        let reader = StreamFile::new();
        reader.open_source(&path).unwrap();
        let info = reader.read_info().unwrap();
        assert_eq!(info, sample_info());

        let dest = PacketBuffer::new();
        reader.read_into(&dest, &no_cancel()).unwrap();
        reader.close_source().unwrap();

        assert_eq!(
            drain(&dest),
            vec![
                (FrameTag::Picture, vec![1, 2, 3]),
                (FrameTag::AudioData, vec![4, 5]),
                (FrameTag::Other(0x42), vec![6]),
                (FrameTag::Close, vec![]),
            ]
        );

        fs::remove_file(&path).ok();
    }

    #[test]
    fn container_frames_dissolve_on_disk() {
        let path = temp_file_path("container.csf");
        let writer = pump_session(
            &path,
            vec![Frame::new(FrameTag::Picture, vec![7, 8, 9]).into_container()],
        );
        writer.close_target().unwrap();

        assert_eq!(
            frames_on_disk(&path),
            vec![
                (FrameTag::Picture, vec![7, 8, 9]),
                (FrameTag::Close, vec![]),
            ]
        );

        fs::remove_file(&path).ok();
    }

    #[test]
    fn legacy_layout_reads_back() {
        let path = temp_file_path("legacy.csf");
        let mut bytes = stream_format::encode_info(&sample_info());
        bytes[4..8].copy_from_slice(&stream_format::STREAM_VERSION_LEGACY.to_le_bytes());
        Framing::Legacy
            .write_frame(&mut bytes, FrameTag::Picture, &[9, 9])
            .unwrap();
        Framing::Legacy
            .write_frame(&mut bytes, FrameTag::Close, &[])
            .unwrap();
        fs::write(&path, &bytes).unwrap();

        let reader = StreamFile::new();
        reader.open_source(&path).unwrap();
        reader.read_info().unwrap();

        let dest = PacketBuffer::new();
        reader.read_into(&dest, &no_cancel()).unwrap();

        assert_eq!(
            drain(&dest),
            vec![
                (FrameTag::Picture, vec![9, 9]),
                (FrameTag::Close, vec![]),
            ]
        );

        fs::remove_file(&path).ok();
    }

    #[test]
    fn truncated_file_synthesizes_one_close() {
        let path = temp_file_path("truncated.csf");
        let mut bytes = stream_format::encode_info(&sample_info());
        // Prefix promises 100 payload bytes; deliver only 10.
        Framing::Current
            .write_prefix(&mut bytes, FrameTag::Picture, 100)
            .unwrap();
        bytes.extend_from_slice(&[0xab; 10]);
        fs::write(&path, &bytes).unwrap();

        let reader = StreamFile::new();
        reader.open_source(&path).unwrap();
        reader.read_info().unwrap();

        let dest = PacketBuffer::new();
        reader.read_into(&dest, &no_cancel()).unwrap();

        assert_eq!(drain(&dest), vec![(FrameTag::Close, vec![])]);
        assert!(!dest.is_cancelled());

        fs::remove_file(&path).ok();
    }

    #[test]
    fn unsupported_version_gates_bulk_reading() {
        let path = temp_file_path("version_gate.csf");
        let mut bytes = stream_format::encode_info(&sample_info());
        bytes[4..8].copy_from_slice(&0x2u32.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        let reader = StreamFile::new();
        reader.open_source(&path).unwrap();
        assert!(matches!(
            reader.read_info(),
            Err(StreamFileError::UnsupportedVersion(0x2))
        ));

        let dest = PacketBuffer::new();
        assert!(matches!(
            reader.read_into(&dest, &no_cancel()),
            Err(StreamFileError::InvalidState(_))
        ));
        reader.close_source().unwrap();

        fs::remove_file(&path).ok();
    }

    #[test]
    fn second_writer_fails_immediately() {
        let path = temp_file_path("locked.csf");
        let first = StreamFile::new();
        first.open_target(&path).unwrap();

        let second = StreamFile::new();
        let started = Instant::now();
        match second.open_target(&path) {
            Err(StreamFileError::Io(e)) => assert_eq!(e.kind(), ErrorKind::WouldBlock),
            other => panic!("expected lock failure, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(1));

        // The lock releases with the descriptor.
        first.close_target().unwrap();
        second.open_target(&path).unwrap();
        second.close_target().unwrap();

        fs::remove_file(&path).ok();
    }

    #[test]
    fn attach_while_attached_is_busy() {
        let path = temp_file_path("busy.csf");
        let file = StreamFile::new();
        file.open_target(&path).unwrap();

        assert!(matches!(
            file.open_target(temp_file_path("busy_other.csf")),
            Err(StreamFileError::Busy)
        ));
        assert!(matches!(
            file.open_source(&path),
            Err(StreamFileError::Busy)
        ));

        file.close_target().unwrap();
        fs::remove_file(&path).ok();
    }

    #[test]
    fn close_when_idle_is_a_state_error() {
        let file = StreamFile::new();
        assert!(matches!(
            file.close_target(),
            Err(StreamFileError::InvalidState(_))
        ));
        assert!(matches!(
            file.close_source(),
            Err(StreamFileError::InvalidState(_))
        ));
        assert!(!file.is_running());

        // Flags are unchanged: a fresh attach still works.
        let path = temp_file_path("close_idle.csf");
        file.open_target(&path).unwrap();
        file.close_target().unwrap();
        assert!(matches!(
            file.close_target(),
            Err(StreamFileError::InvalidState(_))
        ));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn call_order_is_enforced() {
        let path = temp_file_path("order.csf");
        let file = StreamFile::new();

        assert!(matches!(
            file.write_info(&sample_info()),
            Err(StreamFileError::InvalidState(_))
        ));
        assert!(matches!(
            file.wait_write_pump(),
            Err(StreamFileError::InvalidState(_))
        ));

        file.open_target(&path).unwrap();
        // Pump cannot start before the info descriptor is on disk.
        assert!(matches!(
            file.start_write_pump(Arc::new(PacketBuffer::new())),
            Err(StreamFileError::InvalidState(_))
        ));

        file.write_info(&sample_info()).unwrap();
        assert!(matches!(
            file.write_info(&sample_info()),
            Err(StreamFileError::InvalidState(_))
        ));

        file.close_target().unwrap();
        fs::remove_file(&path).ok();
    }

    #[test]
    fn callback_request_dispatches_once_outside_running() {
        let path = temp_file_path("callback.csf");
        let file = StreamFile::new();

        let calls = Arc::new(AtomicUsize::new(0));
        let running_during = Arc::new(AtomicBool::new(true));
        {
            let calls = Arc::clone(&calls);
            let running_during = Arc::clone(&running_during);
            file.set_callback(Arc::new(move |controller, payload| {
                assert_eq!(payload, b"ping");
                running_during.store(controller.is_running(), Ordering::SeqCst);
                // Reentry through the controller is legal here.
                controller.write_state().unwrap();
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }

        file.open_target(&path).unwrap();
        file.write_info(&sample_info()).unwrap();
        let source = Arc::new(PacketBuffer::new());
        file.start_write_pump(Arc::clone(&source)).unwrap();

        source
            .push(Frame::new(FrameTag::CallbackRequest, b"ping".to_vec()))
            .unwrap();
        source.push(Frame::close()).unwrap();
        file.wait_write_pump().unwrap();
        file.close_target().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!running_during.load(Ordering::SeqCst));
        assert!(!file.is_running());

        // The control frame itself is never persisted.
        assert_eq!(frames_on_disk(&path), vec![(FrameTag::Close, vec![])]);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn write_state_replays_declarations_in_order() {
        let path = temp_file_path("replay.csf");

        let mut ctx = 1u32.to_le_bytes().to_vec();
        ctx.extend_from_slice(b"ctx");
        let mut fmt = 2u32.to_le_bytes().to_vec();
        fmt.extend_from_slice(b"fmt");

        let writer = pump_session(
            &path,
            vec![
                Frame::new(FrameTag::VideoContext, ctx.clone()),
                Frame::new(FrameTag::AudioFormat, fmt.clone()),
                Frame::new(FrameTag::Picture, vec![0xff; 4]),
                Frame::new(FrameTag::AudioData, vec![0xee; 4]),
            ],
        );
        writer.write_state().unwrap();
        writer.close_target().unwrap();

        let frames = frames_on_disk(&path);
        // Pumped traffic first, then the replayed declarations only.
        let replayed = &frames[frames.len() - 2..];
        assert_eq!(replayed[0], (FrameTag::VideoContext, ctx));
        assert_eq!(replayed[1], (FrameTag::AudioFormat, fmt));
        assert_eq!(frames.len(), 7);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn cancellation_stops_after_current_frame() {
        let path = temp_file_path("cancel.csf");
        let mut bytes = stream_format::encode_info(&sample_info());
        for _ in 0..3 {
            Framing::Current
                .write_frame(&mut bytes, FrameTag::Picture, &[0xab; 8])
                .unwrap();
        }
        Framing::Current
            .write_frame(&mut bytes, FrameTag::Close, &[])
            .unwrap();
        fs::write(&path, &bytes).unwrap();

        let reader = StreamFile::new();
        reader.open_source(&path).unwrap();
        reader.read_info().unwrap();

        let cancel: StopFlag = Arc::new(AtomicBool::new(true));
        let dest = PacketBuffer::new();
        reader.read_into(&dest, &cancel).unwrap();

        // One completed frame, then the poll; no synthetic close.
        assert_eq!(drain(&dest), vec![(FrameTag::Picture, vec![0xab; 8])]);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn write_eof_emits_close_frame() {
        let path = temp_file_path("eof.csf");
        let file = StreamFile::new();
        file.open_target(&path).unwrap();
        file.write_info(&sample_info()).unwrap();
        file.write_eof().unwrap();
        file.close_target().unwrap();

        assert_eq!(frames_on_disk(&path), vec![(FrameTag::Close, vec![])]);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn new_session_requires_fresh_info() {
        let path = temp_file_path("fresh_info.csf");
        let file = pump_session(&path, vec![Frame::new(FrameTag::Picture, vec![1])]);

        // After the pump is joined the info descriptor must be rewritten.
        assert!(matches!(
            file.start_write_pump(Arc::new(PacketBuffer::new())),
            Err(StreamFileError::InvalidState(_))
        ));
        file.write_info(&sample_info()).unwrap();
        file.close_target().unwrap();

        fs::remove_file(&path).ok();
    }
}
