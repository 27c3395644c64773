use std::io;
use std::sync::Arc;
use std::thread;

use crate::models::error::StreamFileError;
use crate::models::frame::Frame;
use crate::processing::packet_buffer::{BufferError, PacketBuffer};

/// What the task wants the worker to do after a processed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpControl {
    Continue,
    Stop,
}

/// One pump session: a typed task driven by a dedicated worker thread.
///
/// `process` is called once per frame popped from the source buffer;
/// `finished` receives the terminal status when the session ends. Errors
/// never cross the thread join; `finished` is the only sink.
pub trait PumpTask: Send + 'static {
    /// Handle one frame. Returning `Stop` or an error ends the session.
    fn process(&mut self, frame: Frame) -> Result<PumpControl, StreamFileError>;

    /// The session ended; `result` is the terminal status.
    fn finished(&mut self, result: Result<(), StreamFileError>);
}

/// Owned worker thread pumping frames from a shared buffer into a task.
///
/// One worker per session, created fresh and joined to completion before
/// reuse. The session ends when the task says `Stop`, the task fails, or
/// the source buffer is closed or cancelled (both are clean terminations:
/// the producing side decides when a session is over).
pub struct PumpWorker {
    handle: thread::JoinHandle<()>,
}

impl PumpWorker {
    pub fn spawn(
        name: &str,
        source: Arc<PacketBuffer>,
        mut task: impl PumpTask,
    ) -> io::Result<Self> {
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let result = run(&source, &mut task);
            task.finished(result);
        })?;
        Ok(Self { handle })
    }

    /// Block until the worker exits. The terminal status was already
    /// delivered to the task's `finished` hook.
    pub fn wait(self) {
        if self.handle.join().is_err() {
            log::error!("Pump worker thread panicked");
        }
    }
}

fn run(source: &PacketBuffer, task: &mut impl PumpTask) -> Result<(), StreamFileError> {
    loop {
        let frame = match source.pop() {
            Ok(frame) => frame,
            Err(BufferError::Closed) | Err(BufferError::Cancelled) => return Ok(()),
        };
        match task.process(frame)? {
            PumpControl::Continue => {}
            PumpControl::Stop => return Ok(()),
        }
    }
}
