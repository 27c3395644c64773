/// Stream file descriptor, written once at the start of every container.
///
/// On disk this is a fixed 32-byte header followed by two variable-length
/// byte blocks (see `processing::stream_format` for the codec):
/// ```text
/// [0-3]    magic
/// [4-7]    stream version
/// [8-15]   fps (f64)
/// [16-19]  flags
/// [20-23]  pid of the captured program
/// [24-27]  name_size
/// [28-31]  date_size
/// [32..]   name_size bytes: NUL-terminated program path
///          date_size bytes: NUL-terminated capture date
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Capture rate the recorder was driven at.
    pub fps: f64,
    pub flags: u32,
    /// Pid of the captured program.
    pub pid: u32,
    /// Path of the captured program.
    pub name: String,
    /// Human-readable local capture date.
    pub date: String,
}

impl StreamInfo {
    /// Descriptor for a capture started now by this process.
    pub fn new(fps: f64, name: impl Into<String>) -> Self {
        Self {
            fps,
            flags: 0,
            pid: std::process::id(),
            name: name.into(),
            date: chrono::Local::now().format("%a %b %e %T %Y").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_stamps_pid_and_date() {
        let info = StreamInfo::new(30.0, "/usr/bin/demo");
        assert_eq!(info.pid, std::process::id());
        assert_eq!(info.name, "/usr/bin/demo");
        assert!(!info.date.is_empty());
        assert_eq!(info.flags, 0);
    }
}
