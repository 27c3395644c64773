//! File locking and permission setup for write targets.
//!
//! A write target gets the mandatory-locking permission layout (set-group-ID
//! on, group-execute off, enforced on mounts carrying the `mand` option)
//! and an exclusive advisory lock. Lock acquisition never waits: a held
//! lock refuses the attach immediately. The lock lives as long as the
//! descriptor and releases implicitly on close.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

/// Turn on set-group-ID and turn off group-execute, preserving the rest of
/// the file mode.
pub fn set_mandatory_lock_bits(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();

    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut stat) } < 0 {
        return Err(io::Error::last_os_error());
    }

    let mode = (stat.st_mode as libc::mode_t & !(libc::S_IXGRP as libc::mode_t))
        | libc::S_ISGID as libc::mode_t;
    if unsafe { libc::fchmod(fd, mode) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Take an exclusive advisory lock on the whole file, failing immediately
/// with `WouldBlock` if any other open description holds it.
pub fn try_lock_exclusive(file: &File) -> io::Result<()> {
    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Hint the kernel that this descriptor will be read front to back.
/// Best-effort; failure changes nothing observable.
#[cfg(target_os = "linux")]
pub fn advise_sequential(file: &File) {
    unsafe {
        libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_SEQUENTIAL);
    }
}

#[cfg(not(target_os = "linux"))]
pub fn advise_sequential(_file: &File) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::ErrorKind;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn temp_file_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("capture_stream_lock_test_{}", name))
    }

    fn create(path: &PathBuf) -> File {
        OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .unwrap()
    }

    #[test]
    fn second_lock_fails_without_waiting() {
        let path = temp_file_path("exclusive");
        let first = create(&path);
        let second = create(&path);

        try_lock_exclusive(&first).unwrap();
        let err = try_lock_exclusive(&second).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn lock_releases_with_descriptor() {
        let path = temp_file_path("release");
        let first = create(&path);
        try_lock_exclusive(&first).unwrap();
        drop(first);

        let second = create(&path);
        try_lock_exclusive(&second).unwrap();

        fs::remove_file(&path).ok();
    }

    #[test]
    fn permission_bits_follow_the_layout() {
        let path = temp_file_path("bits");
        let file = create(&path);
        fs::set_permissions(&path, fs::Permissions::from_mode(0o650)).unwrap();

        set_mandatory_lock_bits(&file).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o2000, 0o2000, "set-group-ID must be on");
        assert_eq!(mode & 0o010, 0, "group-execute must be off");
        assert_eq!(mode & 0o600, 0o600, "owner bits untouched");

        fs::remove_file(&path).ok();
    }
}
