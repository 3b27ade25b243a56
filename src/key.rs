use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::libc::{self, key_t};
use nix::sys::stat::Mode;
use nix::unistd::close;

use crate::error::{Error, ErrorKind, Result};

/// ftok project id shared by every participant.
const PROJECT_ID: libc::c_int = 1234;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKey(key_t);

impl ResourceKey {
    pub fn raw(self) -> key_t {
        self.0
    }
}

/// Touches `path` (mode 0666, contents untouched) and derives its IPC key.
pub fn derive_key(path: &Path) -> Result<ResourceKey> {
    let shown = path.display().to_string();
    let fd = open(
        path,
        OFlag::O_CREAT | OFlag::O_WRONLY | OFlag::O_CLOEXEC,
        Mode::from_bits_truncate(0o666),
    )
    .map_err(|errno| Error::new(ErrorKind::PathUnavailable(shown.clone(), errno.into())))?;
    close(fd).map_err(|errno| Error::new(ErrorKind::PathUnavailable(shown.clone(), errno.into())))?;

    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        Error::new(ErrorKind::PathUnavailable(
            shown.clone(),
            io::Error::new(io::ErrorKind::InvalidInput, "path contains a nul byte"),
        ))
    })?;
    let key = unsafe { libc::ftok(c_path.as_ptr(), PROJECT_ID) };
    if key == -1 {
        return Err(Error::new(ErrorKind::KeyDerivationFailed(
            shown,
            Errno::last(),
        )));
    }
    tracing::debug!(path = %shown, key = format_args!("{:#x}", key), "derived ipc key");
    Ok(ResourceKey(key))
}
