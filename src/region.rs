use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use nix::errno::Errno;
use nix::libc::{self, c_void};

use crate::error::{Error, ErrorKind, Result};
use crate::key::ResourceKey;

const PERMS: libc::c_int = 0o666;

/// A System V shared memory segment.
///
/// Exactly one participant creates the segment and later destroys it; every
/// other participant opens it by key. Dropping a `SharedRegion` does not remove
/// the segment from the system.
#[derive(Debug)]
pub struct SharedRegion {
    id: libc::c_int,
    size: usize,
}

impl SharedRegion {
    /// Creates the segment for `key`, failing if one already exists.
    pub fn create(key: ResourceKey, size: usize) -> Result<Self> {
        let id = unsafe {
            libc::shmget(
                key.raw(),
                size,
                libc::IPC_CREAT | libc::IPC_EXCL | PERMS,
            )
        };
        if id == -1 {
            return Err(match Errno::last() {
                Errno::EEXIST => Error::new(ErrorKind::AlreadyExists("shared memory segment")),
                errno @ (Errno::ENOSPC | Errno::ENOMEM | Errno::EINVAL) => Error::new(
                    ErrorKind::ResourceExhausted("shared memory segment", errno),
                ),
                errno => Error::new(ErrorKind::ResourceUnavailable("shmget", errno)),
            });
        }
        tracing::debug!(shm_id = id, size, "created shared memory segment");
        Ok(SharedRegion { id, size })
    }

    /// Opens the existing segment for `key`.
    pub fn open(key: ResourceKey, size: usize) -> Result<Self> {
        let id = unsafe { libc::shmget(key.raw(), size, PERMS) };
        if id == -1 {
            return Err(match Errno::last() {
                Errno::ENOENT => Error::new(ErrorKind::NotFound("shared memory segment")),
                errno => Error::new(ErrorKind::ResourceUnavailable("shmget", errno)),
            });
        }
        tracing::debug!(shm_id = id, size, "opened shared memory segment");
        Ok(SharedRegion { id, size })
    }

    pub fn id(&self) -> libc::c_int {
        self.id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Maps the segment into this process.
    pub fn attach(&self) -> Result<Attachment> {
        let ptr = unsafe { libc::shmat(self.id, std::ptr::null(), 0) };
        if ptr as isize == -1 {
            return Err(Error::new(ErrorKind::AttachFailed(Errno::last())));
        }
        let ptr = NonNull::new(ptr).ok_or(Error::new(ErrorKind::AttachFailed(Errno::EFAULT)))?;
        tracing::debug!(shm_id = self.id, addr = ?ptr, "attached shared memory");
        Ok(Attachment {
            ptr,
            len: self.size,
        })
    }

    /// Marks the segment for removal. It disappears once the last attachment
    /// is detached.
    pub fn destroy(self) -> Result<()> {
        self.remove()
    }

    pub(crate) fn remove(&self) -> Result<()> {
        let rc = unsafe { libc::shmctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) };
        if rc == -1 {
            return Err(Error::new(ErrorKind::ResourceUnavailable(
                "shmctl",
                Errno::last(),
            )));
        }
        tracing::debug!(shm_id = self.id, "removed shared memory segment");
        Ok(())
    }
}

/// A mapping of a [`SharedRegion`], viewed as exactly `size` bytes.
///
/// Detaches on drop.
#[derive(Debug)]
pub struct Attachment {
    ptr: NonNull<c_void>,
    len: usize,
}

impl Drop for Attachment {
    fn drop(&mut self) {
        let rc = unsafe { libc::shmdt(self.ptr.as_ptr()) };
        if rc == -1 {
            tracing::warn!(error = %Errno::last(), "shmdt failed");
        }
    }
}

impl Deref for Attachment {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.len) }
    }
}

impl DerefMut for Attachment {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr() as *mut u8, self.len) }
    }
}
