use nix::errno::Errno;
use nix::libc;

use crate::error::{Error, ErrorKind, Result};
use crate::key::ResourceKey;

const PERMS: libc::c_int = 0o666;

/// A System V semaphore set used purely for handoff signaling.
///
/// Same ownership rule as [`SharedRegion`](crate::SharedRegion): one creator,
/// who is also the only one to [`destroy`](SemaphoreSet::destroy) it. New
/// sets start with every count at zero.
#[derive(Debug)]
pub struct SemaphoreSet {
    id: libc::c_int,
}

/// Fourth argument of `semctl`; libc leaves its definition to the caller.
#[repr(C)]
#[allow(dead_code)]
union Semun {
    val: libc::c_int,
    buf: *mut libc::c_void,
    array: *mut libc::c_ushort,
}

impl SemaphoreSet {
    /// Creates a set of `n` semaphores for `key`, failing if one already exists.
    pub fn create(key: ResourceKey, n: u16) -> Result<Self> {
        let id = unsafe {
            libc::semget(
                key.raw(),
                libc::c_int::from(n),
                libc::IPC_CREAT | libc::IPC_EXCL | PERMS,
            )
        };
        if id == -1 {
            return Err(match Errno::last() {
                Errno::EEXIST => Error::new(ErrorKind::AlreadyExists("semaphore set")),
                errno @ Errno::ENOSPC => {
                    Error::new(ErrorKind::ResourceExhausted("semaphore set", errno))
                }
                errno => Error::new(ErrorKind::ResourceUnavailable("semget", errno)),
            });
        }
        let set = SemaphoreSet { id };
        for index in 0..n {
            set.set_value(index, 0).inspect_err(|_| {
                if let Err(err) = set.remove() {
                    tracing::warn!(%err, "failed to remove semaphore set");
                }
            })?;
        }
        tracing::debug!(sem_id = id, n, "created semaphore set");
        Ok(set)
    }

    /// Opens the existing set for `key`, which must hold at least `n` semaphores.
    pub fn open(key: ResourceKey, n: u16) -> Result<Self> {
        let id = unsafe { libc::semget(key.raw(), libc::c_int::from(n), PERMS) };
        if id == -1 {
            return Err(match Errno::last() {
                Errno::ENOENT => Error::new(ErrorKind::NotFound("semaphore set")),
                errno => Error::new(ErrorKind::ResourceUnavailable("semget", errno)),
            });
        }
        tracing::debug!(sem_id = id, n, "opened semaphore set");
        Ok(SemaphoreSet { id })
    }

    pub fn id(&self) -> libc::c_int {
        self.id
    }

    /// Atomically adds `delta` to semaphore `index`.
    ///
    /// Blocks while the result would be negative, then applies the whole delta
    /// in one step. Interrupted waits are restarted.
    pub fn adjust(&self, index: u16, delta: i16) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        self.semop(index, delta)
    }

    /// Blocks until semaphore `index` reaches zero.
    pub fn wait_zero(&self, index: u16) -> Result<()> {
        self.semop(index, 0)
    }

    fn semop(&self, index: u16, delta: i16) -> Result<()> {
        let mut op = libc::sembuf {
            sem_num: index,
            sem_op: delta,
            sem_flg: 0,
        };
        loop {
            let rc = unsafe { libc::semop(self.id, &mut op, 1) };
            if rc == 0 {
                tracing::trace!(sem_id = self.id, index, delta, "semop applied");
                return Ok(());
            }
            match Errno::last() {
                Errno::EINTR => {
                    tracing::warn!(sem_id = self.id, index, delta, "semop interrupted, retrying");
                }
                errno => return Err(Error::new(ErrorKind::SemaphoreOpFailed(errno))),
            }
        }
    }

    /// Current count of semaphore `index`.
    pub fn value(&self, index: u16) -> Result<i32> {
        let val = unsafe { libc::semctl(self.id, libc::c_int::from(index), libc::GETVAL) };
        if val == -1 {
            return Err(Error::new(ErrorKind::SemaphoreOpFailed(Errno::last())));
        }
        Ok(val)
    }

    fn set_value(&self, index: u16, val: libc::c_int) -> Result<()> {
        let arg = Semun { val };
        let rc = unsafe { libc::semctl(self.id, libc::c_int::from(index), libc::SETVAL, arg) };
        if rc == -1 {
            return Err(Error::new(ErrorKind::ResourceUnavailable(
                "semctl",
                Errno::last(),
            )));
        }
        Ok(())
    }

    /// Removes the set. Processes still blocked in `adjust` fail with `EIDRM`.
    pub fn destroy(self) -> Result<()> {
        self.remove()
    }

    pub(crate) fn remove(&self) -> Result<()> {
        let rc = unsafe { libc::semctl(self.id, 0, libc::IPC_RMID) };
        if rc == -1 {
            return Err(Error::new(ErrorKind::ResourceUnavailable(
                "semctl",
                Errno::last(),
            )));
        }
        tracing::debug!(sem_id = self.id, "removed semaphore set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::thread::JoinHandleExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::key::derive_key;

    fn scratch_key(name: &str) -> (ResourceKey, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!("shmseg-sem-{}-{}", std::process::id(), name));
        (derive_key(&path).unwrap(), path)
    }

    #[test]
    fn create_then_open() {
        let (key, path) = scratch_key("open");
        assert!(matches!(
            SemaphoreSet::open(key, 1).unwrap_err().kind(),
            ErrorKind::NotFound(_)
        ));
        let owner = SemaphoreSet::create(key, 1).unwrap();
        assert!(matches!(
            SemaphoreSet::create(key, 1).unwrap_err().kind(),
            ErrorKind::AlreadyExists(_)
        ));
        let peer = SemaphoreSet::open(key, 1).unwrap();
        assert_eq!(owner.id(), peer.id());
        assert_eq!(owner.value(0).unwrap(), 0);

        peer.adjust(0, 3).unwrap();
        owner.adjust(0, -2).unwrap();
        assert_eq!(owner.value(0).unwrap(), 1);

        owner.destroy().unwrap();
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn fresh_sets_start_at_zero() {
        let (key, path) = scratch_key("fresh");
        let owner = SemaphoreSet::create(key, 3).unwrap();
        for index in 0..3 {
            assert_eq!(owner.value(index).unwrap(), 0);
        }
        owner.adjust(2, 4).unwrap();
        owner.destroy().unwrap();

        // A recreated set under the same key does not inherit the old count.
        let again = SemaphoreSet::create(key, 3).unwrap();
        assert_eq!(again.value(2).unwrap(), 0);
        again.destroy().unwrap();
        std::fs::remove_file(path).unwrap();
    }

    extern "C" fn ignore_signal(_: libc::c_int) {}

    #[test]
    fn interrupted_wait_keeps_blocking() {
        // No SA_RESTART, so the kernel reports EINTR from semop.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = ignore_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);
            assert_eq!(
                libc::sigaction(libc::SIGUSR1, &action, std::ptr::null_mut()),
                0
            );
        }

        let (key, path) = scratch_key("eintr");
        let owner = SemaphoreSet::create(key, 1).unwrap();
        let done = Arc::new(AtomicU32::new(0));

        let waiter = {
            let done = done.clone();
            thread::spawn(move || {
                let sem = SemaphoreSet::open(key, 1).unwrap();
                let res = sem.adjust(0, -1);
                done.store(1, Ordering::SeqCst);
                res
            })
        };

        for _ in 0..3 {
            thread::sleep(Duration::from_millis(50));
            let rc = unsafe { libc::pthread_kill(waiter.as_pthread_t(), libc::SIGUSR1) };
            assert_eq!(rc, 0);
        }
        thread::sleep(Duration::from_millis(50));
        assert_eq!(done.load(Ordering::SeqCst), 0);

        owner.adjust(0, 1).unwrap();
        waiter.join().unwrap().unwrap();
        assert_eq!(owner.value(0).unwrap(), 0);

        owner.destroy().unwrap();
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn waiter_blocks_until_signaled() {
        let (key, path) = scratch_key("block");
        let owner = SemaphoreSet::create(key, 1).unwrap();
        let passed = Arc::new(AtomicU32::new(0));

        let waiter = {
            let passed = passed.clone();
            thread::spawn(move || {
                let sem = SemaphoreSet::open(key, 1).unwrap();
                sem.adjust(0, -1).unwrap();
                passed.fetch_add(1, Ordering::SeqCst);
                sem.adjust(0, -1).unwrap();
                passed.fetch_add(1, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert_eq!(passed.load(Ordering::SeqCst), 0);

        owner.adjust(0, 1).unwrap();
        while passed.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(100));
        assert_eq!(passed.load(Ordering::SeqCst), 1);

        owner.adjust(0, 1).unwrap();
        waiter.join().unwrap();
        assert_eq!(passed.load(Ordering::SeqCst), 2);
        assert_eq!(owner.value(0).unwrap(), 0);

        owner.destroy().unwrap();
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn wait_zero_returns_once_drained() {
        let (key, path) = scratch_key("zero");
        let owner = SemaphoreSet::create(key, 1).unwrap();
        owner.wait_zero(0).unwrap();
        owner.adjust(0, 2).unwrap();

        let drainer = thread::spawn(move || {
            let sem = SemaphoreSet::open(key, 1).unwrap();
            thread::sleep(Duration::from_millis(50));
            sem.adjust(0, -2).unwrap();
        });
        owner.wait_zero(0).unwrap();
        assert_eq!(owner.value(0).unwrap(), 0);
        drainer.join().unwrap();

        owner.destroy().unwrap();
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn partial_count_is_not_consumed() {
        let (key, path) = scratch_key("whole");
        let owner = SemaphoreSet::create(key, 1).unwrap();
        let done = Arc::new(AtomicU32::new(0));

        let waiter = {
            let done = done.clone();
            thread::spawn(move || {
                let sem = SemaphoreSet::open(key, 1).unwrap();
                sem.adjust(0, -2).unwrap();
                done.store(1, Ordering::SeqCst);
            })
        };

        owner.adjust(0, 1).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(done.load(Ordering::SeqCst), 0);
        assert_eq!(owner.value(0).unwrap(), 1);

        owner.adjust(0, 1).unwrap();
        waiter.join().unwrap();
        assert_eq!(owner.value(0).unwrap(), 0);

        owner.destroy().unwrap();
        std::fs::remove_file(path).unwrap();
    }
}
