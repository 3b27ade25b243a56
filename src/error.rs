use std::fmt::{Debug, Display};
use std::io;

use nix::errno::Errno;

pub type Result<T> = std::result::Result<T, Error>;

pub struct Error {
    kind: ErrorKind,
}

pub enum ErrorKind {
    PathUnavailable(String, io::Error),
    KeyDerivationFailed(String, Errno),
    AlreadyExists(&'static str),
    NotFound(&'static str),
    ResourceExhausted(&'static str, Errno),
    AttachFailed(Errno),
    ResourceUnavailable(&'static str, Errno),
    SemaphoreOpFailed(Errno),
    MalformedRecord(String),
    CommandUnavailable(String, io::Error),
    BufferOverflow {
        offset: usize,
        needed: usize,
        capacity: usize,
    },
}

/// Coarse failure classes used when reporting an aborted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    ResourceUnavailable,
    SynchronizationFailure,
    MalformedRecord,
    CommandUnavailable,
    BufferOverflow,
}

impl ErrorKind {
    pub fn category(&self) -> Category {
        match self {
            ErrorKind::PathUnavailable(..)
            | ErrorKind::KeyDerivationFailed(..)
            | ErrorKind::AlreadyExists(_)
            | ErrorKind::NotFound(_)
            | ErrorKind::ResourceExhausted(..)
            | ErrorKind::AttachFailed(_)
            | ErrorKind::ResourceUnavailable(..) => Category::ResourceUnavailable,
            ErrorKind::SemaphoreOpFailed(_) => Category::SynchronizationFailure,
            ErrorKind::MalformedRecord(_) => Category::MalformedRecord,
            ErrorKind::CommandUnavailable(..) => Category::CommandUnavailable,
            ErrorKind::BufferOverflow { .. } => Category::BufferOverflow,
        }
    }
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedRecord(msg.into()))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn category(&self) -> Category {
        self.kind.category()
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::PathUnavailable(_, err) | ErrorKind::CommandUnavailable(_, err) => Some(err),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match &self.kind {
            ErrorKind::PathUnavailable(path, err) => {
                format!("cannot create or access {}: {}", path, err)
            }
            ErrorKind::KeyDerivationFailed(path, errno) => {
                format!("ftok failed for {}: {}", path, errno)
            }
            ErrorKind::AlreadyExists(what) => format!("{} already exists", what),
            ErrorKind::NotFound(what) => format!("{} does not exist", what),
            ErrorKind::ResourceExhausted(what, errno) => {
                format!("system limit reached creating {}: {}", what, errno)
            }
            ErrorKind::AttachFailed(errno) => format!("shmat: {}", errno),
            ErrorKind::ResourceUnavailable(call, errno) => format!("{}: {}", call, errno),
            ErrorKind::SemaphoreOpFailed(errno) => format!("semop: {}", errno),
            ErrorKind::MalformedRecord(msg) => format!("malformed record: {}", msg),
            ErrorKind::CommandUnavailable(cmd, err) => {
                format!("cannot run `{}`: {}", cmd, err)
            }
            ErrorKind::BufferOverflow {
                offset,
                needed,
                capacity,
            } => format!(
                "{} bytes at offset {} do not fit in a {} byte region",
                needed, offset, capacity
            ),
        };
        write!(f, "{}", msg)
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
