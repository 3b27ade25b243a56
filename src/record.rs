use std::fmt::{self, Debug, Display};
use std::str::FromStr;

use shm_derive::Record;

use crate::codec;
use crate::error::{Error, Result};

/// Longest user or group name Linux accepts.
pub const NAME_CAP: usize = 32;

pub type Name = FixedStr<NAME_CAP>;

/// A UTF-8 string of at most `N` bytes with a fixed encoded width of `N + 1`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedStr<const N: usize> {
    len: u8,
    bytes: [u8; N],
}

impl<const N: usize> FixedStr<N> {
    pub fn new(s: &str) -> Result<Self> {
        if s.len() > N || s.len() > usize::from(u8::MAX) {
            return Err(Error::malformed(format!(
                "`{}` is longer than {} bytes",
                s, N
            )));
        }
        let mut bytes = [0u8; N];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Ok(FixedStr {
            len: s.len() as u8,
            bytes,
        })
    }

    pub fn as_str(&self) -> &str {
        // Construction and decoding both validate UTF-8.
        std::str::from_utf8(&self.bytes[..usize::from(self.len)]).unwrap_or_default()
    }
}

impl<const N: usize> codec::Record for FixedStr<N> {
    const SIZE: usize = 1 + N;

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.len;
        buf[1..].copy_from_slice(&self.bytes);
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let len = usize::from(buf[0]);
        if len > N {
            return Err(Error::malformed(format!(
                "string length {} exceeds capacity {}",
                len, N
            )));
        }
        let s = std::str::from_utf8(&buf[1..1 + len])
            .map_err(|e| Error::malformed(format!("string is not utf-8: {}", e)))?;
        FixedStr::new(s)
    }
}

impl<const N: usize> Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(self.as_str(), f)
    }
}

/// Read, write and execute permission for one class of user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Record)]
pub struct AccessTriplet {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

fn flag(c: char, expected: char) -> Result<bool> {
    match c {
        '-' => Ok(false),
        c if c == expected => Ok(true),
        c => Err(Error::malformed(format!(
            "access descriptor should be '{}' or '-', got '{}'",
            expected, c
        ))),
    }
}

impl FromStr for AccessTriplet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let chars: Vec<char> = s.chars().collect();
        let [r, w, x] = chars[..] else {
            return Err(Error::malformed(format!(
                "access triplet must be 3 characters, got `{}`",
                s
            )));
        };
        Ok(AccessTriplet {
            read: flag(r, 'r')?,
            write: flag(w, 'w')?,
            execute: flag(x, 'x')?,
        })
    }
}

impl Display for AccessTriplet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = if self.read { 'r' } else { '-' };
        let w = if self.write { 'w' } else { '-' };
        let x = if self.execute { 'x' } else { '-' };
        write!(f, "{}{}{}", r, w, x)
    }
}

/// The three permission triplets of a segment, in listing order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Record)]
pub struct AccessMode {
    pub all: AccessTriplet,
    pub group: AccessTriplet,
    pub user: AccessTriplet,
}

impl FromStr for AccessMode {
    type Err = Error;

    /// Accepts the nine permission characters, optionally preceded by up to
    /// two type/flag characters which are ignored (`--rw-r--r--`).
    fn from_str(s: &str) -> Result<Self> {
        if !s.is_ascii() || !(9..=11).contains(&s.len()) {
            return Err(Error::malformed(format!("bad mode string `{}`", s)));
        }
        let perms = &s[s.len() - 9..];
        Ok(AccessMode {
            all: perms[0..3].parse()?,
            group: perms[3..6].parse()?,
            user: perms[6..9].parse()?,
        })
    }
}

impl Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.all, self.group, self.user)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Record)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl FromStr for TimeOfDay {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::malformed(format!("time must be HH:MM:SS, got `{}`", s));
        let mut parts = s.split(':');
        let mut next = |max: u8| -> Result<u8> {
            let part = parts.next().ok_or_else(bad)?;
            if part.len() != 2 {
                return Err(bad());
            }
            let val: u8 = part.parse().map_err(|_| bad())?;
            if val >= max {
                return Err(bad());
            }
            Ok(val)
        };
        let time = TimeOfDay {
            hour: next(24)?,
            minute: next(60)?,
            second: next(60)?,
        };
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(time)
    }
}

impl Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// One live shared memory segment as reported by the host lister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Record)]
pub struct SegmentRecord {
    pub id: i32,
    pub mode: AccessMode,
    pub owner: Name,
    pub group: Name,
    pub creator_pid: i32,
    pub last_attach_pid: i32,
    /// `None` when the segment was never attached.
    pub last_attach_time: Option<TimeOfDay>,
}

/// Attach time printed for a segment nobody has attached yet.
const NO_ENTRY: &str = "no-entry";

fn column<'a>(cols: &mut impl Iterator<Item = &'a str>, name: &str) -> Result<&'a str> {
    cols.next()
        .ok_or_else(|| Error::malformed(format!("missing {} column", name)))
}

fn int_column<'a>(cols: &mut impl Iterator<Item = &'a str>, name: &str) -> Result<i32> {
    let raw = column(cols, name)?;
    raw.parse()
        .map_err(|_| Error::malformed(format!("{} `{}` is not an integer", name, raw)))
}

impl FromStr for SegmentRecord {
    type Err = Error;

    /// Parses `T ID KEY MODE OWNER GROUP CPID LPID ATIME [DTIME CTIME]`.
    fn from_str(line: &str) -> Result<Self> {
        let mut cols = line.split_whitespace();
        column(&mut cols, "type")?;
        let id = int_column(&mut cols, "id")?;
        column(&mut cols, "key")?;
        let mode = column(&mut cols, "mode")?.parse()?;
        let owner = Name::new(column(&mut cols, "owner")?)?;
        let group = Name::new(column(&mut cols, "group")?)?;
        let creator_pid = int_column(&mut cols, "cpid")?;
        let last_attach_pid = int_column(&mut cols, "lpid")?;
        let last_attach_time = match column(&mut cols, "atime")? {
            NO_ENTRY => None,
            t => Some(t.parse()?),
        };
        Ok(SegmentRecord {
            id,
            mode,
            owner,
            group,
            creator_pid,
            last_attach_pid,
            last_attach_time,
        })
    }
}

/// The owner's view of a segment: who owns it and what they may do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Record)]
pub struct OwnerAccessSummary {
    pub id: i32,
    pub owner: Name,
    pub owner_access_mode: AccessTriplet,
}

impl Display for OwnerAccessSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ID: {}, OWNER: {}, OWNER ACCESS MODE: {}",
            self.id, self.owner, self.owner_access_mode
        )
    }
}

pub fn to_owner_summary(seg: &SegmentRecord) -> OwnerAccessSummary {
    OwnerAccessSummary {
        id: seg.id,
        owner: seg.owner,
        owner_access_mode: seg.mode.user,
    }
}
