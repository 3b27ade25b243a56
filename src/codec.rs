//! Fixed-width record encoding and the length-prefixed vector framing used in
//! the shared region.
//!
//! A vector is an 8-byte native-endian count followed by `count` records of
//! exactly [`Record::SIZE`] bytes each. There is no padding, checksum or
//! version tag; both sides must be the same build on the same host.
//!
//! Every access is bounds-checked against the buffer it is given, so a corrupt
//! count or an oversized batch produces [`ErrorKind::BufferOverflow`] rather
//! than touching memory past the region.

use crate::error::{Error, ErrorKind, Result};

pub const COUNT_SIZE: usize = size_of::<u64>();

/// A value with a fixed encoded width.
///
/// `encode` is handed a slice of exactly `SIZE` bytes and `decode` receives
/// the same. Struct implementations are normally generated with
/// `#[derive(Record)]`, which lays fields out back to back in declaration
/// order.
pub trait Record: Sized {
    const SIZE: usize;

    fn encode(&self, buf: &mut [u8]);

    fn decode(buf: &[u8]) -> Result<Self>;
}

macro_rules! int_record {
    ($($ty:ty),*) => {
        $(
            impl Record for $ty {
                const SIZE: usize = size_of::<$ty>();

                fn encode(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_ne_bytes());
                }

                fn decode(buf: &[u8]) -> Result<Self> {
                    let mut bytes = [0u8; size_of::<$ty>()];
                    bytes.copy_from_slice(buf);
                    Ok(<$ty>::from_ne_bytes(bytes))
                }
            }
        )*
    };
}

int_record!(u8, u16, u32, u64, i32, i64);

impl Record for bool {
    const SIZE: usize = 1;

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = u8::from(*self);
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        match buf[0] {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(Error::malformed(format!("invalid bool byte {:#04x}", b))),
        }
    }
}

impl<const N: usize> Record for [u8; N] {
    const SIZE: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(self);
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let mut out = [0u8; N];
        out.copy_from_slice(buf);
        Ok(out)
    }
}

/// One tag byte followed by the payload width; the payload is zeroed for `None`.
impl<T: Record> Record for Option<T> {
    const SIZE: usize = 1 + T::SIZE;

    fn encode(&self, buf: &mut [u8]) {
        match self {
            Some(val) => {
                buf[0] = 1;
                val.encode(&mut buf[1..]);
            }
            None => buf.fill(0),
        }
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        match buf[0] {
            0 => Ok(None),
            1 => Ok(Some(T::decode(&buf[1..])?)),
            b => Err(Error::malformed(format!("invalid option tag {:#04x}", b))),
        }
    }
}

/// Encoded size of a vector holding `count` records.
pub fn vector_len<T: Record>(count: usize) -> Option<usize> {
    count.checked_mul(T::SIZE)?.checked_add(COUNT_SIZE)
}

fn span(buf_len: usize, offset: usize, needed: usize) -> Result<std::ops::Range<usize>> {
    match offset.checked_add(needed) {
        Some(end) if end <= buf_len => Ok(offset..end),
        _ => Err(Error::new(ErrorKind::BufferOverflow {
            offset,
            needed,
            capacity: buf_len,
        })),
    }
}

/// Writes `records` as a vector at `offset` and returns the offset just past it.
///
/// Nothing is written if the whole vector does not fit.
pub fn write_vector<T: Record>(buf: &mut [u8], offset: usize, records: &[T]) -> Result<usize> {
    let needed = vector_len::<T>(records.len()).ok_or(Error::new(ErrorKind::BufferOverflow {
        offset,
        needed: usize::MAX,
        capacity: buf.len(),
    }))?;
    let range = span(buf.len(), offset, needed)?;
    (records.len() as u64).encode(&mut buf[offset..offset + COUNT_SIZE]);
    let mut at = offset + COUNT_SIZE;
    for rec in records {
        rec.encode(&mut buf[at..at + T::SIZE]);
        at += T::SIZE;
    }
    Ok(range.end)
}

fn read_count<T: Record>(buf: &[u8], offset: usize) -> Result<(usize, std::ops::Range<usize>)> {
    let head = span(buf.len(), offset, COUNT_SIZE)?;
    let count = u64::decode(&buf[head.clone()])?;
    let payload = usize::try_from(count)
        .ok()
        .and_then(|n| n.checked_mul(T::SIZE))
        .ok_or(Error::new(ErrorKind::BufferOverflow {
            offset: head.end,
            needed: usize::MAX,
            capacity: buf.len(),
        }))?;
    // `count` fits in usize here since the multiplication above succeeded.
    Ok((count as usize, span(buf.len(), head.end, payload)?))
}

/// Reads a vector at `offset`, returning its records and the offset just past it.
pub fn read_vector<T: Record>(buf: &[u8], offset: usize) -> Result<(Vec<T>, usize)> {
    let (count, body) = read_count::<T>(buf, offset)?;
    let mut records = Vec::with_capacity(count);
    let mut at = body.start;
    for _ in 0..count {
        records.push(T::decode(&buf[at..at + T::SIZE])?);
        at += T::SIZE;
    }
    Ok((records, body.end))
}

/// Returns the offset just past the vector at `offset` without decoding it.
pub fn skip_vector<T: Record>(buf: &[u8], offset: usize) -> Result<usize> {
    let (_, body) = read_count::<T>(buf, offset)?;
    Ok(body.end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, shm_derive::Record)]
    struct Pair {
        a: i32,
        b: Option<u8>,
        c: bool,
    }

    #[test]
    fn derived_width_is_sum_of_fields() {
        assert_eq!(Pair::SIZE, 4 + 2 + 1);
    }

    #[test]
    fn vector_round_trips_in_order() {
        let mut buf = vec![0u8; 256];
        let recs = vec![
            Pair { a: 10, b: None, c: true },
            Pair { a: -20, b: Some(7), c: false },
            Pair { a: 30, b: Some(0), c: true },
        ];
        let end = write_vector(&mut buf, 0, &recs).unwrap();
        assert_eq!(end, COUNT_SIZE + 3 * Pair::SIZE);

        let (back, next) = read_vector::<Pair>(&buf, 0).unwrap();
        assert_eq!(back, recs);
        assert_eq!(next, end);
        assert_eq!(skip_vector::<Pair>(&buf, 0).unwrap(), end);
    }

    #[test]
    fn consecutive_vectors_do_not_overlap() {
        let mut buf = vec![0u8; 128];
        let first = write_vector(&mut buf, 0, &[1u32, 2, 3]).unwrap();
        let second = write_vector(&mut buf, first, &[Pair { a: 1, b: None, c: false }]).unwrap();

        let (nums, at) = read_vector::<u32>(&buf, 0).unwrap();
        assert_eq!(nums, vec![1, 2, 3]);
        let (pairs, end) = read_vector::<Pair>(&buf, at).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(end, second);
    }

    #[test]
    fn empty_vector_is_just_a_count() {
        let mut buf = [0xffu8; 16];
        let end = write_vector::<Pair>(&mut buf, 4, &[]).unwrap();
        assert_eq!(end, 4 + COUNT_SIZE);
        let (back, _) = read_vector::<Pair>(&buf, 4).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn oversized_write_is_rejected_untouched() {
        let mut buf = [0u8; 19];
        let err = write_vector(&mut buf, 0, &[1u32, 2, 3]).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::BufferOverflow {
                offset: 0,
                needed: 20,
                capacity: 19
            }
        ));
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn corrupt_count_is_rejected() {
        let mut buf = [0u8; 32];
        (u64::MAX).encode(&mut buf[..COUNT_SIZE]);
        let err = read_vector::<u32>(&buf, 0).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::BufferOverflow { .. }));

        (10u64).encode(&mut buf[..COUNT_SIZE]);
        assert!(read_vector::<u32>(&buf, 0).is_err());
        assert!(read_vector::<u32>(&buf, 30).is_err());
    }

    #[test]
    fn bad_bool_byte_is_malformed() {
        assert!(bool::decode(&[2]).is_err());
        assert!(Option::<u8>::decode(&[9, 0]).is_err());
    }
}
