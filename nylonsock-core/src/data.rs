//! Payload values.

use crate::error::{Error, Result};
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

/// Opaque payload carried by a frame.
///
/// Scalars are stored using their canonical text representation, so a value
/// emitted as `42_i32` arrives as the bytes `"42"` and parses back with
/// [`SockData::parse`]. Raw bytes round-trip untouched.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct SockData {
    raw: Bytes,
}

impl SockData {
    /// Creates an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the raw payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Consumes the payload, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.raw
    }

    /// Returns the payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns true if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Views the payload as UTF-8 text.
    ///
    /// # Errors
    /// Returns [`Error::Convert`] if the payload is not valid UTF-8.
    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.raw).map_err(|_| Error::Convert { target: "str" })
    }

    /// Parses the payload text into `T`.
    ///
    /// # Errors
    /// Returns [`Error::Convert`] if the payload is not UTF-8 or does not parse.
    pub fn parse<T: FromStr>(&self) -> Result<T> {
        let target = std::any::type_name::<T>();
        let text = self.as_str().map_err(|_| Error::Convert { target })?;
        text.trim().parse().map_err(|_| Error::Convert { target })
    }
}

impl fmt::Debug for SockData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.raw) {
            Ok(text) => f.debug_tuple("SockData").field(&text).finish(),
            Err(_) => f.debug_tuple("SockData").field(&self.raw).finish(),
        }
    }
}

impl From<Bytes> for SockData {
    fn from(raw: Bytes) -> Self {
        Self { raw }
    }
}

impl From<Vec<u8>> for SockData {
    fn from(raw: Vec<u8>) -> Self {
        Self { raw: raw.into() }
    }
}

impl From<&[u8]> for SockData {
    fn from(raw: &[u8]) -> Self {
        Self {
            raw: Bytes::copy_from_slice(raw),
        }
    }
}

impl From<String> for SockData {
    fn from(text: String) -> Self {
        Self { raw: text.into() }
    }
}

impl From<&str> for SockData {
    fn from(text: &str) -> Self {
        Self {
            raw: Bytes::copy_from_slice(text.as_bytes()),
        }
    }
}

impl From<&String> for SockData {
    fn from(text: &String) -> Self {
        Self::from(text.as_str())
    }
}

impl From<SockData> for Bytes {
    fn from(data: SockData) -> Self {
        data.raw
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for SockData {
                fn from(value: $ty) -> Self {
                    Self::from(value.to_string())
                }
            }
        )*
    };
}

impl_from_scalar!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool, char,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_roundtrip() {
        let data = SockData::from("hello");
        assert_eq!(data.as_bytes(), b"hello");
        assert_eq!(data.as_str().unwrap(), "hello");
        assert_eq!(data.len(), 5);
    }

    #[test]
    fn test_scalar_canonical_text() {
        assert_eq!(SockData::from(42_i32).as_bytes(), b"42");
        assert_eq!(SockData::from(-7_i64).as_bytes(), b"-7");
        assert_eq!(SockData::from(true).as_bytes(), b"true");
        assert_eq!(SockData::from('x').as_bytes(), b"x");
        assert_eq!(SockData::from(1.5_f64).as_bytes(), b"1.5");
    }

    #[test]
    fn test_parse_scalars() {
        assert_eq!(SockData::from(42_u16).parse::<u16>().unwrap(), 42);
        assert_eq!(SockData::from("3.25").parse::<f32>().unwrap(), 3.25);
        assert!(SockData::from("false").parse::<bool>().is_ok_and(|b| !b));
        assert_eq!(SockData::from(" 12 ").parse::<i32>().unwrap(), 12);
    }

    #[test]
    fn test_parse_failure() {
        let err = SockData::from("not a number").parse::<i32>().unwrap_err();
        assert!(matches!(err, Error::Convert { target } if target == "i32"));
    }

    #[test]
    fn test_non_utf8() {
        let data = SockData::from(vec![0xff, 0x00, 0x10]);
        assert!(data.as_str().is_err());
        assert!(data.parse::<u8>().is_err());
        assert_eq!(data.clone().into_bytes().as_ref(), &[0xff, 0x00, 0x10]);
    }

    #[test]
    fn test_empty() {
        let data = SockData::new();
        assert!(data.is_empty());
        assert_eq!(data.as_str().unwrap(), "");
        assert_eq!(data, SockData::from(""));
    }

    #[test]
    fn test_debug() {
        assert_eq!(format!("{:?}", SockData::from("hi")), "SockData(\"hi\")");
    }
}
