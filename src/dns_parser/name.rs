use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::from_utf8;

use byteorder::{BigEndian, ByteOrder};

use super::Error;

/// Largest message offset a 14-bit compression pointer can reach.
const POINTER_MAX: usize = 0x3FFF;

/// A domain name in dotted form without the trailing dot; the empty
/// string is the root.
///
/// Comparison is byte-exact. Cache keys fold case first via
/// [`Name::to_folded`], since DNS name matching is ASCII
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name(String);

impl Name {
    pub fn new<S: Into<String>>(name: S) -> Name {
        Name(name.into())
    }

    pub fn root() -> Name {
        Name(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_folded(&self) -> Name {
        Name(self.0.to_ascii_lowercase())
    }

    /// Appends the wire form of this name to `buf`, compressing against
    /// (and extending) the per-message suffix map. `buf` is the whole
    /// message so far, so `buf.len()` is the absolute offset pointers
    /// must use.
    pub fn write_to(
        &self,
        buf: &mut Vec<u8>,
        suffixes: &mut HashMap<String, u16>,
    ) -> Result<(), Error> {
        let mut rest = self.0.as_str();
        loop {
            if rest.is_empty() {
                buf.push(0);
                return Ok(());
            }
            if let Some(&offset) = suffixes.get(rest) {
                let mut pointer = [0u8; 2];
                BigEndian::write_u16(&mut pointer, 0xC000 | offset);
                buf.extend_from_slice(&pointer);
                return Ok(());
            }
            let (label, tail) = match rest.find('.') {
                Some(dot) => (&rest[..dot], &rest[dot + 1..]),
                None => (rest, ""),
            };
            if label.is_empty() || label.len() > 63 {
                return Err(Error::InvalidLabel);
            }
            // Offsets past the pointer range are still valid label
            // positions, they just can't be pointed at later.
            if buf.len() <= POINTER_MAX {
                suffixes.insert(rest.to_owned(), buf.len() as u16);
            }
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
            rest = tail;
        }
    }

    /// Reads a name starting at the beginning of `data`, following
    /// compression pointers into `original` (the full message).
    ///
    /// Returns the name and how far the caller's cursor advances within
    /// `data`: past the terminating zero, or past the two pointer bytes
    /// if a pointer ended the name. The inner cursor that follows a
    /// pointer never moves the outer one.
    pub fn scan(data: &[u8], original: &[u8]) -> Result<(Name, usize), Error> {
        let mut labels: Vec<String> = Vec::new();
        let mut visited: HashSet<usize> = HashSet::new();
        let mut cursor: &[u8] = data;
        let mut pos = 0;
        let mut consumed = None;
        loop {
            if pos >= cursor.len() {
                return Err(Error::UnexpectedEOF);
            }
            let byte = cursor[pos];
            if byte == 0 {
                let advance = consumed.unwrap_or(pos + 1);
                return Ok((Name(labels.join(".")), advance));
            } else if byte & 0xC0 == 0xC0 {
                if pos + 2 > cursor.len() {
                    return Err(Error::UnexpectedEOF);
                }
                let offset = (BigEndian::read_u16(&cursor[pos..pos + 2]) & 0x3FFF) as usize;
                if consumed.is_none() {
                    consumed = Some(pos + 2);
                }
                if !visited.insert(offset) {
                    return Err(Error::CircularPointer(offset));
                }
                if offset >= original.len() {
                    return Err(Error::UnexpectedEOF);
                }
                cursor = original;
                pos = offset;
            } else if byte & 0xC0 == 0 {
                let end = pos + 1 + byte as usize;
                if end > cursor.len() {
                    return Err(Error::UnexpectedEOF);
                }
                let label = from_utf8(&cursor[pos + 1..end]).map_err(|_| Error::LabelIsNotUtf8)?;
                labels.push(label.to_owned());
                pos = end;
            } else {
                return Err(Error::InvalidLabelLength(byte));
            }
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

impl From<&str> for Name {
    fn from(name: &str) -> Name {
        Name(name.to_owned())
    }
}

impl From<String> for Name {
    fn from(name: String) -> Name {
        Name(name)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::{Error, Name};

    #[test]
    fn write_simple() {
        let mut buf = Vec::new();
        let mut suffixes = HashMap::new();
        Name::new("example.com")
            .write_to(&mut buf, &mut suffixes)
            .unwrap();
        assert_eq!(buf, b"\x07example\x03com\x00");
        assert_eq!(suffixes.get("example.com"), Some(&0));
        assert_eq!(suffixes.get("com"), Some(&8));
    }

    #[test]
    fn write_compressed_suffix() {
        let mut buf = Vec::new();
        let mut suffixes = HashMap::new();
        Name::new("example.com")
            .write_to(&mut buf, &mut suffixes)
            .unwrap();
        let first_len = buf.len();
        Name::new("foo.example.com")
            .write_to(&mut buf, &mut suffixes)
            .unwrap();
        assert_eq!(&buf[first_len..], b"\x03foo\xC0\x00");
        assert!(buf.len() - first_len < first_len);
    }

    #[test]
    fn write_root() {
        let mut buf = Vec::new();
        let mut suffixes = HashMap::new();
        Name::root().write_to(&mut buf, &mut suffixes).unwrap();
        assert_eq!(buf, [0]);
    }

    #[test]
    fn write_rejects_oversized_label() {
        let mut buf = Vec::new();
        let mut suffixes = HashMap::new();
        let long = "a".repeat(64);
        assert_eq!(
            Name::new(long).write_to(&mut buf, &mut suffixes),
            Err(Error::InvalidLabel)
        );
    }

    #[test]
    fn scan_simple() {
        let data = b"\x07example\x03com\x00";
        let (name, used) = Name::scan(data, data).unwrap();
        assert_eq!(name.as_str(), "example.com");
        assert_eq!(used, data.len());
    }

    #[test]
    fn scan_compressed() {
        let data = b"\x03com\x00\x07example\xC0\x00";
        let (name, used) = Name::scan(&data[5..], data).unwrap();
        assert_eq!(name.as_str(), "example.com");
        // The pointer ends the name: 8 label bytes plus 2 pointer bytes.
        assert_eq!(used, 10);
        assert_eq!(5 + used, data.len());
    }

    #[test]
    fn scan_root() {
        let data = [0u8];
        let (name, used) = Name::scan(&data, &data).unwrap();
        assert_eq!(name.as_str(), "");
        assert_eq!(used, 1);
    }

    #[test]
    fn scan_circular_pointer() {
        let data = b"\xC0\x00";
        assert_eq!(Name::scan(data, data), Err(Error::CircularPointer(0)));
    }

    #[test]
    fn scan_invalid_label_length() {
        let data = [0x40u8, 0x00];
        assert_eq!(
            Name::scan(&data, &data),
            Err(Error::InvalidLabelLength(0x40))
        );
    }

    #[test]
    fn scan_truncated() {
        let data = [0x03u8, b'a'];
        assert_eq!(Name::scan(&data, &data), Err(Error::UnexpectedEOF));
        assert_eq!(Name::scan(&[], &[]), Err(Error::UnexpectedEOF));
    }

    #[test]
    fn folding_lowers_ascii_only() {
        assert_eq!(Name::new("MyHost.Local").to_folded().as_str(), "myhost.local");
    }
}
