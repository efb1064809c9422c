//! DNS wire format with the mDNS conventions from RFC 6762: name
//! compression on both encode and decode, and the top bit of the class
//! field carrying unicast-response (questions) or cache-flush (records).

mod error;
mod header;
mod name;
mod rrdata;
mod structs;

pub use self::error::Error;
pub use self::header::Header;
pub use self::name::Name;
pub use self::rrdata::RRData;
pub use self::structs::{Packet, Question, ResourceRecord};

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// A DNS resource record or question type.
///
/// Values outside the set this library understands round-trip through
/// `Unknown`. `from_u16` always maps a known code to its named variant,
/// so `Unknown` never aliases one. Comparison, ordering and hashing all
/// go by the numeric code.
#[derive(Debug, Clone, Copy)]
pub enum Type {
    A,
    NS,
    CNAME,
    PTR,
    TXT,
    AAAA,
    SRV,
    NSEC,
    Any,
    Unknown(u16),
}

impl Type {
    pub fn from_u16(value: u16) -> Type {
        match value {
            1 => Type::A,
            2 => Type::NS,
            5 => Type::CNAME,
            12 => Type::PTR,
            16 => Type::TXT,
            28 => Type::AAAA,
            33 => Type::SRV,
            47 => Type::NSEC,
            255 => Type::Any,
            other => Type::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Type::A => 1,
            Type::NS => 2,
            Type::CNAME => 5,
            Type::PTR => 12,
            Type::TXT => 16,
            Type::AAAA => 28,
            Type::SRV => 33,
            Type::NSEC => 47,
            Type::Any => 255,
            Type::Unknown(other) => other,
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Type) -> bool {
        self.to_u16() == other.to_u16()
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_u16().hash(state);
    }
}

// Ordered by numeric code so NSEC type sets sort the way the bitmap does.
impl Ord for Type {
    fn cmp(&self, other: &Type) -> Ordering {
        self.to_u16().cmp(&other.to_u16())
    }
}

impl PartialOrd for Type {
    fn partial_cmp(&self, other: &Type) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A DNS class. mDNS traffic is `IN` in practice; anything else is kept
/// as `Unknown` so a packet can be re-encoded unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
    IN,
    Any,
    Unknown(u16),
}

impl Class {
    pub fn from_u16(value: u16) -> Class {
        match value {
            1 => Class::IN,
            255 => Class::Any,
            other => Class::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Class::IN => 1,
            Class::Any => 255,
            Class::Unknown(other) => other,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Class, Type};

    const KNOWN_TYPES: &[u16] = &[1, 2, 5, 12, 16, 28, 33, 47, 255];

    #[test]
    fn type_code_passthrough() {
        for &code in KNOWN_TYPES {
            assert!(!matches!(Type::from_u16(code), Type::Unknown(_)));
            assert_eq!(Type::from_u16(code).to_u16(), code);
        }
        assert_eq!(Type::from_u16(0x1234), Type::Unknown(0x1234));
        assert_eq!(Type::from_u16(0x1234).to_u16(), 0x1234);
    }

    #[test]
    fn class_code_passthrough() {
        for &code in &[1u16, 255] {
            assert!(!matches!(Class::from_u16(code), Class::Unknown(_)));
            assert_eq!(Class::from_u16(code).to_u16(), code);
        }
        assert_eq!(Class::from_u16(3).to_u16(), 3);
    }

    #[test]
    fn type_ordering_follows_codes() {
        let mut types = vec![Type::SRV, Type::A, Type::Unknown(300), Type::NSEC];
        types.sort();
        assert_eq!(
            types,
            vec![Type::A, Type::SRV, Type::NSEC, Type::Unknown(300)]
        );
    }
}
