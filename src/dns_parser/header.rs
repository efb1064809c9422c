use byteorder::{BigEndian, ByteOrder};

use super::Error;

pub const HEADER_SIZE: usize = 12;

const FLAG_QR: u16 = 0x8000;
const FLAG_AA: u16 = 0x0400;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;

/// The fixed 12-byte DNS header.
///
/// The four section counts are carried here but are derived state: on
/// encode [`Packet::encode`](super::Packet::encode) overwrites them with
/// the actual section lengths, and on decode they drive the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    /// True for queries; the wire QR bit is the inverse.
    pub query: bool,
    pub opcode: u8,
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    /// The three reserved bits, preserved verbatim.
    pub z: u8,
    pub response_code: u8,
    pub questions: u16,
    pub answers: u16,
    pub nameservers: u16,
    pub additional: u16,
}

impl Header {
    /// Default header for an outgoing query: recursion desired, all
    /// counts left for the encoder to fill in.
    pub fn new_query(id: u16) -> Header {
        Header {
            id,
            query: true,
            opcode: 0,
            authoritative: false,
            truncated: false,
            recursion_desired: true,
            recursion_available: false,
            z: 0,
            response_code: 0,
            questions: 0,
            answers: 0,
            nameservers: 0,
            additional: 0,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Header, Error> {
        if data.len() < HEADER_SIZE {
            return Err(Error::HeaderTooShort);
        }
        let flags = BigEndian::read_u16(&data[2..4]);
        Ok(Header {
            id: BigEndian::read_u16(&data[0..2]),
            query: flags & FLAG_QR == 0,
            opcode: ((flags >> 11) & 0x0F) as u8,
            authoritative: flags & FLAG_AA != 0,
            truncated: flags & FLAG_TC != 0,
            recursion_desired: flags & FLAG_RD != 0,
            recursion_available: flags & FLAG_RA != 0,
            z: ((flags >> 4) & 0x07) as u8,
            response_code: (flags & 0x0F) as u8,
            questions: BigEndian::read_u16(&data[4..6]),
            answers: BigEndian::read_u16(&data[6..8]),
            nameservers: BigEndian::read_u16(&data[8..10]),
            additional: BigEndian::read_u16(&data[10..12]),
        })
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        let mut flags = 0u16;
        if !self.query {
            flags |= FLAG_QR;
        }
        flags |= u16::from(self.opcode & 0x0F) << 11;
        if self.authoritative {
            flags |= FLAG_AA;
        }
        if self.truncated {
            flags |= FLAG_TC;
        }
        if self.recursion_desired {
            flags |= FLAG_RD;
        }
        if self.recursion_available {
            flags |= FLAG_RA;
        }
        flags |= u16::from(self.z & 0x07) << 4;
        flags |= u16::from(self.response_code & 0x0F);

        buf.extend_from_slice(&self.id.to_be_bytes());
        buf.extend_from_slice(&flags.to_be_bytes());
        buf.extend_from_slice(&self.questions.to_be_bytes());
        buf.extend_from_slice(&self.answers.to_be_bytes());
        buf.extend_from_slice(&self.nameservers.to_be_bytes());
        buf.extend_from_slice(&self.additional.to_be_bytes());
    }
}

#[cfg(test)]
mod test {
    use super::{Error, Header, HEADER_SIZE};

    #[test]
    fn encoded_header_is_twelve_bytes() {
        let mut buf = Vec::new();
        Header::new_query(0).write_to(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);
    }

    #[test]
    fn query_header_bytes() {
        let mut buf = Vec::new();
        Header::new_query(0x0625).write_to(&mut buf);
        // id 0x0625, flags rd only, zero counts.
        assert_eq!(
            buf,
            b"\x06\x25\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00"
        );
    }

    #[test]
    fn round_trip_preserves_all_fields() {
        let header = Header {
            id: 9999,
            query: false,
            opcode: 5,
            authoritative: true,
            truncated: true,
            recursion_desired: false,
            recursion_available: true,
            z: 0b101,
            response_code: 3,
            questions: 1,
            answers: 2,
            nameservers: 3,
            additional: 4,
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf);
        assert_eq!(Header::parse(&buf).unwrap(), header);
    }

    #[test]
    fn short_input_is_rejected() {
        assert_eq!(Header::parse(&[0u8; 11]), Err(Error::HeaderTooShort));
    }
}
