use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::{Ipv4Addr, Ipv6Addr};

use byteorder::{BigEndian, ByteOrder};

use super::{Error, Name, Type};

/// The payload of a resource record.
///
/// Record types the cache understands get their own variant; everything
/// else rides along in `Unknown` with the RDATA bytes untouched. The
/// record's type code is derived from the variant via [`RRData::typ`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RRData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    CNAME(Name),
    PTR(Name),
    SRV {
        priority: u16,
        weight: u16,
        port: u16,
        target: Name,
    },
    /// Character strings of up to 255 bytes each; an empty entry is
    /// allowed and an empty record encodes as a single zero byte.
    TXT(Vec<Vec<u8>>),
    NSEC {
        next_name: Name,
        types: BTreeSet<Type>,
    },
    Unknown {
        typ: Type,
        data: Vec<u8>,
    },
}

impl RRData {
    pub fn typ(&self) -> Type {
        match *self {
            RRData::A(..) => Type::A,
            RRData::AAAA(..) => Type::AAAA,
            RRData::CNAME(..) => Type::CNAME,
            RRData::PTR(..) => Type::PTR,
            RRData::SRV { .. } => Type::SRV,
            RRData::TXT(..) => Type::TXT,
            RRData::NSEC { .. } => Type::NSEC,
            RRData::Unknown { typ, .. } => typ,
        }
    }

    /// Appends the RDATA wire form to `buf`. Names inside the payload
    /// take part in message compression exactly like names in the
    /// record header, so the shared suffix map threads through here.
    pub fn write_to(
        &self,
        buf: &mut Vec<u8>,
        suffixes: &mut HashMap<String, u16>,
    ) -> Result<(), Error> {
        match *self {
            RRData::A(ip) => buf.extend_from_slice(&ip.octets()),
            RRData::AAAA(ip) => buf.extend_from_slice(&ip.octets()),
            RRData::CNAME(ref name) | RRData::PTR(ref name) => {
                name.write_to(buf, suffixes)?;
            }
            RRData::SRV {
                priority,
                weight,
                port,
                ref target,
            } => {
                buf.extend_from_slice(&priority.to_be_bytes());
                buf.extend_from_slice(&weight.to_be_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
                target.write_to(buf, suffixes)?;
            }
            RRData::TXT(ref entries) => {
                if entries.is_empty() {
                    buf.push(0);
                }
                for entry in entries {
                    if entry.len() > 255 {
                        return Err(Error::TxtEntryTooLong);
                    }
                    buf.push(entry.len() as u8);
                    buf.extend_from_slice(entry);
                }
            }
            RRData::NSEC {
                ref next_name,
                ref types,
            } => {
                next_name.write_to(buf, suffixes)?;
                write_type_bitmap(buf, types);
            }
            RRData::Unknown { ref data, .. } => buf.extend_from_slice(data),
        }
        Ok(())
    }

    /// Parses the RDATA window for a record of type `typ`. `rdata` is
    /// exactly RDLENGTH bytes; `original` is the full message so
    /// compression pointers inside the payload can be followed.
    pub fn parse(typ: Type, rdata: &[u8], original: &[u8]) -> Result<RRData, Error> {
        match typ {
            Type::A => {
                if rdata.len() != 4 {
                    return Err(Error::WrongRdataLength);
                }
                let mut octets = [0u8; 4];
                octets.copy_from_slice(rdata);
                Ok(RRData::A(Ipv4Addr::from(octets)))
            }
            Type::AAAA => {
                if rdata.len() != 16 {
                    return Err(Error::WrongRdataLength);
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(rdata);
                Ok(RRData::AAAA(Ipv6Addr::from(octets)))
            }
            Type::CNAME => Ok(RRData::CNAME(Name::scan(rdata, original)?.0)),
            Type::PTR => Ok(RRData::PTR(Name::scan(rdata, original)?.0)),
            Type::SRV => {
                if rdata.len() < 7 {
                    return Err(Error::WrongRdataLength);
                }
                Ok(RRData::SRV {
                    priority: BigEndian::read_u16(&rdata[0..2]),
                    weight: BigEndian::read_u16(&rdata[2..4]),
                    port: BigEndian::read_u16(&rdata[4..6]),
                    target: Name::scan(&rdata[6..], original)?.0,
                })
            }
            Type::TXT => {
                let mut entries = Vec::new();
                let mut pos = 0;
                while pos < rdata.len() {
                    let len = rdata[pos] as usize;
                    pos += 1;
                    if pos + len > rdata.len() {
                        return Err(Error::UnexpectedEOF);
                    }
                    entries.push(rdata[pos..pos + len].to_vec());
                    pos += len;
                }
                Ok(RRData::TXT(entries))
            }
            Type::NSEC => {
                let (next_name, used) = Name::scan(rdata, original)?;
                let types = parse_type_bitmap(&rdata[used..])?;
                Ok(RRData::NSEC { next_name, types })
            }
            typ => Ok(RRData::Unknown {
                typ,
                data: rdata.to_vec(),
            }),
        }
    }
}

/// RFC 4034 type bitmap: one window block per 256 type codes, each
/// `<block><len><bitmap>` with MSB-first bits and the bitmap trimmed to
/// the highest set byte.
fn write_type_bitmap(buf: &mut Vec<u8>, types: &BTreeSet<Type>) {
    let mut windows: BTreeMap<u8, ([u8; 32], usize)> = BTreeMap::new();
    for typ in types {
        let code = typ.to_u16();
        let low = (code & 0xFF) as usize;
        let (bitmap, len) = windows.entry((code >> 8) as u8).or_insert(([0u8; 32], 0));
        bitmap[low / 8] |= 0x80 >> (low % 8);
        *len = (*len).max(low / 8 + 1);
    }
    for (block, (bitmap, len)) in windows {
        buf.push(block);
        buf.push(len as u8);
        buf.extend_from_slice(&bitmap[..len]);
    }
}

fn parse_type_bitmap(mut data: &[u8]) -> Result<BTreeSet<Type>, Error> {
    let mut types = BTreeSet::new();
    while !data.is_empty() {
        if data.len() < 2 {
            return Err(Error::UnexpectedEOF);
        }
        let block = data[0];
        let len = data[1] as usize;
        if data.len() < 2 + len {
            return Err(Error::UnexpectedEOF);
        }
        for (byte_index, byte) in data[2..2 + len].iter().enumerate() {
            for bit in 0..8 {
                if byte & (0x80 >> bit) != 0 {
                    let code = u16::from(block) << 8 | (byte_index * 8 + bit) as u16;
                    types.insert(Type::from_u16(code));
                }
            }
        }
        data = &data[2 + len..];
    }
    Ok(types)
}

#[cfg(test)]
mod test {
    use std::collections::{BTreeSet, HashMap};
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::{Error, Name, RRData, Type};

    fn encode(data: &RRData) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut suffixes = HashMap::new();
        data.write_to(&mut buf, &mut suffixes).unwrap();
        buf
    }

    #[test]
    fn a_record_round_trip() {
        let data = RRData::A(Ipv4Addr::new(192, 168, 1, 7));
        let buf = encode(&data);
        assert_eq!(buf, [192, 168, 1, 7]);
        assert_eq!(RRData::parse(Type::A, &buf, &buf).unwrap(), data);
    }

    #[test]
    fn a_record_wrong_length() {
        assert_eq!(
            RRData::parse(Type::A, &[1, 2, 3], &[1, 2, 3]),
            Err(Error::WrongRdataLength)
        );
    }

    #[test]
    fn aaaa_record_round_trip() {
        let data = RRData::AAAA(Ipv6Addr::new(0xfe80, 0, 0, 0, 0x1234, 0, 0, 1));
        let buf = encode(&data);
        assert_eq!(buf.len(), 16);
        assert_eq!(RRData::parse(Type::AAAA, &buf, &buf).unwrap(), data);
    }

    #[test]
    fn cname_round_trip() {
        let data = RRData::CNAME(Name::new("alias.local"));
        let buf = encode(&data);
        assert_eq!(buf, b"\x05alias\x05local\x00");
        assert_eq!(RRData::parse(Type::CNAME, &buf, &buf).unwrap(), data);
    }

    #[test]
    fn ptr_rdata_follows_pointers_into_the_message() {
        // Message: a name at offset 0, then PTR rdata that points at it.
        let message = b"\x04host\x05local\x00\x03web\xC0\x00";
        let rdata = &message[12..];
        assert_eq!(
            RRData::parse(Type::PTR, rdata, message).unwrap(),
            RRData::PTR(Name::new("web.host.local"))
        );
    }

    #[test]
    fn srv_record_layout() {
        let data = RRData::SRV {
            priority: 0,
            weight: 5,
            port: 8080,
            target: Name::new("host.local"),
        };
        let buf = encode(&data);
        assert_eq!(&buf[..6], b"\x00\x00\x00\x05\x1f\x90");
        assert_eq!(&buf[6..], b"\x04host\x05local\x00");
        assert_eq!(RRData::parse(Type::SRV, &buf, &buf).unwrap(), data);
    }

    #[test]
    fn txt_entries() {
        let data = RRData::TXT(vec![b"path=/".to_vec(), Vec::new()]);
        let buf = encode(&data);
        assert_eq!(buf, b"\x06path=/\x00");
        assert_eq!(RRData::parse(Type::TXT, &buf, &buf).unwrap(), data);
    }

    #[test]
    fn empty_txt_is_a_single_zero_byte() {
        assert_eq!(encode(&RRData::TXT(Vec::new())), [0]);
        assert_eq!(
            RRData::parse(Type::TXT, &[0], &[0]).unwrap(),
            RRData::TXT(vec![Vec::new()])
        );
    }

    #[test]
    fn txt_entry_too_long() {
        let mut buf = Vec::new();
        let mut suffixes = HashMap::new();
        let data = RRData::TXT(vec![vec![b'x'; 256]]);
        assert_eq!(
            data.write_to(&mut buf, &mut suffixes),
            Err(Error::TxtEntryTooLong)
        );
    }

    #[test]
    fn nsec_window_block() {
        let types: BTreeSet<Type> = [Type::A, Type::NS, Type::CNAME].iter().cloned().collect();
        let data = RRData::NSEC {
            next_name: Name::new("example.com"),
            types,
        };
        let buf = encode(&data);
        // A=1, NS=2 and CNAME=5 all land in block 0; bitmap 0b0110_0100.
        assert_eq!(&buf[buf.len() - 3..], &[0x00, 0x01, 0x64]);
        assert_eq!(RRData::parse(Type::NSEC, &buf, &buf).unwrap(), data);
    }

    #[test]
    fn nsec_high_window_and_unknown_bits() {
        let types: BTreeSet<Type> = [Type::SRV, Type::Unknown(300)].iter().cloned().collect();
        let data = RRData::NSEC {
            next_name: Name::new("host.local"),
            types: types.clone(),
        };
        let buf = encode(&data);
        // SRV=33: block 0, byte 4, second-highest bit. 300: block 1,
        // byte 5, bit 0x08.
        let name_len = 12;
        assert_eq!(&buf[name_len..name_len + 2], &[0x00, 0x05]);
        assert_eq!(buf[name_len + 6], 0x40);
        assert_eq!(&buf[name_len + 7..name_len + 9], &[0x01, 0x06]);
        assert_eq!(buf[name_len + 14], 0x08);
        match RRData::parse(Type::NSEC, &buf, &buf).unwrap() {
            RRData::NSEC {
                types: decoded, ..
            } => assert_eq!(decoded, types),
            other => panic!("unexpected rdata: {:?}", other),
        }
    }

    #[test]
    fn unknown_type_passes_through() {
        let data = RRData::Unknown {
            typ: Type::Unknown(0x1234),
            data: vec![1, 2, 3, 4],
        };
        let buf = encode(&data);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(
            RRData::parse(Type::Unknown(0x1234), &buf, &buf).unwrap(),
            data
        );
    }
}
