use std::collections::HashMap;
use std::convert::TryFrom;

use byteorder::{BigEndian, ByteOrder};

use super::header::HEADER_SIZE;
use super::{Class, Error, Header, Name, RRData, Type};

/// Top bit of the wire class word: unicast-response on questions,
/// cache-flush on resource records.
const CLASS_FLAG: u16 = 0x8000;

/// A question, with the mDNS unicast-response flag split out of the
/// class word.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Question {
    pub qname: Name,
    pub qtype: Type,
    pub qclass: Class,
    /// Set when the querier is willing to accept a unicast reply.
    pub qu: bool,
}

impl Question {
    pub fn new<N: Into<Name>>(qname: N, qtype: Type) -> Question {
        Question {
            qname: qname.into(),
            qtype,
            qclass: Class::IN,
            qu: false,
        }
    }

    pub(crate) fn write_to(
        &self,
        buf: &mut Vec<u8>,
        suffixes: &mut HashMap<String, u16>,
    ) -> Result<(), Error> {
        self.qname.write_to(buf, suffixes)?;
        buf.extend_from_slice(&self.qtype.to_u16().to_be_bytes());
        let mut class = self.qclass.to_u16() & !CLASS_FLAG;
        if self.qu {
            class |= CLASS_FLAG;
        }
        buf.extend_from_slice(&class.to_be_bytes());
        Ok(())
    }

    pub(crate) fn scan(data: &[u8], original: &[u8]) -> Result<(Question, usize), Error> {
        let (qname, mut pos) = Name::scan(data, original)?;
        if pos + 4 > data.len() {
            return Err(Error::UnexpectedEOF);
        }
        let qtype = Type::from_u16(BigEndian::read_u16(&data[pos..pos + 2]));
        let class = BigEndian::read_u16(&data[pos + 2..pos + 4]);
        pos += 4;
        Ok((
            Question {
                qname,
                qtype,
                qclass: Class::from_u16(class & !CLASS_FLAG),
                qu: class & CLASS_FLAG != 0,
            },
            pos,
        ))
    }
}

/// A resource record. The record type is derived from the payload via
/// `data.typ()`; `cache_flush` is the top bit of the wire class word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: Name,
    pub cls: Class,
    pub cache_flush: bool,
    pub ttl: u32,
    pub data: RRData,
}

impl ResourceRecord {
    pub(crate) fn write_to(
        &self,
        buf: &mut Vec<u8>,
        suffixes: &mut HashMap<String, u16>,
    ) -> Result<(), Error> {
        self.name.write_to(buf, suffixes)?;
        buf.extend_from_slice(&self.data.typ().to_u16().to_be_bytes());
        let mut class = self.cls.to_u16() & !CLASS_FLAG;
        if self.cache_flush {
            class |= CLASS_FLAG;
        }
        buf.extend_from_slice(&class.to_be_bytes());
        buf.extend_from_slice(&self.ttl.to_be_bytes());

        // RDLENGTH is back-patched once the payload is written.
        let size_offset = buf.len();
        buf.extend_from_slice(&[0, 0]);
        let data_offset = buf.len();
        self.data.write_to(buf, suffixes)?;
        let data_size = buf.len() - data_offset;
        if data_size > u16::MAX as usize {
            return Err(Error::WrongRdataLength);
        }
        BigEndian::write_u16(&mut buf[size_offset..size_offset + 2], data_size as u16);
        Ok(())
    }

    pub(crate) fn scan(data: &[u8], original: &[u8]) -> Result<(ResourceRecord, usize), Error> {
        let (name, mut pos) = Name::scan(data, original)?;
        if pos + 10 > data.len() {
            return Err(Error::UnexpectedEOF);
        }
        let typ = Type::from_u16(BigEndian::read_u16(&data[pos..pos + 2]));
        let class = BigEndian::read_u16(&data[pos + 2..pos + 4]);
        let ttl = BigEndian::read_u32(&data[pos + 4..pos + 8]);
        let rdlength = BigEndian::read_u16(&data[pos + 8..pos + 10]) as usize;
        pos += 10;
        if pos + rdlength > data.len() {
            return Err(Error::UnexpectedEOF);
        }
        let rdata = RRData::parse(typ, &data[pos..pos + rdlength], original)?;
        pos += rdlength;
        Ok((
            ResourceRecord {
                name,
                cls: Class::from_u16(class & !CLASS_FLAG),
                cache_flush: class & CLASS_FLAG != 0,
                ttl,
                data: rdata,
            },
            pos,
        ))
    }
}

/// A full DNS message: header plus the four sections in wire order.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub nameservers: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Packet {
    /// Encodes the message. The header's section counts are overwritten
    /// with the actual section lengths, and one suffix map is threaded
    /// through every name in the message so compression pointers can
    /// reach across sections.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut header = self.header.clone();
        header.questions = section_len(self.questions.len())?;
        header.answers = section_len(self.answers.len())?;
        header.nameservers = section_len(self.nameservers.len())?;
        header.additional = section_len(self.additional.len())?;

        let mut buf = Vec::with_capacity(512);
        let mut suffixes = HashMap::new();
        header.write_to(&mut buf);
        for question in &self.questions {
            question.write_to(&mut buf, &mut suffixes)?;
        }
        for rr in self
            .answers
            .iter()
            .chain(&self.nameservers)
            .chain(&self.additional)
        {
            rr.write_to(&mut buf, &mut suffixes)?;
        }
        Ok(buf)
    }

    /// Parses a message, trusting the header counts, and returns it
    /// together with any trailing bytes left after the last record.
    pub fn parse(data: &[u8]) -> Result<(Packet, &[u8]), Error> {
        let header = Header::parse(data)?;
        let mut pos = HEADER_SIZE;

        let mut questions = Vec::with_capacity(header.questions as usize);
        for _ in 0..header.questions {
            let (question, used) = Question::scan(&data[pos..], data)?;
            questions.push(question);
            pos += used;
        }
        let mut sections = [
            Vec::with_capacity(header.answers as usize),
            Vec::with_capacity(header.nameservers as usize),
            Vec::with_capacity(header.additional as usize),
        ];
        let counts = [header.answers, header.nameservers, header.additional];
        for (section, &count) in sections.iter_mut().zip(&counts) {
            for _ in 0..count {
                let (rr, used) = ResourceRecord::scan(&data[pos..], data)?;
                section.push(rr);
                pos += used;
            }
        }
        let [answers, nameservers, additional] = sections;
        Ok((
            Packet {
                header,
                questions,
                answers,
                nameservers,
                additional,
            },
            &data[pos..],
        ))
    }
}

fn section_len(len: usize) -> Result<u16, Error> {
    u16::try_from(len).map_err(|_| Error::TooManyRecords)
}
