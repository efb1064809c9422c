use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::time::{Duration, Instant};

use log::{debug, trace};
use tokio::sync::{mpsc, oneshot};

use crate::address_family::Family;
use crate::dns_parser::{Class, Name, Packet, Question, RRData, ResourceRecord, Type};

/// Records are scoped by the interface and family they were learned on,
/// so answers from one network never satisfy queries bound to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    name: Name,
    typ: Type,
    cls: Class,
    family: Family,
    ifindex: u32,
}

#[derive(Debug, Clone)]
struct Entry {
    data: RRData,
    original_ttl: u32,
    expires_at: Instant,
}

impl Entry {
    /// The mDNS known-answer threshold: a record counts as fresh only
    /// during the first half of its lifetime.
    fn is_fresh(&self, now: Instant) -> bool {
        let remaining = self.expires_at.saturating_duration_since(now);
        remaining > Duration::from_secs(u64::from(self.original_ttl / 2))
    }
}

/// The record table. All methods take `now` explicitly so the actor
/// stamps one time per request and tests need no clock control.
#[derive(Debug, Default)]
pub struct Cache {
    entries: HashMap<Key, Vec<Entry>>,
}

impl Cache {
    pub fn new() -> Cache {
        Cache {
            entries: HashMap::new(),
        }
    }

    /// Folds a received message into the table: answers first, then
    /// nameservers, then additional records.
    pub fn ingest(&mut self, packet: &Packet, family: Family, ifindex: u32, now: Instant) {
        for rr in packet
            .answers
            .iter()
            .chain(&packet.nameservers)
            .chain(&packet.additional)
        {
            self.ingest_record(rr, family, ifindex, now);
        }
    }

    fn ingest_record(&mut self, rr: &ResourceRecord, family: Family, ifindex: u32, now: Instant) {
        if let RRData::Unknown { .. } = rr.data {
            return;
        }
        let key = Key {
            name: rr.name.to_folded(),
            typ: rr.data.typ(),
            cls: rr.cls,
            family,
            ifindex,
        };
        if rr.cache_flush {
            self.entries.remove(&key);
        }
        if rr.ttl == 0 {
            // Goodbye: the peer is withdrawing exactly this rdata.
            trace!("goodbye for {} {:?}", rr.name, key.typ);
            if let Some(entries) = self.entries.get_mut(&key) {
                entries.retain(|entry| entry.data != rr.data);
                if entries.is_empty() {
                    self.entries.remove(&key);
                }
            }
            return;
        }
        let entry = Entry {
            data: rr.data.clone(),
            original_ttl: rr.ttl,
            expires_at: now + Duration::from_secs(u64::from(rr.ttl)),
        };
        let entries = self.entries.entry(key).or_default();
        match entries.iter_mut().find(|known| known.data == entry.data) {
            Some(known) => *known = entry,
            None => entries.push(entry),
        }
    }

    /// Returns the fresh records matching `questions` on this interface,
    /// expanded over related questions: a PTR answer pulls in the SRV at
    /// its target, and an SRV answer pulls in the TXT at its own name
    /// plus the A/AAAA at its target. Returned TTLs are rewritten to the
    /// remaining lifetime. Expired entries encountered on the way are
    /// dropped.
    pub fn lookup(
        &mut self,
        questions: &[Question],
        family: Family,
        ifindex: u32,
        now: Instant,
    ) -> Vec<ResourceRecord> {
        let mut pending: VecDeque<Question> = questions.iter().map(fold_question).collect();
        let mut visited: HashSet<Question> = HashSet::new();
        let mut found = Vec::new();
        while let Some(question) = pending.pop_front() {
            if !visited.insert(question.clone()) {
                continue;
            }
            let matches = self.fresh_matches(&question, family, ifindex, now);
            for rr in &matches {
                match rr.data {
                    RRData::PTR(ref target) => {
                        pending.push_back(related(target, Type::SRV));
                    }
                    RRData::SRV { ref target, .. } => {
                        pending.push_back(related(&rr.name, Type::TXT));
                        pending.push_back(related(target, Type::A));
                        pending.push_back(related(target, Type::AAAA));
                    }
                    _ => {}
                }
            }
            found.extend(matches);
        }
        found
    }

    fn fresh_matches(
        &mut self,
        question: &Question,
        family: Family,
        ifindex: u32,
        now: Instant,
    ) -> Vec<ResourceRecord> {
        let mut found = Vec::new();
        self.entries.retain(|key, entries| {
            entries.retain(|entry| entry.expires_at > now);
            let matches = key.family == family
                && key.ifindex == ifindex
                && key.name == question.qname
                && (question.qtype == Type::Any || key.typ == question.qtype)
                && (question.qclass == Class::Any || key.cls == question.qclass);
            if matches {
                for entry in entries.iter().filter(|entry| entry.is_fresh(now)) {
                    found.push(ResourceRecord {
                        name: key.name.clone(),
                        cls: key.cls,
                        cache_flush: false,
                        ttl: entry.expires_at.saturating_duration_since(now).as_secs() as u32,
                        data: entry.data.clone(),
                    });
                }
            }
            !entries.is_empty()
        });
        found
    }

    /// Drops everything learned on `(family, ifindex)`, for when the
    /// interface loses its link or its address.
    pub fn withdraw(&mut self, family: Family, ifindex: u32) {
        let before = self.entries.len();
        self.entries
            .retain(|key, _| !(key.family == family && key.ifindex == ifindex));
        debug!(
            "withdrew {} cache keys for {:?} ifindex {}",
            before - self.entries.len(),
            family,
            ifindex
        );
    }
}

fn fold_question(question: &Question) -> Question {
    Question {
        qname: question.qname.to_folded(),
        ..question.clone()
    }
}

fn related(name: &Name, qtype: Type) -> Question {
    Question {
        qname: name.to_folded(),
        qtype,
        qclass: Class::IN,
        qu: false,
    }
}

pub enum Command {
    Ingest {
        packet: Packet,
        family: Family,
        ifindex: u32,
    },
    Lookup {
        questions: Vec<Question>,
        family: Family,
        ifindex: u32,
        reply: oneshot::Sender<Vec<ResourceRecord>>,
    },
    Withdraw {
        family: Family,
        ifindex: u32,
    },
}

/// Requests to the cache task. All mutation goes through the single
/// owning task, so ingestion of one message is atomic with respect to
/// lookups.
#[derive(Clone)]
pub struct CacheHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl CacheHandle {
    pub fn ingest(&self, packet: Packet, family: Family, ifindex: u32) {
        let _ = self.tx.send(Command::Ingest {
            packet,
            family,
            ifindex,
        });
    }

    pub fn lookup(
        &self,
        questions: Vec<Question>,
        family: Family,
        ifindex: u32,
    ) -> oneshot::Receiver<Vec<ResourceRecord>> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::Lookup {
            questions,
            family,
            ifindex,
            reply,
        });
        rx
    }

    pub fn withdraw(&self, family: Family, ifindex: u32) {
        let _ = self.tx.send(Command::Withdraw { family, ifindex });
    }
}

/// Creates the cache task and its handle. The task runs until every
/// handle clone has been dropped.
pub fn channel() -> (CacheHandle, impl Future<Output = ()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = async move {
        let mut cache = Cache::new();
        while let Some(command) = rx.recv().await {
            let now = Instant::now();
            match command {
                Command::Ingest {
                    packet,
                    family,
                    ifindex,
                } => cache.ingest(&packet, family, ifindex, now),
                Command::Lookup {
                    questions,
                    family,
                    ifindex,
                    reply,
                } => {
                    let _ = reply.send(cache.lookup(&questions, family, ifindex, now));
                }
                Command::Withdraw { family, ifindex } => cache.withdraw(family, ifindex),
            }
        }
        trace!("cache task stopped");
    };
    (CacheHandle { tx }, task)
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;
    use std::time::{Duration, Instant};

    use super::{Cache, Family};
    use crate::dns_parser::{
        Class, Header, Name, Packet, Question, RRData, ResourceRecord, Type,
    };

    fn response(answers: Vec<ResourceRecord>) -> Packet {
        let mut header = Header::new_query(0);
        header.query = false;
        header.authoritative = true;
        Packet {
            header,
            questions: Vec::new(),
            answers,
            nameservers: Vec::new(),
            additional: Vec::new(),
        }
    }

    fn a_record(name: &str, ttl: u32, octet: u8) -> ResourceRecord {
        ResourceRecord {
            name: Name::new(name),
            cls: Class::IN,
            cache_flush: false,
            ttl,
            data: RRData::A(Ipv4Addr::new(10, 0, 0, octet)),
        }
    }

    #[test]
    fn record_is_fresh_for_half_its_ttl() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.ingest(
            &response(vec![a_record("host.local", 100, 1)]),
            Family::Inet,
            2,
            t0,
        );
        let question = [Question::new("host.local", Type::A)];

        let hit = cache.lookup(&question, Family::Inet, 2, t0);
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].ttl, 100);

        let hit = cache.lookup(&question, Family::Inet, 2, t0 + Duration::from_secs(49));
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].ttl, 51);

        let miss = cache.lookup(&question, Family::Inet, 2, t0 + Duration::from_secs(50));
        assert!(miss.is_empty());
    }

    #[test]
    fn lookup_is_scoped_by_family_and_ifindex() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.ingest(
            &response(vec![a_record("host.local", 100, 1)]),
            Family::Inet,
            2,
            t0,
        );
        let question = [Question::new("host.local", Type::A)];
        assert!(cache.lookup(&question, Family::Inet, 3, t0).is_empty());
        assert!(cache.lookup(&question, Family::Inet6, 2, t0).is_empty());
        assert_eq!(cache.lookup(&question, Family::Inet, 2, t0).len(), 1);
    }

    #[test]
    fn lookup_folds_name_case() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.ingest(
            &response(vec![a_record("Host.Local", 100, 1)]),
            Family::Inet,
            2,
            t0,
        );
        let question = [Question::new("hOST.local", Type::A)];
        assert_eq!(cache.lookup(&question, Family::Inet, 2, t0).len(), 1);
    }

    #[test]
    fn cache_flush_drops_previous_rdata_on_the_key_only() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.ingest(
            &response(vec![
                a_record("host.local", 100, 1),
                a_record("host.local", 100, 2),
                a_record("other.local", 100, 9),
            ]),
            Family::Inet,
            2,
            t0,
        );

        let mut flush = a_record("host.local", 100, 3);
        flush.cache_flush = true;
        cache.ingest(&response(vec![flush]), Family::Inet, 2, t0);

        let hit = cache.lookup(&[Question::new("host.local", Type::A)], Family::Inet, 2, t0);
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].data, RRData::A(Ipv4Addr::new(10, 0, 0, 3)));

        let other = cache.lookup(&[Question::new("other.local", Type::A)], Family::Inet, 2, t0);
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn goodbye_removes_matching_rdata_only() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.ingest(
            &response(vec![
                a_record("host.local", 100, 1),
                a_record("host.local", 100, 2),
            ]),
            Family::Inet,
            2,
            t0,
        );
        cache.ingest(
            &response(vec![a_record("host.local", 0, 1)]),
            Family::Inet,
            2,
            t0,
        );
        let hit = cache.lookup(&[Question::new("host.local", Type::A)], Family::Inet, 2, t0);
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].data, RRData::A(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[test]
    fn reingest_refreshes_matching_rdata() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.ingest(
            &response(vec![a_record("host.local", 100, 1)]),
            Family::Inet,
            2,
            t0,
        );
        let t1 = t0 + Duration::from_secs(40);
        cache.ingest(
            &response(vec![a_record("host.local", 100, 1)]),
            Family::Inet,
            2,
            t1,
        );
        // Fresh relative to the refresh, and still a single entry.
        let hit = cache.lookup(
            &[Question::new("host.local", Type::A)],
            Family::Inet,
            2,
            t1 + Duration::from_secs(45),
        );
        assert_eq!(hit.len(), 1);
    }

    #[test]
    fn unknown_rdata_is_dropped_silently() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        let rr = ResourceRecord {
            name: Name::new("host.local"),
            cls: Class::IN,
            cache_flush: false,
            ttl: 100,
            data: RRData::Unknown {
                typ: Type::Unknown(4242),
                data: vec![1, 2, 3],
            },
        };
        cache.ingest(&response(vec![rr]), Family::Inet, 2, t0);
        let hit = cache.lookup(
            &[Question::new("host.local", Type::Any)],
            Family::Inet,
            2,
            t0,
        );
        assert!(hit.is_empty());
    }

    #[test]
    fn withdraw_clears_one_interface() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.ingest(
            &response(vec![a_record("host.local", 100, 1)]),
            Family::Inet,
            2,
            t0,
        );
        cache.ingest(
            &response(vec![a_record("host.local", 100, 2)]),
            Family::Inet,
            3,
            t0,
        );
        cache.withdraw(Family::Inet, 2);
        let question = [Question::new("host.local", Type::A)];
        assert!(cache.lookup(&question, Family::Inet, 2, t0).is_empty());
        assert_eq!(cache.lookup(&question, Family::Inet, 3, t0).len(), 1);
    }

    #[test]
    fn lookup_expands_ptr_to_srv_txt_and_addresses() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        let srv = ResourceRecord {
            name: Name::new("web._http._tcp.local"),
            cls: Class::IN,
            cache_flush: false,
            ttl: 120,
            data: RRData::SRV {
                priority: 0,
                weight: 0,
                port: 80,
                target: Name::new("host.local"),
            },
        };
        let txt = ResourceRecord {
            name: Name::new("web._http._tcp.local"),
            cls: Class::IN,
            cache_flush: false,
            ttl: 120,
            data: RRData::TXT(vec![b"path=/".to_vec()]),
        };
        let ptr = ResourceRecord {
            name: Name::new("_http._tcp.local"),
            cls: Class::IN,
            cache_flush: false,
            ttl: 120,
            data: RRData::PTR(Name::new("web._http._tcp.local")),
        };
        cache.ingest(
            &response(vec![ptr, srv, txt, a_record("host.local", 120, 1)]),
            Family::Inet,
            2,
            t0,
        );

        let found = cache.lookup(
            &[Question::new("_http._tcp.local", Type::PTR)],
            Family::Inet,
            2,
            t0,
        );
        let mut types: Vec<Type> = found.iter().map(|rr| rr.data.typ()).collect();
        types.sort();
        assert_eq!(types, vec![Type::A, Type::PTR, Type::TXT, Type::SRV]);
    }

    #[tokio::test]
    async fn actor_round_trip() {
        let (handle, task) = super::channel();
        tokio::spawn(task);
        let packet = response(vec![a_record("host.local", 100, 1)]);
        handle.ingest(packet, Family::Inet, 2);
        let records = handle
            .lookup(vec![Question::new("host.local", Type::A)], Family::Inet, 2)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        handle.withdraw(Family::Inet, 2);
        let records = handle
            .lookup(vec![Question::new("host.local", Type::A)], Family::Inet, 2)
            .await
            .unwrap();
        assert!(records.is_empty());
    }
}
