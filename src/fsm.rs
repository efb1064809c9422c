use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::marker::PhantomData;
use std::net::IpAddr;
use std::os::unix::io::AsRawFd;
use std::pin::Pin;
use std::task::{Context, Poll};

use log::{trace, warn};
use pin_project::pin_project;
use socket2::SockRef;
use tokio::io::unix::AsyncFd;
use tokio::io::ReadBuf;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};

use crate::address_family::AddressFamily;
use crate::cache::CacheHandle;
use crate::dns_parser::{Header, Packet, Question, ResourceRecord};
use crate::net;
use crate::TaggedPacket;

/// Maximum UDP datagram; mDNS peers may use the full range.
const RECV_BUF_SIZE: usize = 65535;

/// Commands delivered to the passive listeners.
#[derive(Clone, Debug)]
pub enum Command {
    Join { addr: IpAddr, ifindex: u32 },
    Leave { addr: IpAddr, ifindex: u32 },
    Shutdown,
}

enum State {
    Init,
    Query {
        pending: oneshot::Receiver<Vec<ResourceRecord>>,
    },
    Running,
}

/// Per-(interface, family) query worker.
///
/// Driven by the `QueryStream` that owns it: the first poll binds the
/// socket, asks the cache for known answers, and sends the query; after
/// that it loops receiving responses, feeding each one to the cache and
/// to the caller. Dropping the worker closes the socket.
#[pin_project]
pub struct FSM<AF: AddressFamily> {
    addr: IpAddr,
    ifindex: u32,
    questions: Vec<Question>,
    cache: CacheHandle,
    forward: mpsc::UnboundedSender<TaggedPacket>,
    socket: Option<UdpSocket>,
    outgoing: VecDeque<Vec<u8>>,
    recv_buf: Vec<u8>,
    state: State,
    _af: PhantomData<AF>,
}

impl<AF: AddressFamily> FSM<AF> {
    pub fn new(
        addr: IpAddr,
        ifindex: u32,
        questions: Vec<Question>,
        cache: CacheHandle,
        forward: mpsc::UnboundedSender<TaggedPacket>,
    ) -> FSM<AF> {
        FSM {
            addr,
            ifindex,
            questions,
            cache,
            forward,
            socket: None,
            outgoing: VecDeque::new(),
            recv_buf: vec![0; RECV_BUF_SIZE],
            state: State::Init,
            _af: PhantomData,
        }
    }

    fn poll_inner(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        loop {
            match self.state {
                State::Init => {
                    let socket = AF::bind_worker(&self.addr, self.ifindex)?;
                    self.socket = Some(UdpSocket::from_std(socket)?);
                    trace!(
                        "worker bound on {} (ifindex {}, {:?})",
                        self.addr,
                        self.ifindex,
                        AF::FAMILY
                    );
                    let pending =
                        self.cache
                            .lookup(self.questions.clone(), AF::FAMILY, self.ifindex);
                    self.state = State::Query { pending };
                }
                State::Query { ref mut pending } => match Pin::new(pending).poll(cx) {
                    Poll::Ready(known) => {
                        let query = build_query(&self.questions, known.unwrap_or_default());
                        match query.encode() {
                            Ok(bytes) => self.outgoing.push_back(bytes),
                            Err(err) => warn!("could not encode query: {}", err),
                        }
                        self.state = State::Running;
                    }
                    Poll::Pending => break,
                },
                State::Running => break,
            }
        }

        if let State::Running = self.state {
            self.recv_packets(cx)?;
        }

        // Failing to send the query is fatal for this worker; other
        // interfaces keep going.
        if let Some(socket) = &self.socket {
            while let Some(bytes) = self.outgoing.front() {
                let group = AF::mdns_group(self.ifindex);
                match socket.poll_send_to(cx, bytes, group) {
                    Poll::Ready(Ok(_)) => {
                        trace!("sent query to {:?}", group);
                        self.outgoing.pop_front();
                    }
                    Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                    Poll::Pending => break,
                }
            }
        }

        Poll::Pending
    }

    fn recv_packets(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        let socket = match &self.socket {
            Some(socket) => socket,
            None => return Ok(()),
        };
        loop {
            let mut read_buf = ReadBuf::new(&mut self.recv_buf);
            let addr = match socket.poll_recv_from(cx, &mut read_buf) {
                Poll::Ready(Ok(addr)) => addr,
                Poll::Ready(Err(err)) => return Err(err),
                Poll::Pending => return Ok(()),
            };
            let len = read_buf.filled().len();
            if len >= RECV_BUF_SIZE {
                warn!("buffer too small for packet from {:?}", addr);
                continue;
            }
            trace!("received packet from {:?}", addr);
            let packet = match Packet::parse(&self.recv_buf[..len]) {
                Ok((packet, _trailing)) => packet,
                Err(err) => {
                    warn!("couldn't parse packet from {:?}: {}", addr, err);
                    continue;
                }
            };
            self.cache.ingest(packet.clone(), AF::FAMILY, self.ifindex);
            let _ = self.forward.send(TaggedPacket {
                family: AF::FAMILY,
                ifindex: self.ifindex,
                packet,
            });
        }
    }
}

impl<AF: AddressFamily> Future for FSM<AF> {
    type Output = io::Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_inner(cx)
    }
}

/// Always-on passive listener, one per address family.
///
/// Bound to the mDNS port itself, it ingests whatever multicast traffic
/// arrives into the cache, keyed by the interface the kernel reports in
/// the packet info. It forwards nothing; solicited responses reach the
/// caller through the query workers.
#[pin_project]
pub struct Listener<AF: AddressFamily> {
    cache: CacheHandle,
    commands: mpsc::UnboundedReceiver<Command>,
    socket: Option<AsyncFd<std::net::UdpSocket>>,
    recv_buf: Vec<u8>,
    _af: PhantomData<AF>,
}

impl<AF: AddressFamily> Listener<AF> {
    pub fn new(cache: CacheHandle, commands: mpsc::UnboundedReceiver<Command>) -> Listener<AF> {
        Listener {
            cache,
            commands,
            socket: None,
            recv_buf: vec![0; RECV_BUF_SIZE],
            _af: PhantomData,
        }
    }

    fn poll_inner(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.socket.is_none() {
            let socket = AF::bind_listener()?;
            self.socket = Some(AsyncFd::new(socket)?);
            trace!("{:?} listener bound", AF::FAMILY);
        }

        loop {
            match self.commands.poll_recv(cx) {
                Poll::Ready(Some(Command::Join { addr, ifindex })) => {
                    if let Some(fd) = &self.socket {
                        match AF::join_multicast(SockRef::from(fd.get_ref()), &addr, ifindex) {
                            Ok(()) => trace!("joined group on {} (ifindex {})", addr, ifindex),
                            Err(err) => warn!("could not join group on {}: {}", addr, err),
                        }
                    }
                }
                Poll::Ready(Some(Command::Leave { addr, ifindex })) => {
                    if let Some(fd) = &self.socket {
                        if let Err(err) =
                            AF::leave_multicast(SockRef::from(fd.get_ref()), &addr, ifindex)
                        {
                            warn!("could not leave group on {}: {}", addr, err);
                        }
                    }
                }
                Poll::Ready(Some(Command::Shutdown)) => return Poll::Ready(Ok(())),
                Poll::Ready(None) => {
                    warn!("client disconnected without shutdown");
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => break,
            }
        }

        self.recv_packets(cx)?;
        Poll::Pending
    }

    fn recv_packets(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        let socket = match &self.socket {
            Some(socket) => socket,
            None => return Ok(()),
        };
        loop {
            let mut guard = match socket.poll_read_ready(cx) {
                Poll::Ready(Ok(guard)) => guard,
                Poll::Ready(Err(err)) => return Err(err),
                Poll::Pending => return Ok(()),
            };
            match net::recv_with_ifindex(socket.get_ref().as_raw_fd(), &mut self.recv_buf) {
                Ok((len, ifindex)) => {
                    if len >= RECV_BUF_SIZE {
                        warn!("buffer too small for multicast packet");
                        continue;
                    }
                    match Packet::parse(&self.recv_buf[..len]) {
                        Ok((packet, _trailing)) => {
                            trace!("unsolicited packet on ifindex {}", ifindex);
                            self.cache.ingest(packet, AF::FAMILY, ifindex);
                        }
                        Err(err) => warn!("couldn't parse multicast packet: {}", err),
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    guard.clear_ready();
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<AF: AddressFamily> Future for Listener<AF> {
    type Output = io::Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_inner(cx)
    }
}

/// A query message: the caller's questions plus the records the cache
/// still considers fresh on this interface, so responders can suppress
/// answers the client already holds.
pub(crate) fn build_query(questions: &[Question], known_answers: Vec<ResourceRecord>) -> Packet {
    Packet {
        header: Header::new_query(0),
        questions: questions.to_vec(),
        answers: known_answers,
        nameservers: Vec::new(),
        additional: Vec::new(),
    }
}
