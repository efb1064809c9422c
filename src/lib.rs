//! mDNS service discovery client: sends multicast queries on each
//! eligible interface, caches the records peers announce, and streams
//! decoded responses back to the caller.

use futures_util::future::FutureExt;
use futures_util::{future, stream::Stream};
use log::{trace, warn};
use pin_project::pin_project;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::Sleep;

mod dns_parser;
pub use crate::dns_parser::{
    Class, Error, Header, Name, Packet, Question, RRData, ResourceRecord, Type,
};

mod address_family;
mod cache;
mod config;
mod fsm;
mod interface;
mod net;

pub use crate::address_family::Family;
pub use crate::config::{ClientConfig, QueryOptions};
pub use crate::interface::InterfaceEvent;

use crate::address_family::{Inet, Inet6};
use crate::cache::CacheHandle;
use crate::fsm::{Command, Listener, FSM};

const MDNS_PORT: u16 = 5353;

/// A decoded response together with where it arrived.
#[derive(Debug, Clone)]
pub struct TaggedPacket {
    pub family: Family,
    pub ifindex: u32,
    pub packet: Packet,
}

struct ClientInner {
    cache: CacheHandle,
    config: ClientConfig,
    /// Interface indexes learned from queries and address events, so a
    /// link-down for an already-vanished interface can still be mapped.
    ifindexes: RwLock<HashMap<String, u32>>,
    // These fields are ordered so commands drops before the join handle.
    commands: CommandSender,
    handle: Shutdown,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.commands.send(Command::Shutdown);
    }
}

/// Handle to a running mDNS client.
///
/// Owns the cache task and one passive multicast listener per address
/// family; dropping the last handle shuts them down.
pub struct Client {
    inner: Arc<ClientInner>,
}

pub type ClientTask = Pin<Box<dyn Future<Output = ()> + Send>>;

impl Client {
    /// Spawn a client on a dedicated os thread.
    pub fn new() -> io::Result<Client> {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> io::Result<Client> {
        let (tx, rx) = std::sync::mpsc::sync_channel(0);
        let join_handle = thread::Builder::new()
            .name("mdns-client".to_owned())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        let _ = tx.send(Err(err));
                        return;
                    }
                };
                rt.block_on(async move {
                    match Self::with_default_handle_and_config(config) {
                        Ok((client, task)) => {
                            tx.send(Ok(client)).expect("tx client channel closed");
                            task.await;
                        }
                        Err(err) => tx.send(Err(err)).expect("tx client channel closed"),
                    }
                });
            })?;
        let mut client = rx.recv().expect("rx client channel closed")?;
        if let Some(inner) = Arc::get_mut(&mut client.inner) {
            inner.handle.0 = Some(join_handle);
        }
        Ok(client)
    }

    /// Spawn a client onto the provided tokio `Handle`.
    ///
    /// # Example
    /// ```no_run
    /// use mdns_client::Client;
    ///
    /// # use std::io;
    /// # fn main() -> io::Result<()> {
    /// let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    /// let handle = rt.handle().clone();
    /// let client = Client::spawn(&handle)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn spawn(handle: &Handle) -> io::Result<Client> {
        Self::spawn_with_config(handle, ClientConfig::default())
    }

    pub fn spawn_with_config(handle: &Handle, config: ClientConfig) -> io::Result<Client> {
        let (client, task) = Self::with_default_handle_and_config(config)?;
        handle.spawn(task);
        Ok(client)
    }

    /// Build a client plus its background task for the caller to drive
    /// on the default tokio handle.
    pub fn with_default_handle() -> io::Result<(Client, ClientTask)> {
        Self::with_default_handle_and_config(ClientConfig::default())
    }

    pub fn with_default_handle_and_config(config: ClientConfig) -> io::Result<(Client, ClientTask)> {
        let (cache, cache_task) = cache::channel();
        let (v4_tx, v4_rx) = mpsc::unbounded_channel();
        let (v6_tx, v6_rx) = mpsc::unbounded_channel();
        let v4 = Listener::<Inet>::new(cache.clone(), v4_rx);
        let v6 = Listener::<Inet6>::new(cache.clone(), v6_rx);

        let task: ClientTask = Box::pin(async move {
            let v4 = v4.map(|result| {
                if let Err(err) = result {
                    warn!("IPv4 listener failed: {}", err);
                }
            });
            // No IPv6 on the host degrades to v4-only service.
            let v6 = v6.map(|result| {
                if let Err(err) = result {
                    warn!("failed to register IPv6 receiver: {:?}", err);
                }
            });
            future::join3(cache_task, v4, v6).await;
        });

        let client = Client {
            inner: Arc::new(ClientInner {
                cache,
                config,
                ifindexes: RwLock::new(HashMap::new()),
                commands: CommandSender(vec![v4_tx, v6_tx]),
                handle: Shutdown(None),
            }),
        };

        Ok((client, task))
    }
}

impl Client {
    /// Send `questions` out on every matching interface and stream the
    /// decoded responses back until the deadline in `opts` passes or
    /// the stream is dropped.
    pub fn query(&self, questions: Vec<Question>, opts: QueryOptions) -> io::Result<QueryStream> {
        let mut opts = opts;
        if opts.interface_prefixes.is_empty() {
            opts.interface_prefixes = self.inner.config.interface_prefixes.clone();
        }
        let addrs = interface::enumerate(&opts)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut workers: Vec<Pin<Box<dyn Future<Output = io::Result<()>> + Send>>> =
            Vec::with_capacity(addrs.len());
        for ifaddr in addrs {
            trace!("query worker for {} ({})", ifaddr.name, ifaddr.addr);
            match ifaddr.addr {
                IpAddr::V4(_) => workers.push(Box::pin(FSM::<Inet>::new(
                    ifaddr.addr,
                    ifaddr.index,
                    questions.clone(),
                    self.inner.cache.clone(),
                    tx.clone(),
                ))),
                IpAddr::V6(_) => workers.push(Box::pin(FSM::<Inet6>::new(
                    ifaddr.addr,
                    ifaddr.index,
                    questions.clone(),
                    self.inner.cache.clone(),
                    tx.clone(),
                ))),
            }
            self.inner
                .ifindexes
                .write()
                .unwrap()
                .insert(ifaddr.name, ifaddr.index);
        }
        Ok(QueryStream {
            workers,
            rx,
            timeout: opts.timeout,
            deadline: None,
            expired: false,
        })
    }

    /// Feed one event from the external interface-change source into
    /// the client. Link or address loss drops the affected cache
    /// entries; a new address joins the multicast group on that
    /// interface.
    pub fn handle_interface_event(&self, event: InterfaceEvent) {
        if !interface::matches_prefixes(event.ifname(), &self.inner.config.interface_prefixes) {
            trace!("ignoring event for filtered interface {}", event.ifname());
            return;
        }
        match event {
            InterfaceEvent::LinkUp { ifname } => trace!("link up on {}", ifname),
            InterfaceEvent::LinkDown { ifname } => match self.resolve_ifindex(&ifname) {
                Some(index) => {
                    self.inner.cache.withdraw(Family::Inet, index);
                    self.inner.cache.withdraw(Family::Inet6, index);
                }
                None => warn!("link down on unknown interface {}", ifname),
            },
            InterfaceEvent::NewAddr { ifname, addr } => match net::if_nametoindex(&ifname) {
                Ok(index) => {
                    self.inner.ifindexes.write().unwrap().insert(ifname, index);
                    self.inner.commands.send(Command::Join {
                        addr,
                        ifindex: index,
                    });
                }
                Err(err) => warn!("could not resolve index of {}: {}", ifname, err),
            },
            InterfaceEvent::DelAddr { ifname, addr } => match self.resolve_ifindex(&ifname) {
                Some(index) => {
                    self.inner.cache.withdraw(Family::of(&addr), index);
                    self.inner.commands.send(Command::Leave {
                        addr,
                        ifindex: index,
                    });
                }
                None => warn!("address removed on unknown interface {}", ifname),
            },
        }
    }

    fn resolve_ifindex(&self, ifname: &str) -> Option<u32> {
        if let Some(&index) = self.inner.ifindexes.read().unwrap().get(ifname) {
            return Some(index);
        }
        net::if_nametoindex(ifname).ok()
    }
}

/// Stream of decoded responses for one query.
///
/// The stream drives its interface workers itself; there is nothing to
/// cancel beyond dropping it. After the deadline fires the workers are
/// stopped and already-received messages are drained before the stream
/// ends.
#[pin_project]
pub struct QueryStream {
    workers: Vec<Pin<Box<dyn Future<Output = io::Result<()>> + Send>>>,
    rx: mpsc::UnboundedReceiver<TaggedPacket>,
    timeout: Duration,
    #[pin]
    deadline: Option<Sleep>,
    expired: bool,
}

impl Stream for QueryStream {
    type Item = TaggedPacket;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<TaggedPacket>> {
        let mut this = self.project();

        if this.deadline.as_mut().as_pin_mut().is_none() {
            this.deadline.set(Some(tokio::time::sleep(*this.timeout)));
        }
        if !*this.expired {
            if let Some(deadline) = this.deadline.as_mut().as_pin_mut() {
                if deadline.poll(cx).is_ready() {
                    trace!("query deadline reached");
                    *this.expired = true;
                    this.workers.clear();
                }
            }
        }
        if !*this.expired {
            this.workers.retain_mut(|worker| match worker.as_mut().poll(cx) {
                Poll::Ready(Ok(())) => false,
                Poll::Ready(Err(err)) => {
                    warn!("interface worker failed: {}", err);
                    false
                }
                Poll::Pending => true,
            });
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(tagged)) => Poll::Ready(Some(tagged)),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending if *this.expired => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct Shutdown(Option<thread::JoinHandle<()>>);

impl Drop for Shutdown {
    fn drop(&mut self) {
        trace!("shutting down mdns client");

        if let Some(handle) = self.0.take() {
            handle.join().expect("failed to join client thread");
        }
    }
}

#[derive(Clone)]
struct CommandSender(Vec<mpsc::UnboundedSender<Command>>);

impl CommandSender {
    fn send(&self, command: Command) {
        for tx in &self.0 {
            let _ = tx.send(command.clone());
        }
    }
}
