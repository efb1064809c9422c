use std::time::Duration;

use crate::address_family::Family;

pub(crate) const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Configuration for a [`Client`](crate::Client).
///
/// ```no_run
/// use mdns_client::ClientConfig;
///
/// let config = ClientConfig::new()
///     .with_interface_prefixes(vec!["eth".to_owned(), "wl".to_owned()]);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ClientConfig {
    /// Interface name prefixes the client will use. Empty means every
    /// interface matches.
    pub interface_prefixes: Vec<String>,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interface_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.interface_prefixes = prefixes;
        self
    }
}

/// Per-query options for [`Client::query`](crate::Client::query).
///
/// The defaults query every eligible interface of both families with a
/// five second deadline.
#[derive(Clone, Debug)]
pub struct QueryOptions {
    /// Restrict the query to one address family.
    pub family: Option<Family>,
    /// Restrict the query to one interface by index.
    pub ifindex: Option<u32>,
    /// Restrict the query to one interface by name.
    pub ifname: Option<String>,
    /// Overall deadline for the response stream.
    pub timeout: Duration,
    /// Interface name prefixes; empty falls back to the client-level
    /// configuration.
    pub interface_prefixes: Vec<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            family: None,
            ifindex: None,
            ifname: None,
            timeout: DEFAULT_QUERY_TIMEOUT,
            interface_prefixes: Vec::new(),
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_family(mut self, family: Family) -> Self {
        self.family = Some(family);
        self
    }

    pub fn with_ifindex(mut self, ifindex: u32) -> Self {
        self.ifindex = Some(ifindex);
        self
    }

    pub fn with_ifname<S: Into<String>>(mut self, ifname: S) -> Self {
        self.ifname = Some(ifname.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interface_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.interface_prefixes = prefixes;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn query_defaults() {
        let opts = QueryOptions::default();
        assert_eq!(opts.family, None);
        assert_eq!(opts.ifindex, None);
        assert_eq!(opts.ifname, None);
        assert_eq!(opts.timeout, Duration::from_millis(5000));
        assert!(opts.interface_prefixes.is_empty());
    }

    #[test]
    fn builders_set_fields() {
        let opts = QueryOptions::new()
            .with_family(Family::Inet6)
            .with_ifname("eth0")
            .with_ifindex(4)
            .with_timeout(Duration::from_secs(1));
        assert_eq!(opts.family, Some(Family::Inet6));
        assert_eq!(opts.ifname.as_deref(), Some("eth0"));
        assert_eq!(opts.ifindex, Some(4));
        assert_eq!(opts.timeout, Duration::from_secs(1));
    }
}
