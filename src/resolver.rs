//! Host name resolution.
//!
//! Lookups block, so they run on a short-lived background thread. The
//! outcome is handed back over a channel and announced on a datagram socket
//! pair whose read end the owning thread registers with its reactor, so the
//! completion is observed on the thread that started it.

use std::io;
use std::net::IpAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use log::{debug, trace};

use crate::config::AddressStyle;
use crate::error::ResolveError;

/// Source of name-to-address lookups.
pub trait Resolver: Send + Sync {
    /// All addresses for `host`, in the order the system returned them.
    fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the platform's `getaddrinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        dns_lookup::lookup_host(host)
    }
}

/// Resolve `host` and keep the candidates permitted by `style`, in order.
pub fn resolve(
    resolver: &dyn Resolver,
    host: &str,
    style: AddressStyle,
) -> Result<Vec<IpAddr>, ResolveError> {
    let addresses = resolver.lookup(host).map_err(|source| ResolveError::Lookup {
        host: host.to_string(),
        source,
    })?;

    let mut candidates: Vec<IpAddr> = Vec::with_capacity(addresses.len());
    for address in addresses {
        let permitted = match style {
            AddressStyle::Any => true,
            AddressStyle::ForceIpv4 => address.is_ipv4(),
            AddressStyle::ForceIpv6 => address.is_ipv6(),
        };
        if permitted && !candidates.contains(&address) {
            candidates.push(address);
        }
    }

    if candidates.is_empty() {
        return Err(ResolveError::NoAddressOfRequestedFamily {
            host: host.to_string(),
            style,
        });
    }
    Ok(candidates)
}

/// A lookup running on a background thread.
///
/// Dropping it abandons the lookup: the thread's result and wake-up are
/// discarded when it eventually finishes.
pub struct PendingResolution {
    host: String,
    results: Receiver<Result<Vec<IpAddr>, ResolveError>>,
    wake: UnixDatagram,
}

impl PendingResolution {
    pub fn spawn(
        resolver: Arc<dyn Resolver>,
        host: &str,
        style: AddressStyle,
    ) -> io::Result<PendingResolution> {
        let (wake, notifier) = UnixDatagram::pair()?;
        wake.set_nonblocking(true)?;
        let (results_tx, results) = mpsc::channel();

        let thread_host = host.to_string();
        thread::Builder::new()
            .name(format!("resolve {host}"))
            .spawn(move || {
                let outcome = resolve(resolver.as_ref(), &thread_host, style);
                // Both fail once the owner has gone away, which is fine.
                let _ = results_tx.send(outcome);
                let _ = notifier.send(&[1]);
            })?;

        debug!("resolving {host} ({style})");
        Ok(PendingResolution {
            host: host.to_string(),
            results,
            wake,
        })
    }

    /// Readiness source that becomes readable once the lookup has finished.
    pub fn source(&self) -> RawFd {
        self.wake.as_raw_fd()
    }

    /// The outcome, if the lookup has finished.
    pub fn try_complete(&mut self) -> Option<Result<Vec<IpAddr>, ResolveError>> {
        let mut byte = [0u8; 1];
        if let Err(e) = self.wake.recv(&mut byte) {
            trace!("resolution wake-up for {} not readable: {e}", self.host);
        }

        match self.results.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(ResolveError::Abandoned {
                host: self.host.clone(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::PollReactor;
    use crate::reactor::Reactor;
    use std::time::Duration;

    struct StaticResolver(Vec<IpAddr>);

    impl Resolver for StaticResolver {
        fn lookup(&self, _host: &str) -> io::Result<Vec<IpAddr>> {
            Ok(self.0.clone())
        }
    }

    struct UnknownHost;

    impl Resolver for UnknownHost {
        fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            Err(io::Error::new(io::ErrorKind::NotFound, format!("{host} not known")))
        }
    }

    fn v4() -> IpAddr {
        "93.184.216.34".parse().unwrap()
    }

    fn v6() -> IpAddr {
        "2606:2800:220:1:248:1893:25c8:1946".parse().unwrap()
    }

    #[test]
    fn test_any_keeps_system_order() {
        let resolver = StaticResolver(vec![v6(), v4()]);
        let candidates = resolve(&resolver, "example-host", AddressStyle::Any).unwrap();
        assert_eq!(candidates, vec![v6(), v4()]);
    }

    #[test]
    fn test_forced_family_filters() {
        let resolver = StaticResolver(vec![v6(), v4()]);
        assert_eq!(
            resolve(&resolver, "example-host", AddressStyle::ForceIpv4).unwrap(),
            vec![v4()]
        );
        assert_eq!(
            resolve(&resolver, "example-host", AddressStyle::ForceIpv6).unwrap(),
            vec![v6()]
        );
    }

    #[test]
    fn test_no_address_of_requested_family() {
        let resolver = StaticResolver(vec![v6()]);
        let err = resolve(&resolver, "example-host", AddressStyle::ForceIpv4).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::NoAddressOfRequestedFamily { style: AddressStyle::ForceIpv4, .. }
        ));

        let empty = StaticResolver(vec![]);
        assert!(resolve(&empty, "example-host", AddressStyle::Any).is_err());
    }

    #[test]
    fn test_duplicates_removed() {
        let resolver = StaticResolver(vec![v4(), v6(), v4()]);
        let candidates = resolve(&resolver, "example-host", AddressStyle::Any).unwrap();
        assert_eq!(candidates, vec![v4(), v6()]);
    }

    #[test]
    fn test_lookup_failure() {
        let err = resolve(&UnknownHost, "nowhere.invalid", AddressStyle::Any).unwrap_err();
        assert!(matches!(err, ResolveError::Lookup { ref host, .. } if host == "nowhere.invalid"));
    }

    #[test]
    fn test_background_resolution_signals_readiness() {
        let mut pending =
            PendingResolution::spawn(Arc::new(StaticResolver(vec![v4()])), "example-host", AddressStyle::Any)
                .unwrap();

        let reactor = PollReactor::new();
        reactor.register_readable(pending.source()).unwrap();
        let ready = reactor.wait(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(ready, vec![pending.source()]);

        let outcome = pending.try_complete().unwrap().unwrap();
        assert_eq!(outcome, vec![v4()]);
    }
}
