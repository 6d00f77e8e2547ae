use std::cell::RefCell;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use log::warn;

/// Single-threaded readiness notification source.
///
/// The pinger registers the descriptors it wants to hear about; whoever runs
/// the loop hands each ready descriptor back to `Pinger::handle_ready` on the
/// same thread. Registration may happen from inside that dispatch, so
/// implementations take `&self` and must not hold any internal borrow across
/// a call back into the pinger.
pub trait Reactor {
    fn register_readable(&self, source: RawFd) -> io::Result<()>;

    /// Stop reporting `source`. Unknown descriptors are ignored.
    fn unregister(&self, source: RawFd);
}

/// Level-triggered reactor on top of `poll(2)`.
#[derive(Debug, Default)]
pub struct PollReactor {
    sources: RefCell<Vec<RawFd>>,
}

impl PollReactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self, source: RawFd) -> bool {
        self.sources.borrow().contains(&source)
    }

    pub fn is_empty(&self) -> bool {
        self.sources.borrow().is_empty()
    }

    /// Block until at least one registered source is readable or `timeout`
    /// elapses (`None` waits indefinitely). Returns the ready sources.
    ///
    /// Descriptors the kernel reports as invalid (closed without being
    /// unregistered) are dropped from the set.
    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<Vec<RawFd>> {
        let mut fds: Vec<libc::pollfd> = self
            .sources
            .borrow()
            .iter()
            .map(|&fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        let timeout_ms: libc::c_int = match timeout {
            Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };

        // SAFETY: `fds` is a valid, exclusively borrowed array of `fds.len()` pollfd entries.
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let mut ready = Vec::new();
        for p in &fds {
            if p.revents & libc::POLLNVAL != 0 {
                warn!("dropping closed descriptor {} from the reactor", p.fd);
                self.unregister(p.fd);
            } else if p.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0 {
                ready.push(p.fd);
            }
        }
        Ok(ready)
    }
}

impl Reactor for PollReactor {
    fn register_readable(&self, source: RawFd) -> io::Result<()> {
        if source < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid descriptor {source}"),
            ));
        }
        let mut sources = self.sources.borrow_mut();
        if !sources.contains(&source) {
            sources.push(source);
        }
        Ok(())
    }

    fn unregister(&self, source: RawFd) {
        self.sources.borrow_mut().retain(|&fd| fd != source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixDatagram;

    #[test]
    fn test_reports_readable_source() {
        let (a, b) = UnixDatagram::pair().unwrap();
        let reactor = PollReactor::new();
        reactor.register_readable(a.as_raw_fd()).unwrap();

        assert!(reactor.wait(Some(Duration::ZERO)).unwrap().is_empty());

        b.send(b"x").unwrap();
        assert_eq!(
            reactor.wait(Some(Duration::from_secs(1))).unwrap(),
            vec![a.as_raw_fd()]
        );
    }

    #[test]
    fn test_unregister_silences_source() {
        let (a, b) = UnixDatagram::pair().unwrap();
        let reactor = PollReactor::new();
        reactor.register_readable(a.as_raw_fd()).unwrap();
        reactor.register_readable(a.as_raw_fd()).unwrap();
        b.send(b"x").unwrap();

        reactor.unregister(a.as_raw_fd());
        assert!(reactor.is_empty());
        assert!(reactor.wait(Some(Duration::from_millis(10))).unwrap().is_empty());

        // unknown descriptors are ignored
        reactor.unregister(a.as_raw_fd());
    }

    #[test]
    fn test_registration_during_dispatch() {
        let (a, b) = UnixDatagram::pair().unwrap();
        let (c, d) = UnixDatagram::pair().unwrap();
        let reactor = PollReactor::new();
        reactor.register_readable(a.as_raw_fd()).unwrap();
        b.send(b"x").unwrap();

        for fd in reactor.wait(Some(Duration::from_secs(1))).unwrap() {
            reactor.unregister(fd);
            reactor.register_readable(c.as_raw_fd()).unwrap();
        }
        assert!(!reactor.is_registered(a.as_raw_fd()));

        d.send(b"y").unwrap();
        assert_eq!(
            reactor.wait(Some(Duration::from_secs(1))).unwrap(),
            vec![c.as_raw_fd()]
        );
    }

    #[test]
    fn test_closed_descriptor_is_dropped() {
        // far above anything this process opens
        let stale: RawFd = 1 << 20;
        let (keep, keep_peer) = UnixDatagram::pair().unwrap();
        let reactor = PollReactor::new();
        reactor.register_readable(keep.as_raw_fd()).unwrap();
        reactor.register_readable(stale).unwrap();

        keep_peer.send(b"x").unwrap();
        let ready = reactor.wait(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(ready, vec![keep.as_raw_fd()]);
        assert!(!reactor.is_registered(stale));
        assert!(reactor.is_registered(keep.as_raw_fd()));
    }

    #[test]
    fn test_rejects_invalid_descriptor() {
        let reactor = PollReactor::new();
        assert!(reactor.register_readable(-1).is_err());
    }
}
