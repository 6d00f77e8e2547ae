//! The ping session state machine.
//!
//! A `Pinger` goes `Stopped -> Resolving -> Active` on `start`, and back to
//! `Stopped` on `stop` or when it fails to start. Everything happens on the
//! thread that owns it: the embedding loop waits on the shared reactor and
//! passes every ready descriptor to `handle_ready`. The pinger registers and
//! unregisters descriptors from inside those calls, so the loop must not hold
//! on to the reactor while dispatching; `PollReactor::wait` hands back an
//! owned list for that reason.

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::net::IpAddr;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::config::AddressStyle;
use crate::error::{PingError, ResolveError, SendError, SocketError, StartError};
use crate::messages::EventSink;
use crate::packet::{self, AddressFamily, DEFAULT_PAYLOAD_SIZE};
use crate::reactor::Reactor;
use crate::resolver::{PendingResolution, Resolver, SystemResolver};
use crate::socket::{IcmpSocket, Transport};

/// Opens the transport for a resolved address.
pub type TransportOpener =
    Box<dyn FnMut(IpAddr) -> Result<Box<dyn Transport>, SocketError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingState {
    Stopped,
    Resolving,
    Active,
}

enum Session {
    Stopped,
    Resolving(PendingResolution),
    Active(Box<dyn Transport>),
}

impl Session {
    fn state(&self) -> PingState {
        match self {
            Session::Stopped => PingState::Stopped,
            Session::Resolving(_) => PingState::Resolving,
            Session::Active(_) => PingState::Active,
        }
    }
}

pub struct Pinger {
    host_name: String,
    address_style: AddressStyle,
    reactor: Rc<dyn Reactor>,
    resolver: Arc<dyn Resolver>,
    open_transport: TransportOpener,
    sink: Option<Weak<RefCell<dyn EventSink>>>,
    session: Session,
    fixed_identifier: Option<u16>,
    identifier: u16,
    next_sequence_number: u16,
    host_address: Option<IpAddr>,
}

impl Pinger {
    /// A stopped pinger for `host_name` using the system resolver and a raw
    /// ICMP socket. Readiness sources are registered with `reactor`.
    pub fn new(host_name: impl Into<String>, reactor: Rc<dyn Reactor>) -> Self {
        Pinger {
            host_name: host_name.into(),
            address_style: AddressStyle::Any,
            reactor,
            resolver: Arc::new(SystemResolver),
            open_transport: Box::new(|address| {
                IcmpSocket::open(address).map(|socket| Box::new(socket) as Box<dyn Transport>)
            }),
            sink: None,
            session: Session::Stopped,
            fixed_identifier: None,
            identifier: 0,
            next_sequence_number: 0,
            host_address: None,
        }
    }

    /// Set before calling `start`.
    pub fn address_style(mut self, style: AddressStyle) -> Self {
        self.address_style = style;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_transport<F>(mut self, open: F) -> Self
    where
        F: FnMut(IpAddr) -> Result<Box<dyn Transport>, SocketError> + 'static,
    {
        self.open_transport = Box::new(open);
        self
    }

    /// Use `identifier` for every session instead of a random one.
    pub fn with_identifier(mut self, identifier: u16) -> Self {
        self.fixed_identifier = Some(identifier);
        self
    }

    /// Deliver events to `sink`. Only a weak reference is kept: once the
    /// sink is dropped, events are discarded.
    pub fn set_sink<S: EventSink + 'static>(&mut self, sink: &Rc<RefCell<S>>) {
        let weak: Weak<RefCell<S>> = Rc::downgrade(sink);
        self.sink = Some(weak as Weak<RefCell<dyn EventSink>>);
    }

    pub fn clear_sink(&mut self) {
        self.sink = None;
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn state(&self) -> PingState {
        self.session.state()
    }

    /// The address being pinged; `None` until `started` has been delivered.
    pub fn host_address(&self) -> Option<IpAddr> {
        self.host_address
    }

    /// `None` plays the role of `AF_UNSPEC`.
    pub fn host_address_family(&self) -> Option<AddressFamily> {
        self.host_address.as_ref().map(AddressFamily::of)
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    pub fn next_sequence_number(&self) -> u16 {
        self.next_sequence_number
    }

    /// Begin resolving the host. Returns immediately; the outcome arrives as
    /// `started` or `failed_to_start` from a later `handle_ready` call.
    pub fn start(&mut self) -> Result<(), PingError> {
        if !matches!(self.session, Session::Stopped) {
            return Err(PingError::AlreadyStarted);
        }

        self.identifier = self.fixed_identifier.unwrap_or_else(rand::random);
        self.next_sequence_number = 0;
        self.host_address = None;
        debug!(
            "starting ping session for {} (identifier {:#06x})",
            self.host_name, self.identifier
        );

        let pending =
            match PendingResolution::spawn(self.resolver.clone(), &self.host_name, self.address_style) {
                Ok(pending) => pending,
                Err(e) => {
                    self.emit(|sink| sink.failed_to_start(StartError::Io(e)));
                    return Ok(());
                }
            };
        if let Err(e) = self.reactor.register_readable(pending.source()) {
            self.emit(|sink| sink.failed_to_start(StartError::Io(e)));
            return Ok(());
        }

        self.session = Session::Resolving(pending);
        Ok(())
    }

    /// Send one echo request. `None` sends the default 56 byte payload.
    ///
    /// The outcome is reported through `sent` or `failed_to_send` before this
    /// returns. The sequence number advances either way.
    pub fn send_ping(&mut self, payload: Option<&[u8]>) -> Result<(), PingError> {
        let (Session::Active(transport), Some(address)) = (&mut self.session, self.host_address)
        else {
            return Err(PingError::NotStarted);
        };

        let sequence_number = self.next_sequence_number;
        let filler;
        let payload = match payload {
            Some(data) => data,
            None => {
                filler = default_payload();
                &filler[..]
            }
        };
        let packet = packet::encode_echo_request(
            AddressFamily::of(&address),
            self.identifier,
            sequence_number,
            payload,
        )?;

        let result = transport.send_to(address, &packet);
        self.next_sequence_number = sequence_number.wrapping_add(1);

        match result {
            Ok(sent) if sent == packet.len() => {
                trace!("sent echo request #{sequence_number} to {address}");
                self.emit(|sink| sink.sent(packet, sequence_number));
            }
            Ok(sent) => {
                let error = SendError::Truncated { sent, expected: packet.len() };
                debug!("echo request #{sequence_number} to {address} failed: {error}");
                self.emit(|sink| sink.failed_to_send(packet, sequence_number, error));
            }
            Err(e) => {
                let error = SendError::Io(e);
                debug!("echo request #{sequence_number} to {address} failed: {error}");
                self.emit(|sink| sink.failed_to_send(packet, sequence_number, error));
            }
        }
        Ok(())
    }

    /// Tear the session down. Stopping a stopped pinger does nothing.
    pub fn stop(&mut self) {
        match mem::replace(&mut self.session, Session::Stopped) {
            Session::Stopped => return,
            Session::Resolving(pending) => {
                // a late completion is discarded along with `pending`
                self.unregister(pending.source());
            }
            Session::Active(mut transport) => {
                self.unregister(transport.source());
                transport.close();
            }
        }
        self.host_address = None;
        debug!("stopped ping session for {}", self.host_name);
    }

    /// React to `source` becoming readable. Sources that do not belong to
    /// this pinger are ignored.
    pub fn handle_ready(&mut self, source: RawFd) {
        match &mut self.session {
            Session::Resolving(pending) if pending.source() == source => {
                if let Some(outcome) = pending.try_complete() {
                    self.finish_resolution(outcome);
                }
            }
            Session::Active(transport) if transport.source() == source => self.read_packet(),
            _ => trace!("ignoring readiness of unknown source {source}"),
        }
    }

    fn finish_resolution(&mut self, outcome: Result<Vec<IpAddr>, ResolveError>) {
        if let Session::Resolving(pending) = mem::replace(&mut self.session, Session::Stopped) {
            self.unregister(pending.source());
        }

        let address = match outcome {
            // `resolve` never succeeds with an empty list
            Ok(candidates) => candidates[0],
            Err(e) => {
                debug!("resolution of {} failed: {e}", self.host_name);
                self.emit(|sink| sink.failed_to_start(e.into()));
                return;
            }
        };

        let mut transport = match (self.open_transport)(address) {
            Ok(transport) => transport,
            Err(e) => {
                debug!("unable to open socket for {address}: {e}");
                self.emit(|sink| sink.failed_to_start(e.into()));
                return;
            }
        };
        if let Err(e) = self.reactor.register_readable(transport.source()) {
            transport.close();
            self.emit(|sink| sink.failed_to_start(StartError::Io(e)));
            return;
        }

        debug!("{} resolved to {address}", self.host_name);
        self.host_address = Some(address);
        self.session = Session::Active(transport);
        self.emit(|sink| sink.started(address));
    }

    fn read_packet(&mut self) {
        let Some(family) = self.host_address_family() else {
            return;
        };
        let Session::Active(transport) = &mut self.session else {
            return;
        };

        let datagram = match transport.recv_from() {
            Ok(Some((datagram, from))) => {
                trace!("{} byte datagram from {from}", datagram.len());
                datagram
            }
            Ok(None) => return,
            Err(e) => {
                warn!("ICMP socket read failed: {e}");
                return;
            }
        };

        let message = match packet::decode_message(family, &datagram) {
            Ok(message) => message,
            Err(e) => {
                trace!("dropping datagram: {e}");
                return;
            }
        };

        let header = message.header;
        if packet::is_echo_reply(&header, family) && header.identifier == self.identifier {
            if family == AddressFamily::Ipv4 && packet::internet_checksum(message.packet) != 0 {
                debug!("echo reply #{} has a bad checksum", header.sequence_number);
            }
            let packet = message.packet.to_vec();
            self.emit(|sink| sink.received_response(packet, header.sequence_number));
        } else {
            trace!(
                "unexpected ICMP type {} code {} identifier {:#06x}",
                header.icmp_type, header.code, header.identifier
            );
            let packet = message.packet.to_vec();
            self.emit(|sink| sink.received_unexpected_packet(packet));
        }
    }

    fn unregister(&self, source: RawFd) {
        self.reactor.unregister(source);
    }

    fn emit(&self, deliver: impl FnOnce(&mut dyn EventSink)) {
        let Some(sink) = self.sink.as_ref().and_then(Weak::upgrade) else {
            trace!("no event sink, dropping event");
            return;
        };
        match sink.try_borrow_mut() {
            Ok(mut sink) => deliver(&mut *sink),
            Err(_) => warn!("event sink is busy, dropping event"),
        }
    }
}

impl Drop for Pinger {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Pinger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pinger")
            .field("host_name", &self.host_name)
            .field("address_style", &self.address_style)
            .field("state", &self.state())
            .field("host_address", &self.host_address)
            .field("identifier", &self.identifier)
            .field("next_sequence_number", &self.next_sequence_number)
            .finish()
    }
}

/// Pattern fill giving the conventional 64 byte ping.
fn default_payload() -> [u8; DEFAULT_PAYLOAD_SIZE] {
    let mut payload = [0u8; DEFAULT_PAYLOAD_SIZE];
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte = (i & 0xFF) as u8;
    }
    payload
}
