use std::net::IpAddr;
use std::sync::mpsc::Sender;

use crate::error::{SendError, StartError};

/// Receives what a `Pinger` has to report. Every method defaults to
/// ignoring the event.
pub trait EventSink {
    /// Resolution finished and the socket is open; pings may now be sent.
    fn started(&mut self, _address: IpAddr) {}

    /// The pinger did not start and is stopped again.
    fn failed_to_start(&mut self, _error: StartError) {}

    /// `packet` excludes any IP-level header.
    fn sent(&mut self, _packet: Vec<u8>, _sequence_number: u16) {}

    fn failed_to_send(&mut self, _packet: Vec<u8>, _sequence_number: u16, _error: SendError) {}

    /// An echo reply carrying this session's identifier.
    fn received_response(&mut self, _packet: Vec<u8>, _sequence_number: u16) {}

    /// Any other ICMP message seen on the socket.
    fn received_unexpected_packet(&mut self, _packet: Vec<u8>) {}
}

#[derive(Debug)]
pub enum PingEvent {
    Started(IpAddr),
    FailedToStart(StartError),
    Sent {
        packet: Vec<u8>,
        sequence_number: u16,
    },
    FailedToSend {
        packet: Vec<u8>,
        sequence_number: u16,
        error: SendError,
    },
    ReceivedResponse {
        packet: Vec<u8>,
        sequence_number: u16,
    },
    ReceivedUnexpectedPacket(Vec<u8>),
}

/// A sink that takes every event as a `PingEvent` value.
pub trait EventCollector {
    fn collect(&mut self, event: PingEvent);
}

impl<T: EventCollector> EventSink for T {
    fn started(&mut self, address: IpAddr) {
        self.collect(PingEvent::Started(address))
    }

    fn failed_to_start(&mut self, error: StartError) {
        self.collect(PingEvent::FailedToStart(error))
    }

    fn sent(&mut self, packet: Vec<u8>, sequence_number: u16) {
        self.collect(PingEvent::Sent { packet, sequence_number })
    }

    fn failed_to_send(&mut self, packet: Vec<u8>, sequence_number: u16, error: SendError) {
        self.collect(PingEvent::FailedToSend { packet, sequence_number, error })
    }

    fn received_response(&mut self, packet: Vec<u8>, sequence_number: u16) {
        self.collect(PingEvent::ReceivedResponse { packet, sequence_number })
    }

    fn received_unexpected_packet(&mut self, packet: Vec<u8>) {
        self.collect(PingEvent::ReceivedUnexpectedPacket(packet))
    }
}

impl EventCollector for Vec<PingEvent> {
    fn collect(&mut self, event: PingEvent) {
        self.push(event);
    }
}

/// Forwards events to the loop that drains the receiving end.
impl EventCollector for Sender<PingEvent> {
    fn collect(&mut self, event: PingEvent) {
        // a closed channel means nobody is listening any more
        let _ = self.send(event);
    }
}
