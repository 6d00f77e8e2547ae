//! ICMP echo (ping) probing over raw sockets for IPv4 and IPv6.
//!
//! A [`Pinger`](pinger::Pinger) resolves a host, opens a raw ICMP socket for
//! the chosen address family, sends echo requests on demand and reports what
//! it sees through an [`EventSink`](messages::EventSink). It is driven from a
//! single thread by whatever loop waits on its [`Reactor`](reactor::Reactor).

pub mod cli;
pub mod config;
pub mod error;
pub mod messages;
pub mod packet;
pub mod pinger;
pub mod reactor;
pub mod report;
pub mod resolver;
pub mod socket;

pub use config::AddressStyle;
pub use messages::{EventSink, PingEvent};
pub use pinger::{PingState, Pinger};
