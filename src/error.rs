use std::io;

use thiserror::Error;

use crate::config::AddressStyle;

/// Failure to turn the host name into a usable address. Terminal for the session.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("could not resolve {host}: {source}")]
    Lookup {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("{host} has no {style} address")]
    NoAddressOfRequestedFamily { host: String, style: AddressStyle },

    #[error("resolution of {host} was abandoned before it completed")]
    Abandoned { host: String },
}

/// Failure to create or configure the raw ICMP socket.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error(
        "permission denied opening a raw ICMP socket ({0}); \
         run as root or grant CAP_NET_RAW (sudo setcap cap_net_raw+ep <binary>)"
    )]
    PermissionDenied(#[source] io::Error),

    #[error("unable to open ICMP socket: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for SocketError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::PermissionDenied => SocketError::PermissionDenied(e),
            _ => SocketError::Io(e),
        }
    }
}

/// Per-packet send failure. The session stays active.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("send failed: {0}")]
    Io(#[from] io::Error),

    #[error("short send: {sent} of {expected} bytes")]
    Truncated { sent: usize, expected: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datagram of {len} bytes is shorter than an ICMP header")]
    Truncated { len: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Everything that can be delivered through `failed_to_start`.
#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Resolution(#[from] ResolveError),

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error("local setup failed: {0}")]
    Io(#[from] io::Error),
}

/// Misuse of the engine API.
#[derive(Debug, Error)]
pub enum PingError {
    #[error("pinger is already started")]
    AlreadyStarted,

    #[error("pinger is not started")]
    NotStarted,

    #[error(transparent)]
    Payload(#[from] EncodeError),
}
