use std::fmt;
use std::time::Duration;

use crate::cli::{Args, MAX_SECONDS, MIN_SECONDS};
use crate::packet::DEFAULT_PAYLOAD_SIZE;

/// Which resolved addresses the pinger may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressStyle {
    /// First address of either family, in system order
    #[default]
    Any,
    ForceIpv4,
    ForceIpv6,
}

impl fmt::Display for AddressStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressStyle::Any => f.write_str("IPv4 or IPv6"),
            AddressStyle::ForceIpv4 => f.write_str("IPv4"),
            AddressStyle::ForceIpv6 => f.write_str("IPv6"),
        }
    }
}

/// Runtime configuration derived from CLI args
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    /// Number of pings to send (None = until interrupted)
    pub count: Option<u64>,
    pub interval: Duration,
    /// How long a ping may stay unanswered before it counts as lost
    pub timeout: Duration,
    pub payload_size: usize,
    pub address_style: AddressStyle,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            count: None,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(2),
            payload_size: DEFAULT_PAYLOAD_SIZE,
            address_style: AddressStyle::Any,
        }
    }
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        let address_style = if args.ipv4 {
            AddressStyle::ForceIpv4
        } else if args.ipv6 {
            AddressStyle::ForceIpv6
        } else {
            AddressStyle::Any
        };

        Self {
            host: args.host.clone(),
            count: if args.count == 0 { None } else { Some(args.count) },
            interval: seconds(args.interval),
            timeout: seconds(args.timeout),
            payload_size: args.size as usize,
            address_style,
        }
    }
}

/// Clamp to the accepted range; NaN becomes the minimum.
fn seconds(value: f64) -> Duration {
    Duration::from_secs_f64(value.clamp(MIN_SECONDS, MAX_SECONDS).max(MIN_SECONDS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults_from_args() {
        let args = Args::parse_from(["echoprobe", "example.com"]);
        let config = Config::from(&args);
        assert_eq!(config.host, "example.com");
        assert_eq!(config.count, None);
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.payload_size, DEFAULT_PAYLOAD_SIZE);
        assert_eq!(config.address_style, AddressStyle::Any);
    }

    #[test]
    fn test_force_family() {
        let args = Args::parse_from(["echoprobe", "-6", "-c", "3", "example.com"]);
        let config = Config::from(&args);
        assert_eq!(config.address_style, AddressStyle::ForceIpv6);
        assert_eq!(config.count, Some(3));

        let args = Args::parse_from(["echoprobe", "-4", "example.com"]);
        assert_eq!(Config::from(&args).address_style, AddressStyle::ForceIpv4);
    }

    #[test]
    fn test_hand_built_args_never_panic() {
        let mut args = Args::parse_from(["echoprobe", "example.com"]);
        args.interval = f64::INFINITY;
        args.timeout = f64::NAN;
        let config = Config::from(&args);
        assert_eq!(config.interval, Duration::from_secs(3600));
        assert_eq!(config.timeout, Duration::from_millis(10));
    }

    #[test]
    fn test_conflicting_families_rejected() {
        assert!(Args::try_parse_from(["echoprobe", "-4", "-6", "example.com"]).is_err());
    }
}
