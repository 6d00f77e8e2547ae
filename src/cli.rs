use clap::Parser;

use crate::packet::MAX_PAYLOAD_SIZE;

/// Bounds for interval and timeout arguments, in seconds
pub const MIN_SECONDS: f64 = 0.01;
pub const MAX_SECONDS: f64 = 3600.0;

/// Send ICMP echo requests to a host and report the replies
#[derive(Parser, Debug, Clone)]
#[command(name = "echoprobe")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Host name or IP address to ping
    pub host: String,

    /// Number of pings to send (0 = until interrupted)
    #[arg(short = 'c', long = "count", default_value = "0")]
    pub count: u64,

    /// Seconds between pings
    #[arg(short = 'i', long = "interval", default_value = "1.0", value_parser = parse_seconds)]
    pub interval: f64,

    /// Seconds to wait for each reply
    #[arg(short = 'W', long = "timeout", default_value = "2.0", value_parser = parse_seconds)]
    pub timeout: f64,

    /// Payload bytes after the 8 byte ICMP header
    #[arg(
        short = 's',
        long = "size",
        default_value = "56",
        value_parser = clap::value_parser!(u16).range(0..=MAX_PAYLOAD_SIZE as i64)
    )]
    pub size: u16,

    /// Use IPv4 only
    #[arg(short = '4', long = "ipv4", conflicts_with = "ipv6")]
    pub ipv4: bool,

    /// Use IPv6 only
    #[arg(short = '6', long = "ipv6")]
    pub ipv6: bool,
}

fn parse_seconds(value: &str) -> Result<f64, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|_| format!("`{value}` is not a number of seconds"))?;
    if !(MIN_SECONDS..=MAX_SECONDS).contains(&seconds) {
        return Err(format!("must be between {MIN_SECONDS} and {MAX_SECONDS} seconds"));
    }
    Ok(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_durations_rejected() {
        for bad in ["1e20", "inf", "NaN", "0", "-1", "soon"] {
            assert!(Args::try_parse_from(["echoprobe", "-i", bad, "example.com"]).is_err(), "{bad}");
            assert!(Args::try_parse_from(["echoprobe", "-W", bad, "example.com"]).is_err(), "{bad}");
        }
        let args = Args::try_parse_from(["echoprobe", "-i", "0.2", "-W", "3600", "example.com"]).unwrap();
        assert_eq!(args.interval, 0.2);
        assert_eq!(args.timeout, 3600.0);
    }

    #[test]
    fn test_payload_size_bounded() {
        let max = MAX_PAYLOAD_SIZE.to_string();
        let args = Args::try_parse_from(["echoprobe", "-s", max.as_str(), "example.com"]).unwrap();
        assert_eq!(args.size as usize, MAX_PAYLOAD_SIZE);

        let too_big = (MAX_PAYLOAD_SIZE + 1).to_string();
        assert!(Args::try_parse_from(["echoprobe", "-s", too_big.as_str(), "example.com"]).is_err());
        assert!(Args::try_parse_from(["echoprobe", "-s", "-1", "example.com"]).is_err());
    }
}
