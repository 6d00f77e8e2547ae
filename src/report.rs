//! Round-trip bookkeeping for the command-line front end.
//!
//! The pinger accepts any reply carrying its identifier; matching replies to
//! outstanding sequence numbers and deciding when a ping is lost happens here.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct PingSummary {
    host: String,
    transmitted: u64,
    received: u64,
    send_errors: u64,
    unmatched: u64,
    outstanding: HashMap<u16, Instant>,
    rtts: Vec<Duration>,
}

impl PingSummary {
    pub fn new(host: impl Into<String>) -> Self {
        PingSummary {
            host: host.into(),
            transmitted: 0,
            received: 0,
            send_errors: 0,
            unmatched: 0,
            outstanding: HashMap::new(),
            rtts: Vec::new(),
        }
    }

    pub fn record_sent(&mut self, sequence_number: u16, at: Instant) {
        self.transmitted += 1;
        self.outstanding.insert(sequence_number, at);
    }

    pub fn record_send_failure(&mut self) {
        self.transmitted += 1;
        self.send_errors += 1;
    }

    /// Round-trip time of the matching request, or `None` for a duplicate,
    /// late or foreign sequence number.
    pub fn record_reply(&mut self, sequence_number: u16, at: Instant) -> Option<Duration> {
        let Some(sent_at) = self.outstanding.remove(&sequence_number) else {
            self.unmatched += 1;
            return None;
        };
        let rtt = at.saturating_duration_since(sent_at);
        self.received += 1;
        self.rtts.push(rtt);
        Some(rtt)
    }

    /// Forget requests older than `timeout`, returning their sequence numbers.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<u16> {
        let mut expired: Vec<u16> = self
            .outstanding
            .iter()
            .filter(|(_, sent_at)| now.saturating_duration_since(**sent_at) >= timeout)
            .map(|(seq, _)| *seq)
            .collect();
        expired.sort_unstable();
        for seq in &expired {
            self.outstanding.remove(seq);
        }
        expired
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn transmitted(&self) -> u64 {
        self.transmitted
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn is_reachable(&self) -> bool {
        self.received > 0
    }

    pub fn loss_percent(&self) -> f64 {
        if self.transmitted == 0 {
            return 0.0;
        }
        (self.transmitted - self.received) as f64 * 100.0 / self.transmitted as f64
    }

    pub fn min_rtt(&self) -> Option<Duration> {
        self.rtts.iter().min().copied()
    }

    pub fn max_rtt(&self) -> Option<Duration> {
        self.rtts.iter().max().copied()
    }

    pub fn avg_rtt(&self) -> Option<Duration> {
        if self.rtts.is_empty() {
            return None;
        }
        Some(self.rtts.iter().sum::<Duration>() / self.rtts.len() as u32)
    }
}

impl fmt::Display for PingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- {} ping statistics ---", self.host)?;
        write!(
            f,
            "{} packets transmitted, {} received, {:.1}% packet loss",
            self.transmitted,
            self.received,
            self.loss_percent()
        )?;
        if self.send_errors > 0 {
            write!(f, ", {} send errors", self.send_errors)?;
        }
        if self.unmatched > 0 {
            write!(f, ", {} late or duplicate", self.unmatched)?;
        }
        if let (Some(min), Some(avg), Some(max)) = (self.min_rtt(), self.avg_rtt(), self.max_rtt()) {
            write!(
                f,
                "\nrtt min/avg/max = {:.3}/{:.3}/{:.3} ms",
                millis(min),
                millis(avg),
                millis(max)
            )?;
        }
        Ok(())
    }
}

pub fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_matching() {
        let t0 = Instant::now();
        let mut summary = PingSummary::new("example-host");
        summary.record_sent(0, t0);
        summary.record_sent(1, t0);

        let rtt = summary.record_reply(1, t0 + Duration::from_millis(12));
        assert_eq!(rtt, Some(Duration::from_millis(12)));
        // duplicate
        assert_eq!(summary.record_reply(1, t0 + Duration::from_millis(13)), None);
        assert_eq!(summary.received(), 1);
        assert_eq!(summary.outstanding(), 1);
    }

    #[test]
    fn test_expire_and_loss() {
        let t0 = Instant::now();
        let mut summary = PingSummary::new("example-host");
        summary.record_sent(0, t0);
        summary.record_sent(1, t0 + Duration::from_secs(1));
        summary.record_send_failure();

        let expired = summary.expire(t0 + Duration::from_millis(2500), Duration::from_secs(2));
        assert_eq!(expired, vec![0]);
        assert_eq!(summary.outstanding(), 1);

        // a reply after expiry no longer counts
        assert_eq!(summary.record_reply(0, t0 + Duration::from_secs(3)), None);
        summary.record_reply(1, t0 + Duration::from_millis(1010));

        assert_eq!(summary.transmitted(), 3);
        assert_eq!(summary.received(), 1);
        assert!(summary.is_reachable());
        assert!((summary.loss_percent() - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_rtt_stats() {
        let t0 = Instant::now();
        let mut summary = PingSummary::new("example-host");
        for (seq, ms) in [(0u16, 10u64), (1, 20), (2, 30)] {
            summary.record_sent(seq, t0);
            summary.record_reply(seq, t0 + Duration::from_millis(ms));
        }
        assert_eq!(summary.min_rtt(), Some(Duration::from_millis(10)));
        assert_eq!(summary.avg_rtt(), Some(Duration::from_millis(20)));
        assert_eq!(summary.max_rtt(), Some(Duration::from_millis(30)));

        let text = summary.to_string();
        assert!(text.contains("3 packets transmitted, 3 received, 0.0% packet loss"));
        assert!(text.contains("rtt min/avg/max = 10.000/20.000/30.000 ms"));
    }

    #[test]
    fn test_unreachable() {
        let summary = PingSummary::new("example-host");
        assert!(!summary.is_reachable());
        assert_eq!(summary.loss_percent(), 0.0);
        assert_eq!(summary.avg_rtt(), None);
        assert!(!summary.to_string().contains("rtt"));
    }
}
