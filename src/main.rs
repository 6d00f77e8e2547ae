use std::cell::RefCell;
use std::error::Error;
use std::process;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use clap::Parser;
use log::debug;

use echoprobe::cli::Args;
use echoprobe::config::Config;
use echoprobe::packet::DEFAULT_PAYLOAD_SIZE;
use echoprobe::reactor::PollReactor;
use echoprobe::report::{PingSummary, millis};
use echoprobe::{PingEvent, PingState, Pinger};

/// Longest single wait, so timeouts and Ctrl-C are noticed promptly
const MAX_WAIT: Duration = Duration::from_millis(100);

fn main() {
    env_logger::init();
    let args = Args::parse();
    let config = Config::from(&args);

    let code = match run(&config) {
        Ok(summary) => {
            println!("\n{summary}");
            if summary.is_reachable() { 0 } else { 1 }
        }
        Err(e) => {
            eprintln!("echoprobe: {e}");
            2
        }
    };
    process::exit(code);
}

fn run(config: &Config) -> Result<PingSummary, Box<dyn Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))?;

    let reactor = Rc::new(PollReactor::new());
    let (events_tx, events_rx) = mpsc::channel::<PingEvent>();
    let sink = Rc::new(RefCell::new(events_tx));

    let mut pinger = Pinger::new(config.host.clone(), reactor.clone()).address_style(config.address_style);
    pinger.set_sink(&sink);
    pinger.start()?;

    let payload: Option<Vec<u8>> = if config.payload_size == DEFAULT_PAYLOAD_SIZE {
        None
    } else {
        Some((0..config.payload_size).map(|i| (i & 0xFF) as u8).collect())
    };

    let mut summary = PingSummary::new(&config.host);
    let mut next_send: Option<Instant> = None;
    let mut pings_sent: u64 = 0;

    while running.load(Ordering::SeqCst) {
        let wait = match next_send {
            Some(due) => due.saturating_duration_since(Instant::now()).min(MAX_WAIT),
            None => MAX_WAIT,
        };
        for fd in reactor.wait(Some(wait))? {
            pinger.handle_ready(fd);
        }

        if let Some(due) = drain_events(&events_rx, &pinger, config, &mut summary)? {
            next_send = Some(due);
        }

        let now = Instant::now();
        let budget_left = config.count.is_none_or(|count| pings_sent < count);
        if let Some(due) = next_send {
            if budget_left && now >= due && pinger.state() == PingState::Active {
                pinger.send_ping(payload.as_deref())?;
                pings_sent += 1;
                next_send = Some(due + config.interval);
                drain_events(&events_rx, &pinger, config, &mut summary)?;
            }
        }

        for seq in summary.expire(now, config.timeout) {
            println!("Request timeout for icmp_seq {seq}");
        }

        if !config.count.is_none_or(|count| pings_sent < count) && summary.outstanding() == 0 {
            break;
        }
    }

    pinger.stop();
    Ok(summary)
}

/// Print and record pending events. Returns when the first ping is due if
/// the session has just started.
fn drain_events(
    events: &Receiver<PingEvent>,
    pinger: &Pinger,
    config: &Config,
    summary: &mut PingSummary,
) -> Result<Option<Instant>, Box<dyn Error>> {
    let mut first_ping = None;
    while let Ok(event) = events.try_recv() {
        let now = Instant::now();
        match event {
            PingEvent::Started(address) => {
                println!(
                    "PING {} ({}): {} data bytes",
                    pinger.host_name(),
                    address,
                    config.payload_size
                );
                first_ping = Some(now);
            }
            PingEvent::FailedToStart(e) => return Err(e.into()),
            PingEvent::Sent { sequence_number, .. } => summary.record_sent(sequence_number, now),
            PingEvent::FailedToSend { sequence_number, error, .. } => {
                eprintln!("icmp_seq {sequence_number}: {error}");
                summary.record_send_failure();
            }
            PingEvent::ReceivedResponse { packet, sequence_number } => {
                match summary.record_reply(sequence_number, now) {
                    Some(rtt) => println!(
                        "{} bytes from {}: icmp_seq={} time={:.3} ms",
                        packet.len(),
                        pinger.host_address().map(|a| a.to_string()).unwrap_or_default(),
                        sequence_number,
                        millis(rtt)
                    ),
                    None => debug!("ignoring late or duplicate reply #{sequence_number}"),
                }
            }
            PingEvent::ReceivedUnexpectedPacket(packet) => {
                debug!(
                    "ignoring unrelated ICMP message ({} bytes, type {})",
                    packet.len(),
                    packet.first().copied().unwrap_or_default()
                );
            }
        }
    }
    Ok(first_ping)
}
