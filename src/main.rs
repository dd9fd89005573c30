use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use ntpclock::clock::SoftwareClock;
use ntpclock::config::ClientConfig;
use ntpclock::net::{DeadlineTimer, ThreadResolver, UdpTransport};
use ntpclock::{DstZone, Event, NtpClient, SyncStatus};

const LOOP_SLEEP: Duration = Duration::from_millis(10);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    server: Option<String>,

    /// UTC offset hours (-12..14)
    #[arg(long, allow_hyphen_values = true)]
    tz: Option<i8>,

    /// Extra UTC offset minutes (-59..59)
    #[arg(long, allow_hyphen_values = true)]
    tz_minutes: Option<i8>,

    /// Daylight-saving rules: none, eu or usa
    #[arg(long)]
    dst: Option<DstZone>,

    #[arg(long)]
    short_interval: Option<u32>,

    #[arg(long)]
    long_interval: Option<u32>,

    /// Response timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u16>,

    /// Seconds between time reports
    #[arg(long, default_value_t = 10)]
    report_secs: u64,

    /// Print reports as JSON
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Exit after the first completed cycle
    #[arg(long, default_value_t = false)]
    once: bool,
}

fn build_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };

    if let Some(server) = &args.server {
        config.server = server.clone();
    }
    if let Some(tz) = args.tz {
        config.tz_hours = tz;
    }
    if let Some(minutes) = args.tz_minutes {
        config.tz_minutes = minutes;
    }
    if let Some(zone) = args.dst {
        config.dst_zone = zone;
    }
    if let Some(timeout) = args.timeout_ms {
        config.timeout_ms = timeout;
    }
    Ok(config)
}

fn report<R, T, M, C>(client: &NtpClient<R, T, M, C>, json: bool) -> Result<()>
where
    R: ntpclock::traits::Resolver,
    T: ntpclock::traits::Transport,
    M: ntpclock::traits::Timer,
    C: ntpclock::clock::WallClock,
{
    if json {
        println!("{}", serde_json::to_string(&client.status_report())?);
    } else if client.get_last_ntp_sync() > 0 {
        info!(
            "{} ({}, summer time: {})",
            client.get_time_date_string(),
            client.get_status(),
            client.is_summer_time()
        );
    } else {
        info!("{}", client.get_status());
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::builder()
        .format_timestamp(None)
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received. Shutting down...");
        r.store(false, Ordering::SeqCst);
    })?;

    let (events_tx, events_rx) = mpsc::channel();
    let transport = UdpTransport::new();
    let timer = DeadlineTimer::new();
    let receiver = transport.clone();
    let timer_poll = timer.clone();

    let mut client = NtpClient::from_config(
        ThreadResolver::new(events_tx),
        transport,
        timer,
        SoftwareClock::new(),
        config,
    )?;

    if args.short_interval.is_some() || args.long_interval.is_some() {
        let short = args.short_interval.unwrap_or(client.get_short_interval());
        let long = args.long_interval.unwrap_or(client.get_long_interval());
        client.set_intervals(short, long);
    }

    let cycles_done = Rc::new(Cell::new(0u32));
    let counter = cycles_done.clone();
    client.on_ntp_sync_event(Box::new(move |status: SyncStatus| {
        counter.set(counter.get() + 1);
        match status {
            SyncStatus::Synced => info!("Sync event: {}", status),
            _ => warn!("Sync event: {}", status),
        }
    }));

    client.begin_configured();
    client.process_start();

    let report_every = Duration::from_secs(args.report_secs.max(1));
    let mut last_report = Instant::now();

    while running.load(Ordering::SeqCst) {
        while let Ok(event) = events_rx.try_recv() {
            client.handle_event(event);
        }

        match receiver.poll_recv() {
            Ok(Some((payload, peer))) => client.handle_event(Event::Datagram { payload, peer }),
            Ok(None) => {}
            Err(e) => warn!("Receive failed: {}", e),
        }

        if let Some(token) = timer_poll.poll_expired(Instant::now()) {
            client.handle_event(Event::Timer(token));
        }

        if args.once && cycles_done.get() > 0 {
            report(&client, args.json)?;
            break;
        }

        if last_report.elapsed() >= report_every {
            report(&client, args.json)?;
            last_report = Instant::now();
        }

        thread::sleep(LOOP_SLEEP);
    }

    client.stop();
    info!("Exiting.");
    Ok(())
}
