use anyhow::Context;
use clap::{Arg, ArgAction, Command};
use log::Level;
use pullcast::{
    ExternalSource, FramedTransport, SourceConfig, SourceParent, SourceStats, StreamType, TrackDescriptor,
    TransportProtocol,
};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::{panic, process};
use tokio_util::sync::CancellationToken;

const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Parent that only reports what the source does.
#[derive(Default)]
struct LoggingParent {
    rtp: AtomicU64,
    rtcp: AtomicU64,
}

impl SourceParent for LoggingParent {
    fn on_source_ready(&self, tracks: Vec<TrackDescriptor>) {
        log::info!("source ready with {} track(s)", tracks.len());
        for (i, track) in tracks.iter().enumerate() {
            log::info!("  #{} {} {} @ {} Hz", i, track.kind, track.codec, track.clock_rate);
        }
    }

    fn on_source_not_ready(&self) {
        log::info!("source not ready");
    }

    fn on_source_frame(&self, _track_id: usize, stream_type: StreamType, _payload: bytes::Bytes) {
        match stream_type {
            StreamType::Rtp => self.rtp.fetch_add(1, Ordering::Relaxed),
            StreamType::Rtcp => self.rtcp.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        log::log!(target: "pullcast", level, "{}", args);
    }
}

fn config_from_args(matches: &clap::ArgMatches) -> anyhow::Result<SourceConfig> {
    let url = matches
        .get_one::<String>("url")
        .context("missing source url")?;

    let mut conf = SourceConfig::new(url.as_str())
        .with_any_port_enable(matches.get_flag("any-port"));

    if let Some(protocol) = matches.get_one::<String>("protocol") {
        let protocol = protocol
            .parse::<TransportProtocol>()
            .map_err(anyhow::Error::msg)?;
        conf = conf.with_protocol(protocol);
    }
    if let Some(fingerprint) = matches.get_one::<String>("fingerprint") {
        conf = conf.with_fingerprint(fingerprint);
    }
    if let Some(secs) = matches.get_one::<u64>("read-timeout") {
        conf = conf.with_read_timeout(Duration::from_secs(*secs));
    }
    if let Some(secs) = matches.get_one::<u64>("write-timeout") {
        conf = conf.with_write_timeout(Duration::from_secs(*secs));
    }
    if let Some(count) = matches.get_one::<usize>("read-buffer-count") {
        conf = conf.with_read_buffer_count(*count);
    }
    if let Some(size) = matches.get_one::<usize>("read-buffer-size") {
        conf = conf.with_read_buffer_size(*size);
    }
    if let Some(secs) = matches.get_one::<u64>("retry-pause") {
        conf = conf.with_retry_pause(Duration::from_secs(*secs));
    }

    Ok(conf)
}

fn command() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("url")
                .value_name("URL")
                .help("Source address, tcp://host[:port]/path or tls://host[:port]/path.")
                .required(true),
        )
        .arg(
            Arg::new("protocol")
                .short('p')
                .long("protocol")
                .value_name("PROTOCOL")
                .help("Transport protocol (automatic/tcp/udp).")
                .required(false),
        )
        .arg(
            Arg::new("fingerprint")
                .short('f')
                .long("fingerprint")
                .value_name("SHA256")
                .help("Hex SHA-256 fingerprint of the server certificate, disables standard trust.")
                .required(false),
        )
        .arg(
            Arg::new("read-timeout")
                .long("read-timeout")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64))
                .required(false),
        )
        .arg(
            Arg::new("write-timeout")
                .long("write-timeout")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64))
                .required(false),
        )
        .arg(
            Arg::new("read-buffer-count")
                .long("read-buffer-count")
                .value_name("COUNT")
                .value_parser(clap::value_parser!(usize))
                .required(false),
        )
        .arg(
            Arg::new("read-buffer-size")
                .long("read-buffer-size")
                .value_name("BYTES")
                .value_parser(clap::value_parser!(usize))
                .required(false),
        )
        .arg(
            Arg::new("any-port")
                .long("any-port")
                .help("Accept packets from any remote port (UDP only).")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("retry-pause")
                .long("retry-pause")
                .value_name("SECONDS")
                .help("Pause between connection attempts.")
                .value_parser(clap::value_parser!(u64))
                .required(false),
        )
}

fn report(parent: &LoggingParent, source: &ExternalSource) {
    let health = source.health();
    log::info!(
        "rtp {} / rtcp {} frames, {}",
        parent.rtp.load(Ordering::Relaxed),
        parent.rtcp.load(Ordering::Relaxed),
        health.summary()
    );

    let state = source.state();
    if let Some(elapsed) = state.streaming_duration() {
        log::info!("streaming for {:.0?}", elapsed);
        if health.is_stalled(STATS_INTERVAL) {
            log::warn!("no frame received in the last {:?}", STATS_INTERVAL);
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let matches = command().get_matches();
    let conf = config_from_args(&matches)?;

    // kill the process as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    let root = CancellationToken::new();
    let token = root.clone();
    ctrlc::set_handler(move || {
        token.cancel();
    })
    .context("Error setting Ctrl-C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async move {
        let parent = Arc::new(LoggingParent::default());
        let mut source = ExternalSource::start(
            conf,
            &root,
            Arc::new(FramedTransport::new()),
            parent.clone(),
        );

        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = root.cancelled() => break,
                _ = ticker.tick() => report(&parent, &source),
            }
        }

        source.stop().await;
        report(&parent, &source);
        log::info!("active sources: {}", SourceStats::global().active_sources());
    });

    Ok(())
}
