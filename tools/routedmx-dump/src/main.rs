// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! routedmx-dump - Receive ROUTE/FLUTE services and dump delivered objects
//!
//! # Usage
//!
//! ```bash
//! # ATSC 3.0: discover services from the SLT, receive the first one
//! routedmx-dump --atsc3 --tune first --output /tmp/route
//!
//! # One FLUTE session, no signaling bootstrap
//! routedmx-dump --protocol flute --address 239.1.1.1:4000 --output /tmp/flute
//!
//! # Configuration file
//! routedmx-dump --gen-config > demux.toml
//! routedmx-dump --config demux.toml --validate
//! ```

use std::fs;
use std::net::SocketAddrV4;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use routedmx::{
    Demux, DemuxConfig, DemuxEvent, DemuxStats, DispatchPolicy, ProcessStatus, Protocol,
    ServiceSelector, UdpTransport,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Dump ROUTE/FLUTE multicast services
#[derive(Parser, Debug)]
#[command(name = "routedmx-dump")]
#[command(about = "Receive ROUTE/FLUTE multicast services and dump delivered objects")]
#[command(version)]
struct Args {
    /// TOML configuration file (command line options override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Discover services from the ATSC 3.0 low-level signaling
    #[arg(long)]
    atsc3: bool,

    /// Protocol of the static service given with --address
    #[arg(short, long, value_enum, default_value = "route")]
    protocol: ProtocolArg,

    /// Bootstrap destination of a static service (group:port)
    #[arg(short, long)]
    address: Option<SocketAddrV4>,

    /// Identifier of the static service
    #[arg(long, default_value = "1")]
    service_id: u32,

    /// Multicast interface (name or IPv4 address)
    #[arg(short, long)]
    interface: Option<String>,

    /// Services to receive: all, first or a service id
    #[arg(short, long, default_value = "all")]
    tune: String,

    /// Keep the signaling of services not tuned
    #[arg(long)]
    sls_all: bool,

    /// When objects are delivered
    #[arg(long, value_enum)]
    dispatch: Option<DispatchArg>,

    /// Only process this TSI (plus signaling)
    #[arg(long)]
    debug_tsi: Option<u32>,

    /// Write delivered objects below this directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Delivered segments kept in memory per service
    #[arg(long, default_value = "16")]
    keep: usize,

    /// Stop after N seconds (0 = until Ctrl+C or end of stream)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    gen_config: bool,

    /// Validate the effective configuration and exit
    #[arg(long)]
    validate: bool,

    /// Log level (trace, debug, info, warn, error), RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProtocolArg {
    Route,
    Flute,
}

impl From<ProtocolArg> for Protocol {
    fn from(p: ProtocolArg) -> Self {
        match p {
            ProtocolArg::Route => Protocol::Route,
            ProtocolArg::Flute => Protocol::Flute,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DispatchArg {
    End,
    Progressive,
    Eager,
}

impl From<DispatchArg> for DispatchPolicy {
    fn from(d: DispatchArg) -> Self {
        match d {
            DispatchArg::End => DispatchPolicy::EndOnly,
            DispatchArg::Progressive => DispatchPolicy::Progressive,
            DispatchArg::Eager => DispatchPolicy::Eager,
        }
    }
}

fn parse_selector(text: &str) -> Result<ServiceSelector> {
    match text.trim().to_ascii_lowercase().as_str() {
        "all" => Ok(ServiceSelector::All),
        "first" => Ok(ServiceSelector::First),
        id => id
            .parse::<u32>()
            .map(ServiceSelector::Id)
            .with_context(|| format!("invalid --tune value {:?}", text)),
    }
}

/// Build the effective configuration from the file and the options.
fn build_config(args: &Args) -> Result<DemuxConfig> {
    let mut config = match &args.config {
        Some(path) => DemuxConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DemuxConfig::default(),
    };
    if args.atsc3 {
        config.atsc3_lls = true;
    }
    if let Some(address) = args.address {
        config = config.with_service(args.service_id, args.protocol.into(), address);
    }
    if let Some(interface) = &args.interface {
        config = config.with_interface(interface.clone());
    }
    if let Some(dispatch) = args.dispatch {
        config = config.with_dispatch(dispatch.into());
    }
    if let Some(tsi) = args.debug_tsi {
        config = config.with_debug_tsi(tsi);
    }
    if args.config.is_none() || args.tune != "all" || args.sls_all {
        config = config.with_tune(parse_selector(&args.tune)?, args.sls_all);
    }
    Ok(config)
}

/// Path of a delivered object below `root`, `None` if the name escapes it.
fn output_path(root: &Path, service_id: u32, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(service_id.to_string()).join(relative))
}

fn write_object(root: &Path, service_id: u32, name: &str, data: &[u8]) {
    let Some(path) = output_path(root, service_id, name) else {
        warn!("service {}: refusing to write {:?}", service_id, name);
        return;
    };
    let result = path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|()| fs::write(&path, data));
    if let Err(e) = result {
        warn!("service {}: writing {}: {}", service_id, path.display(), e);
    }
}

fn on_event(output: Option<&Path>, event: DemuxEvent<'_>) {
    match event {
        DemuxEvent::ServiceFound { service_id } => info!("service {} found", service_id),
        DemuxEvent::ServiceRemoved { service_id } => info!("service {} removed", service_id),
        DemuxEvent::ServiceListRefreshed { services } => info!("{} services listed", services),
        DemuxEvent::ManifestReady {
            service_id,
            filename,
            mime,
            data,
        } => {
            info!("service {}: manifest {} ({}, {} bytes)", service_id, filename, mime, data.len());
            if let Some(root) = output {
                write_object(root, service_id, filename, data);
            }
        }
        DemuxEvent::FileReady { service_id, info }
        | DemuxEvent::SegmentReady { service_id, info } => {
            info!(
                "service {}: {} ({} bytes, {:?}){}{}",
                service_id,
                info.filename,
                info.total_size,
                info.download_time,
                if info.updated { " updated" } else { "" },
                if info.corrupted { " CORRUPTED" } else { "" }
            );
            if let Some(root) = output {
                write_object(root, service_id, info.filename, &info.blob.to_vec());
            }
        }
        DemuxEvent::LateDataIgnored {
            service_id,
            tsi,
            toi,
            offset,
            size,
        } => warn!(
            "service {}: late data TSI {} TOI {} ({} bytes at {})",
            service_id, tsi, toi, size, offset
        ),
        DemuxEvent::SegmentFragment { .. } | DemuxEvent::FileDeleted { .. } => {}
    }
}

/// Recycle the oldest segments beyond `keep` per service.
fn trim_objects(demux: &mut Demux<UdpTransport>, keep: usize) {
    let ids: Vec<u32> = demux.services().iter().map(|s| s.id()).collect();
    for id in ids {
        while demux.service(id).is_some_and(|s| s.object_count() > keep) {
            if !demux.remove_first_object(id) {
                break;
            }
        }
    }
}

fn print_stats(stats: &DemuxStats, elapsed: Duration) {
    println!();
    println!("=== Reception statistics ({:.1}s) ===", elapsed.as_secs_f64());
    println!("  packets            {}", stats.packets);
    println!("  bytes              {}", stats.bytes);
    println!("  objects completed  {}", stats.objects_completed);
    println!("  objects partial    {}", stats.objects_partial);
    println!("  late fragments     {}", stats.late);
    println!("  unknown channel    {}", stats.unknown_channel);
    println!("  discarded          {}", stats.discarded);
    println!("  malformed          {}", stats.malformed);
    println!("  oversize           {}", stats.oversize);
    println!("  signaling errors   {}", stats.signaling_errors);
    println!("  transport errors   {}", stats.transport_errors);
}

fn run(args: &Args) -> Result<()> {
    let config = build_config(args)?;
    if args.gen_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }
    config.validate().context("invalid configuration")?;
    if args.validate {
        println!("configuration OK");
        return Ok(());
    }
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let transport = UdpTransport::new(config.interface.as_deref(), config.socket_buffer_size)
        .context("opening UDP transport")?;
    let output = args.output.clone();
    let mut demux = Demux::with_listener(config, transport, move |event: DemuxEvent<'_>| {
        on_event(output.as_deref(), event)
    })?;

    let start = Instant::now();
    let limit = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    info!("routedmx-dump v{} receiving", env!("CARGO_PKG_VERSION"));

    while running.load(Ordering::SeqCst) {
        if limit.is_some_and(|l| start.elapsed() >= l) {
            break;
        }
        match demux.process(Some(Duration::from_millis(100))) {
            Ok(ProcessStatus::EndOfStream) => break,
            Ok(_) => {}
            Err(e) => warn!("{}", e),
        }
        trim_objects(&mut demux, args.keep);
    }

    demux.flush_all();
    print_stats(demux.stats(), start.elapsed());
    Ok(())
}

fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(e) = run(&args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
