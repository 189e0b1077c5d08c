//! Example of crawling a peer network and reporting on it.

use clap::Parser;
use log::LevelFilter;
use peermap_crawler::{CrawlerBuilder, NetworkReport, PeerAddress, PeerDescriptor};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address of the seed node to start crawling from.
    #[arg(short, long, required_unless_present = "peers_file")]
    address: Option<String>,

    /// Port the network's nodes listen on.
    #[arg(short, long, default_value = "4001")]
    port: u16,

    /// JSON file with an array of peer descriptors to seed from.
    #[arg(long, conflicts_with = "address")]
    peers_file: Option<PathBuf>,

    /// Per-request timeout in milliseconds.
    #[arg(short, long, default_value = "2500")]
    timeout: u64,

    /// Resolve a location for every node after scanning.
    #[arg(long)]
    locate: bool,

    /// Location service endpoint.
    #[arg(long, default_value = "https://ipinfo.io")]
    location_url: String,

    /// Location service API token.
    #[arg(long)]
    location_token: Option<String>,

    /// Keep connections open after the crawl.
    #[arg(long)]
    keep_connections: bool,

    /// Print the report as JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Log level.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    // Configure fern logger
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} - {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log_level)
        .chain(std::io::stderr())
        .apply()
        .unwrap();

    log::info!("CRAWLING THE PEER NETWORK");

    let mut builder = CrawlerBuilder::new(args.port)
        .with_call_timeout(Duration::from_millis(args.timeout));
    if args.keep_connections {
        builder = builder.with_disconnect(false);
    }
    if args.locate {
        log::debug!("Locating nodes via {}", args.location_url);
        builder = builder.with_location_lookup(&args.location_url, args.location_token.clone())?;
    }
    let mut crawler = builder.build();

    let crawl = match &args.peers_file {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read {}: {e}", path.display()))?;
            let peers: Vec<PeerDescriptor> = serde_json::from_str(&contents)
                .map_err(|e| format!("Invalid peer list in {}: {e}", path.display()))?;
            log::debug!("Seeding from {} saved peers", peers.len());
            crawler.run_from_peers(peers).await
        }
        None => {
            // Clap guarantees an address when no peers file is given.
            let address = args.address.as_deref().unwrap_or_default();
            let ip = address
                .parse::<IpAddr>()
                .map_err(|_| format!("Invalid IP address: {address}"))?;
            log::debug!("Seeding from {ip}:{}", args.port);
            crawler.run(PeerAddress::new(ip, args.port)).await
        }
    };

    let report = NetworkReport::from_crawl(&crawl);

    if args.json {
        let nodes: Vec<_> = crawl.registry.records().collect();
        let output = serde_json::json!({"nodes": nodes, "report": report});
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for record in crawl.registry.records() {
            if record.attributes.height.is_none() || record.attributes.block_id.is_none() {
                continue;
            }
            println!("{}", serde_json::to_string(record)?);
        }
        println!("{report}");
    }

    if let Some(err) = crawl.aborted {
        return Err(err.into());
    }
    Ok(())
}
