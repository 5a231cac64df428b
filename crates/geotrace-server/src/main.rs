//! HTTP server entrypoint for geotrace.

use clap::Parser;
use geotrace_core::{DEFAULT_MAX_RTT_SECS, DEFAULT_MAX_TTL};
use geotrace_geo::{
    GeoResolver, IpInfoClient, MaxMindDb, DEFAULT_API_TIMEOUT_MS, DEFAULT_API_URL, DEFAULT_ASN_DB,
    DEFAULT_CITY_DB,
};
use geotrace_probe::{Dns, IcmpEngine};
use geotrace_server::{
    create_router, AppState, TraceDefaults, TraceOrchestrator, DEFAULT_ADDR, DEFAULT_TARGET,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "geotrace-server")]
#[command(about = "Streams traceroute hops enriched with geolocation", long_about = None)]
struct Args {
    #[arg(short = 'a', long = "addr", default_value = DEFAULT_ADDR)]
    addr: String,

    #[arg(short = 'l', long = "log-level", default_value = "info")]
    log_level: String,

    /// MaxMind City database.
    #[arg(long = "city-db", default_value = DEFAULT_CITY_DB)]
    city_db: PathBuf,

    /// MaxMind ASN database; skipped with a warning when missing.
    #[arg(long = "asn-db", default_value = DEFAULT_ASN_DB)]
    asn_db: PathBuf,

    #[arg(long = "geo-api-url", default_value = DEFAULT_API_URL)]
    geo_api_url: String,

    #[arg(long = "geo-api-token", env = "IPINFO_TOKEN", default_value = "", hide_env_values = true)]
    geo_api_token: String,

    #[arg(long = "geo-timeout-ms", default_value_t = DEFAULT_API_TIMEOUT_MS)]
    geo_timeout_ms: u64,

    #[arg(long = "default-target", default_value = DEFAULT_TARGET)]
    default_target: String,

    /// Per-probe timeout in seconds.
    #[arg(long = "max-rtt", default_value_t = DEFAULT_MAX_RTT_SECS)]
    max_rtt: u64,

    #[arg(long = "max-ttl", default_value_t = DEFAULT_MAX_TTL)]
    max_ttl: u8,

    /// Directory served for paths that are not part of the API.
    #[arg(long = "static-dir")]
    static_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let filter = match args.log_level.as_str() {
        "error" => EnvFilter::new("error"),
        "warn" => EnvFilter::new("warn"),
        "debug" => EnvFilter::new("debug"),
        "trace" => EnvFilter::new("trace"),
        _ => EnvFilter::new("info"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let local = MaxMindDb::open(&args.city_db, Some(args.asn_db.as_path())).unwrap_or_else(|err| {
        eprintln!("Failed to open geolocation database: {}", err);
        process::exit(1);
    });
    tracing::info!(
        city_db = %args.city_db.display(),
        asn = local.has_asn(),
        "Opened geolocation databases"
    );

    let remote = IpInfoClient::new(
        args.geo_api_url.as_str(),
        args.geo_api_token.as_str(),
        Duration::from_millis(args.geo_timeout_ms),
    )
    .unwrap_or_else(|err| {
        eprintln!("Failed to create geolocation client: {}", err);
        process::exit(1);
    });

    let dns = Dns::from_system_conf().unwrap_or_else(|err| {
        eprintln!("Failed to initialize DNS: {}", err);
        process::exit(1);
    });

    let geo = GeoResolver::new(Arc::new(local), Arc::new(remote));
    let state = AppState {
        orchestrator: Arc::new(TraceOrchestrator::new(
            Arc::new(IcmpEngine::new(dns)),
            Arc::new(geo),
        )),
        defaults: Arc::new(TraceDefaults {
            target: args.default_target.clone(),
            max_rtt_secs: args.max_rtt,
            max_ttl: args.max_ttl,
        }),
    };

    let app = create_router(state.clone(), args.static_dir.as_deref());

    let addr: SocketAddr = args.addr.parse().unwrap_or_else(|err| {
        eprintln!("Failed to parse addr {}: {}", args.addr, err);
        process::exit(1);
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|err| {
            eprintln!("Failed to bind {}: {}", addr, err);
            process::exit(1);
        });
    tracing::info!("Starting HTTP server on {}", addr);
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        eprintln!("HTTP server failed: {}", err);
        process::exit(1);
    }

    drop(state);
    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
