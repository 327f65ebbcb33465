//! `besimd`: a standalone simulator for BeSmart/Vokera wifi thermostat
//! boxes — UDP control-plane engine, optional cloud-relay mirror, and
//! a REST surface that locally absorbs the vendor app's HTTP calls.
//!
//! Process bootstrap is grounded on `services/forwarder/src/main.rs`'s
//! config-then-subsystems shape; the UDP engine and the cloud relay
//! each get their own dedicated OS thread (never a tokio worker),
//! matching [`besim_engine::run`]'s and [`besim_engine::Relay::run`]'s
//! blocking-receive-loop contracts.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use besim_engine::{Capture, Engine, Relay};
use besim_proxy::{default_rules, ProxyState};
use besim_shadow::Shadow;
use besim_telemetry::Sidecar;

use besimd::config::{self, BesimConfig};
use besimd::rest;
use besimd::weather::WeatherState;

#[derive(Parser, Debug)]
#[command(name = "besimd", about = "BeSmart/Vokera wifi thermostat box simulator")]
struct Cli {
    /// Path to the TOML config file. Defaults to `$BESIM_CONFIG`, or
    /// `/etc/besimd/besimd.toml` if that is unset.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(|| PathBuf::from(config::default_config_path()));
    let cfg = match config::load_config_from_path(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: failed to load config from '{}': {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(cfg.log_level.as_deref().unwrap_or("info"))
            }),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), config = %config_path.display(), "besimd starting");

    let rt = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    rt.block_on(run(cfg));
}

async fn run(cfg: BesimConfig) {
    let shadow = Arc::new(Shadow::new());

    let telemetry = match Sidecar::open(&cfg.telemetry_sqlite_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, path = %cfg.telemetry_sqlite_path, "failed to open telemetry database");
            std::process::exit(1);
        }
    };

    let capture = match &cfg.capture_path {
        Some(path) => match Capture::open(path) {
            Ok(c) => Some(c),
            Err(e) => {
                error!(error = %e, path, "failed to open capture log, continuing without one");
                None
            }
        },
        None => None,
    };

    let engine = match Engine::bind(&cfg.udp_bind, shadow.clone(), telemetry.clone(), capture) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            error!(error = %e, bind = %cfg.udp_bind, "failed to bind UDP engine");
            std::process::exit(1);
        }
    };

    {
        let engine = engine.clone();
        std::thread::Builder::new()
            .name("besim-engine".to_owned())
            .spawn(move || besim_engine::run(&engine))
            .expect("failed to spawn engine thread");
    }

    if let Some(relay_cfg) = &cfg.cloud_relay {
        let cloud_addr: SocketAddr = match relay_cfg.cloud_addr.parse() {
            Ok(a) => a,
            Err(e) => {
                error!(error = %e, addr = %relay_cfg.cloud_addr, "invalid cloud_relay address");
                std::process::exit(1);
            }
        };
        let relay = Arc::new(Relay::new(engine.clone(), cloud_addr));
        std::thread::Builder::new()
            .name("besim-relay".to_owned())
            .spawn(move || relay.run())
            .expect("failed to spawn relay thread");
        info!(cloud_addr = %cloud_addr, "cloud relay enabled");
    }

    let weather = Arc::new(WeatherState::new(cfg.weather, telemetry.clone()));

    let rest_state = Arc::new(rest::RestState {
        shadow,
        engine,
        telemetry: telemetry.clone(),
        weather,
    });
    let local_router = rest::router(rest_state);

    let upstream_base = match reqwest::Url::parse(&cfg.http.upstream_base) {
        Ok(u) => u,
        Err(e) => {
            error!(error = %e, upstream_base = %cfg.http.upstream_base, "invalid upstream_base URL");
            std::process::exit(1);
        }
    };
    let proxy_state = Arc::new(ProxyState::new(default_rules(cfg.weather.is_some()), upstream_base, local_router, telemetry));

    let app = axum::Router::new().fallback(besim_proxy::proxy).with_state(proxy_state);

    let listener = match tokio::net::TcpListener::bind(&cfg.http.bind).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, bind = %cfg.http.bind, "failed to bind HTTP listener");
            std::process::exit(1);
        }
    };
    info!(bind = %cfg.http.bind, "REST/proxy surface listening");

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "HTTP server exited with an error");
        std::process::exit(1);
    }
}
