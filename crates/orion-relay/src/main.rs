use std::path::PathBuf;
use std::process::ExitCode;

use orion_relay::config::Config;
use orion_relay::{router, AppState};
use tracing::{error, info};

fn print_help() {
    println!("orion-relay — streaming chat relay for O.R.I.Ö.N");
    println!();
    println!("Usage:");
    println!("  orion-relay [--config <path>] [--bind <addr>]");
    println!();
    println!("Options:");
    println!("  --config <path>   Config file (default: $ORION_CONFIG or ~/.config/orion/relay.toml)");
    println!("  --bind <addr>     Listen address, overrides [server].bind");
    println!("  --version         Print version");
    println!("  --help            Print this help");
    println!();
    println!("Logging is controlled with RUST_LOG (default: info).");
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return ExitCode::SUCCESS;
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("orion-relay {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    init_tracing();

    let config_path = flag_value(&args, "--config").map(PathBuf::from);
    let mut config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    if let Some(bind) = flag_value(&args, "--bind") {
        config.server.bind = bind;
    }

    let upstream = match config.upstream.connect() {
        Ok(upstream) => upstream,
        Err(e) => {
            error!(error = %e, "failed to configure upstream");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to create async runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let bind = config.server.bind.clone();
        let listener = match tokio::net::TcpListener::bind(&bind).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %bind, error = %e, "failed to bind");
                return ExitCode::FAILURE;
            }
        };

        info!(
            addr = %bind,
            upstream = upstream.name(),
            model = %config.upstream.model,
            agents = config.agents.len(),
            "relay listening"
        );

        let app = router(AppState::new(config, upstream));
        match axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
        {
            Ok(()) => {
                info!("relay stopped");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "server error");
                ExitCode::FAILURE
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
}
