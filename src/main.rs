use std::net::SocketAddr;
use std::sync::Arc;

use clap::{error::ErrorKind, Arg, ArgAction, Command};
use tracing::info;
use tracing_subscriber::EnvFilter;

use screen_relay_server::app;
use screen_relay_server::config::Config;
use screen_relay_server::error::{ServerError, ServerResult};
use screen_relay_server::state::AppState;
use screen_relay_server::tasks;

fn validate_port_value(value: &str) -> Result<u16, String> {
    value
        .parse::<u16>()
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| format!("invalid port '{value}', expected 1-65535"))
}

fn cli() -> Command {
    Command::new("screen-relay-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("WebSocket relay for screen streams, voice and presence")
        .arg(
            Arg::new("port")
                .help("Port to listen on")
                .short('p')
                .long("port")
                .value_parser(validate_port_value)
                .default_value("8765"),
        )
        .arg(
            Arg::new("daemon")
                .help("Run as a daemon (advisory; supervise externally)")
                .short('d')
                .long("daemon")
                .action(ArgAction::SetTrue),
        )
}

#[tokio::main]
async fn main() {
    let matches = cli().try_get_matches().unwrap_or_else(|err| {
        let code = match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
            _ => 1,
        };
        let _ = err.print();
        std::process::exit(code);
    });
    let port = *matches.get_one::<u16>("port").expect("port has a default");
    let daemon = matches.get_flag("daemon");

    // Initialize tracing: JSON in production, human-readable in dev.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "screen_relay_server=info,tower_http=info".parse().unwrap());
    if std::env::var("APP_ENV").as_deref() == Ok("production") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("🚀 Screen relay server starting...");

    let config = Arc::new(Config::load(port, daemon));
    if config.daemon {
        info!("Daemon mode requested; run under a process supervisor");
    }
    if !config.viewer_audio_mesh {
        info!("Viewer-to-viewer audio forwarding disabled");
    }

    let state = AppState::new(config.clone());
    tasks::spawn(state.clone());

    let addr = config.server_addr();
    info!("🎧 Listening on ws://{addr} (paths: /login, /publish/{{room_id}}, /subscribe/{{room_id}})");

    if let Err(err) = serve(app(state), &addr).await {
        tracing::error!(error = %err, "server failed");
        std::process::exit(1);
    }
}

async fn serve(router: axum::Router, addr: &str) -> ServerResult<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_owned(),
            source,
        })?;

    // `into_make_service_with_connect_info` populates `ConnectInfo<SocketAddr>`
    // in request extensions; the handlers capture it as the peer address.
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(ServerError::Serve)
}
