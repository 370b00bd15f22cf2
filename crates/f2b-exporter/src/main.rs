mod auth;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use clap::Parser;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use f2b_exporter_core::collector::{Fail2BanSocket, MetricsCollector};
use f2b_exporter_core::geo::{self, GeoSettings};
use f2b_exporter_core::textfile::TextfileCollector;

use auth::{AccessLogLayer, Credentials};
use state::{AppState, SharedState};

// ============================================================
// CLI
// ============================================================

#[derive(Parser)]
#[command(
    name = "f2b-exporter",
    about = "Prometheus exporter for fail2ban",
    version = f2b_exporter_core::VERSION
)]
struct Args {
    /// Address to listen on for HTTP requests.
    #[arg(
        long = "web.listen-address",
        default_value = "0.0.0.0:9191",
        env = "F2B_WEB_LISTEN_ADDRESS"
    )]
    listen_address: String,

    /// Path to the fail2ban server control socket.
    #[arg(
        long = "socket",
        default_value = "/var/run/fail2ban/fail2ban.sock",
        env = "F2B_SOCKET"
    )]
    socket: PathBuf,

    /// Read/write timeout per socket query, in seconds.
    #[arg(long = "socket.timeout", default_value = "5", env = "F2B_SOCKET_TIMEOUT")]
    socket_timeout: u64,

    /// Exit the process when a scrape cannot connect to the socket.
    #[arg(long, env = "F2B_EXIT_ON_SOCKET_CONN_ERROR")]
    exit_on_socket_connection_error: bool,

    /// Tag banned addresses with geolocation labels.
    #[arg(long = "geo.enabled", env = "F2B_GEO_ENABLED")]
    geo_enabled: bool,

    /// Geolocation provider.
    #[arg(long = "geo.provider", default_value = "maxmind", env = "F2B_GEO_PROVIDER")]
    geo_provider: String,

    /// Path to the geolocation database (e.g. GeoLite2-City.mmdb).
    #[arg(long = "geo.db-path", env = "F2B_GEO_DB_PATH")]
    geo_db_path: Option<PathBuf>,

    /// Directory of `*.prom` files appended to every scrape.
    #[arg(long = "collector.textfile.directory", env = "F2B_COLLECTOR_TEXT_PATH")]
    textfile_directory: Option<PathBuf>,

    /// Basic Auth username. If set, the password is also required.
    #[arg(long = "web.basic-auth.username", env = "F2B_WEB_BASICAUTH_USER")]
    auth_user: Option<String>,

    /// Basic Auth password.
    #[arg(long = "web.basic-auth.password", env = "F2B_WEB_BASICAUTH_PASS")]
    auth_password: Option<String>,

    /// Build the collector, log the configuration and exit without serving.
    #[arg(long)]
    dry_run: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["f2b_exporter", "f2b_exporter_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Both or neither of the basic auth flags must be set.
fn basic_auth_credentials(args: &Args) -> Result<Option<Credentials>, &'static str> {
    match (&args.auth_user, &args.auth_password) {
        (Some(user), Some(pass)) => Ok(Some(Credentials::new((user.clone(), pass.clone())))),
        (None, None) => Ok(None),
        _ => Err("--web.basic-auth.username and --web.basic-auth.password must both be set"),
    }
}

/// Builds the HTTP router. The access log wraps auth so rejected requests are logged too.
pub(crate) fn router(state: SharedState, creds: Option<Credentials>) -> Router {
    let mut app = Router::new()
        .route("/metrics", get(handlers::handle_metrics))
        .route("/health", get(handlers::handle_health))
        .with_state(state);

    if let Some(creds) = creds {
        app = app.layer(axum::middleware::from_fn_with_state(
            creds,
            auth::basic_auth_middleware,
        ));
    }

    app.layer(AccessLogLayer)
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let creds = match basic_auth_credentials(&args) {
        Ok(creds) => creds,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let addr: SocketAddr = match args.listen_address.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(address = %args.listen_address, error = %e, "invalid listen address");
            process::exit(1);
        }
    };

    let geo = geo::enricher_from_settings(&GeoSettings {
        enabled: args.geo_enabled,
        provider: args.geo_provider.clone(),
        db_path: args.geo_db_path.clone(),
    });

    let client =
        Fail2BanSocket::new(&args.socket).with_timeout(Duration::from_secs(args.socket_timeout));
    let collector = MetricsCollector::new(
        client,
        f2b_exporter_core::VERSION,
        args.exit_on_socket_connection_error,
        geo,
    );

    info!(
        version = f2b_exporter_core::VERSION,
        socket = %args.socket.display(),
        host = collector.hostname(),
        exit_on_socket_connection_error = args.exit_on_socket_connection_error,
        basic_auth = creds.is_some(),
        textfile_directory = ?args.textfile_directory,
        "starting fail2ban exporter"
    );

    if args.dry_run {
        info!("dry run, exiting");
        return;
    }

    collector.log_server_version();

    let textfile = args.textfile_directory.clone().map(TextfileCollector::new);
    let state = match AppState::new(collector, textfile) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "failed to register collector");
            process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(serve(addr, router(state, creds))) {
        error!(error = %e, "server error");
        process::exit(1);
    }
    info!("shut down");
}

async fn serve(addr: SocketAddr, app: Router) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("received shutdown signal");
}
