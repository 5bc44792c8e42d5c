//! Parley server binary

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use parley::{
    AppState, RelayConfig,
    api::serve,
    relay::DashScopeClient,
};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Chat backend that relays streamed AI replies over SSE")]
struct Args {
    /// Bind address
    #[arg(long)]
    host: Option<String>,

    /// HTTP server port (default: 8000)
    #[arg(long)]
    port: Option<u16>,

    /// Config file (default: ~/.parley/config.toml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Upstream text-generation endpoint
    #[arg(long)]
    upstream_url: Option<String>,

    /// Built frontend to serve, with index.html fallback
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Reject API calls that carry no token
    #[arg(long)]
    require_auth: bool,
}

impl Args {
    /// CLI flags are the last configuration layer
    fn apply(self, config: &mut RelayConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(url) = self.upstream_url {
            config.upstream_url = url;
        }
        if let Some(dir) = self.static_dir {
            config.static_dir = Some(dir);
        }
        if self.require_auth {
            config.require_auth = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let mut config = RelayConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    // RUST_LOG wins; otherwise the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    fmt().with_env_filter(filter).init();

    if config.upstream_api_key.is_empty() {
        warn!("ALIYUN_API_KEY is not set; upstream requests will be rejected");
    }
    if config.uses_default_secret() {
        warn!("JWT_SECRET is not set; using the built-in development secret");
    }

    tokio::fs::create_dir_all(&config.upload_dir).await?;

    let upstream = Arc::new(DashScopeClient::from_config(&config));
    info!(
        upstream = %upstream.url(),
        policy = %config.history_policy,
        require_auth = config.require_auth,
        "Starting parley"
    );

    let state = Arc::new(AppState::new(config, upstream)?);
    serve(state).await
}
