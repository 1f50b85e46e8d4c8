//! Shadowline local proxy
//!
//! Listens for SOCKS5 clients and relays every connection to the configured
//! upstream proxy over an encrypted stream.

use anyhow::{Context, Result};
use clap::Parser;
use shadowline::{
    config::{generate_example_config, Config},
    crypto::Method,
    proxy::LocalServer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Shadowline local SOCKS5 proxy
#[derive(Parser, Debug)]
#[command(name = "shadowline-local")]
#[command(about = "Local SOCKS5 proxy relaying through an encrypted upstream")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Print an example configuration and exit
    #[arg(long)]
    generate_config: bool,

    /// List supported cipher methods and exit
    #[arg(long)]
    list_methods: bool,

    /// Upstream server host (overrides config)
    #[arg(short, long)]
    server: Option<String>,

    /// Upstream server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Cipher method (overrides config)
    #[arg(short, long)]
    method: Option<String>,

    /// Password (overrides config)
    #[arg(short = 'k', long)]
    password: Option<String>,

    /// Local SOCKS5 listen address (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Enable one-time auth
    #[arg(long)]
    ota: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_config {
        let example = toml::to_string_pretty(&generate_example_config())
            .context("Failed to serialize example config")?;
        print!("{}", example);
        return Ok(());
    }

    if args.list_methods {
        for method in Method::ALL {
            println!("{:<14} key {:>2}  iv {:>2}", method.as_str(), method.key_len(), method.iv_len());
        }
        return Ok(());
    }

    // A missing config file is fine when everything comes from flags
    let mut config = if std::path::Path::new(&args.config).exists() {
        Config::load(&args.config).context("Failed to load config")?
    } else {
        Config::default()
    };
    apply_overrides(&mut config, &args);

    init_logging(&config.logging.level, &config.logging.format)?;

    let session_config = config.session_config().context("Invalid configuration")?;
    info!(
        "Shadowline {} relaying via {}:{} ({}{})",
        shadowline::VERSION,
        session_config.server,
        session_config.server_port,
        session_config.method,
        if session_config.one_time_auth { ", one-time auth" } else { "" }
    );

    let server = LocalServer::bind(&config.local.listen, session_config)
        .await
        .with_context(|| format!("Failed to bind {}", config.local.listen))?;

    server
        .run_until(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down...");
            }
        })
        .await;

    Ok(())
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(server) = &args.server {
        config.server.host = server.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(method) = &args.method {
        config.server.method = method.clone();
    }
    if let Some(password) = &args.password {
        config.server.password = password.clone();
    }
    if let Some(listen) = &args.listen {
        config.local.listen = listen.clone();
    }
    if args.ota {
        config.server.one_time_auth = true;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level: {}", level))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.pretty().init(),
    }
    Ok(())
}
