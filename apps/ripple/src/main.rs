//! # Ripple - incremental pipeline host
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 apps/ripple (THE BINARY)             │
//! │                                                      │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐  │
//! │  │    CLI      │  │  HTTP API   │  │ ripple.toml  │  │
//! │  │   (clap)    │  │   (axum)    │  │  (catalog)   │  │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬───────┘  │
//! │         └────────────────┼────────────────┘          │
//! │                          ▼                           │
//! │                  ┌───────────────┐                   │
//! │                  │  ripple-core  │                   │
//! │                  │ (THE ENGINE)  │                   │
//! │                  └───────────────┘                   │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! ripple check -c ripple.toml
//! ripple run -c ripple.toml -i ./docs
//! ripple replay -c ripple.toml -s edits.json --json-mode
//! ripple server -c ripple.toml --port 8080
//! ```

use clap::Parser;
use ripple::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // RIPPLE_LOG_FORMAT=json switches to machine-parseable logs.
    let log_format = std::env::var("RIPPLE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ripple=info,ripple_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    eprintln!(
        r#"
  ripple v{}  ~  incremental pipelines, one edit at a time
"#,
        env!("CARGO_PKG_VERSION")
    );
}
