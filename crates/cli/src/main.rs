//! `axle-kpi` -- offline KPI reporting over automation trace logs.
//!
//! Exit codes: 0 on a clean gate, 2 when a threshold is violated
//! (suppressed by `--no-fail`), 1 on unreadable input or unwritable
//! output.

use clap::Parser;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "axle_kpi=info,axle_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = axle_cli::Args::parse();
    match axle_cli::run(&args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "KPI run failed");
            std::process::exit(1);
        }
    }
}
