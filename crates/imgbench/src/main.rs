use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use imgbench::BenchConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = BenchConfig::parse();
    let reports = imgbench::bench::run(&config)
        .await
        .context("benchmark failed")?;

    for report in &reports {
        println!("{report}");
    }
    Ok(())
}
