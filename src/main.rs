use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::debug;

use prism_portfolio::app;
use prism_portfolio::client::PrismClient;
use prism_portfolio::config::{Config, PriceMode};
use prism_portfolio::investor::context_parser_for;
use prism_portfolio::logging;
use prism_portfolio::stocks::{PriceSource, StaticPriceSource, Universe, YahooPriceSource};

#[derive(Debug, Parser)]
#[command(name = "prism_portfolio", about = "Fetch an investor brief, build a portfolio, submit it")]
struct Cli {
    /// Path to the YAML settings file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Build and print the portfolio without submitting it
    #[arg(long)]
    dry_run: bool,

    /// Log filter, overrides `log_level` from the config (e.g. "debug" or "prism_portfolio=trace")
    #[arg(long)]
    log_level: Option<String>,
}

fn price_source_for(config: &Config) -> Result<Box<dyn PriceSource>> {
    Ok(match config.price_source {
        PriceMode::Yahoo => Box::new(YahooPriceSource::new().context("building price client")?),
        PriceMode::Static => Box::new(StaticPriceSource::reference()),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config problems are fatal and happen before any network activity
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let log_level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    logging::setup_logging(log_level, config.log_json);

    let client = PrismClient::new(&config).context("building server client")?;
    let parser = context_parser_for(&config).context("building context parser")?;
    let price_source = price_source_for(&config)?;

    let mut stdout = std::io::stdout().lock();
    let outcome = app::run(
        &client,
        parser.as_ref(),
        price_source.as_ref(),
        Universe::standard(),
        cli.dry_run,
        &mut stdout,
    )
    .await?;
    debug!(?outcome, "Run finished");

    Ok(())
}
