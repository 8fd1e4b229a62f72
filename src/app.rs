//! One competition run: team info, context, profile, prices, portfolio, submission.

use anyhow::Result;
use serde::Serialize;
use std::io::Write;
use tracing::{error, info, warn};

use crate::client::PrismClient;
use crate::investor::{context_text, ContextParser};
use crate::portfolio::{build_pool_filling_portfolio, Portfolio};
use crate::stocks::{PriceSource, Universe};

/// Where a run stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    ContextUnavailable,
    EmptyContext,
    EmptyPortfolio,
    DryRun(Portfolio),
    Submitted(String),
    SubmissionFailed,
}

/// Pretty-print a server body if it is JSON, otherwise print it as-is.
pub fn print_raw_json<W: Write>(out: &mut W, label: &str, body: &str) -> Result<()> {
    writeln!(out, "{}:", label)?;
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?,
        Err(_) => writeln!(out, "{}", body)?,
    }
    Ok(())
}

pub fn print_json<W: Write, T: Serialize>(out: &mut W, label: &str, value: &T) -> Result<()> {
    writeln!(out, "{}:", label)?;
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Drive the sequential flow. Network failures are logged and end the run early
/// with an outcome; only writes to `out` can make this return an error.
pub async fn run<W: Write>(
    client: &PrismClient,
    parser: &dyn ContextParser,
    price_source: &dyn PriceSource,
    universe: &Universe,
    dry_run: bool,
    out: &mut W,
) -> Result<RunOutcome> {
    info!("Fetching team info...");
    match client.fetch_team_info().await {
        Ok(body) => print_raw_json(out, "Team info", &body)?,
        Err(e) => error!(error = %e, "Failed to get team info"),
    }

    info!("Requesting investor context...");
    let raw_context = match client.fetch_context().await {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "Failed to get context, nothing to build");
            return Ok(RunOutcome::ContextUnavailable);
        }
    };
    print_raw_json(out, "Investor context", &raw_context)?;

    let text = context_text(&raw_context);
    if text.is_empty() {
        warn!("Context was empty, skipping submission");
        return Ok(RunOutcome::EmptyContext);
    }

    info!(parser = parser.name(), "Parsing investor context");
    let profile = parser.parse(&text).await;
    print_json(out, "Investor profile", &profile)?;
    print_json(out, "Risk profile", &profile.risk_profile())?;

    info!(source = price_source.name(), "Fetching prices");
    let prices = price_source.get_prices(&universe.tickers()).await;
    print_json(out, "Prices", &prices)?;

    let portfolio = build_pool_filling_portfolio(&profile, universe, &prices);
    print_json(out, "Portfolio", &portfolio)?;

    if portfolio.is_empty() {
        error!("Portfolio is empty, skipping submission");
        return Ok(RunOutcome::EmptyPortfolio);
    }
    if dry_run {
        info!("Dry run, not submitting");
        return Ok(RunOutcome::DryRun(portfolio));
    }

    info!(positions = portfolio.len(), "Submitting portfolio...");
    match client.submit_portfolio(&portfolio).await {
        Ok(body) => {
            print_raw_json(out, "Submission response", &body)?;
            Ok(RunOutcome::Submitted(body))
        }
        Err(e) => {
            error!(error = %e, "Submission failed");
            Ok(RunOutcome::SubmissionFailed)
        }
    }
}
