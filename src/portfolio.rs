use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, warn};

use crate::investor::{InvestorProfile, RiskProfile};
use crate::stocks::{PriceMap, Tier, Universe};

/// Share of the budget given to the (low, medium, high) tiers. Each row sums to 1.0.
pub fn allocation_fractions(risk: RiskProfile) -> [f64; 3] {
    match risk {
        RiskProfile::Conservative => [0.70, 0.30, 0.00],
        RiskProfile::Moderate => [0.40, 0.40, 0.20],
        RiskProfile::Aggressive => [0.20, 0.30, 0.50],
    }
}

/// Dollar budget per tier, in low -> medium -> high order.
pub fn tier_budgets(risk: RiskProfile, budget: f64) -> [(Tier, f64); 3] {
    let fractions = allocation_fractions(risk);
    Tier::ALL.map(|tier| (tier, budget * fractions[tier as usize]))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Holding {
    pub ticker: String,
    pub quantity: u32,
}

impl Holding {
    pub fn new(ticker: impl Into<String>, quantity: u32) -> Self {
        Self {
            ticker: ticker.into(),
            quantity,
        }
    }
}

/// Final submission: unique tickers, positive quantities, sorted by ticker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Portfolio {
    holdings: Vec<Holding>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortfolioError {
    #[error("duplicate ticker in portfolio: {0}")]
    DuplicateTicker(String),
    #[error("non-positive quantity for {0}")]
    ZeroQuantity(String),
}

impl Portfolio {
    pub fn from_holdings(mut holdings: Vec<Holding>) -> Result<Self, PortfolioError> {
        if let Some(dup) = duplicate_tickers(&holdings).into_iter().next() {
            return Err(PortfolioError::DuplicateTicker(dup));
        }
        if let Some(h) = holdings.iter().find(|h| h.quantity == 0) {
            return Err(PortfolioError::ZeroQuantity(h.ticker.clone()));
        }
        holdings.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        Ok(Self { holdings })
    }

    pub fn holdings(&self) -> &[Holding] {
        &self.holdings
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.holdings.len()
    }

    #[cfg(test)]
    fn quantity_of(&self, ticker: &str) -> Option<u32> {
        self.holdings
            .iter()
            .find(|h| h.ticker == ticker)
            .map(|h| h.quantity)
    }

    /// Cost at the given prices; tickers without a price contribute nothing.
    pub fn total_cost(&self, prices: &PriceMap) -> f64 {
        self.holdings
            .iter()
            .filter_map(|h| prices.get(&h.ticker).map(|p| p * h.quantity as f64))
            .sum()
    }
}

/// Tickers that appear more than once, in first-seen order.
pub fn duplicate_tickers(holdings: &[Holding]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut dups = Vec::new();
    for h in holdings {
        if !seen.insert(h.ticker.as_str()) && !dups.contains(&h.ticker) {
            dups.push(h.ticker.clone());
        }
    }
    dups
}

/// Whole shares affordable with `dollars`, never exceeding it.
fn affordable_shares(dollars: f64, price: f64) -> u32 {
    if !(price.is_finite() && price > 0.0 && dollars.is_finite() && dollars > 0.0) {
        return 0;
    }
    let mut quantity = (dollars / price).floor().min(u32::MAX as f64) as u32;
    // Guard against floor() landing one share over after rounding
    while quantity > 0 && quantity as f64 * price > dollars {
        quantity -= 1;
    }
    quantity
}

/// Spread each tier's budget evenly over its candidates and sum per ticker.
///
/// Candidates are the tier's interest-matched tickers; when none survive the veto list
/// the whole tier (minus vetoed tickers) is used instead. A tier with nothing left, or
/// with a zero budget, is skipped and its dollars are not redistributed.
pub fn allocate_dollars(
    risk: RiskProfile,
    budget: f64,
    interest: &BTreeSet<String>,
    excluded: &BTreeSet<String>,
    universe: &Universe,
) -> BTreeMap<String, f64> {
    let mut allocation: BTreeMap<String, f64> = BTreeMap::new();

    for (tier, tier_budget) in tier_budgets(risk, budget) {
        if tier_budget <= 0.0 {
            debug!(tier = ?tier, "Tier has no budget, skipping");
            continue;
        }

        let tickers = universe.tier(tier);
        let mut candidates: Vec<&String> = tickers
            .iter()
            .filter(|t| interest.contains(*t) && !excluded.contains(*t))
            .collect();
        if candidates.is_empty() {
            candidates = tickers.iter().filter(|t| !excluded.contains(*t)).collect();
        }
        if candidates.is_empty() {
            warn!(tier = ?tier, budget = tier_budget, "No candidates left in tier, budget forfeited");
            continue;
        }

        let share = tier_budget / candidates.len() as f64;
        debug!(tier = ?tier, candidates = candidates.len(), per_ticker = share, "Tier allocated");
        for ticker in candidates {
            *allocation.entry(ticker.clone()).or_insert(0.0) += share;
        }
    }

    allocation
}

/// One share of the first affordable low-risk stock, scanned in ticker order.
fn emergency_pick(
    budget: f64,
    excluded: &BTreeSet<String>,
    universe: &Universe,
    prices: &PriceMap,
) -> Option<Holding> {
    universe
        .tier(Tier::Low)
        .iter()
        .filter(|t| !excluded.contains(*t))
        .find(|t| prices.get(*t).is_some_and(|p| *p <= budget))
        .map(|t| Holding::new(t.clone(), 1))
}

/// Build the portfolio for a profile: risk-bucketed budget, interest-first pools,
/// floor to whole shares, and a single-share fallback if nothing else was affordable.
pub fn build_pool_filling_portfolio(
    profile: &InvestorProfile,
    universe: &Universe,
    prices: &PriceMap,
) -> Portfolio {
    let risk = profile.risk_profile();
    let excluded = universe.resolve_exclusions(&profile.avoid_list);
    let interest = universe.resolve_interests(&profile.interests);
    info!(
        risk = ?risk,
        budget = profile.budget,
        excluded = excluded.len(),
        interest_matches = interest.len(),
        "Building portfolio"
    );

    let allocation = allocate_dollars(risk, profile.budget, &interest, &excluded, universe);

    let mut holdings = Vec::new();
    for (ticker, dollars) in &allocation {
        let Some(&price) = prices.get(ticker) else {
            debug!(ticker = %ticker, "No price, dropping");
            continue;
        };
        let quantity = affordable_shares(*dollars, price);
        if quantity == 0 {
            debug!(ticker = %ticker, price, allocation = dollars, "Allocation below one share, dropping");
            continue;
        }
        holdings.push(Holding::new(ticker.clone(), quantity));
    }

    if holdings.is_empty() {
        warn!("Allocation produced an empty portfolio, trying single-share fallback");
        match emergency_pick(profile.budget, &excluded, universe, prices) {
            Some(holding) => holdings.push(holding),
            None => warn!(budget = profile.budget, "Nothing affordable, portfolio stays empty"),
        }
    }

    let portfolio = match Portfolio::from_holdings(holdings) {
        Ok(portfolio) => portfolio,
        Err(e) => {
            error!(error = %e, "Built an invalid portfolio, submitting nothing");
            return Portfolio::default();
        }
    };
    info!(
        positions = portfolio.len(),
        cost = portfolio.total_cost(prices),
        budget = profile.budget,
        "Portfolio built"
    );
    portfolio
}
