//! Stock universe and current price lookups
//!
//! This module holds:
//! - The static sector and risk-tier tables the portfolio builder draws from
//! - The `PriceSource` seam with a live Yahoo Finance source and a fixed reference table

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Ticker -> current price. Only positive, finite prices are ever stored.
pub type PriceMap = BTreeMap<String, f64>;

/// Risk bucket used to partition both the stock universe and the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Low,
    Medium,
    High,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Low, Tier::Medium, Tier::High];
}

const SECTOR_TABLE: &[(&str, &[&str])] = &[
    ("finance", &["JPM", "BAC"]),
    ("real estate", &["PLD", "O"]),
    ("energy", &["XOM", "CVX"]),
    ("transportation", &["UNP", "FDX"]),
    ("tech", &["AAPL", "MSFT"]),
    ("trade", &["WMT", "COST"]),
    ("gardening", &["WMT", "COST"]),
    ("healthcare", &["JNJ"]),
    ("consumer staples", &["PG", "KO"]),
];

const TIER_TABLE: &[(Tier, &[&str])] = &[
    (Tier::Low, &["JNJ", "PG", "KO", "O", "WMT", "COST"]),
    (Tier::Medium, &["JPM", "BAC", "PLD", "XOM", "CVX", "UNP"]),
    (Tier::High, &["AAPL", "MSFT", "FDX"]),
];

// Reference prices for offline runs
const REFERENCE_PRICES: &[(&str, f64)] = &[
    ("PG", 150.0),
    ("KO", 65.0),
    ("JNJ", 160.0),
    ("XOM", 120.0),
    ("UNP", 235.0),
    ("JPM", 210.0),
    ("BAC", 40.0),
    ("PLD", 125.0),
    ("O", 55.0),
    ("CVX", 150.0),
    ("FDX", 275.0),
    ("AAPL", 230.0),
    ("MSFT", 430.0),
    ("WMT", 66.0),
    ("COST", 750.0),
];

static STANDARD_UNIVERSE: Lazy<Universe> =
    Lazy::new(|| Universe::from_tables(SECTOR_TABLE, TIER_TABLE));

/// Sector and risk-tier tables. Sector names are stored lowercase, tickers uppercase.
#[derive(Debug, Clone)]
pub struct Universe {
    sectors: BTreeMap<String, BTreeSet<String>>,
    tiers: BTreeMap<Tier, BTreeSet<String>>,
}

impl Universe {
    /// The built-in tables used for competition runs.
    pub fn standard() -> &'static Universe {
        &STANDARD_UNIVERSE
    }

    pub fn from_tables(sectors: &[(&str, &[&str])], tiers: &[(Tier, &[&str])]) -> Self {
        let to_set = |tickers: &[&str]| -> BTreeSet<String> {
            tickers.iter().map(|t| t.to_ascii_uppercase()).collect()
        };

        let mut sector_map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (name, tickers) in sectors {
            sector_map
                .entry(name.trim().to_lowercase())
                .or_default()
                .extend(to_set(tickers));
        }

        let mut tier_map: BTreeMap<Tier, BTreeSet<String>> = BTreeMap::new();
        for (tier, tickers) in tiers {
            tier_map.entry(*tier).or_default().extend(to_set(tickers));
        }

        Self {
            sectors: sector_map,
            tiers: tier_map,
        }
    }

    pub fn sector(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.sectors.get(&name.trim().to_lowercase())
    }

    pub fn sector_names(&self) -> impl Iterator<Item = &str> {
        self.sectors.keys().map(String::as_str)
    }

    /// Tickers in a tier; empty if the tier is not populated.
    pub fn tier(&self, tier: Tier) -> &BTreeSet<String> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        self.tiers.get(&tier).unwrap_or(&EMPTY)
    }

    /// Every ticker named by either table: the set we look up prices for.
    pub fn tickers(&self) -> BTreeSet<String> {
        self.sectors
            .values()
            .chain(self.tiers.values())
            .flatten()
            .cloned()
            .collect()
    }

    /// Build the veto list: sector names expand to their tickers, anything else is a ticker.
    pub fn resolve_exclusions<'a, I>(&self, avoid_list: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut excluded = BTreeSet::new();
        for entry in avoid_list {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            match self.sector(entry) {
                Some(tickers) => excluded.extend(tickers.iter().cloned()),
                None => {
                    excluded.insert(entry.to_ascii_uppercase());
                }
            }
        }
        excluded
    }

    /// Tickers of every sector whose name equals an interest (case-insensitive, no fuzzy match).
    pub fn resolve_interests<'a, I>(&self, interests: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        interests
            .into_iter()
            .filter_map(|interest| self.sector(interest))
            .flatten()
            .cloned()
            .collect()
    }
}

/// Best-effort price lookup. Implementations never fail; unpriced tickers are left out.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn get_prices(&self, tickers: &BTreeSet<String>) -> PriceMap;

    fn name(&self) -> &'static str;
}

fn is_valid_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

/// Fixed reference prices; used for dry runs and when live data is unwanted.
#[derive(Debug, Clone)]
pub struct StaticPriceSource {
    prices: PriceMap,
}

impl StaticPriceSource {
    pub fn reference() -> Self {
        Self::from_pairs(REFERENCE_PRICES)
    }

    pub fn from_pairs(pairs: &[(&str, f64)]) -> Self {
        let prices = pairs
            .iter()
            .filter(|(_, p)| is_valid_price(*p))
            .map(|(t, p)| (t.to_ascii_uppercase(), *p))
            .collect();
        Self { prices }
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn get_prices(&self, tickers: &BTreeSet<String>) -> PriceMap {
        tickers
            .iter()
            .filter_map(|t| self.prices.get(t).map(|p| (t.clone(), *p)))
            .collect()
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

const YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";
// Small batch size to avoid URL length / throttling
const QUOTE_BATCH_SIZE: usize = 50;

/// Live prices from the Yahoo Finance quote endpoint, with a per-ticker chart fallback.
pub struct YahooPriceSource {
    client: reqwest::Client,
    base_url: String,
}

impl YahooPriceSource {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_base_url(YAHOO_BASE_URL)
    }

    /// Point at another host serving the same quote and chart endpoints.
    pub fn with_base_url(base_url: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Mozilla/5.0 (compatible; prism-portfolio)")
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_json(&self, url: &str) -> Result<Value, reqwest::Error> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    async fn fetch_quote_batch(&self, chunk: &[&String], prices: &mut PriceMap) {
        let symbols = chunk
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/v7/finance/quote?symbols={}", self.base_url, symbols);

        match self.fetch_json(&url).await {
            Ok(json) => {
                let found = parse_quote_response(&json);
                debug!(requested = chunk.len(), found = found.len(), "Quote batch fetched");
                prices.extend(found);
            }
            Err(e) => warn!(error = %e, symbols = %symbols, "Quote batch request failed"),
        }
    }

    async fn fetch_chart_price(&self, ticker: &str) -> Option<f64> {
        let url = format!(
            "{}/v8/finance/chart/{}?range=5d&interval=1d",
            self.base_url, ticker
        );
        match self.fetch_json(&url).await {
            Ok(json) => extract_chart_price(&json),
            Err(e) => {
                warn!(error = %e, ticker, "Chart request failed");
                None
            }
        }
    }
}

#[async_trait]
impl PriceSource for YahooPriceSource {
    async fn get_prices(&self, tickers: &BTreeSet<String>) -> PriceMap {
        let requested: Vec<&String> = tickers.iter().collect();
        let mut prices = PriceMap::new();

        for chunk in requested.chunks(QUOTE_BATCH_SIZE) {
            self.fetch_quote_batch(chunk, &mut prices).await;
        }
        // The quote endpoint answers for the whole batch or not at all; ask per ticker for gaps
        let gaps: Vec<&String> = requested
            .iter()
            .copied()
            .filter(|t| !prices.contains_key(t.as_str()))
            .collect();
        for ticker in gaps {
            if let Some(price) = self.fetch_chart_price(ticker).await {
                prices.insert(ticker.clone(), price);
            }
        }
        // Drop anything we did not ask for
        prices.retain(|t, _| tickers.contains(t));

        let missing: Vec<&str> = tickers
            .iter()
            .filter(|t| !prices.contains_key(t.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            warn!(missing = ?missing, "No price available for some tickers");
        }
        info!(priced = prices.len(), requested = tickers.len(), "Price lookup complete");
        prices
    }

    fn name(&self) -> &'static str {
        "yahoo"
    }
}

/// Pull `symbol -> price` out of a `/v7/finance/quote` response.
fn parse_quote_response(json: &Value) -> PriceMap {
    let mut prices = PriceMap::new();
    let Some(results) = json["quoteResponse"]["result"].as_array() else {
        return prices;
    };
    for item in results {
        let Some(sym) = item["symbol"].as_str() else {
            continue;
        };
        let price = item["regularMarketPrice"]
            .as_f64()
            .or_else(|| item["postMarketPrice"].as_f64())
            .or_else(|| item["regularMarketPreviousClose"].as_f64());
        if let Some(p) = price.filter(|p| is_valid_price(*p)) {
            prices.insert(sym.to_ascii_uppercase(), p);
        }
    }
    prices
}

/// Current price from a `/v8/finance/chart` response: market price, else the last close.
fn extract_chart_price(json: &Value) -> Option<f64> {
    let result = json["chart"]["result"].as_array()?.first()?;
    if let Some(p) = result["meta"]["regularMarketPrice"].as_f64() {
        if is_valid_price(p) {
            return Some(p);
        }
    }
    let quotes = result["indicators"]["quote"].as_array()?.first()?;
    quotes["close"]
        .as_array()?
        .iter()
        .filter_map(|v| v.as_f64())
        .filter(|p| is_valid_price(*p))
        .last()
}
