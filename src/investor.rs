use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, ParserMode};
use crate::stocks::Universe;

pub const DEFAULT_AGE: u32 = 40;
pub const DEFAULT_BUDGET: f64 = 10_000.0;

#[derive(Debug, Deserialize)]
pub struct ContextResponse {
    pub message: String,
}

/// Structured view of the investor brief. Built once per run and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvestorProfile {
    pub age: u32,
    pub budget: f64,
    pub interests: BTreeSet<String>,
    pub avoid_list: BTreeSet<String>,
}

impl Default for InvestorProfile {
    fn default() -> Self {
        Self {
            age: DEFAULT_AGE,
            budget: DEFAULT_BUDGET,
            interests: BTreeSet::new(),
            avoid_list: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskProfile {
    /// First match wins: older or smaller accounts are treated more cautiously.
    pub fn classify(age: u32, budget: f64) -> Self {
        if age >= 60 || budget < 20_000.0 {
            RiskProfile::Conservative
        } else if age >= 40 || budget < 75_000.0 {
            RiskProfile::Moderate
        } else {
            RiskProfile::Aggressive
        }
    }
}

impl InvestorProfile {
    pub fn new<I, A>(age: u32, budget: f64, interests: I, avoid_list: A) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        Self {
            age,
            budget: sanitize_budget(budget),
            interests: normalize_terms(interests),
            avoid_list: normalize_terms(avoid_list),
        }
    }

    pub fn risk_profile(&self) -> RiskProfile {
        RiskProfile::classify(self.age, self.budget)
    }

    /// Build a profile from loosely-typed JSON; absent or unreadable fields take defaults.
    pub fn from_json_value(value: &Value) -> Self {
        let age = value
            .get("age")
            .and_then(|v| {
                v.as_u64()
                    .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                    .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            })
            .and_then(|a| u32::try_from(a).ok())
            .unwrap_or(DEFAULT_AGE);

        let budget = value
            .get("budget")
            .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(parse_money)))
            .unwrap_or(DEFAULT_BUDGET);

        let string_list = |key: &str| -> Vec<String> {
            match value.get(key) {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
                _ => Vec::new(),
            }
        };

        Self::new(age, budget, string_list("interests"), string_list("avoid_list"))
    }
}

fn sanitize_budget(budget: f64) -> f64 {
    if budget.is_finite() && budget > 0.0 {
        budget
    } else {
        0.0
    }
}

fn normalize_terms<I>(terms: I) -> BTreeSet<String>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    terms
        .into_iter()
        .map(|t| {
            let term: String = t.into();
            term.trim().to_string()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

fn parse_money(text: &str) -> Option<f64> {
    text.trim()
        .trim_start_matches('$')
        .replace(',', "")
        .trim()
        .parse()
        .ok()
}

/// The text to parse from a `/request` body: its `message` field, or the body itself.
pub fn context_text(raw: &str) -> String {
    if let Ok(ctx) = serde_json::from_str::<ContextResponse>(raw) {
        return ctx.message.trim().to_string();
    }
    if let Ok(Value::String(s)) = serde_json::from_str::<Value>(raw) {
        return s.trim().to_string();
    }
    raw.trim().to_string()
}

/// Turns a free-form investor brief into a profile. Never fails: implementations fall
/// back to `InvestorProfile::default()` when they cannot do better.
#[async_trait]
pub trait ContextParser: Send + Sync {
    async fn parse(&self, text: &str) -> InvestorProfile;

    fn name(&self) -> &'static str;
}

/// Always answers with the fixed defaults.
#[derive(Debug, Default)]
pub struct DefaultContextParser;

#[async_trait]
impl ContextParser for DefaultContextParser {
    async fn parse(&self, _text: &str) -> InvestorProfile {
        InvestorProfile::default()
    }

    fn name(&self) -> &'static str {
        "defaults"
    }
}

// Phrase -> canonical sector name. Only sector names the universe knows are emitted.
// Aliases match whole words with an optional plural "s"; other inflections are listed.
const SECTOR_ALIASES: &[(&str, &str)] = &[
    ("consumer staples", "consumer staples"),
    ("consumer goods", "consumer staples"),
    ("real estate", "real estate"),
    ("reit", "real estate"),
    ("property", "real estate"),
    ("properties", "real estate"),
    ("finance", "finance"),
    ("financial", "finance"),
    ("bank", "finance"),
    ("banking", "finance"),
    ("energy", "energy"),
    ("oil", "energy"),
    ("gas", "energy"),
    ("transportation", "transportation"),
    ("transport", "transportation"),
    ("shipping", "transportation"),
    ("logistics", "transportation"),
    ("tech", "tech"),
    ("technology", "tech"),
    ("technologies", "tech"),
    ("software", "tech"),
    ("semiconductor", "tech"),
    ("trade", "trade"),
    ("retail", "trade"),
    ("retailer", "trade"),
    ("gardening", "gardening"),
    ("garden", "gardening"),
    ("gardener", "gardening"),
    ("healthcare", "healthcare"),
    ("health care", "healthcare"),
    ("health", "healthcare"),
    ("pharma", "healthcare"),
    ("pharmaceutical", "healthcare"),
];

static ALIAS_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    SECTOR_ALIASES
        .iter()
        .filter_map(|(alias, sector)| {
            Regex::new(&format!(r"\b{}s?\b", regex::escape(alias)))
                .ok()
                .map(|re| (re, *sector))
        })
        .collect()
});

static AGE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(\d+)-year-old",
        r"(\d+)\s+years?\s+old",
        r"\baged?\s+(\d+)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static BUDGET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"budget of \$([0-9,]+(?:\.[0-9]+)?)",
        r"budget is \$([0-9,]+(?:\.[0-9]+)?)",
        r"investment is \$([0-9,]+(?:\.[0-9]+)?)",
        r"invest(?:ing)? \$([0-9,]+(?:\.[0-9]+)?)",
        r"\$([0-9][0-9,]*(?:\.[0-9]+)?)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static AVOID_CLAUSE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(?:avoids?|stay away from|not interested in)\s+([^.\n]+)").ok());

static TICKER_TOKEN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[A-Z]{1,5}$").ok());

/// Regex and keyword extraction over the brief. Fields it cannot find take the defaults.
#[derive(Debug, Default)]
pub struct KeywordContextParser;

impl KeywordContextParser {
    pub fn extract(text: &str) -> InvestorProfile {
        let lower = text.to_lowercase();

        let age = AGE_PATTERNS
            .iter()
            .find_map(|re| Self::capture(re, &lower).and_then(|s| s.parse().ok()))
            .unwrap_or(DEFAULT_AGE);

        let budget = BUDGET_PATTERNS
            .iter()
            .find_map(|re| Self::capture(re, &lower).and_then(parse_money))
            .unwrap_or(DEFAULT_BUDGET);

        let (avoid_list, avoid_span) = Self::extract_avoidances(text);

        // Interests are any sector mentions outside the avoid clause
        let mut remaining = lower.clone();
        if let Some((start, end)) = avoid_span {
            remaining.replace_range(start..end, " ");
        }
        let interests = Self::sectors_in(&remaining);

        InvestorProfile::new(age, budget, interests, avoid_list)
    }

    fn capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
        re.captures(text)?.get(1).map(|m| m.as_str())
    }

    fn sectors_in(text: &str) -> BTreeSet<String> {
        ALIAS_PATTERNS
            .iter()
            .filter(|(re, _)| re.is_match(text))
            .map(|(_, sector)| sector.to_string())
            .collect()
    }

    /// Split the clause after "avoid" into sector names and ticker-looking tokens.
    /// Also returns the clause's byte span so it can be masked out for interest matching.
    fn extract_avoidances(text: &str) -> (BTreeSet<String>, Option<(usize, usize)>) {
        let mut avoid = BTreeSet::new();
        let Some(cap) = AVOID_CLAUSE.as_ref().and_then(|re| re.captures(text)) else {
            return (avoid, None);
        };
        let Some(clause) = cap.get(1) else {
            return (avoid, None);
        };

        for part in clause.as_str().split([',', ';']) {
            for token in part.split(" and ").flat_map(|s| s.split(" or ")) {
                let token = token.trim().trim_end_matches('.');
                if token.is_empty() {
                    continue;
                }
                let sectors = Self::sectors_in(&token.to_lowercase());
                if !sectors.is_empty() {
                    avoid.extend(sectors);
                } else if TICKER_TOKEN.as_ref().is_some_and(|re| re.is_match(token)) {
                    avoid.insert(token.to_string());
                } else {
                    debug!(token, "Ignoring unrecognised avoidance");
                }
            }
        }
        // Lowercasing ASCII keeps byte offsets; other scripts may shift, so only mask when safe
        let span = text.is_ascii().then(|| (clause.start(), clause.end()));
        (avoid, span)
    }
}

#[async_trait]
impl ContextParser for KeywordContextParser {
    async fn parse(&self, text: &str) -> InvestorProfile {
        Self::extract(text)
    }

    fn name(&self) -> &'static str {
        "keywords"
    }
}

/// System prompt for the LLM parser. Names the sectors the universe actually knows.
fn llm_system_prompt(universe: &Universe) -> String {
    let sectors = universe.sector_names().collect::<Vec<_>>().join(", ");
    format!(
        "You extract structured data from investor descriptions. \
Reply with a single JSON object with exactly these keys: \
\"age\" (integer years, or null if unknown), \
\"budget\" (number of US dollars available to invest, or null if unknown), \
\"interests\" (array of lowercase sector names the investor likes), \
\"avoid_list\" (array of lowercase sector names or uppercase ticker symbols to avoid). \
Prefer these sector names when they fit: {}.",
        sectors
    )
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("LLM API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("LLM response had no content")]
    EmptyResponse,
    #[error("LLM returned invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// OpenAI-compatible chat completion in JSON mode.
pub struct LlmContextParser {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl LlmContextParser {
    pub fn new(api_key: &str, model: &str, base_url: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn request_profile(&self, text: &str) -> Result<InvestorProfile, LlmError> {
        let body = json!({
            "model": self.model,
            "temperature": 0.0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": llm_system_prompt(Universe::standard()) },
                { "role": "user", "content": text },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: Value = response.json().await?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or(LlmError::EmptyResponse)?;
        parse_llm_content(content)
    }
}

/// Parse the model's reply, tolerating a fenced code block around the JSON.
fn parse_llm_content(content: &str) -> Result<InvestorProfile, LlmError> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if trimmed.is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    let value: Value = serde_json::from_str(trimmed)?;
    Ok(InvestorProfile::from_json_value(&value))
}

#[async_trait]
impl ContextParser for LlmContextParser {
    async fn parse(&self, text: &str) -> InvestorProfile {
        match self.request_profile(text).await {
            Ok(profile) => {
                info!(model = %self.model, "Context parsed by LLM");
                profile
            }
            Err(e) => {
                warn!(error = %e, "LLM context parsing failed, using default profile");
                InvestorProfile::default()
            }
        }
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

/// Pick the parser for this run from the config.
pub fn context_parser_for(config: &Config) -> Result<Box<dyn ContextParser>, reqwest::Error> {
    let parser: Box<dyn ContextParser> = match (config.context_parser, config.llm_key()) {
        (ParserMode::Auto | ParserMode::Llm, Some(key)) => Box::new(LlmContextParser::new(
            key,
            &config.llm_model,
            &config.llm_base_url,
        )?),
        (ParserMode::Llm, None) => {
            warn!("context_parser is 'llm' but no llm_api_key is set, using default profile");
            Box::new(DefaultContextParser)
        }
        (ParserMode::Keywords, _) => Box::new(KeywordContextParser),
        (ParserMode::Auto | ParserMode::Defaults, _) => Box::new(DefaultContextParser),
    };
    Ok(parser)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_risk_classification_order() {
        assert_eq!(RiskProfile::classify(70, 1_000_000.0), RiskProfile::Conservative);
        assert_eq!(RiskProfile::classify(25, 19_999.0), RiskProfile::Conservative);
        assert_eq!(RiskProfile::classify(45, 500_000.0), RiskProfile::Moderate);
        assert_eq!(RiskProfile::classify(30, 50_000.0), RiskProfile::Moderate);
        assert_eq!(RiskProfile::classify(30, 75_000.0), RiskProfile::Aggressive);
        assert_eq!(RiskProfile::classify(59, 20_000.0), RiskProfile::Moderate);
    }

    #[test]
    fn test_default_profile_is_conservative() {
        let profile = InvestorProfile::default();
        assert_eq!(profile.age, 40);
        assert_eq!(profile.budget, 10_000.0);
        assert_eq!(profile.risk_profile(), RiskProfile::Conservative);
    }

    #[test]
    fn test_new_clamps_budget_and_trims_terms() {
        let profile = InvestorProfile::new(30, -5.0, ["  tech ", ""], ["energy"]);
        assert_eq!(profile.budget, 0.0);
        assert_eq!(profile.interests, set(&["tech"]));
        assert_eq!(profile.avoid_list, set(&["energy"]));

        let profile = InvestorProfile::new(30, f64::NAN, Vec::<String>::new(), Vec::<String>::new());
        assert_eq!(profile.budget, 0.0);
    }

    #[test]
    fn test_from_json_value_is_lenient() {
        let value = json!({
            "age": "52",
            "budget": "$125,000",
            "interests": ["Energy", "tech"],
            "avoid_list": "finance, TSLA"
        });
        let profile = InvestorProfile::from_json_value(&value);
        assert_eq!(profile.age, 52);
        assert_eq!(profile.budget, 125_000.0);
        assert_eq!(profile.interests, set(&["Energy", "tech"]));
        assert_eq!(profile.avoid_list, set(&["TSLA", "finance"]));
    }

    #[test]
    fn test_from_json_value_nulls_use_defaults() {
        let value = json!({ "age": null, "budget": null });
        assert_eq!(InvestorProfile::from_json_value(&value), InvestorProfile::default());
    }

    #[test]
    fn test_context_text_variants() {
        assert_eq!(context_text(r#"{"message": " Jane is 30. "}"#), "Jane is 30.");
        assert_eq!(context_text(r#""quoted brief""#), "quoted brief");
        assert_eq!(context_text("  plain text\n"), "plain text");
    }

    #[test]
    fn test_keyword_extraction() {
        let brief = "Maria Lopez is a 67-year-old retiree with a budget of $45,500. \
                     She loves gardening and follows the energy sector. \
                     She wants to avoid tech and real estate.";
        let profile = KeywordContextParser::extract(brief);
        assert_eq!(profile.age, 67);
        assert_eq!(profile.budget, 45_500.0);
        assert_eq!(profile.interests, set(&["energy", "gardening"]));
        assert_eq!(profile.avoid_list, set(&["real estate", "tech"]));
    }

    #[test]
    fn test_keyword_avoid_keeps_ticker_tokens() {
        let brief = "Sam, 35 years old, wants to invest $80,000 and avoids TSLA, oil or banks.";
        let profile = KeywordContextParser::extract(brief);
        assert_eq!(profile.age, 35);
        assert_eq!(profile.budget, 80_000.0);
        assert_eq!(profile.avoid_list, set(&["TSLA", "energy", "finance"]));
        assert!(profile.interests.is_empty());
    }

    #[test]
    fn test_keyword_aliases_match_whole_words() {
        let profile =
            KeywordContextParser::extract("Ann is a 30-year-old with a healthy budget of $50,000.");
        assert_eq!(profile.budget, 50_000.0);
        assert!(profile.interests.is_empty());

        let profile = KeywordContextParser::extract("He enjoys gastronomy and oily fish.");
        assert!(profile.interests.is_empty());

        let profile = KeywordContextParser::extract(
            "Keen on technology, rental properties, pharmaceuticals and big retailers.",
        );
        assert_eq!(
            profile.interests,
            set(&["healthcare", "real estate", "tech", "trade"])
        );
    }

    #[test]
    fn test_keyword_missing_fields_use_defaults() {
        let profile = KeywordContextParser::extract("An investor with no details.");
        assert_eq!(profile, InvestorProfile::default());
    }

    #[test]
    fn test_parse_llm_content_with_fence() {
        let content = "```json\n{\"age\": 28, \"budget\": 90000, \"interests\": [\"tech\"], \"avoid_list\": []}\n```";
        let profile = parse_llm_content(content).unwrap();
        assert_eq!(profile.age, 28);
        assert_eq!(profile.budget, 90_000.0);
        assert_eq!(profile.risk_profile(), RiskProfile::Aggressive);
    }

    #[test]
    fn test_llm_prompt_lists_universe_sectors() {
        let prompt = llm_system_prompt(Universe::standard());
        for name in Universe::standard().sector_names() {
            assert!(prompt.contains(name), "prompt is missing {}", name);
        }
        assert!(prompt.ends_with("tech, trade, transportation."));
    }

    #[test]
    fn test_parse_llm_content_errors() {
        assert!(matches!(parse_llm_content("   "), Err(LlmError::EmptyResponse)));
        assert!(matches!(parse_llm_content("not json"), Err(LlmError::InvalidJson(_))));
    }

    #[tokio::test]
    async fn test_llm_parser_falls_back_on_transport_error() {
        // Nothing listens on port 9 locally; the request fails fast
        let parser = LlmContextParser::new("sk-test", "gpt-4o-mini", "http://127.0.0.1:9/v1").unwrap();
        let profile = parser.parse("A 25-year-old with $1,000,000").await;
        assert_eq!(profile, InvestorProfile::default());
    }

    #[test]
    fn test_parser_selection() {
        let config = Config::from_yaml("team_api_code: abc\n").unwrap();
        assert_eq!(context_parser_for(&config).unwrap().name(), "defaults");

        let config = Config::from_yaml("team_api_code: abc\nllm_api_key: sk-1\n").unwrap();
        assert_eq!(context_parser_for(&config).unwrap().name(), "llm");

        let config = Config::from_yaml("team_api_code: abc\ncontext_parser: llm\n").unwrap();
        assert_eq!(context_parser_for(&config).unwrap().name(), "defaults");

        let config = Config::from_yaml("team_api_code: abc\ncontext_parser: keywords\n").unwrap();
        assert_eq!(context_parser_for(&config).unwrap().name(), "keywords");
    }
}
