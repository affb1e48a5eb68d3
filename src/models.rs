//! Core data models for the query pipeline

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

//
// ================= Fetch Operations =================
//

/// The closed set of data-fetch operations the planner may select.
/// Anything outside this set is silently skipped by the fetcher.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchOperation {
    CurrentPrice,
    HistoricalPrices,
    TopCoins,
    Provider2Latest,
}

impl FetchOperation {
    pub const ALL: [FetchOperation; 4] = [
        FetchOperation::CurrentPrice,
        FetchOperation::HistoricalPrices,
        FetchOperation::TopCoins,
        FetchOperation::Provider2Latest,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "current_price" => Some(FetchOperation::CurrentPrice),
            "historical_prices" => Some(FetchOperation::HistoricalPrices),
            "top_coins" => Some(FetchOperation::TopCoins),
            "provider2_latest" => Some(FetchOperation::Provider2Latest),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FetchOperation::CurrentPrice => "current_price",
            FetchOperation::HistoricalPrices => "historical_prices",
            FetchOperation::TopCoins => "top_coins",
            FetchOperation::Provider2Latest => "provider2_latest",
        }
    }

    /// Semantic key under which this operation's result is stored.
    pub fn store_key(&self) -> &'static str {
        match self {
            FetchOperation::CurrentPrice => "current_prices",
            FetchOperation::HistoricalPrices => "historical_prices",
            FetchOperation::TopCoins => "top_coins",
            FetchOperation::Provider2Latest => "top_coins_cmc",
        }
    }

    /// Provider that backs this operation.
    pub fn provider(&self) -> &'static str {
        match self {
            FetchOperation::Provider2Latest => "coinmarketcap",
            _ => "coingecko",
        }
    }
}

impl fmt::Display for FetchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

//
// ================= Plan =================
//

/// Planner output: which operations to run and which assets to use.
///
/// `functions` keeps the raw names the model returned; validation happens
/// at dispatch time so unknown names can be skipped rather than rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub functions: Vec<String>,
    pub coins: Vec<String>,
}

impl Default for Plan {
    /// The documented fallback plan: no operations, bitcoin only.
    fn default() -> Self {
        Self {
            functions: Vec::new(),
            coins: vec!["bitcoin".to_string()],
        }
    }
}

//
// ================= Fetched Data =================
//

/// One successfully dispatched operation and its provider result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagRecord {
    pub operation: String,
    pub result: Value,
}

/// Accumulated results of one fetch pass, keyed by semantic slot.
/// Slots are overwritten when the same operation runs twice; `source`
/// names the provider of the most recent successful call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataStore {
    pub current_prices: Option<Value>,
    pub historical_prices: Option<Value>,
    pub top_coins: Option<Value>,
    pub top_coins_cmc: Option<Value>,
    pub source: Option<String>,
    pub rag_data: Vec<RagRecord>,
}

impl DataStore {
    pub fn slot_mut(&mut self, op: FetchOperation) -> &mut Option<Value> {
        match op {
            FetchOperation::CurrentPrice => &mut self.current_prices,
            FetchOperation::HistoricalPrices => &mut self.historical_prices,
            FetchOperation::TopCoins => &mut self.top_coins,
            FetchOperation::Provider2Latest => &mut self.top_coins_cmc,
        }
    }

    /// Populated slots in fixed key order, excluding the `source` marker.
    pub fn populated(&self) -> Vec<(&'static str, &Value)> {
        FetchOperation::ALL
            .iter()
            .filter_map(|op| {
                let value = match op {
                    FetchOperation::CurrentPrice => &self.current_prices,
                    FetchOperation::HistoricalPrices => &self.historical_prices,
                    FetchOperation::TopCoins => &self.top_coins,
                    FetchOperation::Provider2Latest => &self.top_coins_cmc,
                };
                value.as_ref().map(|v| (op.store_key(), v))
            })
            .collect()
    }
}

/// One candidate context entry handed to the relevance filter / reasoner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub data: Value,
}

//
// ================= Controller Decision =================
//

/// The closed set of actions a controller decision can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAgent {
    Planner,
    Fetcher,
    Reasoner,
    Done,
    Unrecognized,
}

impl NextAgent {
    /// Interpret a model reply as a routing decision.
    ///
    /// Exact single-token replies are the primary mechanism (the think
    /// prompt asks for one); free text falls back to a case-insensitive
    /// substring scan in priority order planner > fetcher > reasoner > done.
    pub fn parse(text: &str) -> Self {
        let normalized = text
            .trim()
            .trim_end_matches(['.', '!'])
            .to_lowercase();

        match normalized.as_str() {
            "planner" => return NextAgent::Planner,
            "fetcher" => return NextAgent::Fetcher,
            "reasoner" => return NextAgent::Reasoner,
            "done" => return NextAgent::Done,
            _ => {}
        }

        if normalized.contains("planner") {
            NextAgent::Planner
        } else if normalized.contains("fetcher") {
            NextAgent::Fetcher
        } else if normalized.contains("reasoner") || normalized.contains("rag") {
            NextAgent::Reasoner
        } else if normalized.contains("done")
            || normalized.contains("finish")
            || normalized.contains("complete")
        {
            NextAgent::Done
        } else {
            NextAgent::Unrecognized
        }
    }
}

//
// ================= Final Outcome =================
//

/// Tagged result of one query. Rendered to text only at the HTTP boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum QueryOutcome {
    Answered { answer: String },
    NoAnswer,
    Inconclusive,
    Failed { kind: String, message: String },
}

impl QueryOutcome {
    pub fn is_answered(&self) -> bool {
        matches!(self, QueryOutcome::Answered { .. })
    }

    /// Human-readable rendering for callers that only take a string.
    pub fn render(&self) -> String {
        match self {
            QueryOutcome::Answered { answer } => answer.clone(),
            QueryOutcome::NoAnswer => "No answer was produced for this query.".to_string(),
            QueryOutcome::Inconclusive => {
                "Processing ended inconclusively before an answer was produced.".to_string()
            }
            QueryOutcome::Failed { kind, message } => {
                format!("[error:{}] Query processing failed: {}", kind, message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exact_tokens() {
        assert_eq!(NextAgent::parse("planner"), NextAgent::Planner);
        assert_eq!(NextAgent::parse("  Fetcher.\n"), NextAgent::Fetcher);
        assert_eq!(NextAgent::parse("DONE"), NextAgent::Done);
    }

    #[test]
    fn test_parse_free_text() {
        assert_eq!(
            NextAgent::parse("Next, the FetcherAgent should collect data."),
            NextAgent::Fetcher
        );
        assert_eq!(
            NextAgent::parse("The RAG stage should run now"),
            NextAgent::Reasoner
        );
        assert_eq!(
            NextAgent::parse("Work is complete, nothing left to do"),
            NextAgent::Done
        );
    }

    #[test]
    fn test_parse_priority_planner_wins() {
        assert_eq!(
            NextAgent::parse("Either the planner or the fetcher could run"),
            NextAgent::Planner
        );
    }

    #[test]
    fn test_parse_unrecognized() {
        assert_eq!(NextAgent::parse("I am not sure"), NextAgent::Unrecognized);
        assert_eq!(NextAgent::parse(""), NextAgent::Unrecognized);
    }

    #[test]
    fn test_operation_parse_round() {
        for op in FetchOperation::ALL {
            assert_eq!(FetchOperation::parse(op.name()), Some(op));
        }
        assert_eq!(FetchOperation::parse("coingecko_ohlc"), None);
    }

    #[test]
    fn test_default_plan() {
        let plan = Plan::default();
        assert!(plan.functions.is_empty());
        assert_eq!(plan.coins, vec!["bitcoin".to_string()]);
    }
}
