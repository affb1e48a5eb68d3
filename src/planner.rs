//! Query planner
//!
//! Turns a free-text question into a structured plan: which data-fetch
//! operations to run and which coin ids to use. Both decisions are
//! delegated to the LLM with a strict literal-list output contract;
//! anything unparseable collapses to the documented safe defaults.

use std::sync::Arc;
use tracing::{info, warn};

use crate::llm::{ChatMessage, LlmClient};
use crate::models::Plan;

/// CoinGecko ids the model is allowed to select from.
pub const COIN_ALLOWLIST: &[&str] = &[
    "bitcoin", "ethereum", "tether", "bnb", "solana", "ripple", "dogecoin", "cardano",
    "tron", "avalanche", "shiba-inu", "polkadot", "litecoin", "chainlink", "uniswap",
    "stellar", "monero", "near", "cosmos", "vechain", "filecoin", "aptos", "hedera",
    "maker", "immutable", "arbitrum", "optimism", "injective", "render-token",
    "the-graph", "quant-network", "aave", "algorand", "elrond-erd-2", "fantom",
    "tezos", "theta-token", "chiliz", "flow", "eos", "neo", "dash", "kusama", "iota",
    "bitcoin-cash", "internet-computer",
];

pub struct PlannerAgent {
    llm: Arc<dyn LlmClient>,
}

impl PlannerAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Analyze a user question into a fetch plan. Never fails: each of the
    /// two model calls falls back to its documented default on any error.
    pub async fn analyze(&self, user_query: &str) -> Plan {
        let functions = self.select_functions(user_query).await;
        let coins = self.select_coins(user_query).await;

        let plan = Plan { functions, coins };
        info!(?plan, "Planner produced plan");
        plan
    }

    async fn select_functions(&self, user_query: &str) -> Vec<String> {
        let prompt = format!(
            "You decide which data-fetch operations are needed to answer a \
             cryptocurrency question. Reply with ONLY a literal list of operation \
             names, no extra text.\n\
             Allowed operations: 'current_price', 'historical_prices', \
             'top_coins', 'provider2_latest'.\n\
             Example reply: [\"current_price\", \"historical_prices\"]\n\n\
             User question: {}",
            user_query
        );

        match self.llm.chat(&[ChatMessage::user(prompt)]).await {
            Ok(reply) => match parse_string_list(&reply) {
                Some(list) => list,
                None => {
                    warn!(raw = %reply, "Could not parse operation list, defaulting to none");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(error = %e, "Operation selection call failed, defaulting to none");
                Vec::new()
            }
        }
    }

    async fn select_coins(&self, user_query: &str) -> Vec<String> {
        let prompt = format!(
            "You decide which cryptocurrencies a question is about. Reply with \
             ONLY a literal list of CoinGecko ids, no extra text, for example: \
             [\"bitcoin\", \"ethereum\"].\n\
             If no specific coins are named, reply [\"bitcoin\"].\n\
             Use only these ids, never invent new ones:\n{:?}\n\n\
             User question: {}",
            COIN_ALLOWLIST, user_query
        );

        match self.llm.chat(&[ChatMessage::user(prompt)]).await {
            Ok(reply) => match parse_string_list(&reply) {
                Some(list) if !list.is_empty() => list,
                _ => {
                    warn!(raw = %reply, "Could not parse coin list, defaulting to bitcoin");
                    vec!["bitcoin".to_string()]
                }
            },
            Err(e) => {
                warn!(error = %e, "Coin selection call failed, defaulting to bitcoin");
                vec!["bitcoin".to_string()]
            }
        }
    }
}

/// Parse a model reply as a literal list of strings.
///
/// Accepts plain JSON arrays, markdown-fenced arrays, and Python-style
/// single-quoted lists (the strict prompt is advisory, not enforced).
pub fn parse_string_list(raw: &str) -> Option<Vec<String>> {
    let cleaned = strip_code_fence(raw);

    if let Ok(list) = serde_json::from_str::<Vec<String>>(cleaned) {
        return Some(list);
    }

    let requoted = cleaned.replace('\'', "\"");
    serde_json::from_str::<Vec<String>>(&requoted).ok()
}

pub(crate) fn strip_code_fence(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```python")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;

    #[test]
    fn test_parse_plain_json_list() {
        assert_eq!(
            parse_string_list(r#"["current_price", "top_coins"]"#),
            Some(vec!["current_price".to_string(), "top_coins".to_string()])
        );
    }

    #[test]
    fn test_parse_single_quoted_list() {
        assert_eq!(
            parse_string_list("['bitcoin', 'ethereum']"),
            Some(vec!["bitcoin".to_string(), "ethereum".to_string()])
        );
    }

    #[test]
    fn test_parse_fenced_list() {
        assert_eq!(
            parse_string_list("```json\n[\"historical_prices\"]\n```"),
            Some(vec!["historical_prices".to_string()])
        );
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert_eq!(parse_string_list("You should call current_price."), None);
        assert_eq!(parse_string_list("{\"functions\": []}"), None);
    }

    #[tokio::test]
    async fn test_analyze_happy_path() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            r#"["current_price"]"#,
            r#"["bitcoin", "ethereum"]"#,
        ]));
        let planner = PlannerAgent::new(llm);

        let plan = planner.analyze("current prices of bitcoin and ethereum").await;
        assert_eq!(plan.functions, vec!["current_price".to_string()]);
        assert_eq!(
            plan.coins,
            vec!["bitcoin".to_string(), "ethereum".to_string()]
        );
    }

    #[tokio::test]
    async fn test_analyze_malformed_replies_fall_back() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            "I think you need price data",
            "probably bitcoin?",
        ]));
        let planner = PlannerAgent::new(llm);

        let plan = planner.analyze("how is the market doing").await;
        assert!(plan.functions.is_empty());
        assert_eq!(plan.coins, vec!["bitcoin".to_string()]);
    }

    #[tokio::test]
    async fn test_analyze_llm_failure_falls_back() {
        // No scripted replies at all: both calls error out.
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let planner = PlannerAgent::new(llm);

        let plan = planner.analyze("anything").await;
        assert_eq!(plan, Plan::default());
    }
}
