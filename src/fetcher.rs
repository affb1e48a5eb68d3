//! Data fetcher
//!
//! Executes a plan against the market-data gateway, accumulating results
//! per semantic key, and prepares the fetched data for the reasoner:
//! narrowing by requested coin first, LLM relevance filtering as fallback.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::llm::{ChatMessage, LlmClient};
use crate::market::MarketGateway;
use crate::models::{DataStore, FetchOperation, Plan, RagEntry, RagRecord};
use crate::planner::strip_code_fence;

const DEFAULT_CURRENCY: &str = "usd";
const TOP_COINS_LIMIT: u32 = 10;

pub struct FetcherAgent {
    market: Arc<dyn MarketGateway>,
    llm: Arc<dyn LlmClient>,
}

impl FetcherAgent {
    pub fn new(market: Arc<dyn MarketGateway>, llm: Arc<dyn LlmClient>) -> Self {
        Self { market, llm }
    }

    /// Run every operation in the plan, in order. Unknown operation names
    /// and failed gateway calls are logged and skipped; they neither abort
    /// the remaining operations nor appear in `rag_data`.
    pub async fn fetch(&self, plan: &Plan, period_days: u32) -> DataStore {
        let mut store = DataStore::default();

        for name in &plan.functions {
            let Some(op) = FetchOperation::parse(name) else {
                warn!(operation = %name, "Unknown operation in plan, skipping");
                continue;
            };

            match self.dispatch(op, &plan.coins, period_days).await {
                Ok(data) => {
                    *store.slot_mut(op) = Some(data.clone());
                    store.source = Some(op.provider().to_string());
                    store.rag_data.push(RagRecord {
                        operation: op.name().to_string(),
                        result: data,
                    });
                }
                Err(e) => {
                    warn!(operation = %op, error = %e, "Operation failed, skipping");
                }
            }
        }

        info!(
            operations = store.rag_data.len(),
            "Fetch pass complete"
        );
        store
    }

    async fn dispatch(
        &self,
        op: FetchOperation,
        coins: &[String],
        period_days: u32,
    ) -> crate::Result<Value> {
        match op {
            FetchOperation::CurrentPrice => {
                self.market.current_price(coins, DEFAULT_CURRENCY).await
            }
            FetchOperation::HistoricalPrices => {
                // One gateway call per coin, collected under the coin id.
                let mut by_coin = Map::new();
                for coin in coins {
                    let series = self
                        .market
                        .historical_prices(coin, DEFAULT_CURRENCY, period_days, "daily")
                        .await?;
                    by_coin.insert(coin.clone(), series);
                }
                Ok(Value::Object(by_coin))
            }
            FetchOperation::TopCoins => {
                self.market.top_coins(TOP_COINS_LIMIT, DEFAULT_CURRENCY).await
            }
            FetchOperation::Provider2Latest => {
                self.market
                    .provider2_latest(TOP_COINS_LIMIT, DEFAULT_CURRENCY)
                    .await
            }
        }
    }

    /// Build the context entries the reasoner will see.
    ///
    /// Coin narrowing is the primary policy; when it leaves nothing, the
    /// LLM relevance filter runs over the un-narrowed candidates instead.
    pub async fn format_for_rag(
        &self,
        store: &DataStore,
        user_query: &str,
        selected_coins: &[String],
        period_days: u32,
    ) -> Vec<RagEntry> {
        let source = store.source.clone().unwrap_or_else(|| "unknown".to_string());

        let candidates: Vec<RagEntry> = store
            .populated()
            .into_iter()
            .map(|(key, value)| RagEntry {
                kind: key.to_string(),
                source: source.clone(),
                data: value.clone(),
            })
            .collect();

        let narrowed = narrow_by_coins(&candidates, selected_coins);
        if !narrowed.is_empty() {
            return narrowed;
        }

        self.relevance_filter(candidates, user_query, selected_coins, period_days)
            .await
    }

    /// Ask the model which candidate entries are pertinent to the question.
    /// Any call or parse failure returns the full candidate list unfiltered.
    async fn relevance_filter(
        &self,
        candidates: Vec<RagEntry>,
        user_query: &str,
        selected_coins: &[String],
        period_days: u32,
    ) -> Vec<RagEntry> {
        if candidates.is_empty() {
            return candidates;
        }

        let rendered = serde_json::to_string_pretty(&candidates)
            .unwrap_or_else(|_| "[]".to_string());

        let coins_line = if selected_coins.is_empty() {
            "not specified".to_string()
        } else {
            selected_coins.join(", ")
        };

        let prompt = format!(
            "You select which of the available data entries are needed to answer \
             a cryptocurrency question. Selection rules:\n\
             - Questions about trends, changes or volatility need historical data.\n\
             - Questions about current price, market cap or market leaders need current data.\n\
             - Comparison questions need the data for exactly the named coins.\n\
             - Respect any mentioned period when choosing historical data.\n\
             - When in doubt, keep both current and historical data.\n\
             Reply with ONLY a literal list of zero-based indices into the list \
             below, for example: [0, 2].\n\n\
             User question: {}\n\
             Requested coins: {}\n\
             Analysis period: {} days\n\n\
             Available data:\n{}",
            user_query, coins_line, period_days, rendered
        );

        let reply = match self.llm.chat(&[ChatMessage::user(prompt)]).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Relevance filter call failed, keeping all entries");
                return candidates;
            }
        };

        let Some(indices) = parse_index_list(&reply) else {
            warn!(raw = %reply, "Could not parse relevance indices, keeping all entries");
            return candidates;
        };

        indices
            .into_iter()
            .filter_map(|i| usize::try_from(i).ok())
            .filter(|&i| i < candidates.len())
            .map(|i| candidates[i].clone())
            .collect()
    }
}

/// Narrow coin-keyed entries to the requested coins. Entries whose data is
/// not keyed by coin pass through unchanged; entries that narrow to nothing
/// are dropped. An empty coin filter disables narrowing entirely.
pub fn narrow_by_coins(entries: &[RagEntry], selected_coins: &[String]) -> Vec<RagEntry> {
    if selected_coins.is_empty() {
        return entries.to_vec();
    }

    entries
        .iter()
        .filter_map(|entry| match entry.data.as_object() {
            Some(map) => {
                let kept: Map<String, Value> = map
                    .iter()
                    .filter(|(coin, _)| selected_coins.iter().any(|c| c == *coin))
                    .map(|(coin, data)| (coin.clone(), data.clone()))
                    .collect();

                if kept.is_empty() {
                    None
                } else {
                    Some(RagEntry {
                        kind: entry.kind.clone(),
                        source: entry.source.clone(),
                        data: Value::Object(kept),
                    })
                }
            }
            None => Some(entry.clone()),
        })
        .collect()
}

/// Parse a model reply as a literal list of integers.
fn parse_index_list(raw: &str) -> Option<Vec<i64>> {
    serde_json::from_str::<Vec<i64>>(strip_code_fence(raw)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::llm::ScriptedLlm;
    use async_trait::async_trait;
    use serde_json::json;

    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Gateway double: canned payloads, optional per-operation failure.
    struct MockGateway {
        fail_historical: bool,
    }

    impl MockGateway {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                fail_historical: false,
            })
        }

        fn failing_historical() -> Arc<Self> {
            Arc::new(Self {
                fail_historical: true,
            })
        }
    }

    #[async_trait]
    impl MarketGateway for MockGateway {
        async fn current_price(&self, coin_ids: &[String], _currency: &str) -> crate::Result<Value> {
            let mut map = Map::new();
            for coin in coin_ids {
                map.insert(coin.clone(), json!({"usd": 100.0, "usd_24h_change": 1.5}));
            }
            Ok(Value::Object(map))
        }

        async fn historical_prices(
            &self,
            _coin_id: &str,
            _currency: &str,
            _days: u32,
            _interval: &str,
        ) -> crate::Result<Value> {
            if self.fail_historical {
                return Err(AgentError::MarketDataError("timeout".to_string()));
            }
            Ok(json!({"prices": [[1700000000000i64, 100.0]]}))
        }

        async fn top_coins(&self, _limit: u32, _currency: &str) -> crate::Result<Value> {
            Ok(json!([{"id": "bitcoin", "market_cap_rank": 1}]))
        }

        async fn provider2_latest(&self, _limit: u32, _currency: &str) -> crate::Result<Value> {
            Ok(json!([{"symbol": "BTC", "cmc_rank": 1}]))
        }
    }

    /// Gateway double that counts every call it receives.
    #[derive(Default)]
    struct CountingGateway {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketGateway for CountingGateway {
        async fn current_price(&self, coin_ids: &[String], _currency: &str) -> crate::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut map = Map::new();
            for coin in coin_ids {
                map.insert(coin.clone(), json!({"usd": 100.0}));
            }
            Ok(Value::Object(map))
        }

        async fn historical_prices(
            &self,
            _coin_id: &str,
            _currency: &str,
            _days: u32,
            _interval: &str,
        ) -> crate::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"prices": [[1700000000000i64, 100.0]]}))
        }

        async fn top_coins(&self, _limit: u32, _currency: &str) -> crate::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!([{"id": "bitcoin", "market_cap_rank": 1}]))
        }

        async fn provider2_latest(&self, _limit: u32, _currency: &str) -> crate::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!([{"symbol": "BTC", "cmc_rank": 1}]))
        }
    }

    fn plan(functions: &[&str], coins: &[&str]) -> Plan {
        Plan {
            functions: functions.iter().map(|s| s.to_string()).collect(),
            coins: coins.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn fetcher(gateway: Arc<MockGateway>, replies: Vec<&str>) -> FetcherAgent {
        FetcherAgent::new(gateway, Arc::new(ScriptedLlm::new(replies)))
    }

    #[tokio::test]
    async fn test_fetch_stores_results_under_semantic_keys() {
        let agent = fetcher(MockGateway::ok(), vec![]);
        let store = agent
            .fetch(&plan(&["current_price", "top_coins"], &["bitcoin"]), 7)
            .await;

        assert!(store.current_prices.is_some());
        assert!(store.top_coins.is_some());
        assert!(store.historical_prices.is_none());
        assert_eq!(store.source.as_deref(), Some("coingecko"));
        assert_eq!(store.rag_data.len(), 2);
        assert_eq!(store.rag_data[0].operation, "current_price");
    }

    #[tokio::test]
    async fn test_fetch_skips_unknown_operations() {
        let agent = fetcher(MockGateway::ok(), vec![]);
        let store = agent
            .fetch(
                &plan(&["compute_sentiment", "current_price"], &["bitcoin"]),
                7,
            )
            .await;

        // The unknown name contributes nothing; the valid one still runs.
        assert_eq!(store.rag_data.len(), 1);
        assert_eq!(store.rag_data[0].operation, "current_price");
    }

    #[tokio::test]
    async fn test_fetch_skips_failed_operation_and_continues() {
        let agent = fetcher(MockGateway::failing_historical(), vec![]);
        let store = agent
            .fetch(
                &plan(&["historical_prices", "current_price"], &["bitcoin"]),
                7,
            )
            .await;

        assert!(store.historical_prices.is_none());
        assert!(store.current_prices.is_some());
        assert_eq!(store.rag_data.len(), 1);
        assert_eq!(store.rag_data[0].operation, "current_price");
    }

    #[tokio::test]
    async fn test_fetch_source_tracks_latest_provider() {
        let agent = fetcher(MockGateway::ok(), vec![]);
        let store = agent
            .fetch(&plan(&["current_price", "provider2_latest"], &["bitcoin"]), 7)
            .await;

        assert_eq!(store.source.as_deref(), Some("coinmarketcap"));
    }

    #[tokio::test]
    async fn test_repeated_fetch_reaches_gateway_every_time() {
        // No caching layer sits between the fetcher and the gateway: two
        // identical fetch passes hit the provider again and, with upstream
        // unchanged, come back structurally identical.
        let gateway = Arc::new(CountingGateway::default());
        let agent = FetcherAgent::new(gateway.clone(), Arc::new(ScriptedLlm::new(vec![])));
        let p = plan(&["current_price", "top_coins"], &["bitcoin"]);

        let first = agent.fetch(&p, 7).await;
        let second = agent.fetch(&p, 7).await;

        assert_eq!(gateway.calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }

    #[test]
    fn test_narrow_with_empty_filter_keeps_everything() {
        let entries = vec![RagEntry {
            kind: "current_prices".to_string(),
            source: "coingecko".to_string(),
            data: json!({"bitcoin": {"usd": 1.0}, "ethereum": {"usd": 2.0}}),
        }];

        let narrowed = narrow_by_coins(&entries, &[]);
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].data.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_narrow_keeps_only_selected_coins() {
        let entries = vec![RagEntry {
            kind: "current_prices".to_string(),
            source: "coingecko".to_string(),
            data: json!({"bitcoin": {"usd": 1.0}, "ethereum": {"usd": 2.0}, "solana": {"usd": 3.0}}),
        }];

        let narrowed = narrow_by_coins(&entries, &["bitcoin".to_string(), "ethereum".to_string()]);
        assert_eq!(narrowed.len(), 1);
        let map = narrowed[0].data.as_object().unwrap();
        assert_eq!(map.len(), 2);
        assert!(map.contains_key("bitcoin"));
        assert!(!map.contains_key("solana"));
    }

    #[test]
    fn test_narrow_passes_non_coin_keyed_entries() {
        let entries = vec![RagEntry {
            kind: "top_coins".to_string(),
            source: "coingecko".to_string(),
            data: json!([{"id": "bitcoin"}]),
        }];

        let narrowed = narrow_by_coins(&entries, &["ethereum".to_string()]);
        assert_eq!(narrowed.len(), 1);
        assert!(narrowed[0].data.is_array());
    }

    #[test]
    fn test_narrow_drops_entries_that_empty_out() {
        let entries = vec![RagEntry {
            kind: "current_prices".to_string(),
            source: "coingecko".to_string(),
            data: json!({"bitcoin": {"usd": 1.0}}),
        }];

        assert!(narrow_by_coins(&entries, &["cardano".to_string()]).is_empty());
    }

    #[tokio::test]
    async fn test_format_returns_narrowed_entries_without_filter_call() {
        let agent = fetcher(MockGateway::ok(), vec![]);
        let store = agent.fetch(&plan(&["current_price"], &["bitcoin"]), 7).await;

        // ScriptedLlm has no replies; reaching the filter would error out,
        // so a clean narrowed result proves the call was never made.
        let entries = agent
            .format_for_rag(&store, "bitcoin price", &["bitcoin".to_string()], 7)
            .await;

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, "current_prices");
        assert_eq!(entries[0].source, "coingecko");
    }

    #[tokio::test]
    async fn test_format_falls_back_to_relevance_filter() {
        let agent = fetcher(MockGateway::ok(), vec!["[0]"]);
        let store = agent.fetch(&plan(&["current_price"], &["bitcoin"]), 7).await;

        // Narrowing for a coin that was never fetched empties the list;
        // the filter then runs over the un-narrowed candidates.
        let entries = agent
            .format_for_rag(&store, "cardano outlook", &["cardano".to_string()], 7)
            .await;

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, "current_prices");
    }

    #[tokio::test]
    async fn test_relevance_filter_drops_out_of_range_indices() {
        let agent = fetcher(MockGateway::ok(), vec!["[0, 7, -1]"]);
        let store = agent.fetch(&plan(&["current_price"], &["bitcoin"]), 7).await;

        let entries = agent
            .format_for_rag(&store, "cardano outlook", &["cardano".to_string()], 7)
            .await;

        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_relevance_filter_parse_failure_keeps_all() {
        let agent = fetcher(MockGateway::ok(), vec!["the first one looks right"]);
        let store = agent.fetch(&plan(&["current_price"], &["bitcoin"]), 7).await;

        // Narrowing empties the coin-keyed entry, the filter runs, and its
        // unparseable reply falls back to the full candidate list.
        let entries = agent
            .format_for_rag(&store, "cardano outlook", &["cardano".to_string()], 7)
            .await;

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, "current_prices");
    }

    #[tokio::test]
    async fn test_empty_store_formats_to_nothing() {
        let agent = fetcher(MockGateway::ok(), vec![]);
        let store = DataStore::default();

        let entries = agent.format_for_rag(&store, "anything", &[], 7).await;
        assert!(entries.is_empty());
    }
}
