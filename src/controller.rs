//! Controller - the state machine at the heart of the pipeline
//!
//! Repeatedly asks the LLM which stage to run next, parses the reply into
//! a discrete action, dispatches planner / fetcher / reasoner, and tracks
//! per-query session state until a terminal decision (or the step cap).

use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::fetcher::FetcherAgent;
use crate::llm::{ChatMessage, LlmClient};
use crate::market::MarketGateway;
use crate::models::{DataStore, NextAgent, Plan, QueryOutcome};
use crate::planner::PlannerAgent;
use crate::reasoner::ReasonerAgent;
use crate::Result;

/// Hard bound on controller iterations. The model is expected to reach
/// `done` in three or four steps; anything past this is a stuck loop.
const MAX_STEPS: u32 = 12;

const DEFAULT_PERIOD_DAYS: u32 = 7;

/// Per-query working state. Constructed fresh for every `process_query`
/// call so concurrent requests never observe each other's progress.
#[derive(Debug, Default)]
pub struct SessionState {
    pub session_id: Uuid,
    pub user_query: String,
    pub last_action: Option<&'static str>,
    pub plan: Option<Plan>,
    pub fetched: Option<DataStore>,
    pub final_answer: Option<String>,
}

impl SessionState {
    fn new(user_query: &str) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_query: user_query.to_string(),
            ..Self::default()
        }
    }

    /// Names of the stages that have stored output so far, in stage order.
    fn known_keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.plan.is_some() {
            keys.push("planner");
        }
        if self.fetched.is_some() {
            keys.push("fetcher");
        }
        if self.final_answer.is_some() {
            keys.push("final_answer");
        }
        keys
    }

    fn take_outcome(&mut self) -> QueryOutcome {
        match self.final_answer.take() {
            Some(answer) => QueryOutcome::Answered { answer },
            None => QueryOutcome::NoAnswer,
        }
    }
}

/// Orchestrates planner → fetcher → reasoner under LLM-driven routing.
/// Stateless across queries; collaborators are shared and reentrant.
pub struct ControllerAgent {
    llm: Arc<dyn LlmClient>,
    planner: PlannerAgent,
    fetcher: FetcherAgent,
    reasoner: ReasonerAgent,
}

impl ControllerAgent {
    pub fn new(llm: Arc<dyn LlmClient>, market: Arc<dyn MarketGateway>) -> Self {
        Self {
            planner: PlannerAgent::new(llm.clone()),
            fetcher: FetcherAgent::new(market, llm.clone()),
            reasoner: ReasonerAgent::new(llm.clone()),
            llm,
        }
    }

    /// Process one user question end to end.
    ///
    /// Never returns an error: anything escaping the loop body is caught
    /// here, logged, and converted into a `Failed` outcome.
    pub async fn process_query(&self, user_query: &str) -> QueryOutcome {
        let mut state = SessionState::new(user_query);
        info!(
            session_id = %state.session_id,
            query = %user_query,
            "Received user query"
        );

        match self.run_loop(&mut state).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    session_id = %state.session_id,
                    error = %e,
                    "Query processing failed"
                );
                QueryOutcome::Failed {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }
            }
        }
    }

    async fn run_loop(&self, state: &mut SessionState) -> Result<QueryOutcome> {
        let mut instruction = "Begin processing the user's query.".to_string();

        for step in 1..=MAX_STEPS {
            let decision_text = self.think(state, &instruction).await?;
            let decision = NextAgent::parse(&decision_text);
            info!(
                session_id = %state.session_id,
                step,
                ?decision,
                raw = %decision_text,
                "Controller decision"
            );

            match decision {
                NextAgent::Planner => {
                    let plan = self.planner.analyze(&state.user_query).await;
                    state.plan = Some(plan);
                    state.last_action = Some("analyzed_query");
                    instruction =
                        "The planner finished analyzing the query. What should run next?"
                            .to_string();
                }

                NextAgent::Fetcher => {
                    let plan = state.plan.clone().unwrap_or_default();
                    let period = self.extract_period(&state.user_query).await;
                    info!(session_id = %state.session_id, period_days = period, "Derived period");

                    let store = self.fetcher.fetch(&plan, period).await;
                    state.fetched = Some(store);
                    state.last_action = Some("fetched_data");
                    instruction =
                        "The fetcher collected the data. What should run next?".to_string();
                }

                NextAgent::Reasoner => {
                    // No stored plan means no coin filter; narrowing stays off.
                    let coins = state
                        .plan
                        .as_ref()
                        .map(|p| p.coins.clone())
                        .unwrap_or_default();
                    let store = state.fetched.clone().unwrap_or_default();
                    let period = self.extract_period(&state.user_query).await;

                    let context = self
                        .fetcher
                        .format_for_rag(&store, &state.user_query, &coins, period)
                        .await;
                    let answer = self.reasoner.generate(&state.user_query, &context).await;

                    state.final_answer = Some(answer);
                    state.last_action = Some("generated_answer");
                    instruction =
                        "The reasoner produced the answer. Finish the process.".to_string();
                }

                NextAgent::Done => {
                    info!(session_id = %state.session_id, "Processing finished");
                    return Ok(state.take_outcome());
                }

                NextAgent::Unrecognized => {
                    // Ambiguity is terminal, not a retry condition.
                    warn!(
                        session_id = %state.session_id,
                        raw = %decision_text,
                        "Unrecognized controller decision, terminating"
                    );
                    return Ok(state.take_outcome());
                }
            }
        }

        warn!(
            session_id = %state.session_id,
            max_steps = MAX_STEPS,
            "Step budget exhausted without a terminal decision"
        );
        Ok(QueryOutcome::Inconclusive)
    }

    /// One "what next?" turn: current instruction plus a compact state
    /// rendering go to the model; the reply names the next stage.
    async fn think(&self, state: &SessionState, instruction: &str) -> Result<String> {
        let system = "You are the controller of a multi-agent pipeline that answers \
                      cryptocurrency questions. Decide which stage must run next:\n\
                      - planner (analyzes the query, selects operations and coins)\n\
                      - fetcher (pulls the selected data from market APIs)\n\
                      - reasoner (writes the final analytical answer)\n\
                      A typical run is planner, then fetcher, then reasoner, then done.\n\
                      Reply with exactly one word: planner, fetcher, reasoner, or done.";

        let context = format!(
            "Last action: {}\nKnown data: {:?}\nInstruction: {}",
            state.last_action.unwrap_or("none"),
            state.known_keys(),
            instruction
        );

        self.llm
            .chat(&[ChatMessage::system(system), ChatMessage::user(context)])
            .await
    }

    /// Derive the analysis period in days from the question. The model must
    /// reply with a single positive integer; anything else defaults to 7.
    pub(crate) async fn extract_period(&self, user_query: &str) -> u32 {
        let prompt = format!(
            "Determine the time period the user wants cryptocurrency data for. \
             Reply with a single number: the count of days, nothing else.\n\
             Examples: 'over a week' -> 7, 'last month' -> 30, \
             'this quarter' -> 90, 'for a year' -> 365.\n\n\
             User question: {}",
            user_query
        );

        let reply = match self.llm.chat(&[ChatMessage::user(prompt)]).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Period extraction call failed, defaulting");
                return DEFAULT_PERIOD_DAYS;
            }
        };

        // Parsing straight into u32 rejects negatives and anything past
        // u32::MAX; the zero guard covers the remaining non-positive case.
        match reply.trim().parse::<u32>() {
            Ok(days) if days > 0 => days,
            _ => {
                warn!(raw = %reply, "Unusable period reply, defaulting");
                DEFAULT_PERIOD_DAYS
            }
        }
    }
}
