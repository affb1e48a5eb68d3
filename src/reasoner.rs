//! Answer synthesizer
//!
//! Turns the filtered context entries plus the original question into prose.
//! A model failure becomes a descriptive string result, never an error.

use std::sync::Arc;
use tracing::{error, info};

use crate::llm::{ChatMessage, LlmClient};
use crate::models::RagEntry;

pub struct ReasonerAgent {
    llm: Arc<dyn LlmClient>,
}

impl ReasonerAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn generate(&self, user_query: &str, context: &[RagEntry]) -> String {
        let context_str =
            serde_json::to_string_pretty(context).unwrap_or_else(|_| "[]".to_string());

        let system = "You are an expert on cryptocurrencies and financial markets. \
                      Use only the context data below to answer the user's question. \
                      If the data is insufficient, say so instead of inventing facts. \
                      If data exists only for a shorter period than requested, answer \
                      for that period and say which period you used. Be clear and \
                      analytical, with a short conclusion at the end.";

        let prompt = format!(
            "Context data:\n{}\n\nUser question:\n{}\n\nAnswer:",
            context_str, user_query
        );

        match self
            .llm
            .chat(&[ChatMessage::system(system), ChatMessage::user(prompt)])
            .await
        {
            Ok(answer) => {
                info!(length = answer.len(), "Reasoner produced answer");
                answer
            }
            Err(e) => {
                error!(error = %e, "Answer generation failed");
                format!("The answer could not be generated: {}", e)
            }
        }
    }
}
