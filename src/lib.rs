//! Crypto Insight Agent
//!
//! A multi-stage query-answering pipeline for cryptocurrency questions:
//! - Planner: turns a free-text question into a structured fetch plan
//! - Fetcher: executes the plan against market-data providers
//! - Reasoner: synthesizes an analytical answer from the filtered data
//! - Controller: LLM-driven state machine routing between the stages
//!
//! LOOP: QUESTION → THINK → (PLAN | FETCH | REASON)* → DONE

pub mod api;
pub mod controller;
pub mod error;
pub mod fetcher;
pub mod llm;
pub mod market;
pub mod models;
pub mod planner;
pub mod reasoner;

pub use error::Result;

// Re-export common types
pub use controller::ControllerAgent;
pub use models::*;
