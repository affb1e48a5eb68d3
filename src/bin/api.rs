use crypto_insight_agent::{
    api::start_server, controller::ControllerAgent, llm::GeminiClient, market::HttpMarketGateway,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    dotenv::dotenv().ok();

    let gemini_api_key = std::env::var("GEMINI_API_KEY").unwrap_or_else(|_| {
        eprintln!("GEMINI_API_KEY not set in .env; LLM calls will fail");
        String::new()
    });

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("Crypto Insight Agent - API server");
    info!("Port: {}", api_port);

    let llm = Arc::new(GeminiClient::new(gemini_api_key));
    let market = Arc::new(HttpMarketGateway::from_env());
    let controller = Arc::new(ControllerAgent::new(llm, market));

    info!("Controller initialized, starting API server");

    start_server(controller, api_port).await?;

    Ok(())
}
