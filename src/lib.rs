use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use analytics::RiskMetrics;
use instrument::PriceQuote;
use portfolio::{Holding, PortfolioView};

pub mod analytics;
pub mod api;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod instrument;
pub mod market;
pub mod portfolio;
pub mod seed;
pub mod server;
pub mod simulation;
pub mod store;
pub mod user;
pub mod utils;
pub mod valuation;

/// Messages a client sends over `/ws`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    SubscribePortfolio { user_id: u64, portfolio_id: u64 },
    SubscribePrices,
    Ping,
    #[serde(other)]
    Unknown,
}

/// Messages pushed to a client over `/ws`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected { message: String },
    Pong,
    PriceUpdate { data: Vec<PriceQuote> },
    PortfolioUpdate { data: PortfolioUpdate },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioUpdate {
    pub portfolio: PortfolioView,
    pub holdings: Vec<Holding>,
    pub risk_metrics: Option<RiskMetrics>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_messages() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "subscribe_portfolio",
            "userId": 1,
            "portfolioId": 2
        }))
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::SubscribePortfolio {
                user_id: 1,
                portfolio_id: 2
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"dance"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unknown);

        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn test_server_messages() {
        assert_eq!(
            serde_json::to_value(ServerMessage::Pong).unwrap(),
            json!({"type": "pong"})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::Connected {
                message: "hi".to_string()
            })
            .unwrap(),
            json!({"type": "connected", "message": "hi"})
        );
        let msg = serde_json::to_value(ServerMessage::PriceUpdate { data: vec![] }).unwrap();
        assert_eq!(msg, json!({"type": "price_update", "data": []}));
    }
}
