//! Payment gateway clients

use async_trait::async_trait;
use library_core::{config::GatewayConfig, Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Order to open at the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRequest {
    /// Amount in minor currency units
    #[serde(rename = "amount")]
    pub amount_minor: i64,
    /// ISO 4217 currency code
    pub currency: String,
    /// Merchant receipt reference
    pub receipt: String,
}

/// Order as reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    /// Gateway order id
    pub id: String,
    /// Amount in minor currency units
    pub amount: i64,
    /// Currency
    pub currency: String,
    /// Gateway status label
    pub status: String,
}

/// Order creation at the payment gateway
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open an order
    async fn create_order(&self, request: OrderRequest) -> Result<GatewayOrder>;
}

/// Gateway REST client
pub struct HttpGateway {
    base_url: String,
    key_id: String,
    key_secret: String,
    client: Client,
}

impl HttpGateway {
    /// Build a client from gateway settings
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build gateway client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
            client,
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn create_order(&self, request: OrderRequest) -> Result<GatewayOrder> {
        let url = format!("{}/v1/orders", self.base_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Order request failed: {}", e);
                Error::Gateway(format!("Order request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Gateway(format!(
                "Order creation failed with status {}: {}",
                status, body
            )));
        }

        let order = response
            .json::<GatewayOrder>()
            .await
            .map_err(|e| Error::Gateway(format!("Failed to parse order: {}", e)))?;

        info!(order_id = %order.id, amount = order.amount, currency = %order.currency, "Gateway order created");
        Ok(order)
    }
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Local gateway for development and tests.
///
/// Orders are accepted immediately; [`SandboxGateway::set_available`]
/// simulates an outage and `latency` a slow gateway.
#[derive(Debug, Clone)]
pub struct SandboxGateway {
    latency: Duration,
    available: Arc<AtomicBool>,
    orders: Arc<RwLock<HashMap<String, GatewayOrder>>>,
}

impl SandboxGateway {
    /// Gateway that answers immediately
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Gateway that waits `latency` before answering
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            available: Arc::new(AtomicBool::new(true)),
            orders: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Toggle simulated outage
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Order previously created here
    pub async fn order(&self, order_id: &str) -> Option<GatewayOrder> {
        self.orders.read().await.get(order_id).cloned()
    }

    /// Number of orders created
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }
}

impl Default for SandboxGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_order(&self, request: OrderRequest) -> Result<GatewayOrder> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if !self.available.load(Ordering::SeqCst) {
            warn!(receipt = %request.receipt, "Sandbox gateway unavailable");
            return Err(Error::Gateway("Sandbox gateway unavailable".to_string()));
        }
        if request.amount_minor <= 0 {
            return Err(Error::Gateway(format!(
                "Order amount must be positive, got {}",
                request.amount_minor
            )));
        }

        let order = GatewayOrder {
            id: format!("order_{}", Uuid::new_v4().simple()),
            amount: request.amount_minor,
            currency: request.currency,
            status: "created".to_string(),
        };
        self.orders
            .write()
            .await
            .insert(order.id.clone(), order.clone());

        info!(order_id = %order.id, amount = order.amount, "Sandbox order created");
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(amount_minor: i64) -> OrderRequest {
        OrderRequest {
            amount_minor,
            currency: "INR".to_string(),
            receipt: "fine_1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_sandbox_creates_orders() {
        let gateway = SandboxGateway::new();
        let order = gateway.create_order(request(5000)).await.unwrap();

        assert!(order.id.starts_with("order_"));
        assert_eq!(order.amount, 5000);
        assert_eq!(order.status, "created");
        assert_eq!(gateway.order(&order.id).await, Some(order));
    }

    #[tokio::test]
    async fn test_sandbox_outage() {
        let gateway = SandboxGateway::new();
        gateway.set_available(false);
        let err = gateway.create_order(request(5000)).await.unwrap_err();
        assert!(matches!(err, Error::Gateway(_)));
        assert_eq!(gateway.order_count().await, 0);

        gateway.set_available(true);
        assert!(gateway.create_order(request(5000)).await.is_ok());
    }

    #[test]
    fn test_order_request_wire_names() {
        let json = serde_json::to_value(request(1200)).unwrap();
        assert_eq!(json["amount"], 1200);
        assert_eq!(json["currency"], "INR");
        assert_eq!(json["receipt"], "fine_1");
    }

    #[test]
    fn test_http_gateway_trims_base_url() {
        let config = GatewayConfig {
            base_url: "https://api.example.test/".to_string(),
            ..GatewayConfig::default()
        };
        let gateway = HttpGateway::new(&config).unwrap();
        assert_eq!(gateway.base_url, "https://api.example.test");
    }
}
