use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use comanda_core::error::ProcessorError;
use comanda_core::models::format_minor_units;
use comanda_core::payment::PaymentProcessor;

use crate::app_config::PaypalConfig;

/// Tokens are refreshed this long before PayPal says they expire.
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct CheckoutOrder {
    id: String,
    status: String,
}

/// PayPal Orders v2 adapter. `authorize` creates a checkout order the buyer
/// approves out of band; `capture` collects it.
pub struct PaypalProcessor {
    client: reqwest::Client,
    config: PaypalConfig,
    token: Mutex<Option<CachedToken>>,
}

impl PaypalProcessor {
    pub fn new(config: PaypalConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, ProcessorError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_MARGIN {
                return Ok(token.access_token.clone());
            }
        }

        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.config.api_base))
            .basic_auth(&self.config.client_id, Some(&self.config.secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(transport)?;
        let token: TokenResponse = read_json(response).await?;
        debug!("Fetched PayPal access token valid for {}s", token.expires_in);

        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(access_token)
    }
}

/// Storefront URL for the buyer redirects. Local development hosts are not
/// accepted by PayPal, so they are replaced with a placeholder.
pub fn return_url(front_host: &str) -> String {
    if front_host == "localhost" {
        "https://example.com".to_string()
    } else {
        front_host.to_string()
    }
}

pub fn checkout_body(amount_cents: i64, currency: &str, config: &PaypalConfig) -> Value {
    let url = return_url(&config.front_host);
    json!({
        "intent": "CAPTURE",
        "purchase_units": [{
            "amount": {
                "currency_code": currency,
                "value": format_minor_units(amount_cents),
            }
        }],
        "application_context": {
            "brand_name": config.brand_name,
            "return_url": url,
            "cancel_url": format!("{}/cancel.html", url),
        }
    })
}

fn transport(e: reqwest::Error) -> ProcessorError {
    ProcessorError::Transport(e.to_string())
}

async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ProcessorError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProcessorError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ProcessorError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl PaymentProcessor for PaypalProcessor {
    async fn authorize(&self, amount_cents: i64, currency: &str) -> Result<String, ProcessorError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!("{}/v2/checkout/orders", self.config.api_base))
            .bearer_auth(token)
            .json(&checkout_body(amount_cents, currency, &self.config))
            .send()
            .await
            .map_err(transport)?;
        let order: CheckoutOrder = read_json(response).await?;
        info!("PayPal order {} created with status {}", order.id, order.status);
        Ok(order.id)
    }

    async fn capture(&self, reference: &str) -> Result<String, ProcessorError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!("{}/v2/checkout/orders/{}/capture", self.config.api_base, reference))
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await
            .map_err(transport)?;
        let order: CheckoutOrder = read_json(response).await?;
        info!("PayPal order {} capture returned {}", order.id, order.status);
        Ok(order.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(front_host: &str) -> PaypalConfig {
        PaypalConfig {
            client_id: "id".into(),
            secret: "secret".into(),
            api_base: "https://api-m.sandbox.paypal.com".into(),
            front_host: front_host.into(),
            brand_name: "Comanda".into(),
        }
    }

    #[test]
    fn test_localhost_is_replaced() {
        assert_eq!(return_url("localhost"), "https://example.com");
        assert_eq!(return_url("https://shop.example.mx"), "https://shop.example.mx");
    }

    #[test]
    fn test_checkout_body() {
        let body = checkout_body(15000, "MXN", &config("localhost"));
        assert_eq!(body["intent"], "CAPTURE");
        assert_eq!(body["purchase_units"][0]["amount"]["value"], "150.00");
        assert_eq!(body["purchase_units"][0]["amount"]["currency_code"], "MXN");
        assert_eq!(body["application_context"]["cancel_url"], "https://example.com/cancel.html");
        assert_eq!(body["application_context"]["brand_name"], "Comanda");
    }
}
