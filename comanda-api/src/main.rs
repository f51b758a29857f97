use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use comanda_api::{app, worker, AppState};
use comanda_core::{OrderRepository, PaymentProcessor};
use comanda_order::MockPaymentProcessor;
use comanda_store::app_config::{Config, PaymentProvider};
use comanda_store::{DbClient, MemoryOrderRepository, PaypalProcessor, PgOrderRepository};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comanda_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Comanda API on port {}", config.server.port);

    let db = DbClient::from_config(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    let repo: Arc<dyn OrderRepository> = match &db {
        Some(db) => {
            db.migrate().await.context("Failed to run migrations")?;
            Arc::new(PgOrderRepository::new(db.pool.clone()))
        }
        None => {
            tracing::warn!("No database.url configured, orders are kept in memory");
            Arc::new(MemoryOrderRepository::new())
        }
    };

    let processor: Arc<dyn PaymentProcessor> = match config.payment.provider {
        PaymentProvider::Paypal => {
            let paypal = config
                .payment
                .paypal
                .clone()
                .context("payment.provider is paypal but [payment.paypal] is missing")?;
            Arc::new(PaypalProcessor::new(paypal))
        }
        PaymentProvider::Mock => {
            tracing::warn!("Using the mock payment processor");
            Arc::new(MockPaymentProcessor::new())
        }
    };

    let app_state = AppState::new(repo, processor, &config.payment.currency);

    if config.reconciliation.enabled {
        tokio::spawn(worker::start_reconciliation_worker(
            app_state.queries.clone(),
            app_state.payments.clone(),
            config.reconciliation.clone(),
        ));
    }

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    if let Some(db) = db {
        db.close().await;
    }
    Ok(())
}
