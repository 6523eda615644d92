//! Service wiring shared by the binary and the integration tests.

use crate::api::{
    create_admin_router, create_campaign_router, create_device_router, create_webhook_router,
    AdminAppState, CampaignAppState, DeviceAppState, WebhookAppState,
};
use crate::campaign::{CampaignStore, DeviceLocks, ExclusivityGuard, SqliteCampaignStore};
use crate::capacity::CapacityCalculator;
use crate::config::{SendgateConfig, SharedRuntimeConfig};
use crate::device::{DeviceStore, SqliteDeviceStore};
use crate::dispatch::{Dispatcher, HandlerDeps, HandlerRegistry};
use crate::event::metrics::IngestionMetrics;
use crate::ledger::{DeliveryLedger, DeliveryStore, SqliteDeliveryStore};
use crate::rate_limit::WebhookRateLimiter;
use crate::storage::Database;
use anyhow::{Context, Result};
use axum::http::Method;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Every long-lived component, built once at startup.
#[derive(Clone)]
pub struct Services {
    pub devices: Arc<dyn DeviceStore>,
    pub campaigns: Arc<dyn CampaignStore>,
    pub deliveries: Arc<dyn DeliveryStore>,
    pub dispatcher: Dispatcher,
    pub guard: Arc<ExclusivityGuard>,
    pub calculator: Arc<CapacityCalculator>,
    pub runtime_config: SharedRuntimeConfig,
    pub rate_limiter: Arc<WebhookRateLimiter>,
    pub webhook_secret: Option<String>,
    pub admin_token: Option<String>,
}

impl Services {
    pub fn new(
        db: Database,
        config: &SendgateConfig,
        runtime_config: SharedRuntimeConfig,
    ) -> Result<Self> {
        let devices: Arc<dyn DeviceStore> = Arc::new(SqliteDeviceStore::new(db.clone()));
        let campaigns: Arc<dyn CampaignStore> = Arc::new(SqliteCampaignStore::new(db.clone()));
        let deliveries: Arc<dyn DeliveryStore> = Arc::new(SqliteDeliveryStore::new(db));

        let ledger = Arc::new(DeliveryLedger::new(
            Arc::clone(&deliveries),
            config.webhook.retry_policy(),
        ));
        let registry = HandlerRegistry::standard(HandlerDeps {
            devices: Arc::clone(&devices),
            ledger,
        });
        let dispatcher = Dispatcher::new(registry, IngestionMetrics::new());

        let guard = Arc::new(ExclusivityGuard::new(
            Arc::clone(&campaigns),
            Arc::new(DeviceLocks::new()),
        ));

        let tz = config
            .capacity
            .timezone()
            .context("Failed to resolve capacity timezone")?;
        let calculator = Arc::new(CapacityCalculator::new(
            Arc::clone(&campaigns),
            Arc::clone(&devices),
            Arc::clone(&deliveries),
            config.capacity.policy(),
            tz,
        ));

        Ok(Self {
            devices,
            campaigns,
            deliveries,
            dispatcher,
            guard,
            calculator,
            runtime_config,
            rate_limiter: Arc::new(WebhookRateLimiter::new()),
            webhook_secret: config.webhook.secret.clone(),
            admin_token: config.server.admin_token.clone(),
        })
    }

    /// All HTTP routes.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT])
            .allow_headers(Any);

        Router::new()
            .merge(create_webhook_router(WebhookAppState {
                dispatcher: self.dispatcher.clone(),
                webhook_secret: self.webhook_secret.clone(),
                runtime_config: Arc::clone(&self.runtime_config),
                rate_limiter: Arc::clone(&self.rate_limiter),
            }))
            .merge(create_campaign_router(CampaignAppState {
                campaigns: Arc::clone(&self.campaigns),
                guard: Arc::clone(&self.guard),
            }))
            .merge(create_device_router(DeviceAppState {
                calculator: Arc::clone(&self.calculator),
            }))
            .merge(create_admin_router(AdminAppState {
                runtime_config: Arc::clone(&self.runtime_config),
                admin_token: self.admin_token.clone(),
            }))
            .layer(cors)
    }
}
