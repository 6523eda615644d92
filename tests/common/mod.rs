// Shared fixtures for the HTTP integration tests.
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
};
use sendgate::app::Services;
use sendgate::auth::{compute_signature, SIGNATURE_HEADER};
use sendgate::campaign::{Campaign, CampaignStatus, CampaignStore};
use sendgate::config::{RuntimeConfig, SendgateConfig};
use sendgate::device::{Device, DeviceStatus, DeviceStore};
use sendgate::ledger::{DeliveryStore, QueuedMessage};
use sendgate::storage::Database;
use serde_json::Value;
use std::sync::{Arc, RwLock};

pub const SECRET: &str = "whsec_integration";
pub const ADMIN_TOKEN: &str = "admin-token";

/// Services on a fresh in-memory database with a webhook secret and admin token.
pub fn services() -> Services {
    let mut config = SendgateConfig::default();
    config.webhook.secret = Some(SECRET.to_string());
    config.webhook.ack_retry_attempts = 1;
    config.webhook.ack_retry_delay_ms = 5;
    config.server.admin_token = Some(ADMIN_TOKEN.to_string());
    services_with(config)
}

pub fn services_with(config: SendgateConfig) -> Services {
    let db = Database::in_memory().unwrap();
    let runtime = Arc::new(RwLock::new(RuntimeConfig::default()));
    Services::new(db, &config, runtime).unwrap()
}

pub fn seed_device(services: &Services, id: &str, session: &str, phone: Option<&str>) {
    services
        .devices
        .upsert(&Device {
            id: id.to_string(),
            phone_number: phone.map(str::to_string),
            display_name: id.to_string(),
            status: DeviceStatus::Connected,
            session_name: session.to_string(),
        })
        .unwrap();
}

pub fn campaign(id: &str, status: CampaignStatus, connection: Option<&str>, devices: &[&str]) -> Campaign {
    Campaign {
        id: id.to_string(),
        name: format!("Campaign {}", id),
        status,
        connection_id: connection.map(str::to_string),
        device_ids: devices.iter().map(|d| d.to_string()).collect(),
        message_variations: vec![],
        schedule: None,
    }
}

pub fn seed_campaign(services: &Services, campaign: &Campaign) {
    services.campaigns.insert(campaign).unwrap();
}

pub fn enqueue(services: &Services, campaign_id: &str, recipient: &str) {
    services
        .deliveries
        .enqueue(&QueuedMessage {
            campaign_id: campaign_id.to_string(),
            recipient: recipient.to_string(),
            device_id: None,
        })
        .unwrap();
}

/// Signed POST to the webhook endpoint.
pub fn webhook_request(body: &Value) -> Request<Body> {
    let raw = serde_json::to_vec(body).unwrap();
    let signature = compute_signature(SECRET.as_bytes(), &raw);
    Request::builder()
        .method("POST")
        .uri("/api/webhooks/whatsapp")
        .header("Content-Type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(raw))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
