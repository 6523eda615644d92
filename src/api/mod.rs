// HTTP APIs: provider webhook, campaign admission, device capacity, admin

pub mod admin;
pub mod campaigns;
pub mod devices;
pub mod webhook;

pub use admin::{create_admin_router, AdminAppState};
pub use campaigns::{create_campaign_router, CampaignAppState};
pub use devices::{create_device_router, DeviceAppState};
pub use webhook::{create_webhook_router, WebhookAppState};
