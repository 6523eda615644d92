// Webhook event model and payload schemas
pub mod event;

// Event routing and handlers
pub mod dispatch;

// Persistence
pub mod storage;
pub mod device;
pub mod campaign;
pub mod ledger;

// Daily send quota
pub mod capacity;

// Signatures, admin tokens, rate limiting
pub mod auth;
pub mod rate_limit;

pub mod config;

// HTTP APIs
pub mod api;
pub mod app;
