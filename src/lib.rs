//! pixdrop - PIX checkout and payment reconciliation for a chat storefront
//!
//! Buyers pay for digital products through a chat bot; the gateway confirms
//! payments through signed webhooks. This library holds the order store, the
//! gateway and messaging clients, webhook authentication and the reconciliation
//! engine that turns an approved payment into exactly one content delivery.

pub mod bot;
pub mod checkout;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod id;
pub mod messaging;
pub mod models;
pub mod payments;
pub mod reconcile;
pub mod signature;
