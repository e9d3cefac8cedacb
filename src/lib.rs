//! Storefront order service.
//!
//! Keeps three facts consistent under concurrency and partial failure:
//! product stock, order totals/status, and the state of payments held by an
//! asynchronous gateway whose confirmations arrive out-of-band via signed
//! webhooks.
//!
//! ## Flows
//! - **Client-confirmed**: the checkout client submits a signed payment
//!   proof; a verified proof creates the order `PAID` with stock reserved in
//!   the same transaction.
//! - **Intent-first**: a remote payment intent is created before the order
//!   is persisted `PENDING`; stock reservation is deferred to the webhook
//!   reconciler at payment confirmation.

pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod inventory;
pub mod models;
pub mod pricing;
pub mod routes;
pub mod service;
pub mod signature;
pub mod store;
pub mod webhook;

pub use error::{OrderError, Result};
