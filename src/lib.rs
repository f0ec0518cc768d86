//! orderflow - event-driven order workflow services on NATS JetStream.
//!
//! Four small domain services (orders, payments, notifications, analytics)
//! are wired into a saga by a declarative route table: durable streams
//! retain the events, durable consumer groups load-balance delivery across
//! competing instances, and a dispatcher invokes the bound handler once per
//! event.

pub mod api;
pub mod config;
pub mod gateway;
pub mod routes;
pub mod services;
pub mod store;
