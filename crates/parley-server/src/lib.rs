//! # parley-server
//!
//! Real-time messaging hub and its HTTP/WebSocket surface.
//!
//! - Hub: single coordination loop owning the online registry, persisting
//!   and fanning out chat events
//! - WebSocket connections: bounded send queue, read/write pumps, ping/pong liveness
//! - Authentication of the upgrade request (session table or JWT)
//! - Axum router: `/ws`, `/health`, `/presence`, `/metrics`
//! - Settings loading, Prometheus metrics and graceful shutdown

#![deny(unsafe_code)]

pub mod auth;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod server;
pub mod settings;
pub mod shutdown;
pub mod websocket;
