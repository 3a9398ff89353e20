//! # halo-server
//!
//! Cloud relay between smart glasses and third-party apps (TPAs).
//!
//! - `WebSocket` gateways: `/glasses-ws` and `/tpa-ws`
//! - Connection health monitor: liveness probes, idle eviction, periodic stats
//! - Sessions: one actor per glasses user with reconnect backoff and one-time teardown
//! - Subscription router: per-session pub/sub between glasses events and TPAs
//! - Dashboard orchestrator: multi-tenant content queues composed into throttled layouts
//! - HTTP endpoints: health check and Prometheus metrics

#![deny(unsafe_code)]

pub mod config;
pub mod dashboard;
pub mod display;
pub mod health;
pub mod metrics;
pub mod router;
pub mod server;
pub mod services;
pub mod session;
pub mod shutdown;
pub mod websocket;
