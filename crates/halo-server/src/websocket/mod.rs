//! `WebSocket` gateways, connection tracking, and the health monitor.

pub mod connection;
pub mod glasses;
pub mod handler;
pub mod monitor;
pub mod socket;
pub mod tpa;
