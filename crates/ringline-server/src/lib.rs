//! # ringline-server
//!
//! The relay side of ringline: accepts one agent connection and any number
//! of operator connections over WebSocket, coordinates call lifecycle state
//! between them, and wakes sleeping operator clients through a best-effort
//! Web Push channel.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `registry` | live connections classified by role, heartbeat bookkeeping |
//! | `calls` | per-call state machine, cancelable ring timers, bounded retention |
//! | `coordinator` | call orchestration: initiate/accept/reject/respond/timeout |
//! | `websocket` | upgrade, per-connection read/write loops, message dispatch |
//! | `push` | VAPID-authenticated Web Push fallback |
//! | `server` | Axum router, status endpoints, graceful shutdown |
//!
//! All registry and call-store state is mutated behind a single mutex owned
//! by the coordinator; concurrent physical connections are multiplexed onto
//! that one sequential context and never race each other.

pub mod calls;
pub mod config;
pub mod coordinator;
pub mod push;
pub mod registry;
pub mod server;
pub mod websocket;
