//! Realtime interview gateway.
//!
//! Hosts the `/api/realtime` WebSocket endpoint, runs one interview session
//! per connection, relays presence notices between connections and exposes
//! the `/api/config` upstream check.

pub mod connection;
pub mod events;
pub mod orchestrator;
pub mod server;
pub mod services;
pub mod state;
pub mod validate;

pub use server::{REALTIME_PATH, build_router, start_gateway};
pub use services::{OpenAiServiceFactory, ServiceFactory, ServiceOverrides, Services};
pub use state::GatewayState;
