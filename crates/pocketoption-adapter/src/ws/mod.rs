/*
[INPUT]:  Session credentials, endpoint pool, client configuration
[OUTPUT]: Realtime protocol client and its building blocks
[POS]:    WebSocket layer - module wiring
[UPDATE]: When adding modules or changing the public surface
*/

pub mod client;
mod dispatch;
pub mod endpoint;
pub mod frame;
pub mod pending;
pub mod time_sync;
mod tls;

pub use client::{ClientConfig, PocketOptionClient};
pub use endpoint::{Endpoint, EndpointPool};
pub use frame::Frame;
pub use pending::{PendingRequests, RequestHandle};
pub use time_sync::ServerClock;
