/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public PocketOption adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod error;
pub mod types;
pub mod ws;

// Re-export commonly used types from error
pub use error::{PocketOptionError, Result};

// Re-export all types
pub use types::*;

// Re-export commonly used types from ws
pub use ws::{
    ClientConfig,
    Endpoint,
    EndpointPool,
    Frame,
    PendingRequests,
    PocketOptionClient,
    RequestHandle,
    ServerClock,
};
