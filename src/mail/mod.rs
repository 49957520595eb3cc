//! The remote mail backend boundary and the cached client facade.

pub mod api_types;
pub mod cached_client;
pub mod client;
pub mod types;
