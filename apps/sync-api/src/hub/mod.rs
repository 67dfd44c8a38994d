pub mod client;
pub mod envelope;
pub mod policy;
pub mod registry;
pub mod server;

pub use policy::{AllowAll, RoomPolicy};
