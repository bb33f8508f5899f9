//! Socket mesh between the data-server and render-server domains.

pub mod dial;
pub mod m2n;
pub mod registry;
pub mod rendezvous;
pub mod socket;

pub use m2n::MToNSocketConnection;
