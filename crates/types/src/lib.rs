pub mod cancellation;
pub mod events;
pub mod proposal;
pub mod service;

pub use cancellation::*;
pub use events::*;
pub use proposal::*;
pub use service::*;

/// The single negotiation protocol this producer recognizes.
pub const PROTOCOL_NAME: &str = "basic";
