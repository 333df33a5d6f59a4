pub mod client;
pub mod mock;

pub use client::*;
pub use mock::*;
