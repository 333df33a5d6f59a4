pub mod agreement;
pub mod device;
pub mod store;

pub use agreement::*;
pub use device::*;
pub use store::*;
