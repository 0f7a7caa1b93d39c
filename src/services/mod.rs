pub mod cancel;
pub mod orders;
pub mod provider;
pub mod reconcile;
pub mod store;
pub mod topup;

pub use cancel::*;
pub use orders::*;
pub use provider::*;
pub use reconcile::*;
pub use store::*;
pub use topup::*;
