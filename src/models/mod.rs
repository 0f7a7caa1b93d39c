pub mod action_log;
pub mod order;
pub mod status;

pub use action_log::*;
pub use order::*;
pub use status::*;
