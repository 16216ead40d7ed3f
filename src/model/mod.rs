pub mod common;
pub mod endpoint;
pub mod param;
pub mod service;
pub mod user_context;

pub use common::*;
pub use endpoint::*;
pub use param::*;
pub use service::*;
pub use user_context::*;
