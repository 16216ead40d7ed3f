pub mod endpoints;
pub mod iteration;
pub mod openapi;
pub mod organize;
pub mod replicate;
pub mod services;
pub mod tree_builder;

pub use endpoints::*;
pub use iteration::*;
pub use openapi::*;
pub use organize::*;
pub use replicate::*;
pub use services::*;
pub use tree_builder::*;
