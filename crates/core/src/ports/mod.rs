mod chain_source;
mod price;
mod repository;

pub use chain_source::*;
pub use price::*;
pub use repository::*;
