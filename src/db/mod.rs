pub mod connection;
pub mod memory;
pub mod models;
pub mod pagination;
pub mod repositories;
pub mod store;

pub use connection::*;
pub use memory::*;
pub use models::*;
pub use pagination::*;
pub use repositories::*;
pub use store::*;
