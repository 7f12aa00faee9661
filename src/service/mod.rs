pub mod access;
pub mod crypto;
pub mod error;
pub mod history;
pub mod ids;
pub mod languages;
pub mod lifecycle;
pub mod models;
pub mod sqlite;
pub mod stats;
pub mod time;
pub mod tokens;

pub use access::Actor;
pub use error::{ErrorResponse, ServiceError, ServiceResult};
pub use lifecycle::PasteService;
pub use tokens::TokenService;
