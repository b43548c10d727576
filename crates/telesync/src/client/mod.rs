pub mod api;
pub mod tokens;

pub use api::RemoteStoreClient;
pub use tokens::AuthToken;
