pub mod access_key_auth;

pub use access_key_auth::{access_key_auth, AuthenticatedKey};
