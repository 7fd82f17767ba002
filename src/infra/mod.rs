//! Infrastructure adapters for storage, credentials, and platform publishing.

pub mod cache;
pub mod credentials;
pub mod publisher;
pub mod store;

pub use cache::{OAuthStateCache, PendingAuthorization};
pub use credentials::{InMemoryTokenStore, OAuthToken, TokenCredentialProvider, TokenStore};
pub use publisher::HttpPublisher;
pub use store::InMemoryPipelineStore;
