//! Identity core for the marketplace backend
//!
//! Account identity, stateless access credentials with server-side refresh
//! records, third-party identity linking, and single-use email tokens. The
//! HTTP surface lives in the `marketplace-api` app; everything here is
//! transport-agnostic.

pub mod config;
pub mod credentials;
pub mod error;
pub mod guard;
pub mod linker;
pub mod model;
pub mod password;
pub mod rate_limit;
pub mod refresh;
pub mod rotation;
pub mod service;
pub mod sessions;
pub mod store;
pub mod vault;

pub use config::{AuthConfig, ConfigError, CookieConfig, SameSite};
pub use credentials::{extract_bearer_token, CredentialSigner, IssuedCredential};
pub use error::{AuthError, AuthResult, RefreshRejection, StoreError};
pub use guard::{AuthenticatedUser, RequestGuard};
pub use linker::{IdentityLinker, LinkOutcome, ProviderIdentity};
pub use model::{
    Account, AccountId, AuditAction, AuditEntry, AuthMethod, ClientInfo, Provider, Role,
    TokenPurpose,
};
pub use rate_limit::{GovernorRateLimiter, PgRateLimiter, RateLimiter};
pub use rotation::{CredentialPair, RotationEngine};
pub use service::{AuditPage, IdentityService, Pagination};
pub use sessions::SessionInvalidator;
pub use store::{IdentityStore, Isolation, MemoryStore, PgStore, StoreTx};
pub use vault::TokenVault;
