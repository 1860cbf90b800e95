//! Authenticating HTTP front end for Warden
//!
//! ```text
//!   request ──► authenticate ──► AuthInfo ──► policies(issuer) ──► match ──► handler
//!     │            │                                                  │
//!     │   OIDC (JWKS via federation)                        generator / secret store
//!     │   SPIFFE (client cert SAN)                                    │
//!     └── TLS peer chain as ClientCertChain          GeneratorState + credential ledger
//! ```

#![deny(missing_docs)]

pub mod auth;
pub mod cert;
pub mod error;
pub mod generators;
pub mod handlers;
pub mod secret_store;
pub mod server;

pub use auth::{
    AuthError, AuthInfo, AuthRequest, Authenticator, AuthenticatorRegistry, OidcAuthenticator,
    SpiffeAuthenticator,
};
pub use cert::{load_tls_config, ClientCertChain};
pub use error::{Error, Result};
pub use generators::{Generator, GeneratorRegistry, PasswordGenerator, Resource};
pub use secret_store::{InMemorySecretStore, KubeSecretStore, SecretStoreClient};
pub use server::{router, start_server, AppState, ServerConfig};
