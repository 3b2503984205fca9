//! Bearer token verification against the identity provider's published keys.

mod jwks;
mod verifier;

pub use jwks::{JwksClient, KeyFetchError, KeyProvider, SigningKeySet};
pub use verifier::{bearer_token, AuthError, Identity, TokenVerifier};
