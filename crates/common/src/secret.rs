//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use these types
//! for every credential the session client handles: the session token
//! passed to `connect`, TURN passwords and similar material.
//!
//! `SecretBox<T>` and `SecretString` implement `Debug` with redaction, so a
//! struct deriving `Debug` that holds a secret is safe to log via `{:?}` or
//! tracing fields. Secrets are zeroized when dropped.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct SessionCredentials {
//!     endpoint: String,
//!     token: SecretString,
//! }
//!
//! let creds = SessionCredentials {
//!     endpoint: "rooms.example.com:8080".to_string(),
//!     token: SecretString::from("eyJ0b2tlbiI6MX0="),
//! };
//!
//! // Safe: the token is redacted
//! println!("{:?}", creds);
//!
//! // Sending the token to the server is an explicit act
//! let raw: &str = creds.token.expose_secret();
//! # assert_eq!(raw, "eyJ0b2tlbiI6MX0=");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
