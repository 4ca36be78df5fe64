//! Authenticated HTTP request pipeline.
//!
//! Attaches a bearer credential to outbound requests, recovers from expired
//! credentials with a single shared refresh, and reports the end of a session
//! exactly once.

pub mod client;
pub mod config;
pub mod path;
pub mod session;

pub use client::{ApiClient, ApiProblem, AuthenticationLayer};
pub use session::{Claims, Credential, CredentialStore};
