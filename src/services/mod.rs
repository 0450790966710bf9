//! Services behind the request pipeline.
//!
//! ARCHITECTURE
//! ============
//! `identity` defines the verifier seam and owns the process-wide registry;
//! `firebase` is the provider-backed implementation. Route middleware only
//! sees `IdentityVerifier`.

pub mod firebase;
pub mod identity;
