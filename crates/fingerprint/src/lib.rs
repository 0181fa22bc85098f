//! Fingerprint Engine - "not found" response detection
//!
//! Provides the 404 detector the scan bootstrap primes with every target
//! before any stage runs, and which plugins consult afterwards.

mod not_found;

pub use not_found::NotFoundFingerprint;
