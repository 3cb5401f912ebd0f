//! Trustline: web-of-trust scoring and zap/payment resolution.
//!
//! The engine has two halves: trust classification over a bounded social
//! graph ([`scorer`], [`graph`], [`filter`]) and payment resolution for
//! Lightning zaps and ecash mints ([`resolver`], [`zap`], [`ledger`]).
//! Transport, HTTP, and settlement backends are traits the caller provides.

pub mod error;
pub mod filter;
pub mod gateway;
pub mod graph;
pub mod identity;
pub mod ledger;
pub mod resolver;
pub mod schema;
pub mod scorer;
pub mod zap;
