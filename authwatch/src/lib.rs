//! Policy service for Postfix that spots authenticated sessions using
//! compromised credentials.
//!
//! Each request is checked against a shared cache of known compromised
//! accounts, then against a DNS reputation service by client address and by
//! recipient. A hit answers with the configured action and notifies once.

pub mod action;
pub mod cache;
pub mod check;
pub mod policy;
pub mod reputation;

#[cfg(test)]
mod test_support;

pub use check::{Checker, Zones};
