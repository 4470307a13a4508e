//! Entitlement & progress engine for the e-learning portal: the catalog
//! model (courses, chapters, sections, lessons), the per-student enrollment
//! ledger, pure access/progress evaluation, and the access-request
//! lifecycle. The HTTP layer, identity and persistence live outside; this
//! crate defines the contracts they plug into.

pub mod access;
pub mod catalog;
pub mod config;
pub mod error;
pub mod ledger;
pub mod request;
pub mod response;
pub mod utils;

pub use error::Error;
