//! Capability tiers, keyed by purpose
//!
//! ```text
//! coding:      tier_1 ──▶ tier_2 ──▶ tier_3 ──▶ tier_4
//! content:     tier_1 ──▶ tier_2
//! validation:  tier_1
//! ```
//!
//! Later tiers are larger, slower and costlier. The escalation engine only
//! walks a ladder as far as it has to.

pub mod catalog;
pub mod config;

pub use catalog::{CatalogError, Tier, TierCatalog, TierRef, MAX_CHAIN_LEN};
pub use config::{CatalogConfig, TierConfig};
