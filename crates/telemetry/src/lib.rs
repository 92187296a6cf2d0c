//! Model catalog and cost estimation for Roost.
//!
//! The catalog is the single source of truth the router selects against:
//! per-million-token prices, context/output limits, a capability tier, and
//! feature flags for every model the dispatcher may target.

pub mod pricing;

pub use pricing::{
    MODEL_CATALOG, ModelEntry, catalog, cheapest, estimate_cost, find, models_for,
};
