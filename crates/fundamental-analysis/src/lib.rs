//! Cash-flow valuation: forward DCF, reverse DCF (implied growth) and margin
//! of safety. Pure functions, rates as fractions.

pub mod dcf;
pub mod engine;
pub mod implied_growth;

pub use dcf::{enterprise_value, project, DcfProjection};
pub use engine::ValuationEngine;
pub use implied_growth::{margin_of_safety, solve as solve_implied_growth, ImpliedGrowth};
