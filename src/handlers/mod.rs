// handlers/mod.rs - two tiers
//
// Public (no tenant) → Protected (behind the tenant gate, /api/*)
pub mod protected;
pub mod public;
