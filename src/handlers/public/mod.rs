// Public handlers: no tenant context, never touch tenant data
pub mod health;

pub use health::{health, root};
