// handlers/protected/mod.rs - handlers behind the tenant gate
//
// Every handler here runs inside a request scope holding exactly one
// tenant context. Reads need nothing more; writes need an authenticated
// principal with at least the member role, deletes need admin.
pub mod auth;
pub mod batch;
pub mod data;
