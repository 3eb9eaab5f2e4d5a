//! Herald HTTP surface: real-time gateway, enqueue routes, health and queue introspection.

pub mod routes;
pub mod state;
