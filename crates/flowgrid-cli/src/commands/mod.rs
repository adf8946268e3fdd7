pub mod arcs;
pub mod config;
