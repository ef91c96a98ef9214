pub mod config;
pub mod events;
pub mod graph;
pub mod runs;
pub mod store;
