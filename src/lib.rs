pub mod catalog;
pub mod config;
pub mod db;
pub mod enrich;
pub mod identifiers;
pub mod ingest;
pub mod join;
pub mod normalize;
pub mod pipeline;
pub mod unify;

/// Application name for XDG paths
pub const APP_NAME: &str = "listenfold";
