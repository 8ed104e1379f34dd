// src/models/mod.rs

//! Domain models for the review monitor.

mod config;
mod item;

// Re-export all public types
pub use config::{
    Config, ListingSelectors, MessageStyle, NotifierConfig, ScheduleConfig, SourceConfig,
    StoreConfig, UpdatePolicy,
};
pub use item::{Item, identity};
