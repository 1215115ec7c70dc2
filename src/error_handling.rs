//! Error types for every subsystem, gathered in one place.

pub mod types;
