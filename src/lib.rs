//! Commons Engine: batch simulation jobs for the commons grazing game.

pub mod commons;
pub mod config;
pub mod error;
pub mod jobs;
pub mod store;
