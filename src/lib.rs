//! Song deck library - shared modules for the canonicalize, build-deck and
//! merge-candidates binaries.

pub mod collapse;
pub mod config;
pub mod deck;
pub mod display;
pub mod identity;
pub mod manual_queue;
pub mod merge_review;
pub mod models;
pub mod normalize;
pub mod pool;
pub mod progress;
pub mod registry;
pub mod safety;
pub mod store;
pub mod years;
