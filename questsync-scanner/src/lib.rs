//! # questsync-scanner
//!
//! Locates the quest store inside a host-exported module graph and normalizes
//! its raw records into [`Quest`](questsync_core::Quest) values.
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use questsync_scanner::{graph, locate_quest_collection, normalize};
//!
//! fn poll(path: &std::path::Path) {
//!     if let Ok(graph) = graph::load_snapshot(path) {
//!         let quests = normalize(&locate_quest_collection(&graph), Utc::now());
//!         println!("{} quests", quests.len());
//!     }
//! }
//! ```

pub mod graph;
pub mod normalize;
pub mod raw;
pub mod scanner;

pub use graph::{HostModule, HostObject, JsonHostObject, ModuleGraph, RawRecord, ScanError};
pub use normalize::{normalize, Normalizer, ANIMATED_REWARD_ASSET, ANIMATED_REWARD_TYPE, CDN_BASE};
pub use scanner::{
    locate_quest_collection, locate_quest_store, LookupStrategy, QUEST_STORE_STRATEGIES,
};
