//! F1 News - a Formula 1 news aggregator
//!
//! Fetches several sources concurrently (a JSON envelope API and RSS feeds),
//! merges them into one deduplicated, recency-ordered list, tracks which
//! articles the user has already seen and notifies about new ones.

pub mod aggregator;
pub mod article;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod notify;
pub mod parser;
pub mod pipeline;
pub mod routes;
pub mod scheduler;
pub mod seen;
pub mod source;
