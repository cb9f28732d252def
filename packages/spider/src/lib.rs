//! The spider: a polite, concurrent crawler that discovers pages from seed
//! URLs and sitemaps, extracts structured data from HTML, and stores rows in
//! Postgres and embeddings in the vector store.

pub mod config;
pub mod extractor;
pub mod fetcher;
pub mod frontier;
pub mod orchestrator;
pub mod robots;
pub mod sitemap;
pub mod storage;

pub use config::Config;
pub use extractor::Extractor;
pub use fetcher::{Fetcher, FetchedPage};
pub use frontier::Frontier;
pub use orchestrator::{spawn_signal_monitor, Orchestrator};
pub use robots::{RobotsGate, RobotsRules};
pub use sitemap::SitemapSeeder;
pub use storage::{PageStore, PostgresStore, StorageWriter};
