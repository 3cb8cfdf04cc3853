//! Crawl orchestration
//!
//! This module contains the crawl engine's outer layer:
//! - the fetch collaborator and its reqwest implementation
//! - HTML extraction of text and links
//! - the capability registry for optional collaborators
//! - the coordinator that drives runs through the processing pipeline

mod coordinator;
mod fetcher;
mod page_processor;
mod parser;
pub mod registry;

pub use coordinator::{Coordinator, CrawlReport};
pub use fetcher::{build_http_client, parse_retry_after, FetchResponse, Fetcher, HttpFetcher};
pub use parser::{parse_html, ParsedPage};
pub use registry::{
    Capability, ChangeNotifier, Component, ComponentRegistry, Components, DocumentProcessor,
    PageRenderer,
};
