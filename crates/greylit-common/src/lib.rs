//! greylit-common — Shared error type, sandboxed HTTP client and run configuration.

pub mod error;
pub mod sandbox;
pub mod search_config;

pub use error::{GreylitError, Result};
pub use sandbox::SandboxClient;
pub use search_config::{
    DedupeConfig, ProjectConfig, QuerySpec, ScoringConfig, SearchConfig, SeedSite,
    SerpApiConfig, SourceToggles, StopConfig,
};
