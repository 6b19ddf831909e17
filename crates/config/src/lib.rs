pub mod env;
pub mod tracing_init;

pub use env::{AppConfig, GitHubSettings};
pub use tracing_init::init_tracing;
