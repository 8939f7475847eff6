pub mod config;
pub mod handlers;
pub mod metrics;
pub mod observability;
pub mod server;
pub mod shutdown;

pub use config::{AppConfig, LoggingConfig, ServerConfig, StorageConfig};
pub use observability::init_tracing;
pub use server::{AppState, ConciergeServer, ServerBuilder, build_app};
pub use shutdown::Shutdown;
