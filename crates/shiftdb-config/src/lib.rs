pub mod loader;
pub mod model;

pub use loader::{ConfigLoader, load_file, write_file};
pub use model::{AppConfig, DatabaseConfig, LogConfig, MigrateConfig};
