mod loader;
mod schema;

pub use loader::{load_from_env_or_file, validate};
pub use schema::Config;
