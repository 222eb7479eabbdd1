pub mod data;
pub mod io;

pub use data::ClientConfig;
pub use io::ConfigError;
