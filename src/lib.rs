pub mod config;
pub mod export;
pub mod filter;
pub mod loader;
pub mod scorer;
pub mod similarity;
pub mod spectrum;

/// Data file extensions we support
pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv"];

/// Application name for XDG paths
pub const APP_NAME: &str = "specsim";
