//! Node configuration
//!
//! Built from defaults, an optional TOML file and the `NODE_*` environment
//! variables, then passed to the server and CLI explicitly.

pub mod settings;

pub use settings::Config;
