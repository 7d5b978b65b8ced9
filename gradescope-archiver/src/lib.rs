pub mod cli;
pub mod load_config;
pub mod session;

pub use cli::{run, Cli, Commands};
