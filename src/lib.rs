pub mod channel;
pub mod cli;
pub mod load_config;
pub mod logging;
pub mod session;
pub mod telegram;

pub use cli::{run, Cli, Commands};
