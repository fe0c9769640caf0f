pub mod box_client;
pub mod cli;
pub mod csv_input;
pub mod load_config;
pub mod logging;
pub mod report;

pub use cli::{run, Cli, Commands};
