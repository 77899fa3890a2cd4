pub mod config;
pub mod dashboard;
pub mod discovery;
pub mod errors;
pub mod logging;
pub mod parser;
pub mod tunnel;
pub mod vcs;
pub mod watcher;
