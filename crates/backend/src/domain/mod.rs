//! Domain types shared by the daemon, the actors and the CLI.

pub mod config;
