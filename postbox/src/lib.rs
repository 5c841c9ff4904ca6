//! The postbox worker: configuration, command line and the commands it runs.

pub mod cli;
pub mod config;
pub mod controller;
pub mod mailq;
