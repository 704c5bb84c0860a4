pub mod advisor;
pub mod app;
pub mod breaker;
pub mod classify;
pub mod client;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod model;
pub mod monitor;
pub mod server;
pub mod state;

#[cfg(test)]
mod testing;
