//! Library crate for live-quiz-back, exposing modules for binaries and integration tests.

pub mod client;
pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod routes;
pub mod scoring;
pub mod services;
pub mod state;
pub mod timer;
