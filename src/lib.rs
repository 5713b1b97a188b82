pub mod artifacts;
pub mod config;
pub mod context;
pub mod errors;
pub mod gates;
pub mod orchestrator;
pub mod phase;
pub mod prompts;
pub mod review;
pub mod session;
pub mod stage;
pub mod tracker;
pub mod ui;
