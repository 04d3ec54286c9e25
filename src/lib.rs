pub mod config;
pub mod cost;
pub mod envelope;
pub mod errors;
pub mod gate;
pub mod idea;
pub mod layout;
pub mod manifest;
pub mod pipeline;
pub mod review;
pub mod state;
pub mod store;
pub mod studio;
pub mod ui;
