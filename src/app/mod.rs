//! Application-level wiring

pub mod state;

pub use state::AppState;
