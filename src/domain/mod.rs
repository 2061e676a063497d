// Domain layer - core data models and their invariants
pub mod connection;
pub mod history;
pub mod logging;
pub mod sample;
