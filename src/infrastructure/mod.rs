// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod sample_log;
pub mod simulated_device;
pub mod wire_codec;
