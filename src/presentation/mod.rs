// Presentation layer - read-only handles for a front end
pub mod monitor_state;
