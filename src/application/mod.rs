// Application layer - ingestion pipeline and the transport seam
pub mod inbox;
pub mod pipeline;
pub mod transport;
