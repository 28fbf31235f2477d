// Domain-specific error types
pub mod errors;

// Normalized vendor-agnostic message
pub mod message;

// Port interfaces
pub mod ports;

// Schema -> record registry
pub mod records;

// Instrument series configuration and queries
pub mod series;
