// Execution gates (time window, job quota, composites)
pub mod gate;

// Extractor contract and shared symbol resolution
pub mod extractor;

// Service groups and extractor lifecycle
pub mod orchestrator;

// Fan-out of normalized messages to sinks
pub mod router;
