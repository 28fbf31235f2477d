pub mod catalog;
pub mod core;
pub mod databento;
pub mod factory;
pub mod observability;
pub mod onyx;
pub mod sinks;

pub use catalog::SeriesCatalog;
pub use factory::ServiceFactory;
