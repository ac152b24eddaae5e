//! Per-subcommand executors.

mod catalog;
mod job;
mod probe;
mod serve;

pub use catalog::CatalogCommand;
pub use job::JobCommand;
pub use probe::TestConnectionCommand;
pub use serve::ServeCommand;
