pub mod allocator;
pub mod cache;
pub mod config;
pub mod loader;
pub mod pipeline;
pub mod planner;
pub mod request;
pub mod residency;
pub mod resolver;
pub mod source;
pub mod stats;

#[cfg(test)]
mod test_support;

pub use allocator::*;
pub use cache::*;
pub use config::*;
pub use loader::*;
pub use pipeline::*;
pub use planner::*;
pub use request::*;
pub use residency::*;
pub use resolver::*;
pub use source::*;
pub use stats::*;
