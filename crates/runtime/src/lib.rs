pub mod event_queue;
pub mod time_source;

pub use event_queue::*;
pub use time_source::*;
