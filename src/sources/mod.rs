//! Event sources and the generators that turn their events into
//! notifications.

pub mod example;
pub mod forge;

pub use example::{EXAMPLE_KEY, ExampleParser, MessageGenerator};
pub use forge::ForgeGenerator;
