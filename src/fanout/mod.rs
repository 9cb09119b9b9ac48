pub mod engine;

pub use engine::{FanoutEngine, FanoutError, FanoutReport};
