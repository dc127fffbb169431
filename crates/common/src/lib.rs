pub mod config;
pub mod error;
pub mod queue;
pub mod sink;
pub mod types;

pub use config::{
    AgentSettings, ComponentConfig, Config, PipelineConfig, PipelineSettings, QueueSettings,
};
pub use error::{Error, Result};
pub use queue::{bounded, Backpressure, Pop, Push, QueueReceiver, QueueSender, StopFlag};
pub use sink::OrderSink;
pub use types::*;
