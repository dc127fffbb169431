pub mod agent;
pub mod pipeline;
pub mod sink;
pub mod source;

pub use agent::{AgentBridge, Annotator, Cadence, DefaultAnnotator};
pub use pipeline::{Pipeline, PipelineControl, PipelineHandle};
pub use sink::{LogSink, SignalDispatcher};
pub use source::{parse_feed_line, CandleSource, ReplaySource};
