//! Pipeline wiring
//!
//! ```text
//! RecordSource ─▶ ProcessingLoop ─▶ PipelineCoordinator
//!                                     │ normalize, buffer
//!                                     ├─▶ WindowBoard ─▶ Predictor
//!                                     └─▶ TrainingQueue ─▶ TrainerWorker
//! EventBus: rejections, invalidations, backpressure, divergence, publication
//! ```

mod board;
mod coordinator;
mod events;
pub mod processing_loop;
pub mod source;

pub use board::{SatelliteStatus, WindowBoard};
pub use coordinator::{
    load_schema, IngestOutcome, ModelStatus, PipelineCoordinator, PipelineError, PipelineHandle,
    PipelineStatus,
};
pub use events::{EventBus, EventCounts};
pub use processing_loop::{LoopStats, ProcessingLoop};
pub use source::{JsonLinesSource, RecordEvent, RecordSource, ReplaySource};
