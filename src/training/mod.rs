//! Online training: replay, mini-batch gradient steps, and the queue and
//! worker that decouple training from ingestion.

mod queue;
mod replay;
mod trainer;
mod worker;

pub use queue::TrainingQueue;
pub use replay::ReplayBuffer;
pub use trainer::{OnlineTrainer, SkipReason, UpdateResult};
pub use worker::TrainerWorker;
