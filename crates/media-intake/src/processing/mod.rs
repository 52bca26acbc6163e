//! Background processing: job queue, worker and external processor

mod job_queue;
mod processor;
mod worker;

pub use job_queue::{JobQueue, QueueStats, WaveOutcome, DEFAULT_QUEUE_CAPACITY};
pub use processor::{CommandProcessor, ProcessReport, Processor};
pub use worker::ProcessingWorker;
