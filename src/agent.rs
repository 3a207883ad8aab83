//! Event handling: the response pipeline, the dialogue router, and the
//! single worker that serializes them.

pub mod pipeline;
pub mod router;
pub mod worker;

pub use pipeline::{Response, ResponseOutcome, ResponsePipeline};
pub use router::{DialogueRouter, RouterDeps, RouterSettings};
pub use worker::{DEFAULT_QUEUE_CAPACITY, Delivery, EventHandler, Worker, WorkerHandle};
