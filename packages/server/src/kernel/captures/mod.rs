//! Capture jobs: queueing, claiming, execution and retention.
//!
//! The modules here are the coordination core of the service:
//! - [`capture`]: the job record and its status machine
//! - [`store`]: repository interface + the Postgres claim protocol
//! - [`tool`]: bounded adapter around the external capture tool
//! - [`validate`]: post-run artifact validation
//! - [`worker`]: the per-process claim/run/finalize loop
//! - [`notifier`]: best-effort webhook delivery
//! - [`supervisor`]: the worker-process population
//! - [`sweeper`]: mtime-based retention of working directories

pub mod capture;
pub mod notifier;
pub mod store;
pub mod supervisor;
pub mod sweeper;
pub mod testing;
pub mod tool;
pub mod validate;
pub mod worker;

pub use capture::{Capture, CaptureOutcome, CaptureStatus};
pub use notifier::{CallbackNotifier, WebhookNotifier};
pub use store::{CaptureStore, PostgresCaptureStore, QueueCounts};
pub use tool::{CaptureTool, CaptureToolCli, ToolInvocation, ToolRun};
pub use worker::{CaptureWorker, CaptureWorkerConfig};
