// Capture queue & worker coordination service.
//
// Callers submit capture jobs over HTTP; worker processes claim them from
// the shared Postgres queue, run the external capture tool, validate its
// artifacts and report back via webhooks. See kernel/captures for the
// coordination core.

pub mod common;
pub mod config;
pub mod kernel;
pub mod server;

pub use config::*;
