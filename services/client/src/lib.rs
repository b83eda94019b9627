//! Polaredge Client Library
//!
//! The client observes routing intent, encodes it into a manifest, and
//! pushes it to the agent with acknowledgment and retry. The route source
//! sits behind a trait: the Kubernetes watch that feeds production is an
//! external collaborator, and a file-backed source ships for everything
//! else.

pub mod sender;
pub mod source;

pub use sender::{send_manifest, send_with_retries, SenderConfig, Undelivered};
pub use source::{FileSource, RouteSource};
