//! Capture inbound webhook requests as durable, queryable records.
//!
//! A request runs through [`capture::capture`]: headers are filtered by the
//! profile's policy, uploaded files are written to blob storage and
//! described in the payload, and one [`types::WebhookCall`] is stored.
//! Processing failures are recorded later with [`lifecycle`], and old calls
//! are removed by [`prune::Pruner`].

pub mod attachments;
pub mod blob;
pub mod capture;
pub mod config;
pub mod error;
pub mod headers;
pub mod http_server;
pub mod lifecycle;
pub mod prune;
pub mod store;
pub mod types;

pub use capture::{capture, InboundRequest};
pub use config::{ClientConfig, WebhookConfig};
pub use error::{CaptureError, ConfigError, StorageError};
pub use types::WebhookCall;
