//! Spigot - Domain model
//!
//! Types shared by the sources, the parsers and the downstream stash:
//! raw frames as they come off a connection, parsed syslog records, and
//! the collaborator seams (`Stasher`, `Reporter`) the ingestion core
//! hands records to.
//!
//! # Design Principles
//!
//! - **Pooled raw frames**: `RawMessage` wraps a reusable `BytesMut` so the
//!   hot path does not allocate per frame
//! - **Opaque connection ids**: per-connection state is keyed by `ConnId`,
//!   never by the socket itself
//! - **One error channel**: the stash reports fatal and non-fatal failures
//!   through a single `StashError`

mod message;
mod stash;
mod syslog;

pub use message::{ConnId, FullMessage, ListenerInfo, RawMessage};
pub use stash::{ReportError, Reporter, StashError, Stasher};
pub use syslog::{Priority, SdElement, SyslogMessage};
