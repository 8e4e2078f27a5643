//! # Gatehouse GitHub connector
//!
//! The GitHub driver of the gatehouse CI system: webhook intake, change
//! state tracking, merge gating, and result reporting against a single
//! GitHub or GitHub Enterprise endpoint.
//!
//! The connector:
//! - Serves the webhook payload endpoint and validates delivery signatures
//! - Translates raw webhook payloads into a closed set of trigger events
//! - Tracks pull requests as immutable change snapshots, kept current by
//!   the event stream itself
//! - Evaluates merge eligibility from reviews, required status checks,
//!   and branch protection
//! - Reports results back as commit statuses, check runs, comments,
//!   reviews, labels, and merges
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gatehouse_github::{ConnectionConfig, EventSink, GitHubConnection, TriggerEvent};
//!
//! struct PrintSink;
//!
//! #[async_trait::async_trait]
//! impl EventSink for PrintSink {
//!     async fn deliver(&self, event: TriggerEvent) {
//!         println!("{} ({})", event.kind(), event.delivery_id());
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectionConfig::load(None)?;
//! let connection = GitHubConnection::new(config)?;
//! connection.start(Arc::new(PrintSink)).await?;
//!
//! // Serve this router to receive webhook deliveries.
//! let router = connection.payload_router().await?;
//! # let _ = router;
//! # Ok(())
//! # }
//! ```

pub mod change;
pub mod change_cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod mergeability;
pub mod pipeline;
pub mod sha_pr_cache;
pub mod web;

// Re-export the types most consumers need at the crate root.
pub use change::{Change, ChangeNumber, PullRequestChange, RefChange, RefKind};
pub use config::ConnectionConfig;
pub use connection::{CheckRunReport, CommentRange, FileComment, GitHubConnection};
pub use error::{ConfigError, ConnectionError, PayloadError};
pub use events::TriggerEvent;
pub use pipeline::{EventPipeline, EventSink};
