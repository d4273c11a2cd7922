//! Service layer
//!
//! Services the worker supervisor depends on: result archiving, status
//! reporting, lifecycle notifications, worker titles and build counters.
//!
//! Collaborators with side effects outside the process are trait-based so
//! they can be swapped for no-ops or fakes.

mod archiver;
mod metrics;
mod notifier;
mod status;
mod title;

// Re-export traits
pub use notifier::Notifier;
pub use status::StatusReporter;
pub use title::ProcessTitle;

// Re-export implementations
pub use archiver::{
    ArchiveError, BACKUP_DIR_NAME, CHROOT_LOG_ARCHIVE, RSYNC_LOG_ARCHIVE, ResultArchiver,
};
pub use metrics::{BuildMetrics, MetricsSnapshot, serve as serve_metrics};
pub use notifier::{HttpNotifier, NoopNotifier, NotifyError};
pub use status::CommunicationError;
pub use title::TitleBoard;
