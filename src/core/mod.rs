pub mod checksum;
mod deletion;
pub mod diff;
pub mod engine;
pub mod file;
pub mod report;
pub mod scanner;
pub mod scheduler;
pub mod task;
mod walker;

pub use diff::{decide, RemoteView, Verdict};
pub use engine::{SyncBuilder, SyncEngine};
pub use file::{File, FileName, FileRegistry, FileStatus, Manifest};
pub use report::{Outcome, Summary, SyncEvent, SyncReport};
pub use scanner::{LocalScanner, ScanConfig};
pub use scheduler::{Scheduler, SchedulerEvent};
pub use task::{Task, TaskKind, TaskOutput};
