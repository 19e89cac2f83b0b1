//! The reload engine.
//!
//! A reload of package `P` runs as one transaction on a worker thread:
//! 1. Resolve every package depending on `P` (and on requested extras)
//! 2. Classify their loaded units into a working set
//! 3. Deactivate plugins and evict the working set from the registry
//! 4. Re-execute plugins through an installed [`ReloadingImporter`], which
//!    reloads each reachable unit once, in natural import order
//! 5. Reactivate plugins, sweep units nothing imported, restore on failure
//! 6. Wait for the host's plugin pipeline to drain

mod barrier;
mod importer;
mod orchestrator;
mod status;
mod supervisor;
mod tracer;

pub use barrier::{BARRIER_PREFIX, BarrierOutcome, synchronize};
pub use importer::ReloadingImporter;
pub use orchestrator::{Phase, ReloadOrchestrator, ReloadReport, ReloadRequest, ReloadStatus};
pub use status::{LogStatus, StatusSink};
pub use supervisor::{ReloadHandle, Reloader, TransactionLock, TransactionPermit};
pub use tracer::{DepthGuard, DepthMeter, trace_line};
