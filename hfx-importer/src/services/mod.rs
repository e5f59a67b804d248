//! Services for hfx-importer
//!
//! - Device protocol client and chunk planning
//! - Import orchestration and the single-job manager
//! - Progress fan-out and the ingestion sink

pub mod chunk_planner;
pub mod import_manager;
pub mod import_orchestrator;
pub mod ingestion_sink;
pub mod progress_broadcaster;
pub mod rpc_client;

pub use chunk_planner::{plan_chunks, total_steps};
pub use import_manager::{CancelResult, ImportManager, StartError, StartedImport};
pub use import_orchestrator::ImportOrchestrator;
pub use ingestion_sink::{DiscardingSink, HttpIngestionSink, IngestCounters, IngestError, IngestionSink};
pub use progress_broadcaster::{ProgressBroadcaster, Subscription};
pub use rpc_client::{RpcClient, RpcError, ToolResult};
