pub mod config;
pub mod date;
pub mod event;
pub mod task;

pub use config::{AcquisitionConfig, EngineConfig, ExtractionConfig, MergerConfig};
pub use date::{DatePrecision, ParsedDateInfo};
pub use event::{EntityRef, EventSourceInfo, RawEvent, SourceRef, SourceType, TimelineEvent};
pub use task::{
    document_fingerprint, viewpoint_fingerprint, DataSourcePreference, Task, TaskStatus,
    Viewpoint, ViewpointKind,
};
