//! Freight job lifecycle: stage derivation, clearance and delivery notes,
//! payment requests and vendor settlement.
//!
//! Stage is never stored. [`StageResolver`] derives it from the job's
//! documents, BLs, delivery-note coverage and payments each time a
//! [`JobView`] is built, and every write re-validates against the store
//! rather than the caller's view.

pub mod access;
pub mod clearance;
pub mod domain;
pub mod engine;
pub mod error;
pub mod events;
pub mod money;
pub mod payments;
pub mod stage;
pub mod store;

#[cfg(test)]
mod tests;

pub use access::{Actor, AuthorizationProvider, Capability, Role, RoleCapabilities};
pub use clearance::{
    ClearanceError, ClearanceWorkflow, DeliveryNoteRequest, DeliveryNoteReversalReport,
    RescheduleRequest, ScheduleRequest, SignedCopyUpload,
};
pub use domain::{
    BillOfLading, BlId, ClearanceSchedule, ClearanceSignal, ClearanceTarget, Container,
    ContainerId, ContainerSize, DeliveryNote, DeliveryNoteId, DeliveryNoteStatus, Document,
    DocumentId, DocumentType, InvoiceDetails, Job, JobId, JobStatus, NewPayment, PaidBy, Payment,
    PaymentId, PaymentStatus, ScheduleId, ScheduleStatus, ShipmentType, TransportMode,
    VehicleInfo,
};
pub use engine::{
    ActionKind, ActionOutcome, ActionReceipt, EngineSettings, JobAction, JobLifecycleEngine,
    JobView, SettlementOutcome,
};
pub use error::{EngineError, ErrorKind};
pub use events::{
    EventSink, EventType, LifecycleEvent, MemoryEventSink, SinkError, TracingEventSink,
};
pub use money::{Money, MoneyOverflow, MoneyParseError};
pub use payments::{
    BucketError, ConfirmResult, PaymentCsvImporter, PaymentError, PaymentImportError,
    PaymentTypeCatalog, PaymentWorkflow, SettlementBucket, SettlementDetails, SettlementReceipt,
};
pub use stage::{
    ClearanceSignalPolicy, Gate, JobSnapshot, PaymentSummary, Requirement, SignalConflict, Stage,
    StageResolution, StageResolver,
};
pub use store::{EntityStore, JobUpdate, MemoryEntityStore, StoreError};
