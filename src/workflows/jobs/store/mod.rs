//! Storage seam for the job lifecycle engine.
//!
//! The engine never owns persistence. Everything it reads or writes goes
//! through [`EntityStore`], and the multi-row writes it depends on
//! (delivery-note issuance and reversal, payment batches) are expressed as
//! single commits carrying the statuses the caller expects to find. A store
//! must apply such a commit entirely or not at all.
//!
//! Job rows are guarded by [`Job::revision`]. Any write touching a job or the
//! records its stage is derived from advances the revision, so a job update
//! built from an earlier read is refused once anything relevant has moved.

mod memory;

pub use memory::MemoryEntityStore;

use serde::{Deserialize, Serialize};

use super::domain::{
    BillOfLading, BlId, ClearanceSchedule, Container, ContainerId, DeliveryNote, DeliveryNoteId,
    DeliveryNoteStatus, Document, DocumentId, Job, JobId, Payment, PaymentId, PaymentStatus,
    ScheduleId, ScheduleStatus,
};

/// Error enumeration for store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} already exists")]
    Duplicate { entity: &'static str, id: String },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} {id} changed concurrently: expected {expected}, found {found}")]
    StaleWrite {
        entity: &'static str,
        id: String,
        expected: String,
        found: String,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleFilter {
    pub job_id: Option<JobId>,
    pub status: Option<ScheduleStatus>,
    pub delivery_note_id: Option<DeliveryNoteId>,
}

impl ScheduleFilter {
    pub fn for_job(job_id: &JobId) -> Self {
        Self {
            job_id: Some(job_id.clone()),
            ..Self::default()
        }
    }

    pub fn awaiting() -> Self {
        Self {
            status: Some(ScheduleStatus::Scheduled),
            ..Self::default()
        }
    }

    pub fn matches(&self, schedule: &ClearanceSchedule) -> bool {
        self.job_id.as_ref().map_or(true, |id| &schedule.job_id == id)
            && self.status.map_or(true, |status| schedule.status == status)
            && self
                .delivery_note_id
                .as_ref()
                .map_or(true, |id| schedule.delivery_note_id.as_ref() == Some(id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryNoteFilter {
    pub job_id: Option<JobId>,
    pub status: Option<DeliveryNoteStatus>,
}

impl DeliveryNoteFilter {
    pub fn for_job(job_id: &JobId) -> Self {
        Self {
            job_id: Some(job_id.clone()),
            status: None,
        }
    }

    pub fn pending() -> Self {
        Self {
            job_id: None,
            status: Some(DeliveryNoteStatus::Pending),
        }
    }

    pub fn matches(&self, note: &DeliveryNote) -> bool {
        self.job_id.as_ref().map_or(true, |id| note.covers_job(id))
            && self.status.map_or(true, |status| note.status == status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFilter {
    pub job_id: Option<JobId>,
    pub status: Option<PaymentStatus>,
    pub vendor: Option<String>,
}

impl PaymentFilter {
    pub fn for_job(job_id: &JobId) -> Self {
        Self {
            job_id: Some(job_id.clone()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: PaymentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, payment: &Payment) -> bool {
        self.job_id.as_ref().map_or(true, |id| &payment.job_id == id)
            && self.status.map_or(true, |status| payment.status == status)
            && self
                .vendor
                .as_ref()
                .map_or(true, |vendor| payment.vendor.eq_ignore_ascii_case(vendor))
    }
}

/// Schedule row to write, guarded by the status the writer read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleUpdate {
    pub schedule: ClearanceSchedule,
    pub expected_status: ScheduleStatus,
}

/// Payment row to write, guarded by the status the writer read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentUpdate {
    pub payment: Payment,
    pub expected_status: PaymentStatus,
}

/// Job row to write, guarded by the revision the writer read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobUpdate {
    pub job: Job,
    pub expected_revision: u64,
}

impl JobUpdate {
    /// Guard on the revision carried by `job` as it was read.
    pub fn new(job: Job) -> Self {
        Self {
            expected_revision: job.revision,
            job,
        }
    }
}

/// Everything written when a delivery note is issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryNoteCommit {
    pub note: DeliveryNote,
    pub schedules: Vec<ScheduleUpdate>,
    pub jobs: Vec<JobUpdate>,
}

/// Compensating write that undoes a [`DeliveryNoteCommit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryNoteReversal {
    pub note_id: DeliveryNoteId,
    pub schedules: Vec<ScheduleUpdate>,
    pub jobs: Vec<JobUpdate>,
}

/// Storage abstraction so the workflows can be exercised in isolation.
pub trait EntityStore: Send + Sync {
    fn insert_job(&self, job: Job) -> Result<Job, StoreError>;
    fn job(&self, id: &JobId) -> Result<Option<Job>, StoreError>;
    /// Writes the job if its revision still matches and returns the stored row.
    fn update_job(&self, update: JobUpdate) -> Result<Job, StoreError>;
    /// Removes the job with its dependent rows and drops it from any
    /// delivery note naming it.
    fn delete_job(&self, id: &JobId) -> Result<(), StoreError>;
    fn jobs(&self) -> Result<Vec<Job>, StoreError>;

    fn insert_bill_of_lading(&self, bl: BillOfLading) -> Result<(), StoreError>;
    fn bills_of_lading(&self, job_id: &JobId) -> Result<Vec<BillOfLading>, StoreError>;
    fn update_bill_of_lading(&self, bl: BillOfLading) -> Result<(), StoreError>;
    fn delete_bill_of_lading(&self, id: &BlId) -> Result<(), StoreError>;

    fn insert_container(&self, container: Container) -> Result<(), StoreError>;
    fn containers(&self, job_id: &JobId) -> Result<Vec<Container>, StoreError>;
    fn delete_container(&self, id: &ContainerId) -> Result<(), StoreError>;

    fn insert_document(&self, document: Document) -> Result<(), StoreError>;
    fn documents(&self, job_id: &JobId) -> Result<Vec<Document>, StoreError>;
    fn delete_document(&self, id: &DocumentId) -> Result<(), StoreError>;

    fn insert_schedule(&self, schedule: ClearanceSchedule) -> Result<(), StoreError>;
    fn schedule(&self, id: &ScheduleId) -> Result<Option<ClearanceSchedule>, StoreError>;
    fn schedules(&self, filter: &ScheduleFilter) -> Result<Vec<ClearanceSchedule>, StoreError>;
    fn update_schedule(&self, update: ScheduleUpdate) -> Result<(), StoreError>;

    fn delivery_note(&self, id: &DeliveryNoteId) -> Result<Option<DeliveryNote>, StoreError>;
    fn delivery_notes(&self, filter: &DeliveryNoteFilter)
        -> Result<Vec<DeliveryNote>, StoreError>;
    fn update_delivery_note(&self, note: DeliveryNote) -> Result<(), StoreError>;
    /// Inserts the note, covers its schedules and updates its jobs atomically.
    fn commit_delivery_note(&self, commit: DeliveryNoteCommit) -> Result<(), StoreError>;
    /// Removes the note, releases its schedules and restores its jobs atomically.
    fn revert_delivery_note(&self, reversal: DeliveryNoteReversal) -> Result<(), StoreError>;

    fn insert_payment(&self, payment: Payment) -> Result<Payment, StoreError>;
    fn payment(&self, id: &PaymentId) -> Result<Option<Payment>, StoreError>;
    fn payments(&self, filter: &PaymentFilter) -> Result<Vec<Payment>, StoreError>;
    fn delete_payment(&self, id: &PaymentId) -> Result<(), StoreError>;
    /// Applies every update or none; any status mismatch rejects the batch.
    fn commit_payments(&self, updates: Vec<PaymentUpdate>) -> Result<(), StoreError>;
}
