use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::money::Money;

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

identifier!(
    /// Business job number, e.g. `SEA-IMP-0042`.
    JobId
);
identifier!(BlId);
identifier!(ContainerId);
identifier!(DocumentId);
identifier!(ScheduleId);
identifier!(DeliveryNoteId);
identifier!(PaymentId);

static SCHEDULE_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static DELIVERY_NOTE_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static PAYMENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_schedule_id() -> ScheduleId {
    let id = SCHEDULE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ScheduleId(format!("cs-{id:06}"))
}

pub(crate) fn next_delivery_note_id() -> DeliveryNoteId {
    let id = DELIVERY_NOTE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    DeliveryNoteId(format!("dn-{id:06}"))
}

pub(crate) fn next_payment_id() -> PaymentId {
    let id = PAYMENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    PaymentId(format!("pay-{id:06}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportMode {
    Sea,
    Air,
    Road,
    Post,
    Export,
}

impl TransportMode {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sea => "SEA",
            Self::Air => "AIR",
            Self::Road => "ROAD",
            Self::Post => "POST",
            Self::Export => "EXPORT",
        }
    }

    /// Only sea freight carries containers.
    pub const fn requires_containers(self) -> bool {
        matches!(self, Self::Sea)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentType {
    Imp,
    Exp,
    Transit,
    Bond,
}

/// Lifecycle label stored on the job record.
///
/// `Cleared` is written by delivery-note issuance and `Completed` only by the
/// explicit completion action; the stage itself is always derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Open,
    InClearance,
    Cleared,
    Completed,
}

impl JobStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::InClearance => "In Clearance",
            Self::Cleared => "Cleared",
            Self::Completed => "Completed",
        }
    }

    pub const fn signals_cleared(self) -> bool {
        matches!(self, Self::Cleared | Self::Completed)
    }
}

/// Commercial invoice fields captured during documentation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDetails {
    pub invoice_no: Option<String>,
    pub package_count: Option<String>,
    pub cargo_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Concurrency token. The store advances it on every write to the job or
    /// to any record its stage depends on.
    #[serde(default)]
    pub revision: u64,
    pub transport_mode: TransportMode,
    pub shipment_type: ShipmentType,
    pub service_type: String,
    pub status: JobStatus,
    /// Clearance progress as recorded by the clearance desk (0-100).
    pub progress: u8,
    pub job_invoice_no: Option<String>,
    pub invoice: InvoiceDetails,
    pub consignee: String,
    pub exporter: Option<String>,
    /// Status and progress to restore if delivery notes stop covering every BL.
    #[serde(default)]
    pub cleared_from: Option<ClearanceSignal>,
    pub created_at: DateTime<Utc>,
}

/// Status/progress pair the clearance desk records on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearanceSignal {
    pub status: JobStatus,
    pub progress: u8,
}

impl Job {
    pub fn new(
        id: JobId,
        transport_mode: TransportMode,
        shipment_type: ShipmentType,
        consignee: impl Into<String>,
    ) -> Self {
        Self {
            id,
            revision: 0,
            transport_mode,
            shipment_type,
            service_type: "Clearance".to_string(),
            status: JobStatus::Open,
            progress: 0,
            job_invoice_no: None,
            invoice: InvoiceDetails::default(),
            consignee: consignee.into(),
            exporter: None,
            cleared_from: None,
            created_at: Utc::now(),
        }
    }

    pub fn clearance_signal(&self) -> ClearanceSignal {
        ClearanceSignal {
            status: self.status,
            progress: self.progress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub count: u32,
    pub package_type: String,
    pub weight_kg: Option<f64>,
    pub cbm: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillOfLading {
    pub id: BlId,
    pub job_id: JobId,
    pub master_no: String,
    pub house_no: Option<String>,
    pub loading_port: Option<String>,
    pub vessel: Option<String>,
    pub etd: Option<NaiveDate>,
    pub eta: Option<NaiveDate>,
    pub delivery_agent: Option<String>,
    pub packages: Vec<Package>,
}

impl BillOfLading {
    pub fn new(id: BlId, job_id: JobId, master_no: impl Into<String>) -> Self {
        Self {
            id,
            job_id,
            master_no: master_no.into(),
            house_no: None,
            loading_port: None,
            vessel: None,
            etd: None,
            eta: None,
            delivery_agent: None,
            packages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerSize {
    #[serde(rename = "20GP")]
    Gp20,
    #[serde(rename = "40GP")]
    Gp40,
    #[serde(rename = "40HC")]
    Hc40,
    #[serde(rename = "45HC")]
    Hc45,
    #[serde(rename = "20RF")]
    Reefer20,
    #[serde(rename = "40RF")]
    Reefer40,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub job_id: JobId,
    pub container_no: String,
    pub size: ContainerSize,
    pub unloaded_date: Option<NaiveDate>,
    /// BL the container travels under; `None` means the job's only BL.
    pub bl_id: Option<BlId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
    PackingList,
    BlAwb,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub job_id: JobId,
    pub document_type: DocumentType,
    pub name: String,
    pub size_bytes: u64,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
}

/// What a clearance schedule is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ClearanceTarget {
    BillOfLading(BlId),
    Container(ContainerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// Waiting in the pool for a delivery note.
    Scheduled,
    /// Consumed by a delivery note; immutable until the note is deleted.
    Covered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearanceSchedule {
    pub id: ScheduleId,
    pub job_id: JobId,
    pub target: ClearanceTarget,
    pub scheduled_date: NaiveDate,
    pub port: String,
    pub method: String,
    pub reschedule_reason: Option<String>,
    pub status: ScheduleStatus,
    pub delivery_note_id: Option<DeliveryNoteId>,
    pub created_at: DateTime<Utc>,
}

impl ClearanceSchedule {
    pub fn is_awaiting(&self) -> bool {
        self.status == ScheduleStatus::Scheduled
    }

    pub fn is_rescheduled(&self) -> bool {
        self.reschedule_reason.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryNoteStatus {
    Pending,
    Delivered,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub vehicle_no: Option<String>,
    pub driver_name: Option<String>,
    pub discharge_vessel: Option<String>,
    pub discharge_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryNoteItem {
    pub schedule_id: ScheduleId,
    pub job_id: JobId,
    pub target: ClearanceTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCopy {
    pub document_name: String,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Job state captured before a delivery note flipped the job to cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearedJobMark {
    pub job_id: JobId,
    pub previous_status: JobStatus,
    pub previous_progress: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryNote {
    pub id: DeliveryNoteId,
    pub consignee: String,
    pub exporter: Option<String>,
    pub issued_date: NaiveDate,
    pub issued_by: String,
    pub status: DeliveryNoteStatus,
    pub job_ids: Vec<JobId>,
    pub items: Vec<DeliveryNoteItem>,
    pub vehicle: VehicleInfo,
    pub signed_copy: Option<SignedCopy>,
    pub comments: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cleared_jobs: Vec<ClearedJobMark>,
}

impl DeliveryNote {
    pub fn covers_job(&self, job_id: &JobId) -> bool {
        self.job_ids.iter().any(|id| id == job_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaidBy {
    Company,
    Customer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Draft,
    Pending,
    AwaitingClearance,
    Approved,
    Paid,
    Rejected,
}

impl PaymentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Pending => "Pending",
            Self::AwaitingClearance => "Awaiting Clearance",
            Self::Approved => "Approved",
            Self::Paid => "Paid",
            Self::Rejected => "Rejected",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::Rejected)
    }

    /// Rejected rows no longer count toward the job's requested total.
    pub const fn counts_as_requested(self) -> bool {
        !matches!(self, Self::Rejected)
    }

    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Draft, Pending)
                | (Pending, Approved)
                | (Pending, AwaitingClearance)
                | (Approved, AwaitingClearance)
                | (AwaitingClearance, Approved)
                | (Pending, Rejected)
                | (AwaitingClearance, Rejected)
                | (Approved, Paid)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub job_id: JobId,
    pub payment_type: String,
    pub vendor: String,
    pub amount: Money,
    pub paid_by: PaidBy,
    pub status: PaymentStatus,
    pub requested_by: String,
    pub processed_by: Option<String>,
    pub bill_ref_no: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub voucher_no: Option<String>,
    pub payment_reference: Option<String>,
    pub payment_date: Option<NaiveDate>,
}

/// Caller input for recording a payment request against a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPayment {
    pub job_id: JobId,
    pub payment_type: String,
    pub vendor: Option<String>,
    pub amount: Money,
    pub paid_by: PaidBy,
    pub requested_by: String,
    pub bill_ref_no: Option<String>,
}

pub(crate) fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |value| value.trim().is_empty())
}
