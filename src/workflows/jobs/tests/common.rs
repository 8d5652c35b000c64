use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};

use crate::workflows::jobs::clearance::DeliveryNoteRequest;
use crate::workflows::jobs::domain::{
    BillOfLading, BlId, ClearanceSchedule, ClearanceTarget, Container, ContainerId,
    ContainerSize, DeliveryNote, DeliveryNoteId, Document, DocumentId, DocumentType, Job, JobId,
    NewPayment, PaidBy, Payment, PaymentId, ScheduleId, ShipmentType, TransportMode, VehicleInfo,
};
use crate::workflows::jobs::engine::{ActionOutcome, EngineSettings, JobAction, JobLifecycleEngine};
use crate::workflows::jobs::events::{EventSink, LifecycleEvent, MemoryEventSink, SinkError};
use crate::workflows::jobs::money::Money;
use crate::workflows::jobs::store::{
    DeliveryNoteCommit, DeliveryNoteFilter, DeliveryNoteReversal, EntityStore, JobUpdate,
    MemoryEntityStore, PaymentFilter, PaymentUpdate, ScheduleFilter, ScheduleUpdate, StoreError,
};

pub(super) type MemoryEngine = JobLifecycleEngine<MemoryEntityStore, MemoryEventSink>;

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn build_engine() -> (MemoryEngine, Arc<MemoryEntityStore>, Arc<MemoryEventSink>) {
    build_engine_with(EngineSettings::default())
}

pub(super) fn build_engine_with(
    settings: EngineSettings,
) -> (MemoryEngine, Arc<MemoryEntityStore>, Arc<MemoryEventSink>) {
    let store = Arc::new(MemoryEntityStore::new());
    let events = Arc::new(MemoryEventSink::default());
    let engine = JobLifecycleEngine::new(store.clone(), events.clone(), settings);
    (engine, store, events)
}

/// Sea import with invoice fields filled but nothing attached yet.
pub(super) fn sea_job(id: &str, consignee: &str) -> Job {
    let mut job = Job::new(
        JobId::new(id),
        TransportMode::Sea,
        ShipmentType::Imp,
        consignee,
    );
    job.invoice.invoice_no = Some(format!("CI-{id}"));
    job.invoice.package_count = Some("12".to_string());
    job.invoice.cargo_type = Some("General".to_string());
    job
}

pub(super) fn bl_id(job: &str, n: usize) -> BlId {
    BlId::new(format!("{job}-bl-{n}"))
}

/// Inserts a sea job that satisfies documentation: one document, `bl_count`
/// BLs and one container per BL.
pub(super) fn seed_documented_job(
    store: &MemoryEntityStore,
    id: &str,
    consignee: &str,
    bl_count: usize,
) -> JobId {
    let job = store
        .insert_job(sea_job(id, consignee))
        .expect("insert job");

    store
        .insert_document(Document {
            id: DocumentId::new(format!("{id}-doc-1")),
            job_id: job.id.clone(),
            document_type: DocumentType::Invoice,
            name: "commercial-invoice.pdf".to_string(),
            size_bytes: 52_000,
            uploaded_by: "docs".to_string(),
            uploaded_at: Utc::now(),
        })
        .expect("insert document");

    for n in 1..=bl_count {
        let bl = bl_id(id, n);
        store
            .insert_bill_of_lading(BillOfLading::new(
                bl.clone(),
                job.id.clone(),
                format!("MSKU{id}{n}"),
            ))
            .expect("insert bl");
        store
            .insert_container(Container {
                id: ContainerId::new(format!("{id}-ctr-{n}")),
                job_id: job.id.clone(),
                container_no: format!("TGHU{n:07}"),
                size: ContainerSize::Gp40,
                unloaded_date: None,
                bl_id: Some(bl),
            })
            .expect("insert container");
    }

    job.id
}

pub(super) fn schedule_bl(engine: &MemoryEngine, job_id: &JobId, bl: &BlId) -> ClearanceSchedule {
    let receipt = engine
        .perform_action(
            job_id,
            JobAction::ScheduleClearance {
                target: ClearanceTarget::BillOfLading(bl.clone()),
                scheduled_date: date(2025, 3, 10),
                port: "Port Klang".to_string(),
                method: "Green lane".to_string(),
            },
        )
        .expect("schedule clearance");
    match receipt.outcome {
        ActionOutcome::Scheduled(schedule) => schedule,
        other => panic!("expected schedule, got {other:?}"),
    }
}

pub(super) fn note_request(consignee: &str, schedule_ids: Vec<ScheduleId>) -> DeliveryNoteRequest {
    DeliveryNoteRequest {
        consignee: consignee.to_string(),
        schedule_ids,
        vehicle: VehicleInfo {
            vehicle_no: Some("WXY 4471".to_string()),
            driver_name: Some("Hafiz".to_string()),
            discharge_vessel: None,
            discharge_date: None,
        },
        issued_by: "clearance".to_string(),
        issued_date: date(2025, 3, 11),
        exporter: None,
    }
}

pub(super) fn issue_note(
    engine: &MemoryEngine,
    job_id: &JobId,
    consignee: &str,
    schedule_ids: Vec<ScheduleId>,
) -> DeliveryNote {
    let receipt = engine
        .perform_action(
            job_id,
            JobAction::IssueDeliveryNote(note_request(consignee, schedule_ids)),
        )
        .expect("issue delivery note");
    match receipt.outcome {
        ActionOutcome::DeliveryNoteIssued(note) => note,
        other => panic!("expected delivery note, got {other:?}"),
    }
}

/// Schedules and covers every BL of the job with one delivery note.
pub(super) fn clear_job(
    engine: &MemoryEngine,
    job_id: &JobId,
    consignee: &str,
    bl_count: usize,
) -> DeliveryNoteId {
    let schedules: Vec<ScheduleId> = (1..=bl_count)
        .map(|n| schedule_bl(engine, job_id, &bl_id(job_id.as_str(), n)).id)
        .collect();
    issue_note(engine, job_id, consignee, schedules).id
}

pub(super) fn new_payment(job_id: &JobId, vendor: &str, cents: i64) -> NewPayment {
    NewPayment {
        job_id: job_id.clone(),
        payment_type: "Port Charges".to_string(),
        vendor: Some(vendor.to_string()),
        amount: Money::from_cents(cents),
        paid_by: PaidBy::Company,
        requested_by: "clearance".to_string(),
        bill_ref_no: None,
    }
}

pub(super) fn record_payment(
    engine: &MemoryEngine,
    job_id: &JobId,
    vendor: &str,
    cents: i64,
) -> Payment {
    engine
        .payments()
        .record_payment(new_payment(job_id, vendor, cents))
        .expect("record payment")
}

/// Records, sends and approves a payment; the job must already be cleared.
pub(super) fn approved_payment(
    engine: &MemoryEngine,
    job_id: &JobId,
    vendor: &str,
    cents: i64,
) -> Payment {
    let draft = record_payment(engine, job_id, vendor, cents);
    engine
        .payments()
        .send_to_accounts(job_id, &[draft.id.clone()])
        .expect("send to accounts");
    engine.payments().approve(&draft.id).expect("approve")
}

pub(super) fn stored_payment(store: &MemoryEntityStore, id: &PaymentId) -> Payment {
    store
        .payment(id)
        .expect("fetch succeeds")
        .expect("payment present")
}

pub(super) fn stored_job(store: &MemoryEntityStore, id: &JobId) -> Job {
    store
        .job(id)
        .expect("fetch succeeds")
        .expect("job present")
}

/// Sink whose transport is always down.
#[derive(Default)]
pub(super) struct OfflineSink;

impl EventSink for OfflineSink {
    fn emit(&self, _event: LifecycleEvent) -> Result<(), SinkError> {
        Err(SinkError::Transport("audit log offline".to_string()))
    }
}

/// Memory store whose payment commits can be made to fail, and which can
/// slip a payment in from another writer just before the next job update.
#[derive(Default)]
pub(super) struct FlakyStore {
    pub(super) inner: MemoryEntityStore,
    fail_payment_commits: AtomicBool,
    payment_before_job_update: Mutex<Option<Payment>>,
}

impl FlakyStore {
    pub(super) fn fail_payment_commits(&self) {
        self.fail_payment_commits.store(true, Ordering::SeqCst);
    }

    pub(super) fn insert_payment_before_next_job_update(&self, payment: Payment) {
        *self
            .payment_before_job_update
            .lock()
            .expect("interleave slot") = Some(payment);
    }
}

impl EntityStore for FlakyStore {
    fn insert_job(&self, job: Job) -> Result<Job, StoreError> {
        self.inner.insert_job(job)
    }
    fn job(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        self.inner.job(id)
    }
    fn update_job(&self, update: JobUpdate) -> Result<Job, StoreError> {
        let interleaved = self
            .payment_before_job_update
            .lock()
            .expect("interleave slot")
            .take();
        if let Some(payment) = interleaved {
            self.inner.insert_payment(payment)?;
        }
        self.inner.update_job(update)
    }
    fn delete_job(&self, id: &JobId) -> Result<(), StoreError> {
        self.inner.delete_job(id)
    }
    fn jobs(&self) -> Result<Vec<Job>, StoreError> {
        self.inner.jobs()
    }
    fn insert_bill_of_lading(&self, bl: BillOfLading) -> Result<(), StoreError> {
        self.inner.insert_bill_of_lading(bl)
    }
    fn bills_of_lading(&self, job_id: &JobId) -> Result<Vec<BillOfLading>, StoreError> {
        self.inner.bills_of_lading(job_id)
    }
    fn update_bill_of_lading(&self, bl: BillOfLading) -> Result<(), StoreError> {
        self.inner.update_bill_of_lading(bl)
    }
    fn delete_bill_of_lading(&self, id: &BlId) -> Result<(), StoreError> {
        self.inner.delete_bill_of_lading(id)
    }
    fn insert_container(&self, container: Container) -> Result<(), StoreError> {
        self.inner.insert_container(container)
    }
    fn containers(&self, job_id: &JobId) -> Result<Vec<Container>, StoreError> {
        self.inner.containers(job_id)
    }
    fn delete_container(&self, id: &ContainerId) -> Result<(), StoreError> {
        self.inner.delete_container(id)
    }
    fn insert_document(&self, document: Document) -> Result<(), StoreError> {
        self.inner.insert_document(document)
    }
    fn documents(&self, job_id: &JobId) -> Result<Vec<Document>, StoreError> {
        self.inner.documents(job_id)
    }
    fn delete_document(&self, id: &DocumentId) -> Result<(), StoreError> {
        self.inner.delete_document(id)
    }
    fn insert_schedule(&self, schedule: ClearanceSchedule) -> Result<(), StoreError> {
        self.inner.insert_schedule(schedule)
    }
    fn schedule(&self, id: &ScheduleId) -> Result<Option<ClearanceSchedule>, StoreError> {
        self.inner.schedule(id)
    }
    fn schedules(&self, filter: &ScheduleFilter) -> Result<Vec<ClearanceSchedule>, StoreError> {
        self.inner.schedules(filter)
    }
    fn update_schedule(&self, update: ScheduleUpdate) -> Result<(), StoreError> {
        self.inner.update_schedule(update)
    }
    fn delivery_note(&self, id: &DeliveryNoteId) -> Result<Option<DeliveryNote>, StoreError> {
        self.inner.delivery_note(id)
    }
    fn delivery_notes(&self, filter: &DeliveryNoteFilter) -> Result<Vec<DeliveryNote>, StoreError> {
        self.inner.delivery_notes(filter)
    }
    fn update_delivery_note(&self, note: DeliveryNote) -> Result<(), StoreError> {
        self.inner.update_delivery_note(note)
    }
    fn commit_delivery_note(&self, commit: DeliveryNoteCommit) -> Result<(), StoreError> {
        self.inner.commit_delivery_note(commit)
    }
    fn revert_delivery_note(&self, reversal: DeliveryNoteReversal) -> Result<(), StoreError> {
        self.inner.revert_delivery_note(reversal)
    }
    fn insert_payment(&self, payment: Payment) -> Result<Payment, StoreError> {
        self.inner.insert_payment(payment)
    }
    fn payment(&self, id: &PaymentId) -> Result<Option<Payment>, StoreError> {
        self.inner.payment(id)
    }
    fn payments(&self, filter: &PaymentFilter) -> Result<Vec<Payment>, StoreError> {
        self.inner.payments(filter)
    }
    fn delete_payment(&self, id: &PaymentId) -> Result<(), StoreError> {
        self.inner.delete_payment(id)
    }
    fn commit_payments(&self, updates: Vec<PaymentUpdate>) -> Result<(), StoreError> {
        if self.fail_payment_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("ledger connection reset".to_string()));
        }
        self.inner.commit_payments(updates)
    }
}
