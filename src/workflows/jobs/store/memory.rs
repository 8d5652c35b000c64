use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    DeliveryNoteCommit, DeliveryNoteFilter, DeliveryNoteReversal, EntityStore, JobUpdate,
    PaymentFilter, PaymentUpdate, ScheduleFilter, ScheduleUpdate, StoreError,
};
use crate::workflows::jobs::domain::{
    BillOfLading, BlId, ClearanceSchedule, Container, ContainerId, DeliveryNote, DeliveryNoteId,
    Document, DocumentId, Job, JobId, Payment, PaymentId, ScheduleId,
};

#[derive(Debug, Default)]
struct Tables {
    jobs: BTreeMap<JobId, Job>,
    bills_of_lading: BTreeMap<BlId, BillOfLading>,
    containers: BTreeMap<ContainerId, Container>,
    documents: BTreeMap<DocumentId, Document>,
    schedules: BTreeMap<ScheduleId, ClearanceSchedule>,
    delivery_notes: BTreeMap<DeliveryNoteId, DeliveryNote>,
    payments: BTreeMap<PaymentId, Payment>,
}

/// Process-local store backed by a single mutex.
///
/// Every multi-row commit validates all guards before touching any row, so a
/// rejected commit leaves the tables exactly as they were. Writes advance the
/// revision of each job they touch once.
#[derive(Debug, Default, Clone)]
pub struct MemoryEntityStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("entity store mutex poisoned".to_string()))
    }
}

fn not_found(entity: &'static str, id: impl ToString) -> StoreError {
    StoreError::NotFound {
        entity,
        id: id.to_string(),
    }
}

fn duplicate(entity: &'static str, id: impl ToString) -> StoreError {
    StoreError::Duplicate {
        entity,
        id: id.to_string(),
    }
}

fn check_schedule_guard(tables: &Tables, update: &ScheduleUpdate) -> Result<(), StoreError> {
    let current = tables
        .schedules
        .get(&update.schedule.id)
        .ok_or_else(|| not_found("clearance schedule", &update.schedule.id))?;
    if current.status != update.expected_status {
        return Err(StoreError::StaleWrite {
            entity: "clearance schedule",
            id: update.schedule.id.to_string(),
            expected: format!("{:?}", update.expected_status),
            found: format!("{:?}", current.status),
        });
    }
    Ok(())
}

fn check_job_guard(tables: &Tables, update: &JobUpdate) -> Result<(), StoreError> {
    let current = tables
        .jobs
        .get(&update.job.id)
        .ok_or_else(|| not_found("job", &update.job.id))?;
    if current.revision != update.expected_revision {
        return Err(StoreError::StaleWrite {
            entity: "job",
            id: update.job.id.to_string(),
            expected: format!("revision {}", update.expected_revision),
            found: format!("revision {}", current.revision),
        });
    }
    Ok(())
}

fn touch<'a>(tables: &mut Tables, job_ids: impl IntoIterator<Item = &'a JobId>) {
    let job_ids: BTreeSet<&JobId> = job_ids.into_iter().collect();
    for job_id in job_ids {
        if let Some(job) = tables.jobs.get_mut(job_id) {
            job.revision += 1;
        }
    }
}

/// Writes guarded job rows, keeping the stored revision for `touch` to advance.
fn write_jobs(tables: &mut Tables, updates: Vec<JobUpdate>) {
    for JobUpdate { mut job, expected_revision } in updates {
        job.revision = expected_revision;
        tables.jobs.insert(job.id.clone(), job);
    }
}

fn check_payment_guard(tables: &Tables, update: &PaymentUpdate) -> Result<(), StoreError> {
    let current = tables
        .payments
        .get(&update.payment.id)
        .ok_or_else(|| not_found("payment", &update.payment.id))?;
    if current.status != update.expected_status {
        return Err(StoreError::StaleWrite {
            entity: "payment",
            id: update.payment.id.to_string(),
            expected: update.expected_status.label().to_string(),
            found: current.status.label().to_string(),
        });
    }
    Ok(())
}

impl EntityStore for MemoryEntityStore {
    fn insert_job(&self, job: Job) -> Result<Job, StoreError> {
        let mut tables = self.lock()?;
        if tables.jobs.contains_key(&job.id) {
            return Err(duplicate("job", &job.id));
        }
        tables.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    fn job(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.lock()?.jobs.get(id).cloned())
    }

    fn update_job(&self, update: JobUpdate) -> Result<Job, StoreError> {
        let mut tables = self.lock()?;
        check_job_guard(&tables, &update)?;
        let job_id = update.job.id.clone();
        write_jobs(&mut tables, vec![update]);
        touch(&mut tables, [&job_id]);
        tables
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or_else(|| not_found("job", &job_id))
    }

    fn delete_job(&self, id: &JobId) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        tables.jobs.remove(id).ok_or_else(|| not_found("job", id))?;
        tables.bills_of_lading.retain(|_, bl| &bl.job_id != id);
        tables.containers.retain(|_, container| &container.job_id != id);
        tables.documents.retain(|_, document| &document.job_id != id);
        tables.schedules.retain(|_, schedule| &schedule.job_id != id);
        tables.payments.retain(|_, payment| &payment.job_id != id);
        for note in tables.delivery_notes.values_mut() {
            note.job_ids.retain(|job_id| job_id != id);
            note.items.retain(|item| &item.job_id != id);
            note.cleared_jobs.retain(|mark| &mark.job_id != id);
        }
        tables.delivery_notes.retain(|_, note| !note.job_ids.is_empty());
        Ok(())
    }

    fn jobs(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.lock()?.jobs.values().cloned().collect())
    }

    fn insert_bill_of_lading(&self, bl: BillOfLading) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.bills_of_lading.contains_key(&bl.id) {
            return Err(duplicate("bill of lading", &bl.id));
        }
        let job_id = bl.job_id.clone();
        tables.bills_of_lading.insert(bl.id.clone(), bl);
        touch(&mut tables, [&job_id]);
        Ok(())
    }

    fn bills_of_lading(&self, job_id: &JobId) -> Result<Vec<BillOfLading>, StoreError> {
        Ok(self
            .lock()?
            .bills_of_lading
            .values()
            .filter(|bl| &bl.job_id == job_id)
            .cloned()
            .collect())
    }

    fn update_bill_of_lading(&self, bl: BillOfLading) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let Some(slot) = tables.bills_of_lading.get_mut(&bl.id) else {
            return Err(not_found("bill of lading", &bl.id));
        };
        let job_ids = [slot.job_id.clone(), bl.job_id.clone()];
        *slot = bl;
        touch(&mut tables, &job_ids);
        Ok(())
    }

    fn delete_bill_of_lading(&self, id: &BlId) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let removed = tables
            .bills_of_lading
            .remove(id)
            .ok_or_else(|| not_found("bill of lading", id))?;
        touch(&mut tables, [&removed.job_id]);
        Ok(())
    }

    fn insert_container(&self, container: Container) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.containers.contains_key(&container.id) {
            return Err(duplicate("container", &container.id));
        }
        let job_id = container.job_id.clone();
        tables.containers.insert(container.id.clone(), container);
        touch(&mut tables, [&job_id]);
        Ok(())
    }

    fn containers(&self, job_id: &JobId) -> Result<Vec<Container>, StoreError> {
        Ok(self
            .lock()?
            .containers
            .values()
            .filter(|container| &container.job_id == job_id)
            .cloned()
            .collect())
    }

    fn delete_container(&self, id: &ContainerId) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let removed = tables
            .containers
            .remove(id)
            .ok_or_else(|| not_found("container", id))?;
        touch(&mut tables, [&removed.job_id]);
        Ok(())
    }

    fn insert_document(&self, document: Document) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.documents.contains_key(&document.id) {
            return Err(duplicate("document", &document.id));
        }
        let job_id = document.job_id.clone();
        tables.documents.insert(document.id.clone(), document);
        touch(&mut tables, [&job_id]);
        Ok(())
    }

    fn documents(&self, job_id: &JobId) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .lock()?
            .documents
            .values()
            .filter(|document| &document.job_id == job_id)
            .cloned()
            .collect())
    }

    fn delete_document(&self, id: &DocumentId) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let removed = tables
            .documents
            .remove(id)
            .ok_or_else(|| not_found("document", id))?;
        touch(&mut tables, [&removed.job_id]);
        Ok(())
    }

    fn insert_schedule(&self, schedule: ClearanceSchedule) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.schedules.contains_key(&schedule.id) {
            return Err(duplicate("clearance schedule", &schedule.id));
        }
        let job_id = schedule.job_id.clone();
        tables.schedules.insert(schedule.id.clone(), schedule);
        touch(&mut tables, [&job_id]);
        Ok(())
    }

    fn schedule(&self, id: &ScheduleId) -> Result<Option<ClearanceSchedule>, StoreError> {
        Ok(self.lock()?.schedules.get(id).cloned())
    }

    fn schedules(&self, filter: &ScheduleFilter) -> Result<Vec<ClearanceSchedule>, StoreError> {
        Ok(self
            .lock()?
            .schedules
            .values()
            .filter(|schedule| filter.matches(schedule))
            .cloned()
            .collect())
    }

    fn update_schedule(&self, update: ScheduleUpdate) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        check_schedule_guard(&tables, &update)?;
        let job_id = update.schedule.job_id.clone();
        tables
            .schedules
            .insert(update.schedule.id.clone(), update.schedule);
        touch(&mut tables, [&job_id]);
        Ok(())
    }

    fn delivery_note(&self, id: &DeliveryNoteId) -> Result<Option<DeliveryNote>, StoreError> {
        Ok(self.lock()?.delivery_notes.get(id).cloned())
    }

    fn delivery_notes(
        &self,
        filter: &DeliveryNoteFilter,
    ) -> Result<Vec<DeliveryNote>, StoreError> {
        Ok(self
            .lock()?
            .delivery_notes
            .values()
            .filter(|note| filter.matches(note))
            .cloned()
            .collect())
    }

    fn update_delivery_note(&self, note: DeliveryNote) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let Some(slot) = tables.delivery_notes.get_mut(&note.id) else {
            return Err(not_found("delivery note", &note.id));
        };
        let job_ids = note.job_ids.clone();
        *slot = note;
        touch(&mut tables, &job_ids);
        Ok(())
    }

    fn commit_delivery_note(&self, commit: DeliveryNoteCommit) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.delivery_notes.contains_key(&commit.note.id) {
            return Err(duplicate("delivery note", &commit.note.id));
        }
        for update in &commit.schedules {
            check_schedule_guard(&tables, update)?;
        }
        for update in &commit.jobs {
            check_job_guard(&tables, update)?;
        }

        let mut touched: BTreeSet<JobId> = commit.note.job_ids.iter().cloned().collect();
        for update in commit.schedules {
            touched.insert(update.schedule.job_id.clone());
            tables
                .schedules
                .insert(update.schedule.id.clone(), update.schedule);
        }
        write_jobs(&mut tables, commit.jobs);
        tables
            .delivery_notes
            .insert(commit.note.id.clone(), commit.note);
        touch(&mut tables, &touched);
        Ok(())
    }

    fn revert_delivery_note(&self, reversal: DeliveryNoteReversal) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let Some(note) = tables.delivery_notes.get(&reversal.note_id) else {
            return Err(not_found("delivery note", &reversal.note_id));
        };
        let mut touched: BTreeSet<JobId> = note.job_ids.iter().cloned().collect();
        for update in &reversal.schedules {
            check_schedule_guard(&tables, update)?;
        }
        for update in &reversal.jobs {
            check_job_guard(&tables, update)?;
        }

        for update in reversal.schedules {
            touched.insert(update.schedule.job_id.clone());
            tables
                .schedules
                .insert(update.schedule.id.clone(), update.schedule);
        }
        write_jobs(&mut tables, reversal.jobs);
        tables.delivery_notes.remove(&reversal.note_id);
        touch(&mut tables, &touched);
        Ok(())
    }

    fn insert_payment(&self, payment: Payment) -> Result<Payment, StoreError> {
        let mut tables = self.lock()?;
        if tables.payments.contains_key(&payment.id) {
            return Err(duplicate("payment", &payment.id));
        }
        tables.payments.insert(payment.id.clone(), payment.clone());
        touch(&mut tables, [&payment.job_id]);
        Ok(payment)
    }

    fn payment(&self, id: &PaymentId) -> Result<Option<Payment>, StoreError> {
        Ok(self.lock()?.payments.get(id).cloned())
    }

    fn payments(&self, filter: &PaymentFilter) -> Result<Vec<Payment>, StoreError> {
        Ok(self
            .lock()?
            .payments
            .values()
            .filter(|payment| filter.matches(payment))
            .cloned()
            .collect())
    }

    fn delete_payment(&self, id: &PaymentId) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let removed = tables
            .payments
            .remove(id)
            .ok_or_else(|| not_found("payment", id))?;
        touch(&mut tables, [&removed.job_id]);
        Ok(())
    }

    fn commit_payments(&self, updates: Vec<PaymentUpdate>) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        for update in &updates {
            check_payment_guard(&tables, update)?;
        }
        let touched: BTreeSet<JobId> = updates
            .iter()
            .map(|update| update.payment.job_id.clone())
            .collect();
        for update in updates {
            tables
                .payments
                .insert(update.payment.id.clone(), update.payment);
        }
        touch(&mut tables, &touched);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::jobs::domain::{
        ClearanceTarget, DeliveryNoteItem, DeliveryNoteStatus, JobStatus, PaidBy, PaymentStatus,
        ShipmentType, TransportMode, VehicleInfo,
    };
    use crate::workflows::jobs::money::Money;
    use chrono::{NaiveDate, Utc};

    fn job(id: &str) -> Job {
        Job::new(
            JobId::new(id),
            TransportMode::Air,
            ShipmentType::Imp,
            "Kibo Traders",
        )
    }

    fn note(id: &str, job_ids: &[&str]) -> DeliveryNote {
        DeliveryNote {
            id: DeliveryNoteId::new(id),
            consignee: "Kibo Traders".to_string(),
            exporter: None,
            issued_date: NaiveDate::from_ymd_opt(2024, 3, 1).expect("date"),
            issued_by: "clerk".to_string(),
            status: DeliveryNoteStatus::Pending,
            job_ids: job_ids.iter().map(|id| JobId::new(*id)).collect(),
            items: job_ids
                .iter()
                .map(|id| DeliveryNoteItem {
                    schedule_id: ScheduleId::new(format!("sch-{id}")),
                    job_id: JobId::new(*id),
                    target: ClearanceTarget::BillOfLading(BlId::new(format!("bl-{id}"))),
                })
                .collect(),
            vehicle: VehicleInfo::default(),
            signed_copy: None,
            comments: None,
            delivered_at: None,
            cleared_jobs: Vec::new(),
        }
    }

    fn payment(id: &str, status: PaymentStatus) -> Payment {
        Payment {
            id: PaymentId::new(id),
            job_id: JobId::new("JOB-1"),
            payment_type: "Port Charges".to_string(),
            vendor: "ACME".to_string(),
            amount: Money::from_cents(1_000),
            paid_by: PaidBy::Company,
            status,
            requested_by: "clerk".to_string(),
            processed_by: None,
            bill_ref_no: None,
            created_at: Utc::now(),
            paid_at: None,
            voucher_no: None,
            payment_reference: None,
            payment_date: None,
        }
    }

    #[test]
    fn commit_payments_is_all_or_nothing() {
        let store = MemoryEntityStore::new();
        store
            .insert_payment(payment("p1", PaymentStatus::Approved))
            .expect("insert p1");
        store
            .insert_payment(payment("p2", PaymentStatus::Pending))
            .expect("insert p2");

        let updates = vec![
            PaymentUpdate {
                payment: payment("p1", PaymentStatus::Paid),
                expected_status: PaymentStatus::Approved,
            },
            PaymentUpdate {
                payment: payment("p2", PaymentStatus::Paid),
                expected_status: PaymentStatus::Approved,
            },
        ];

        match store.commit_payments(updates) {
            Err(StoreError::StaleWrite { id, .. }) => assert_eq!(id, "p2"),
            other => panic!("expected stale write, got {other:?}"),
        }

        let p1 = store
            .payment(&PaymentId::new("p1"))
            .expect("fetch")
            .expect("present");
        assert_eq!(p1.status, PaymentStatus::Approved);
    }

    #[test]
    fn payment_filter_matches_vendor_case_insensitively() {
        let store = MemoryEntityStore::new();
        store
            .insert_payment(payment("p1", PaymentStatus::Approved))
            .expect("insert");
        let filter = PaymentFilter {
            vendor: Some("acme".to_string()),
            ..PaymentFilter::default()
        };
        assert_eq!(store.payments(&filter).expect("list").len(), 1);
    }

    #[test]
    fn duplicate_inserts_are_rejected() {
        let store = MemoryEntityStore::new();
        store
            .insert_payment(payment("p1", PaymentStatus::Draft))
            .expect("first insert");
        assert!(matches!(
            store.insert_payment(payment("p1", PaymentStatus::Draft)),
            Err(StoreError::Duplicate { .. })
        ));
    }

    #[test]
    fn job_update_from_an_old_read_is_stale() {
        let store = MemoryEntityStore::new();
        let mut completed = store.insert_job(job("JOB-1")).expect("insert job");
        store
            .insert_payment(payment("p1", PaymentStatus::Draft))
            .expect("insert payment");

        completed.status = JobStatus::Completed;
        match store.update_job(JobUpdate::new(completed)) {
            Err(StoreError::StaleWrite { entity, found, .. }) => {
                assert_eq!(entity, "job");
                assert_eq!(found, "revision 1");
            }
            other => panic!("expected stale write, got {other:?}"),
        }

        let fresh = store
            .job(&JobId::new("JOB-1"))
            .expect("fetch")
            .expect("present");
        assert_eq!(fresh.status, JobStatus::Open);
        let mut completed = fresh;
        completed.status = JobStatus::Completed;
        let stored = store
            .update_job(JobUpdate::new(completed))
            .expect("fresh update");
        assert_eq!(stored.revision, 2);
    }

    #[test]
    fn deleting_a_job_prunes_it_from_shared_notes() {
        let store = MemoryEntityStore::new();
        store.insert_job(job("JOB-1")).expect("insert JOB-1");
        store.insert_job(job("JOB-2")).expect("insert JOB-2");
        store
            .commit_delivery_note(DeliveryNoteCommit {
                note: note("dn-shared", &["JOB-1", "JOB-2"]),
                schedules: Vec::new(),
                jobs: Vec::new(),
            })
            .expect("shared note");
        store
            .commit_delivery_note(DeliveryNoteCommit {
                note: note("dn-solo", &["JOB-1"]),
                schedules: Vec::new(),
                jobs: Vec::new(),
            })
            .expect("solo note");

        store.delete_job(&JobId::new("JOB-1")).expect("delete");

        let shared = store
            .delivery_note(&DeliveryNoteId::new("dn-shared"))
            .expect("fetch")
            .expect("shared note survives");
        assert_eq!(shared.job_ids, vec![JobId::new("JOB-2")]);
        assert!(shared.items.iter().all(|item| item.job_id == JobId::new("JOB-2")));
        assert!(store
            .delivery_note(&DeliveryNoteId::new("dn-solo"))
            .expect("fetch")
            .is_none());
        let remaining = store
            .delivery_notes(&DeliveryNoteFilter::default())
            .expect("list");
        assert!(remaining
            .iter()
            .all(|note| !note.covers_job(&JobId::new("JOB-1"))));
    }
}
