//! Clearance scheduling and delivery-note issuance.
//!
//! ```text
//! Uncovered ──schedule──▶ Scheduled ──reschedule──▶ Scheduled (reason set)
//!                             │
//!                             └──issue note──▶ Covered ──delete note──▶ Scheduled
//! ```
//!
//! A job's BLs count as cleared only while an issued delivery note covers
//! them. Deleting a note is a compensating transaction: the schedules go back
//! to the awaiting pool and each `Cleared` job left with an uncovered BL gets
//! back the status and progress it had before clearance, whichever note
//! flipped it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::domain::{
    next_delivery_note_id, next_schedule_id, ClearanceSchedule, ClearanceSignal, ClearanceTarget,
    ClearedJobMark, DeliveryNote, DeliveryNoteId, DeliveryNoteItem, DeliveryNoteStatus, Job,
    JobId, JobStatus, ScheduleId, ScheduleStatus, SignedCopy, VehicleInfo,
};
use super::error::ErrorKind;
use super::events::{emit_quietly, EventSink, EventType, LifecycleEvent};
use super::stage::{bl_for_target, DeliveryCoverage};
use super::store::{
    DeliveryNoteCommit, DeliveryNoteFilter, DeliveryNoteReversal, EntityStore, JobUpdate,
    ScheduleFilter, ScheduleUpdate, StoreError,
};

/// Signal a reopened job falls back to when nothing recorded its pre-clearance state.
const REOPENED_SIGNAL: ClearanceSignal = ClearanceSignal {
    status: JobStatus::InClearance,
    progress: 0,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub job_id: JobId,
    pub target: ClearanceTarget,
    pub scheduled_date: NaiveDate,
    pub port: String,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleRequest {
    pub schedule_id: ScheduleId,
    pub scheduled_date: NaiveDate,
    pub reason: String,
    pub port: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryNoteRequest {
    pub consignee: String,
    pub schedule_ids: Vec<ScheduleId>,
    pub vehicle: VehicleInfo,
    pub issued_by: String,
    pub issued_date: NaiveDate,
    pub exporter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCopyUpload {
    pub document_name: String,
    pub uploaded_by: String,
}

/// What a delivery-note deletion put back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryNoteReversalReport {
    pub note_id: DeliveryNoteId,
    pub released_schedules: Vec<ScheduleId>,
    pub restored_jobs: Vec<JobId>,
}

/// Error raised by the clearance workflow.
#[derive(Debug, thiserror::Error)]
pub enum ClearanceError {
    #[error("job {0} not found")]
    JobNotFound(JobId),
    #[error("job {job_id} has no bill of lading or container to attach a clearance schedule to")]
    NoClearanceTarget { job_id: JobId },
    #[error("{target} does not belong to job {job_id}")]
    UnknownTarget { job_id: JobId, target: String },
    #[error("{target} is already covered by an issued delivery note")]
    TargetAlreadyCovered { target: String },
    #[error("clearance schedule {0} not found")]
    ScheduleNotFound(ScheduleId),
    #[error("clearance schedule {0} is already covered by a delivery note")]
    ScheduleAlreadyCovered(ScheduleId),
    #[error("select at least one clearance schedule for the delivery note")]
    EmptyScheduleSelection,
    #[error("clearance schedule {0} was selected more than once")]
    DuplicateSchedule(ScheduleId),
    #[error("a delivery note needs a consignee")]
    MissingConsignee,
    #[error("job {job_id} belongs to consignee '{found}', not '{expected}'")]
    ConsigneeMismatch {
        job_id: JobId,
        expected: String,
        found: String,
    },
    #[error("a reschedule needs a reason")]
    MissingRescheduleReason,
    #[error("delivery note {0} not found")]
    DeliveryNoteNotFound(DeliveryNoteId),
    #[error("delivery note {0} is already delivered")]
    AlreadyDelivered(DeliveryNoteId),
    #[error("job {0} is completed; its delivery notes can no longer change")]
    JobAlreadyCompleted(JobId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ClearanceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(StoreError::StaleWrite { .. }) => ErrorKind::Conflict,
            Self::Store(_) => ErrorKind::Storage,
            _ => ErrorKind::Validation,
        }
    }
}

/// Workflow composing the entity store and audit sink for clearance actions.
pub struct ClearanceWorkflow<S: ?Sized, E: ?Sized> {
    store: Arc<S>,
    events: Arc<E>,
}

impl<S, E> ClearanceWorkflow<S, E>
where
    S: EntityStore + ?Sized,
    E: EventSink + ?Sized,
{
    pub fn new(store: Arc<S>, events: Arc<E>) -> Self {
        Self { store, events }
    }

    fn load_job(&self, job_id: &JobId) -> Result<Job, ClearanceError> {
        self.store
            .job(job_id)?
            .ok_or_else(|| ClearanceError::JobNotFound(job_id.clone()))
    }

    /// Schedule customs clearance for one BL or container of a job.
    pub fn schedule_clearance(
        &self,
        request: ScheduleRequest,
    ) -> Result<ClearanceSchedule, ClearanceError> {
        let job = self.load_job(&request.job_id)?;
        let bills_of_lading = self.store.bills_of_lading(&job.id)?;
        let containers = self.store.containers(&job.id)?;

        if bills_of_lading.is_empty() && containers.is_empty() {
            return Err(ClearanceError::NoClearanceTarget {
                job_id: job.id.clone(),
            });
        }

        let known = match &request.target {
            ClearanceTarget::BillOfLading(bl_id) => {
                bills_of_lading.iter().any(|bl| &bl.id == bl_id)
            }
            ClearanceTarget::Container(container_id) => containers
                .iter()
                .any(|container| &container.id == container_id),
        };
        if !known {
            return Err(ClearanceError::UnknownTarget {
                job_id: job.id.clone(),
                target: describe_target(&request.target),
            });
        }

        let schedules = self.store.schedules(&ScheduleFilter::for_job(&job.id))?;
        let notes = self
            .store
            .delivery_notes(&DeliveryNoteFilter::for_job(&job.id))?;
        let already_covered = schedules.iter().any(|schedule| {
            schedule.target == request.target
                && schedule.status == ScheduleStatus::Covered
                && schedule
                    .delivery_note_id
                    .as_ref()
                    .is_some_and(|id| notes.iter().any(|note| &note.id == id))
        });
        let bl_covered = bl_for_target(&request.target, &bills_of_lading, &containers)
            .is_some_and(|bl_id| {
                DeliveryCoverage::compute(&bills_of_lading, &containers, &schedules, &notes)
                    .covers(&bl_id)
            });
        if already_covered || bl_covered {
            return Err(ClearanceError::TargetAlreadyCovered {
                target: describe_target(&request.target),
            });
        }

        // The job row goes first: inserting the schedule advances its revision.
        let job = if job.status == JobStatus::Open {
            let mut opened = job;
            opened.status = JobStatus::InClearance;
            self.store.update_job(JobUpdate::new(opened))?
        } else {
            job
        };

        let schedule = ClearanceSchedule {
            id: next_schedule_id(),
            job_id: job.id.clone(),
            target: request.target,
            scheduled_date: request.scheduled_date,
            port: request.port,
            method: request.method,
            reschedule_reason: None,
            status: ScheduleStatus::Scheduled,
            delivery_note_id: None,
            created_at: Utc::now(),
        };
        self.store.insert_schedule(schedule.clone())?;

        info!(
            job_id = %job.id,
            schedule_id = %schedule.id,
            date = %schedule.scheduled_date,
            "clearance scheduled"
        );
        emit_quietly(
            self.events.as_ref(),
            LifecycleEvent::new(EventType::ClearanceScheduled, job.id)
                .with("schedule_id", &schedule.id)
                .with("target", describe_target(&schedule.target))
                .with("scheduled_date", schedule.scheduled_date),
        );

        Ok(schedule)
    }

    /// Move an awaiting schedule to a new date, keeping its identity.
    pub fn reschedule_clearance(
        &self,
        request: RescheduleRequest,
    ) -> Result<ClearanceSchedule, ClearanceError> {
        if request.reason.trim().is_empty() {
            return Err(ClearanceError::MissingRescheduleReason);
        }

        let mut schedule = self
            .store
            .schedule(&request.schedule_id)?
            .ok_or_else(|| ClearanceError::ScheduleNotFound(request.schedule_id.clone()))?;
        if schedule.status == ScheduleStatus::Covered {
            return Err(ClearanceError::ScheduleAlreadyCovered(schedule.id));
        }

        let previous_date = schedule.scheduled_date;
        schedule.scheduled_date = request.scheduled_date;
        schedule.reschedule_reason = Some(request.reason.trim().to_string());
        if let Some(port) = request.port.filter(|port| !port.trim().is_empty()) {
            schedule.port = port;
        }

        self.store.update_schedule(ScheduleUpdate {
            schedule: schedule.clone(),
            expected_status: ScheduleStatus::Scheduled,
        })?;

        info!(
            job_id = %schedule.job_id,
            schedule_id = %schedule.id,
            from = %previous_date,
            to = %schedule.scheduled_date,
            "clearance rescheduled"
        );
        emit_quietly(
            self.events.as_ref(),
            LifecycleEvent::new(EventType::ClearanceRescheduled, schedule.job_id.clone())
                .with("schedule_id", &schedule.id)
                .with("previous_date", previous_date)
                .with("scheduled_date", schedule.scheduled_date)
                .with("reason", schedule.reschedule_reason.as_deref().unwrap_or_default()),
        );

        Ok(schedule)
    }

    /// Issue a delivery note over awaiting schedules sharing one consignee.
    pub fn issue_delivery_note(
        &self,
        request: DeliveryNoteRequest,
    ) -> Result<DeliveryNote, ClearanceError> {
        if request.schedule_ids.is_empty() {
            return Err(ClearanceError::EmptyScheduleSelection);
        }
        if request.consignee.trim().is_empty() {
            return Err(ClearanceError::MissingConsignee);
        }

        let mut seen = BTreeSet::new();
        let mut selected = Vec::with_capacity(request.schedule_ids.len());
        for schedule_id in &request.schedule_ids {
            if !seen.insert(schedule_id.clone()) {
                return Err(ClearanceError::DuplicateSchedule(schedule_id.clone()));
            }
            let schedule = self
                .store
                .schedule(schedule_id)?
                .ok_or_else(|| ClearanceError::ScheduleNotFound(schedule_id.clone()))?;
            if schedule.status != ScheduleStatus::Scheduled {
                return Err(ClearanceError::ScheduleAlreadyCovered(schedule.id));
            }
            selected.push(schedule);
        }

        let mut jobs: BTreeMap<JobId, Job> = BTreeMap::new();
        for schedule in &selected {
            if jobs.contains_key(&schedule.job_id) {
                continue;
            }
            let job = self.load_job(&schedule.job_id)?;
            if job.status == JobStatus::Completed {
                return Err(ClearanceError::JobAlreadyCompleted(job.id));
            }
            if !same_party(&job.consignee, &request.consignee) {
                return Err(ClearanceError::ConsigneeMismatch {
                    job_id: job.id.clone(),
                    expected: request.consignee.trim().to_string(),
                    found: job.consignee.clone(),
                });
            }
            jobs.insert(job.id.clone(), job);
        }

        let note_id = next_delivery_note_id();
        let schedule_updates: Vec<ScheduleUpdate> = selected
            .iter()
            .cloned()
            .map(|mut schedule| {
                schedule.status = ScheduleStatus::Covered;
                schedule.delivery_note_id = Some(note_id.clone());
                ScheduleUpdate {
                    schedule,
                    expected_status: ScheduleStatus::Scheduled,
                }
            })
            .collect();

        let mut note = DeliveryNote {
            id: note_id.clone(),
            consignee: request.consignee.trim().to_string(),
            exporter: request
                .exporter
                .or_else(|| jobs.values().find_map(|job| job.exporter.clone())),
            issued_date: request.issued_date,
            issued_by: request.issued_by,
            status: DeliveryNoteStatus::Pending,
            job_ids: jobs.keys().cloned().collect(),
            items: selected
                .iter()
                .map(|schedule| DeliveryNoteItem {
                    schedule_id: schedule.id.clone(),
                    job_id: schedule.job_id.clone(),
                    target: schedule.target.clone(),
                })
                .collect(),
            vehicle: request.vehicle,
            signed_copy: None,
            comments: None,
            delivered_at: None,
            cleared_jobs: Vec::new(),
        };

        let mut updated_jobs = Vec::new();
        for job in jobs.values() {
            if job.status == JobStatus::Cleared {
                continue;
            }
            let changes = CoverageChange {
                schedules: &schedule_updates,
                added: Some(&note),
                removed: None,
            };
            if !self.fully_covered(job, changes)? {
                continue;
            }
            note.cleared_jobs.push(ClearedJobMark {
                job_id: job.id.clone(),
                previous_status: job.status,
                previous_progress: job.progress,
            });
            let mut cleared = job.clone();
            cleared.cleared_from = Some(job.clearance_signal());
            cleared.status = JobStatus::Cleared;
            cleared.progress = 100;
            updated_jobs.push(JobUpdate::new(cleared));
        }

        self.store.commit_delivery_note(DeliveryNoteCommit {
            note: note.clone(),
            schedules: schedule_updates,
            jobs: updated_jobs,
        })?;

        info!(
            note_id = %note.id,
            consignee = %note.consignee,
            schedules = note.items.len(),
            jobs_cleared = note.cleared_jobs.len(),
            "delivery note issued"
        );
        for job_id in &note.job_ids {
            let cleared = note.cleared_jobs.iter().any(|mark| &mark.job_id == job_id);
            emit_quietly(
                self.events.as_ref(),
                LifecycleEvent::new(EventType::ClearanceIssued, job_id.clone())
                    .with("delivery_note_id", &note.id)
                    .with("schedules", note.items.len())
                    .with("job_cleared", cleared),
            );
        }

        Ok(note)
    }

    /// Whether every BL of `job` is covered once `changes` land.
    fn fully_covered(
        &self,
        job: &Job,
        changes: CoverageChange<'_>,
    ) -> Result<bool, ClearanceError> {
        let bills_of_lading = self.store.bills_of_lading(&job.id)?;
        if bills_of_lading.is_empty() {
            return Ok(false);
        }
        let containers = self.store.containers(&job.id)?;
        let mut schedules = self.store.schedules(&ScheduleFilter::for_job(&job.id))?;
        for schedule in schedules.iter_mut() {
            if let Some(update) = changes
                .schedules
                .iter()
                .find(|u| u.schedule.id == schedule.id)
            {
                *schedule = update.schedule.clone();
            }
        }
        let mut notes = self
            .store
            .delivery_notes(&DeliveryNoteFilter::for_job(&job.id))?;
        if let Some(removed) = changes.removed {
            notes.retain(|note| &note.id != removed);
        }
        if let Some(added) = changes.added {
            notes.push(added.clone());
        }

        let coverage = DeliveryCoverage::compute(&bills_of_lading, &containers, &schedules, &notes);
        Ok(coverage.uncovered(&bills_of_lading).is_empty())
    }

    /// Delete a delivery note and restore everything it changed.
    pub fn delete_delivery_note(
        &self,
        note_id: &DeliveryNoteId,
    ) -> Result<DeliveryNoteReversalReport, ClearanceError> {
        let note = self
            .store
            .delivery_note(note_id)?
            .ok_or_else(|| ClearanceError::DeliveryNoteNotFound(note_id.clone()))?;

        let covered = self.store.schedules(&ScheduleFilter {
            delivery_note_id: Some(note.id.clone()),
            ..ScheduleFilter::default()
        })?;
        let released: Vec<ScheduleUpdate> = covered
            .into_iter()
            .map(|mut schedule| {
                schedule.status = ScheduleStatus::Scheduled;
                schedule.delivery_note_id = None;
                ScheduleUpdate {
                    schedule,
                    expected_status: ScheduleStatus::Covered,
                }
            })
            .collect();

        let mut restored_jobs = Vec::new();
        for job_id in &note.job_ids {
            let job = self.load_job(job_id)?;
            if job.status == JobStatus::Completed {
                debug!(note_id = %note.id, job_id = %job.id, "refusing to reverse note of completed job");
                return Err(ClearanceError::JobAlreadyCompleted(job.id));
            }
            if job.status != JobStatus::Cleared {
                continue;
            }
            let changes = CoverageChange {
                schedules: &released,
                added: None,
                removed: Some(&note.id),
            };
            if self.fully_covered(&job, changes)? {
                debug!(note_id = %note.id, job_id = %job.id, "job stays cleared under other notes");
                continue;
            }
            restored_jobs.push(JobUpdate::new(reopen(job, &note)));
        }

        let report = DeliveryNoteReversalReport {
            note_id: note.id.clone(),
            released_schedules: released.iter().map(|u| u.schedule.id.clone()).collect(),
            restored_jobs: restored_jobs.iter().map(|u| u.job.id.clone()).collect(),
        };

        self.store.revert_delivery_note(DeliveryNoteReversal {
            note_id: note.id.clone(),
            schedules: released,
            jobs: restored_jobs,
        })?;

        info!(
            note_id = %note.id,
            released = report.released_schedules.len(),
            restored = report.restored_jobs.len(),
            "delivery note deleted"
        );
        for job_id in &note.job_ids {
            emit_quietly(
                self.events.as_ref(),
                LifecycleEvent::new(EventType::DeliveryNoteDeleted, job_id.clone())
                    .with("delivery_note_id", &note.id)
                    .with("released_schedules", report.released_schedules.len()),
            );
        }

        Ok(report)
    }

    /// Record physical handover. Delivered is terminal.
    pub fn mark_delivered(
        &self,
        note_id: &DeliveryNoteId,
        signed_copy: Option<SignedCopyUpload>,
        comments: Option<String>,
    ) -> Result<DeliveryNote, ClearanceError> {
        let mut note = self
            .store
            .delivery_note(note_id)?
            .ok_or_else(|| ClearanceError::DeliveryNoteNotFound(note_id.clone()))?;
        if note.status == DeliveryNoteStatus::Delivered {
            return Err(ClearanceError::AlreadyDelivered(note.id));
        }

        let now = Utc::now();
        note.status = DeliveryNoteStatus::Delivered;
        note.delivered_at = Some(now);
        note.signed_copy = signed_copy.map(|upload| SignedCopy {
            document_name: upload.document_name,
            uploaded_by: upload.uploaded_by,
            uploaded_at: now,
        });
        note.comments = comments.filter(|text| !text.trim().is_empty());

        self.store.update_delivery_note(note.clone())?;

        info!(note_id = %note.id, signed = note.signed_copy.is_some(), "delivery note delivered");
        for job_id in &note.job_ids {
            emit_quietly(
                self.events.as_ref(),
                LifecycleEvent::new(EventType::DeliveryNoteDelivered, job_id.clone())
                    .with("delivery_note_id", &note.id)
                    .with("signed_copy", note.signed_copy.is_some()),
            );
        }

        Ok(note)
    }

    /// Schedules waiting for a delivery note, optionally for one job.
    pub fn awaiting_pool(
        &self,
        job_id: Option<&JobId>,
    ) -> Result<Vec<ClearanceSchedule>, ClearanceError> {
        let filter = ScheduleFilter {
            job_id: job_id.cloned(),
            ..ScheduleFilter::awaiting()
        };
        Ok(self.store.schedules(&filter)?)
    }

    /// Notes not yet delivered.
    pub fn pending_notes(&self) -> Result<Vec<DeliveryNote>, ClearanceError> {
        Ok(self.store.delivery_notes(&DeliveryNoteFilter::pending())?)
    }
}

/// Pending edits a coverage check should see before they are committed.
#[derive(Clone, Copy)]
struct CoverageChange<'a> {
    schedules: &'a [ScheduleUpdate],
    added: Option<&'a DeliveryNote>,
    removed: Option<&'a DeliveryNoteId>,
}

/// Puts a cleared job back to the signal it had before clearance.
fn reopen(mut job: Job, note: &DeliveryNote) -> Job {
    let recorded = job.cleared_from.take().or_else(|| {
        note.cleared_jobs
            .iter()
            .find(|mark| mark.job_id == job.id)
            .map(|mark| ClearanceSignal {
                status: mark.previous_status,
                progress: mark.previous_progress,
            })
    });
    let signal = match recorded {
        Some(signal) if !signal.status.signals_cleared() => signal,
        other => {
            warn!(
                job_id = %job.id,
                recorded = ?other,
                "no usable pre-clearance signal; reopening as in clearance"
            );
            REOPENED_SIGNAL
        }
    };
    job.status = signal.status;
    job.progress = signal.progress;
    job
}

fn same_party(left: &str, right: &str) -> bool {
    left.trim().eq_ignore_ascii_case(right.trim())
}

pub(crate) fn describe_target(target: &ClearanceTarget) -> String {
    match target {
        ClearanceTarget::BillOfLading(bl_id) => format!("BL {bl_id}"),
        ClearanceTarget::Container(container_id) => format!("container {container_id}"),
    }
}
