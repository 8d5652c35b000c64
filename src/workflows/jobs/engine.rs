use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::access::{Actor, AuthorizationProvider, Capability};
use super::clearance::{
    ClearanceWorkflow, DeliveryNoteReversalReport, DeliveryNoteRequest, RescheduleRequest,
    ScheduleRequest, SignedCopyUpload,
};
use super::domain::{
    ClearanceSchedule, ClearanceTarget, DeliveryNote, DeliveryNoteId, DeliveryNoteStatus, Job,
    JobId, JobStatus, NewPayment, Payment, PaymentId, PaymentStatus, ScheduleId,
};
use super::error::EngineError;
use super::events::{emit_quietly, EventSink, EventType, LifecycleEvent};
use super::payments::{
    ConfirmResult, PaymentWorkflow, SettlementBucket, SettlementDetails, SettlementReceipt,
};
use super::stage::{
    ClearanceSignalPolicy, Gate, JobSnapshot, PaymentSummary, Stage, StageResolution,
    StageResolver,
};
use super::store::{EntityStore, JobUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub clearance_signal: ClearanceSignalPolicy,
    /// Emit `DATA_INTEGRITY_WARNING` when status and coverage disagree.
    pub integrity_warnings: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            clearance_signal: ClearanceSignalPolicy::Coverage,
            integrity_warnings: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ScheduleClearance,
    RescheduleClearance,
    IssueDeliveryNote,
    DeleteDeliveryNote,
    MarkDelivered,
    RecordPayment,
    SendToAccounts,
    ApprovePayment,
    RequestClearanceConfirmation,
    ConfirmPayments,
    SettlePayments,
    MarkCompleted,
}

impl ActionKind {
    pub const fn capability(self) -> Capability {
        match self {
            Self::ScheduleClearance | Self::RescheduleClearance => Capability::EditClearance,
            Self::IssueDeliveryNote | Self::MarkDelivered => Capability::IssueDeliveryNote,
            Self::DeleteDeliveryNote => Capability::DeleteDeliveryNote,
            Self::RecordPayment | Self::SendToAccounts => Capability::RequestPayment,
            Self::ApprovePayment | Self::RequestClearanceConfirmation => {
                Capability::ApprovePayment
            }
            Self::ConfirmPayments => Capability::ConfirmClearancePayment,
            Self::SettlePayments => Capability::SettlePayment,
            Self::MarkCompleted => Capability::CompleteJob,
        }
    }
}

/// A job-scoped command. Settlement spans jobs and goes through
/// [`JobLifecycleEngine::process_batch`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum JobAction {
    ScheduleClearance {
        target: ClearanceTarget,
        scheduled_date: NaiveDate,
        port: String,
        method: String,
    },
    RescheduleClearance {
        schedule_id: ScheduleId,
        scheduled_date: NaiveDate,
        reason: String,
        port: Option<String>,
    },
    IssueDeliveryNote(DeliveryNoteRequest),
    DeleteDeliveryNote {
        note_id: DeliveryNoteId,
    },
    MarkDelivered {
        note_id: DeliveryNoteId,
        signed_copy: Option<SignedCopyUpload>,
        comments: Option<String>,
    },
    RecordPayment(NewPayment),
    SendToAccounts {
        payment_ids: Vec<PaymentId>,
    },
    ApprovePayment {
        payment_id: PaymentId,
    },
    RequestClearanceConfirmation {
        payment_id: PaymentId,
    },
    ConfirmPayments {
        payment_ids: Vec<PaymentId>,
        confirmed: bool,
    },
    MarkCompleted {
        job_invoice_no: Option<String>,
    },
}

impl JobAction {
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::ScheduleClearance { .. } => ActionKind::ScheduleClearance,
            Self::RescheduleClearance { .. } => ActionKind::RescheduleClearance,
            Self::IssueDeliveryNote(_) => ActionKind::IssueDeliveryNote,
            Self::DeleteDeliveryNote { .. } => ActionKind::DeleteDeliveryNote,
            Self::MarkDelivered { .. } => ActionKind::MarkDelivered,
            Self::RecordPayment(_) => ActionKind::RecordPayment,
            Self::SendToAccounts { .. } => ActionKind::SendToAccounts,
            Self::ApprovePayment { .. } => ActionKind::ApprovePayment,
            Self::RequestClearanceConfirmation { .. } => ActionKind::RequestClearanceConfirmation,
            Self::ConfirmPayments { .. } => ActionKind::ConfirmPayments,
            Self::MarkCompleted { .. } => ActionKind::MarkCompleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "data", rename_all = "snake_case")]
pub enum ActionOutcome {
    Scheduled(ClearanceSchedule),
    Rescheduled(ClearanceSchedule),
    DeliveryNoteIssued(DeliveryNote),
    DeliveryNoteDeleted(DeliveryNoteReversalReport),
    Delivered(DeliveryNote),
    PaymentRecorded(Payment),
    SentToAccounts(Vec<Payment>),
    PaymentUpdated(Payment),
    Confirmations(Vec<ConfirmResult>),
    Completed(Job),
}

/// Everything a screen needs to render one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobView {
    pub job: Job,
    pub stage: Stage,
    pub progress_percent: u8,
    pub resolution: StageResolution,
    pub legal_actions: Vec<ActionKind>,
    pub awaiting_schedules: Vec<ClearanceSchedule>,
    pub delivery_notes: Vec<DeliveryNote>,
    pub payments: Vec<Payment>,
    pub payment_summary: PaymentSummary,
}

impl JobView {
    pub fn allows(&self, action: ActionKind) -> bool {
        self.legal_actions.contains(&action)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReceipt {
    pub outcome: ActionOutcome,
    pub view: JobView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementOutcome {
    pub receipt: SettlementReceipt,
    pub views: Vec<JobView>,
}

/// Entry point for hosts: reads derive a fresh [`JobView`], writes go through
/// [`perform_action`](Self::perform_action) and are re-validated against the
/// store at execution time.
pub struct JobLifecycleEngine<S: ?Sized, E: ?Sized> {
    store: Arc<S>,
    events: Arc<E>,
    settings: EngineSettings,
    resolver: StageResolver,
    clearance: ClearanceWorkflow<S, E>,
    payments: PaymentWorkflow<S, E>,
}

impl<S, E> JobLifecycleEngine<S, E>
where
    S: EntityStore + ?Sized,
    E: EventSink + ?Sized,
{
    pub fn new(store: Arc<S>, events: Arc<E>, settings: EngineSettings) -> Self {
        let resolver = StageResolver::new(settings.clearance_signal);
        Self {
            clearance: ClearanceWorkflow::new(Arc::clone(&store), Arc::clone(&events)),
            payments: PaymentWorkflow::new(Arc::clone(&store), Arc::clone(&events), resolver),
            store,
            events,
            settings,
            resolver,
        }
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    pub fn clearance(&self) -> &ClearanceWorkflow<S, E> {
        &self.clearance
    }

    pub fn payments(&self) -> &PaymentWorkflow<S, E> {
        &self.payments
    }

    fn snapshot(&self, job_id: &JobId) -> Result<JobSnapshot, EngineError> {
        JobSnapshot::load(self.store.as_ref(), job_id)?
            .ok_or_else(|| EngineError::validation(format!("job {job_id} not found")))
    }

    pub fn get_job_view(&self, job_id: &JobId) -> Result<JobView, EngineError> {
        let snapshot = self.snapshot(job_id)?;
        let resolution = self.resolver.resolve(&snapshot);

        if let Some(conflict) = &resolution.signal_conflict {
            warn!(
                job_id = %job_id,
                policy = ?self.settings.clearance_signal,
                conflict = %conflict,
                "clearance signals disagree"
            );
            if self.settings.integrity_warnings {
                emit_quietly(
                    self.events.as_ref(),
                    LifecycleEvent::new(EventType::DataIntegrityWarning, job_id.clone())
                        .with("status", conflict.status.label())
                        .with("progress", conflict.progress)
                        .with("coverage_complete", conflict.coverage_complete),
                );
            }
        }

        let legal_actions = legal_actions(&snapshot, &resolution);
        Ok(JobView {
            stage: resolution.stage,
            progress_percent: resolution.progress_percent(),
            awaiting_schedules: snapshot.awaiting_schedules().cloned().collect(),
            payment_summary: resolution.payments,
            delivery_notes: snapshot.delivery_notes,
            payments: snapshot.payments,
            job: snapshot.job,
            legal_actions,
            resolution,
        })
    }

    /// Re-derive the view after the host learns the data may have moved.
    pub fn refresh(&self, job_id: &JobId) -> Result<JobView, EngineError> {
        let view = self.get_job_view(job_id)?;
        debug!(job_id = %job_id, stage = %view.stage, "job view refreshed");
        Ok(view)
    }

    pub fn legal_actions_for(
        &self,
        view: &JobView,
        actor: &Actor,
        authorization: &dyn AuthorizationProvider,
    ) -> Vec<ActionKind> {
        view.legal_actions
            .iter()
            .copied()
            .filter(|action| authorization.has_capability(actor, action.capability()))
            .collect()
    }

    pub fn perform_action(
        &self,
        job_id: &JobId,
        action: JobAction,
    ) -> Result<ActionReceipt, EngineError> {
        let kind = action.kind();
        let outcome = self.execute(job_id, action).map_err(|err| {
            debug!(job_id = %job_id, action = ?kind, kind = ?err.kind(), error = %err, "action rejected");
            err
        })?;
        let view = self.get_job_view(job_id)?;
        Ok(ActionReceipt { outcome, view })
    }

    fn execute(&self, job_id: &JobId, action: JobAction) -> Result<ActionOutcome, EngineError> {
        let job = self.snapshot(job_id)?.job;

        let outcome = match action {
            JobAction::ScheduleClearance {
                target,
                scheduled_date,
                port,
                method,
            } => ActionOutcome::Scheduled(self.clearance.schedule_clearance(ScheduleRequest {
                job_id: job.id.clone(),
                target,
                scheduled_date,
                port,
                method,
            })?),
            JobAction::RescheduleClearance {
                schedule_id,
                scheduled_date,
                reason,
                port,
            } => {
                self.require_schedule_of(&job, &schedule_id)?;
                ActionOutcome::Rescheduled(self.clearance.reschedule_clearance(
                    RescheduleRequest {
                        schedule_id,
                        scheduled_date,
                        reason,
                        port,
                    },
                )?)
            }
            JobAction::IssueDeliveryNote(request) => {
                let mut touches_job = false;
                for schedule_id in &request.schedule_ids {
                    if let Some(schedule) = self.store.schedule(schedule_id)? {
                        touches_job |= schedule.job_id == job.id;
                    }
                }
                if !touches_job {
                    return Err(EngineError::validation(format!(
                        "none of the selected schedules belong to job {}",
                        job.id
                    )));
                }
                ActionOutcome::DeliveryNoteIssued(self.clearance.issue_delivery_note(request)?)
            }
            JobAction::DeleteDeliveryNote { note_id } => {
                self.require_note_of(&job, &note_id)?;
                ActionOutcome::DeliveryNoteDeleted(self.clearance.delete_delivery_note(&note_id)?)
            }
            JobAction::MarkDelivered {
                note_id,
                signed_copy,
                comments,
            } => {
                self.require_note_of(&job, &note_id)?;
                ActionOutcome::Delivered(self.clearance.mark_delivered(
                    &note_id,
                    signed_copy,
                    comments,
                )?)
            }
            JobAction::RecordPayment(request) => {
                if request.job_id != job.id {
                    return Err(EngineError::validation(format!(
                        "payment request names job {}, not {}",
                        request.job_id, job.id
                    )));
                }
                ActionOutcome::PaymentRecorded(self.payments.record_payment(request)?)
            }
            JobAction::SendToAccounts { payment_ids } => ActionOutcome::SentToAccounts(
                self.payments.send_to_accounts(&job.id, &payment_ids)?,
            ),
            JobAction::ApprovePayment { payment_id } => {
                self.require_payment_of(&job, &payment_id)?;
                ActionOutcome::PaymentUpdated(self.payments.approve(&payment_id)?)
            }
            JobAction::RequestClearanceConfirmation { payment_id } => {
                self.require_payment_of(&job, &payment_id)?;
                ActionOutcome::PaymentUpdated(
                    self.payments.request_clearance_confirmation(&payment_id)?,
                )
            }
            JobAction::ConfirmPayments {
                payment_ids,
                confirmed,
            } => {
                for payment_id in &payment_ids {
                    self.require_payment_of(&job, payment_id)?;
                }
                ActionOutcome::Confirmations(self.payments.confirm_batch(&payment_ids, confirmed))
            }
            JobAction::MarkCompleted { job_invoice_no } => {
                ActionOutcome::Completed(self.mark_completed(&job.id, job_invoice_no)?)
            }
        };

        Ok(outcome)
    }

    fn mark_completed(
        &self,
        job_id: &JobId,
        job_invoice_no: Option<String>,
    ) -> Result<Job, EngineError> {
        let snapshot = self.snapshot(job_id)?;
        if snapshot.job.status == JobStatus::Completed {
            return Err(EngineError::validation(format!(
                "job {job_id} is already completed"
            )));
        }

        let resolution = self.resolver.resolve(&snapshot);
        if !resolution.accounts_complete {
            return Err(EngineError::precondition(
                Gate::Accounts,
                resolution.blockers_through(Gate::Accounts),
            ));
        }

        let invoice_no = job_invoice_no
            .filter(|value| !value.trim().is_empty())
            .or_else(|| {
                snapshot
                    .job
                    .job_invoice_no
                    .clone()
                    .filter(|value| !value.trim().is_empty())
            })
            .ok_or_else(|| {
                EngineError::validation(format!(
                    "job {job_id} needs a job invoice number before it can be completed"
                ))
            })?;

        // Guarded on the revision the snapshot read, so a payment or note
        // landing after the gate check turns into a conflict.
        let mut job = snapshot.job;
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.job_invoice_no = Some(invoice_no.trim().to_string());
        let job = self.store.update_job(JobUpdate::new(job))?;

        info!(job_id = %job.id, invoice_no = ?job.job_invoice_no, "job completed");
        emit_quietly(
            self.events.as_ref(),
            LifecycleEvent::new(EventType::JobCompleted, job.id.clone())
                .with("job_invoice_no", job.job_invoice_no.as_deref().unwrap_or_default())
                .with("paid", resolution.payments.paid),
        );

        Ok(job)
    }

    /// Settle a vendor bucket across jobs and return fresh views of every job
    /// it touched.
    pub fn process_batch(
        &self,
        bucket: &SettlementBucket,
        details: SettlementDetails,
    ) -> Result<SettlementOutcome, EngineError> {
        let receipt = self.payments.process_batch(bucket, details).map_err(|err| {
            debug!(kind = ?err.kind(), error = %err, "settlement rejected");
            EngineError::from(err)
        })?;

        let mut job_ids: Vec<&JobId> = receipt.payments.iter().map(|p| &p.job_id).collect();
        job_ids.sort();
        job_ids.dedup();
        let views = job_ids
            .into_iter()
            .map(|job_id| self.get_job_view(job_id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SettlementOutcome { receipt, views })
    }

    fn require_schedule_of(&self, job: &Job, schedule_id: &ScheduleId) -> Result<(), EngineError> {
        match self.store.schedule(schedule_id)? {
            Some(schedule) if schedule.job_id == job.id => Ok(()),
            Some(_) => Err(EngineError::validation(format!(
                "clearance schedule {schedule_id} does not belong to job {}",
                job.id
            ))),
            None => Err(EngineError::validation(format!(
                "clearance schedule {schedule_id} not found"
            ))),
        }
    }

    fn require_note_of(&self, job: &Job, note_id: &DeliveryNoteId) -> Result<(), EngineError> {
        match self.store.delivery_note(note_id)? {
            Some(note) if note.covers_job(&job.id) => Ok(()),
            Some(_) => Err(EngineError::validation(format!(
                "delivery note {note_id} does not cover job {}",
                job.id
            ))),
            None => Err(EngineError::validation(format!(
                "delivery note {note_id} not found"
            ))),
        }
    }

    fn require_payment_of(&self, job: &Job, payment_id: &PaymentId) -> Result<(), EngineError> {
        match self.store.payment(payment_id)? {
            Some(payment) if payment.job_id == job.id => Ok(()),
            Some(payment) => Err(EngineError::validation(format!(
                "payment {payment_id} belongs to job {}, not {}",
                payment.job_id, job.id
            ))),
            None => Err(EngineError::validation(format!(
                "payment {payment_id} not found"
            ))),
        }
    }
}

fn legal_actions(snapshot: &JobSnapshot, resolution: &StageResolution) -> Vec<ActionKind> {
    let completed = snapshot.job.status == JobStatus::Completed;
    let has_target = !snapshot.bills_of_lading.is_empty() || !snapshot.containers.is_empty();
    let awaiting = snapshot.awaiting_schedules().next().is_some();
    let any_payment = |statuses: &[PaymentStatus]| {
        snapshot
            .payments
            .iter()
            .any(|payment| statuses.contains(&payment.status))
    };

    let candidates = [
        (
            ActionKind::ScheduleClearance,
            !resolution.clearance_complete && has_target && !completed,
        ),
        (
            ActionKind::RescheduleClearance,
            !resolution.clearance_complete && awaiting,
        ),
        (ActionKind::IssueDeliveryNote, awaiting && !completed),
        (
            ActionKind::DeleteDeliveryNote,
            !snapshot.delivery_notes.is_empty() && !completed,
        ),
        (
            ActionKind::MarkDelivered,
            snapshot
                .delivery_notes
                .iter()
                .any(|note| note.status == DeliveryNoteStatus::Pending),
        ),
        (ActionKind::RecordPayment, !completed && !resolution.accounts_complete),
        (
            ActionKind::SendToAccounts,
            resolution.clearance_complete && any_payment(&[PaymentStatus::Draft]),
        ),
        (ActionKind::ApprovePayment, any_payment(&[PaymentStatus::Pending])),
        (
            ActionKind::RequestClearanceConfirmation,
            any_payment(&[PaymentStatus::Pending, PaymentStatus::Approved]),
        ),
        (
            ActionKind::ConfirmPayments,
            any_payment(&[PaymentStatus::Pending, PaymentStatus::AwaitingClearance]),
        ),
        (ActionKind::SettlePayments, any_payment(&[PaymentStatus::Approved])),
        (
            ActionKind::MarkCompleted,
            resolution.accounts_complete && !completed,
        ),
    ];

    candidates
        .into_iter()
        .filter_map(|(action, legal)| legal.then_some(action))
        .collect()
}
