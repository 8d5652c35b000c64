//! Payment requests from recording through voucher settlement.
//!
//! ```text
//! Draft ─send─▶ Pending ─approve─▶ Approved ─settle─▶ Paid
//!                  │  ▲               │
//!                  │  └──── confirm ──┤
//!                  ▼                  ▼
//!          AwaitingClearance ◀────────┘
//!                  │
//!                  └─reject─▶ Rejected
//! ```
//!
//! Only `send_to_accounts` is gated on clearance. Settlement writes every
//! payment of a bucket in one guarded commit, so a voucher either pays all of
//! its payments or none.

mod bucket;
mod catalog;
mod import;

pub use bucket::{BucketEntry, BucketError, SettlementBucket};
pub use catalog::PaymentTypeCatalog;
pub use import::{PaymentCsvImporter, PaymentImportError};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use bucket::same_vendor;

use super::domain::{
    next_payment_id, JobId, JobStatus, NewPayment, Payment, PaymentId, PaymentStatus,
};
use super::error::ErrorKind;
use super::events::{emit_quietly, EventSink, EventType, LifecycleEvent};
use super::money::{Money, MoneyOverflow};
use super::stage::{Gate, JobSnapshot, PaymentSummary, Requirement, StageResolver};
use super::store::{EntityStore, PaymentFilter, PaymentUpdate, StoreError};

/// Voucher details captured when accounts pays a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementDetails {
    pub voucher_no: String,
    pub payment_reference: Option<String>,
    pub payment_date: NaiveDate,
    pub processed_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub voucher_no: String,
    pub vendor: String,
    pub total: Money,
    pub payments: Vec<Payment>,
}

/// Outcome of one id in a batch confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmResult {
    pub payment_id: PaymentId,
    pub outcome: Result<PaymentStatus, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("job {0} not found")]
    JobNotFound(JobId),
    #[error("job {0} is completed; no further payments can be recorded")]
    JobCompleted(JobId),
    #[error("job {0} has settled every payment request; delete a delivery note to reopen it before recording more")]
    AccountsSettled(JobId),
    #[error("payment requests for job {0} would exceed the largest representable total")]
    RequestedTotalOverflow(JobId),
    #[error("payment {0} not found")]
    PaymentNotFound(PaymentId),
    #[error("payment {payment_id} belongs to job {actual}, not {expected}")]
    WrongJob {
        payment_id: PaymentId,
        expected: JobId,
        actual: JobId,
    },
    #[error("amount must be greater than zero, got {0}")]
    NonPositiveAmount(Money),
    #[error("payment type is required")]
    MissingPaymentType,
    #[error("no vendor given and payment type '{0}' has no default vendor")]
    MissingVendor(String),
    #[error("{field} is required to settle payments")]
    MissingSettlementField { field: &'static str },
    #[error("select at least one payment")]
    EmptySelection,
    #[error("payment {payment_id} is {from}; it cannot move to {to}")]
    InvalidTransition {
        payment_id: PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
    },
    #[error("payment {payment_id} is {status}; only drafts can be discarded")]
    NotDraft {
        payment_id: PaymentId,
        status: PaymentStatus,
    },
    #[error("job {job_id} has not finished clearance; delivery notes must be issued for all BLs first")]
    ClearanceIncomplete {
        job_id: JobId,
        blockers: Vec<Requirement>,
    },
    #[error("bucket cannot be settled: payment {payment_id} is {status}, not Approved")]
    BucketNotEligible {
        payment_id: PaymentId,
        status: PaymentStatus,
    },
    #[error("payment {payment_id} changed since it was added to the bucket: {reason}")]
    SettlementConflict {
        payment_id: PaymentId,
        reason: String,
    },
    #[error(transparent)]
    Bucket(#[from] BucketError),
    #[error(transparent)]
    Overflow(#[from] MoneyOverflow),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ClearanceIncomplete { .. } | Self::AccountsSettled(_) => ErrorKind::Precondition,
            Self::SettlementConflict { .. } | Self::Store(StoreError::StaleWrite { .. }) => {
                ErrorKind::Conflict
            }
            Self::Store(_) => ErrorKind::Storage,
            _ => ErrorKind::Validation,
        }
    }
}

/// Workflow driving payment requests through the accounts desk.
pub struct PaymentWorkflow<S: ?Sized, E: ?Sized> {
    store: Arc<S>,
    events: Arc<E>,
    catalog: PaymentTypeCatalog,
    resolver: StageResolver,
}

impl<S, E> PaymentWorkflow<S, E>
where
    S: EntityStore + ?Sized,
    E: EventSink + ?Sized,
{
    pub fn new(store: Arc<S>, events: Arc<E>, resolver: StageResolver) -> Self {
        Self {
            store,
            events,
            catalog: PaymentTypeCatalog::standard(),
            resolver,
        }
    }

    pub fn with_catalog(mut self, catalog: PaymentTypeCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn catalog(&self) -> &PaymentTypeCatalog {
        &self.catalog
    }

    fn load_payment(&self, payment_id: &PaymentId) -> Result<Payment, PaymentError> {
        self.store
            .payment(payment_id)?
            .ok_or_else(|| PaymentError::PaymentNotFound(payment_id.clone()))
    }

    /// Record a new request as `Draft`. Allowed before completion, except
    /// once the job's accounts are settled: a new request there would pull
    /// the job back out of Accounts.
    pub fn record_payment(&self, request: NewPayment) -> Result<Payment, PaymentError> {
        if !request.amount.is_positive() {
            return Err(PaymentError::NonPositiveAmount(request.amount));
        }
        let payment_type = request.payment_type.trim().to_string();
        if payment_type.is_empty() {
            return Err(PaymentError::MissingPaymentType);
        }

        let snapshot = JobSnapshot::load(self.store.as_ref(), &request.job_id)?
            .ok_or_else(|| PaymentError::JobNotFound(request.job_id.clone()))?;
        let job = snapshot.job.clone();
        if job.status == JobStatus::Completed {
            return Err(PaymentError::JobCompleted(job.id));
        }
        let resolution = self.resolver.resolve(&snapshot);
        if resolution.accounts_complete {
            warn!(job_id = %job.id, "payment refused on a job whose accounts are settled");
            return Err(PaymentError::AccountsSettled(job.id));
        }
        let requested = PaymentSummary::from_payments(&snapshot.payments)
            .and_then(|summary| summary.requested.try_add(request.amount));
        if requested.is_err() {
            return Err(PaymentError::RequestedTotalOverflow(job.id));
        }

        let vendor = match request.vendor.as_deref().map(str::trim) {
            Some(vendor) if !vendor.is_empty() => vendor.to_string(),
            _ => self
                .catalog
                .default_vendor(&payment_type)
                .map(str::to_string)
                .ok_or_else(|| PaymentError::MissingVendor(payment_type.clone()))?,
        };

        let payment = self.store.insert_payment(Payment {
            id: next_payment_id(),
            job_id: job.id,
            payment_type,
            vendor,
            amount: request.amount,
            paid_by: request.paid_by,
            status: PaymentStatus::Draft,
            requested_by: request.requested_by,
            processed_by: None,
            bill_ref_no: request.bill_ref_no.filter(|value| !value.trim().is_empty()),
            created_at: Utc::now(),
            paid_at: None,
            voucher_no: None,
            payment_reference: None,
            payment_date: None,
        })?;

        info!(
            job_id = %payment.job_id,
            payment_id = %payment.id,
            vendor = %payment.vendor,
            amount = %payment.amount,
            "payment recorded"
        );
        emit_quietly(
            self.events.as_ref(),
            LifecycleEvent::new(EventType::PaymentRecorded, payment.job_id.clone())
                .with("payment_id", &payment.id)
                .with("vendor", &payment.vendor)
                .with("amount", payment.amount),
        );

        Ok(payment)
    }

    /// Move Draft requests of one job to Pending. Refused unless the job has
    /// finished clearance at the moment of the call.
    pub fn send_to_accounts(
        &self,
        job_id: &JobId,
        payment_ids: &[PaymentId],
    ) -> Result<Vec<Payment>, PaymentError> {
        if payment_ids.is_empty() {
            return Err(PaymentError::EmptySelection);
        }

        let snapshot = JobSnapshot::load(self.store.as_ref(), job_id)?
            .ok_or_else(|| PaymentError::JobNotFound(job_id.clone()))?;
        let resolution = self.resolver.resolve(&snapshot);
        if !resolution.clearance_complete {
            let blockers = resolution.blockers_through(Gate::Clearance);
            warn!(
                job_id = %job_id,
                blockers = blockers.len(),
                "payments held back until clearance completes"
            );
            return Err(PaymentError::ClearanceIncomplete {
                job_id: job_id.clone(),
                blockers,
            });
        }

        let mut seen = BTreeSet::new();
        let mut updates = Vec::with_capacity(payment_ids.len());
        for payment_id in payment_ids {
            if !seen.insert(payment_id.clone()) {
                continue;
            }
            let payment = match snapshot.payments.iter().find(|p| &p.id == payment_id) {
                Some(payment) => payment.clone(),
                None => {
                    let other = self.load_payment(payment_id)?;
                    return Err(PaymentError::WrongJob {
                        payment_id: other.id,
                        expected: job_id.clone(),
                        actual: other.job_id,
                    });
                }
            };
            updates.push(transition(payment, PaymentStatus::Pending)?);
        }

        let sent: Vec<Payment> = updates.iter().map(|u| u.payment.clone()).collect();
        self.store.commit_payments(updates)?;

        info!(job_id = %job_id, count = sent.len(), "payments sent to accounts");
        emit_quietly(
            self.events.as_ref(),
            LifecycleEvent::new(EventType::PaymentSentToAccounts, job_id.clone())
                .with("count", sent.len())
                .with("payment_ids", join_ids(sent.iter().map(|p| &p.id)))
                .with("total", total_label(&sent)),
        );

        Ok(sent)
    }

    /// Accounts approval of a Pending request.
    pub fn approve(&self, payment_id: &PaymentId) -> Result<Payment, PaymentError> {
        self.move_one(
            payment_id,
            &[PaymentStatus::Pending],
            PaymentStatus::Approved,
            EventType::PaymentApproved,
        )
    }

    /// Ask the clearance desk to confirm a Pending or Approved request.
    pub fn request_clearance_confirmation(
        &self,
        payment_id: &PaymentId,
    ) -> Result<Payment, PaymentError> {
        self.move_one(
            payment_id,
            &[PaymentStatus::Pending, PaymentStatus::Approved],
            PaymentStatus::AwaitingClearance,
            EventType::PaymentClearanceRequested,
        )
    }

    /// Clearance desk confirms a request that was awaiting it.
    pub fn confirm(&self, payment_id: &PaymentId) -> Result<Payment, PaymentError> {
        self.move_one(
            payment_id,
            &[PaymentStatus::AwaitingClearance],
            PaymentStatus::Approved,
            EventType::PaymentConfirmed,
        )
    }

    /// Confirm or reject several requests. Each id succeeds or fails on its
    /// own; one failure does not undo the others.
    pub fn confirm_batch(
        &self,
        payment_ids: &[PaymentId],
        confirmed: bool,
    ) -> Vec<ConfirmResult> {
        let (target, event_type) = if confirmed {
            (PaymentStatus::Approved, EventType::PaymentConfirmed)
        } else {
            (PaymentStatus::Rejected, EventType::PaymentRejected)
        };
        let sources = [PaymentStatus::Pending, PaymentStatus::AwaitingClearance];

        payment_ids
            .iter()
            .map(|payment_id| ConfirmResult {
                payment_id: payment_id.clone(),
                outcome: self
                    .move_one(payment_id, &sources, target, event_type)
                    .map(|payment| payment.status)
                    .map_err(|err| err.to_string()),
            })
            .collect()
    }

    fn move_one(
        &self,
        payment_id: &PaymentId,
        allowed_from: &[PaymentStatus],
        to: PaymentStatus,
        event_type: EventType,
    ) -> Result<Payment, PaymentError> {
        let payment = self.load_payment(payment_id)?;
        if !allowed_from.contains(&payment.status) {
            return Err(PaymentError::InvalidTransition {
                payment_id: payment.id,
                from: payment.status,
                to,
            });
        }
        let from = payment.status;
        let update = transition(payment, to)?;
        let payment = update.payment.clone();
        self.store.commit_payments(vec![update])?;

        info!(
            job_id = %payment.job_id,
            payment_id = %payment.id,
            from = from.label(),
            to = to.label(),
            "payment status changed"
        );
        emit_quietly(
            self.events.as_ref(),
            LifecycleEvent::new(event_type, payment.job_id.clone())
                .with("payment_id", &payment.id)
                .with("from", from)
                .with("to", to),
        );

        Ok(payment)
    }

    /// Pay every payment in `bucket` under one voucher.
    ///
    /// The bucket is a snapshot; each member is re-read and must still be
    /// Approved for the bucket's vendor. The write is all-or-nothing.
    pub fn process_batch(
        &self,
        bucket: &SettlementBucket,
        details: SettlementDetails,
    ) -> Result<SettlementReceipt, PaymentError> {
        if bucket.is_empty() {
            return Err(PaymentError::EmptySelection);
        }
        if details.voucher_no.trim().is_empty() {
            return Err(PaymentError::MissingSettlementField {
                field: "voucher number",
            });
        }
        if details.processed_by.trim().is_empty() {
            return Err(PaymentError::MissingSettlementField {
                field: "processed by",
            });
        }
        if let Some(entry) = bucket.ineligible().first() {
            return Err(PaymentError::BucketNotEligible {
                payment_id: entry.payment_id.clone(),
                status: entry.status,
            });
        }

        let vendor = bucket.vendor().unwrap_or_default().to_string();
        let paid_at = Utc::now();
        let voucher_no = details.voucher_no.trim().to_string();
        let payment_reference = details
            .payment_reference
            .filter(|value| !value.trim().is_empty());

        let mut updates = Vec::with_capacity(bucket.len());
        for entry in bucket.entries() {
            let Some(mut current) = self.store.payment(&entry.payment_id)? else {
                return Err(PaymentError::SettlementConflict {
                    payment_id: entry.payment_id.clone(),
                    reason: "it no longer exists".to_string(),
                });
            };
            if current.status != PaymentStatus::Approved {
                return Err(PaymentError::SettlementConflict {
                    payment_id: current.id,
                    reason: format!("it is now {}", current.status),
                });
            }
            if !same_vendor(&current.vendor, &vendor) {
                return Err(PaymentError::SettlementConflict {
                    payment_id: current.id,
                    reason: format!("its vendor is now '{}'", current.vendor),
                });
            }

            current.status = PaymentStatus::Paid;
            current.paid_at = Some(paid_at);
            current.voucher_no = Some(voucher_no.clone());
            current.payment_reference = payment_reference.clone();
            current.payment_date = Some(details.payment_date);
            current.processed_by = Some(details.processed_by.trim().to_string());
            updates.push(PaymentUpdate {
                payment: current,
                expected_status: PaymentStatus::Approved,
            });
        }

        let paid: Vec<Payment> = updates.iter().map(|u| u.payment.clone()).collect();
        let total = Money::try_sum(paid.iter().map(|p| p.amount))?;
        self.store.commit_payments(updates).map_err(|err| match err {
            StoreError::StaleWrite { id, found, .. } => PaymentError::SettlementConflict {
                payment_id: PaymentId::new(id),
                reason: format!("it is now {found}"),
            },
            other => PaymentError::Store(other),
        })?;

        let receipt = SettlementReceipt {
            voucher_no,
            vendor,
            total,
            payments: paid,
        };

        info!(
            voucher_no = %receipt.voucher_no,
            vendor = %receipt.vendor,
            count = receipt.payments.len(),
            total = %receipt.total,
            "settlement batch paid"
        );
        let mut by_job: BTreeMap<&JobId, Vec<&Payment>> = BTreeMap::new();
        for payment in &receipt.payments {
            by_job.entry(&payment.job_id).or_default().push(payment);
        }
        for (job_id, payments) in by_job {
            emit_quietly(
                self.events.as_ref(),
                LifecycleEvent::new(EventType::PaymentSettled, job_id.clone())
                    .with("voucher_no", &receipt.voucher_no)
                    .with("vendor", &receipt.vendor)
                    .with("payment_ids", join_ids(payments.iter().map(|p| &p.id)))
                    .with("amount", total_label(payments.iter().copied())),
            );
        }

        Ok(receipt)
    }

    pub fn payment_summary(&self, job_id: &JobId) -> Result<PaymentSummary, PaymentError> {
        if self.store.job(job_id)?.is_none() {
            return Err(PaymentError::JobNotFound(job_id.clone()));
        }
        let payments = self.store.payments(&PaymentFilter::for_job(job_id))?;
        Ok(PaymentSummary::from_payments(&payments)?)
    }

    /// Approved payments of one vendor across all jobs, ready for a bucket.
    pub fn approved_for_vendor(&self, vendor: &str) -> Result<Vec<Payment>, PaymentError> {
        let filter = PaymentFilter {
            vendor: Some(vendor.trim().to_string()),
            ..PaymentFilter::default()
        }
        .with_status(PaymentStatus::Approved);
        Ok(self.store.payments(&filter)?)
    }

    /// Delete a request that never left the clearance desk.
    pub fn discard_draft(&self, payment_id: &PaymentId) -> Result<(), PaymentError> {
        let payment = self.load_payment(payment_id)?;
        if payment.status != PaymentStatus::Draft {
            return Err(PaymentError::NotDraft {
                payment_id: payment.id,
                status: payment.status,
            });
        }
        self.store.delete_payment(payment_id)?;
        info!(job_id = %payment.job_id, payment_id = %payment.id, "draft payment discarded");
        Ok(())
    }
}

fn transition(mut payment: Payment, to: PaymentStatus) -> Result<PaymentUpdate, PaymentError> {
    let from = payment.status;
    if !from.can_transition_to(to) {
        return Err(PaymentError::InvalidTransition {
            payment_id: payment.id,
            from,
            to,
        });
    }
    payment.status = to;
    Ok(PaymentUpdate {
        payment,
        expected_status: from,
    })
}

fn total_label<'a>(payments: impl IntoIterator<Item = &'a Payment>) -> String {
    Money::try_sum(payments.into_iter().map(|p| p.amount))
        .map_or_else(|err| err.to_string(), |total| total.to_string())
}

fn join_ids<'a>(ids: impl Iterator<Item = &'a PaymentId>) -> String {
    ids.map(PaymentId::as_str).collect::<Vec<_>>().join(",")
}
