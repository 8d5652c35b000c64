//! Derivation of a job's lifecycle stage from its sub-records.
//!
//! Nothing here touches storage or emits events. The resolver is re-run on
//! every read, so callers treat its output as a snapshot that may already be
//! stale when they act on it.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::domain::{
    is_blank, BillOfLading, BlId, ClearanceSchedule, ClearanceTarget, Container, DeliveryNote,
    Document, Job, JobId, JobStatus, Payment, PaymentStatus, ScheduleStatus,
};
use super::money::{Money, MoneyOverflow};
use super::store::{DeliveryNoteFilter, EntityStore, PaymentFilter, ScheduleFilter, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    None,
    Documentation,
    Clearance,
    Accounts,
    Completed,
}

impl Stage {
    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "Not Started",
            Self::Documentation => "Documentation",
            Self::Clearance => "Clearance",
            Self::Accounts => "Accounts",
            Self::Completed => "Completed",
        }
    }

    /// Display aid only. Gating code must use the named predicates.
    pub const fn progress_percent(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Documentation => 25,
            Self::Clearance => 50,
            Self::Accounts => 75,
            Self::Completed => 100,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Boundary a requirement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    Documentation,
    Clearance,
    Accounts,
    Completion,
}

impl Gate {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Documentation => "documentation complete",
            Self::Clearance => "clearance complete",
            Self::Accounts => "accounts complete",
            Self::Completion => "job completed",
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single unmet completeness requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "requirement", rename_all = "snake_case")]
pub enum Requirement {
    NoDocuments,
    MissingInvoiceField { field: String },
    NoBillOfLading,
    NoContainers,
    UncoveredBillOfLading { bl_id: BlId, master_no: String },
    ClearanceSignalMismatch,
    NoPaymentRequests,
    OutstandingPayments { outstanding: Money },
    PaymentTotalOverflow,
    NotMarkedCompleted,
    MissingJobInvoiceNo,
}

impl Requirement {
    pub const fn gate(&self) -> Gate {
        match self {
            Self::NoDocuments
            | Self::MissingInvoiceField { .. }
            | Self::NoBillOfLading
            | Self::NoContainers => Gate::Documentation,
            Self::UncoveredBillOfLading { .. } | Self::ClearanceSignalMismatch => Gate::Clearance,
            Self::NoPaymentRequests
            | Self::OutstandingPayments { .. }
            | Self::PaymentTotalOverflow => Gate::Accounts,
            Self::NotMarkedCompleted | Self::MissingJobInvoiceNo => Gate::Completion,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDocuments => f.write_str("no documents uploaded"),
            Self::MissingInvoiceField { field } => write!(f, "invoice field '{field}' is empty"),
            Self::NoBillOfLading => f.write_str("no bill of lading recorded"),
            Self::NoContainers => f.write_str("sea job has no containers"),
            Self::UncoveredBillOfLading { master_no, .. } => {
                write!(f, "no delivery note issued for BL {master_no}")
            }
            Self::ClearanceSignalMismatch => {
                f.write_str("job status/progress disagree with delivery-note coverage")
            }
            Self::NoPaymentRequests => f.write_str("no payment requests recorded"),
            Self::OutstandingPayments { outstanding } => {
                write!(f, "{outstanding} still unpaid")
            }
            Self::PaymentTotalOverflow => {
                f.write_str("payment totals exceed the largest representable amount")
            }
            Self::NotMarkedCompleted => f.write_str("job has not been marked completed"),
            Self::MissingJobInvoiceNo => f.write_str("job invoice number is empty"),
        }
    }
}

/// Which signal decides clearance when the status label and BL coverage
/// disagree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearanceSignalPolicy {
    /// Delivery-note coverage decides; disagreement is only reported.
    #[default]
    Coverage,
    /// Coverage and the status/progress signal must both say cleared.
    Strict,
}

impl ClearanceSignalPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "coverage" | "entities" => Some(Self::Coverage),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }
}

/// Status/progress signal that disagreed with delivery-note coverage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalConflict {
    pub coverage_complete: bool,
    pub status: JobStatus,
    pub progress: u8,
}

impl fmt::Display for SignalConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status '{}' with progress {} but delivery notes {} every BL",
            self.status.label(),
            self.progress,
            if self.coverage_complete {
                "cover"
            } else {
                "do not cover"
            }
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub request_count: usize,
    pub requested: Money,
    pub paid: Money,
    pub outstanding: Money,
    pub is_fully_paid: bool,
}

impl PaymentSummary {
    /// A job with nothing requested is never fully paid. Totals that do not
    /// fit in [`Money`] are reported rather than clamped.
    pub fn from_payments<'a>(
        payments: impl IntoIterator<Item = &'a Payment>,
    ) -> Result<Self, MoneyOverflow> {
        let mut request_count = 0;
        let mut requested = Money::ZERO;
        let mut paid = Money::ZERO;

        for payment in payments {
            if !payment.status.counts_as_requested() {
                continue;
            }
            request_count += 1;
            requested = requested.try_add(payment.amount)?;
            if payment.status == PaymentStatus::Paid {
                paid = paid.try_add(payment.amount)?;
            }
        }

        Ok(Self {
            request_count,
            requested,
            paid,
            outstanding: requested.try_sub(paid)?,
            is_fully_paid: requested.is_positive() && paid == requested,
        })
    }
}

/// BLs of one job that are covered by an issued delivery note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCoverage {
    covered: BTreeSet<BlId>,
}

impl DeliveryCoverage {
    pub fn compute(
        bills_of_lading: &[BillOfLading],
        containers: &[Container],
        schedules: &[ClearanceSchedule],
        notes: &[DeliveryNote],
    ) -> Self {
        let mut covered = BTreeSet::new();

        for schedule in schedules {
            if schedule.status != ScheduleStatus::Covered {
                continue;
            }
            let issued = schedule
                .delivery_note_id
                .as_ref()
                .is_some_and(|note_id| notes.iter().any(|note| &note.id == note_id));
            if !issued {
                continue;
            }

            if let Some(bl_id) = bl_for_target(&schedule.target, bills_of_lading, containers) {
                covered.insert(bl_id);
            }
        }

        Self { covered }
    }

    pub fn covers(&self, bl_id: &BlId) -> bool {
        self.covered.contains(bl_id)
    }

    pub fn uncovered<'a>(&self, bills_of_lading: &'a [BillOfLading]) -> Vec<&'a BillOfLading> {
        bills_of_lading
            .iter()
            .filter(|bl| !self.covers(&bl.id))
            .collect()
    }
}

/// BL a clearance target belongs to. A container without an explicit BL link
/// travels under the job's only BL.
pub(crate) fn bl_for_target(
    target: &ClearanceTarget,
    bills_of_lading: &[BillOfLading],
    containers: &[Container],
) -> Option<BlId> {
    match target {
        ClearanceTarget::BillOfLading(bl_id) => Some(bl_id.clone()),
        ClearanceTarget::Container(container_id) => {
            let container = containers
                .iter()
                .find(|container| &container.id == container_id)?;
            container.bl_id.clone().or_else(|| match bills_of_lading {
                [only] => Some(only.id.clone()),
                _ => None,
            })
        }
    }
}

/// Current view of a job and every record its stage depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub job: Job,
    pub bills_of_lading: Vec<BillOfLading>,
    pub containers: Vec<Container>,
    pub documents: Vec<Document>,
    pub schedules: Vec<ClearanceSchedule>,
    pub delivery_notes: Vec<DeliveryNote>,
    pub payments: Vec<Payment>,
}

impl JobSnapshot {
    pub fn load<S: EntityStore + ?Sized>(
        store: &S,
        job_id: &JobId,
    ) -> Result<Option<Self>, StoreError> {
        let Some(job) = store.job(job_id)? else {
            return Ok(None);
        };

        Ok(Some(Self {
            bills_of_lading: store.bills_of_lading(job_id)?,
            containers: store.containers(job_id)?,
            documents: store.documents(job_id)?,
            schedules: store.schedules(&ScheduleFilter::for_job(job_id))?,
            delivery_notes: store.delivery_notes(&DeliveryNoteFilter::for_job(job_id))?,
            payments: store.payments(&PaymentFilter::for_job(job_id))?,
            job,
        }))
    }

    pub fn coverage(&self) -> DeliveryCoverage {
        DeliveryCoverage::compute(
            &self.bills_of_lading,
            &self.containers,
            &self.schedules,
            &self.delivery_notes,
        )
    }

    pub fn payment_summary(&self) -> Result<PaymentSummary, MoneyOverflow> {
        PaymentSummary::from_payments(&self.payments)
    }

    pub fn awaiting_schedules(&self) -> impl Iterator<Item = &ClearanceSchedule> {
        self.schedules.iter().filter(|schedule| schedule.is_awaiting())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResolution {
    pub stage: Stage,
    pub documentation_complete: bool,
    pub clearance_complete: bool,
    pub accounts_complete: bool,
    /// Accounts are settled, so the manual completion action may run.
    pub completion_eligible: bool,
    pub payments: PaymentSummary,
    pub blockers: Vec<Requirement>,
    pub signal_conflict: Option<SignalConflict>,
}

impl StageResolution {
    pub fn progress_percent(&self) -> u8 {
        self.stage.progress_percent()
    }

    pub fn blockers_for(&self, gate: Gate) -> Vec<Requirement> {
        self.blockers
            .iter()
            .filter(|requirement| requirement.gate() == gate)
            .cloned()
            .collect()
    }

    /// Requirements standing between the job and `gate`, lower gates included.
    pub fn blockers_through(&self, gate: Gate) -> Vec<Requirement> {
        let rank = |gate: Gate| gate as u8;
        self.blockers
            .iter()
            .filter(|requirement| rank(requirement.gate()) <= rank(gate))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StageResolver {
    policy: ClearanceSignalPolicy,
}

impl StageResolver {
    pub fn new(policy: ClearanceSignalPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ClearanceSignalPolicy {
        self.policy
    }

    pub fn resolve(&self, snapshot: &JobSnapshot) -> StageResolution {
        self.resolve_parts(
            &snapshot.job,
            &snapshot.bills_of_lading,
            &snapshot.containers,
            &snapshot.documents,
            &snapshot.coverage(),
            &snapshot.payments,
        )
    }

    pub fn resolve_parts(
        &self,
        job: &Job,
        bills_of_lading: &[BillOfLading],
        containers: &[Container],
        documents: &[Document],
        coverage: &DeliveryCoverage,
        payments: &[Payment],
    ) -> StageResolution {
        let mut blockers = Vec::new();

        if documents.is_empty() {
            blockers.push(Requirement::NoDocuments);
        }
        for (field, value) in [
            ("invoice_no", job.invoice.invoice_no.as_deref()),
            ("package_count", job.invoice.package_count.as_deref()),
            ("cargo_type", job.invoice.cargo_type.as_deref()),
        ] {
            if is_blank(value) {
                blockers.push(Requirement::MissingInvoiceField {
                    field: field.to_string(),
                });
            }
        }
        if bills_of_lading.is_empty() {
            blockers.push(Requirement::NoBillOfLading);
        }
        if job.transport_mode.requires_containers() && containers.is_empty() {
            blockers.push(Requirement::NoContainers);
        }
        let documentation_complete = blockers.is_empty();

        let uncovered = coverage.uncovered(bills_of_lading);
        let coverage_complete = !bills_of_lading.is_empty() && uncovered.is_empty();
        for bl in uncovered {
            blockers.push(Requirement::UncoveredBillOfLading {
                bl_id: bl.id.clone(),
                master_no: bl.master_no.clone(),
            });
        }

        let signal_complete = job.status.signals_cleared() || job.progress >= 100;
        let signal_conflict = (signal_complete != coverage_complete).then(|| SignalConflict {
            coverage_complete,
            status: job.status,
            progress: job.progress,
        });

        let clearance_signals_ok = match self.policy {
            ClearanceSignalPolicy::Coverage => coverage_complete,
            ClearanceSignalPolicy::Strict => {
                if coverage_complete && !signal_complete {
                    blockers.push(Requirement::ClearanceSignalMismatch);
                }
                coverage_complete && signal_complete
            }
        };
        let clearance_complete = documentation_complete && clearance_signals_ok;

        let summary = match PaymentSummary::from_payments(payments) {
            Ok(summary) if summary.request_count == 0 || !summary.requested.is_positive() => {
                blockers.push(Requirement::NoPaymentRequests);
                summary
            }
            Ok(summary) => {
                if !summary.is_fully_paid {
                    blockers.push(Requirement::OutstandingPayments {
                        outstanding: summary.outstanding,
                    });
                }
                summary
            }
            Err(MoneyOverflow) => {
                blockers.push(Requirement::PaymentTotalOverflow);
                PaymentSummary::default()
            }
        };
        let accounts_complete = clearance_complete && summary.is_fully_paid;

        if job.status != JobStatus::Completed {
            blockers.push(Requirement::NotMarkedCompleted);
        }
        if is_blank(job.job_invoice_no.as_deref()) {
            blockers.push(Requirement::MissingJobInvoiceNo);
        }
        let completed = accounts_complete
            && job.status == JobStatus::Completed
            && !is_blank(job.job_invoice_no.as_deref());

        let stage = if completed {
            Stage::Completed
        } else if accounts_complete {
            Stage::Accounts
        } else if clearance_complete {
            Stage::Clearance
        } else if documentation_complete {
            Stage::Documentation
        } else {
            Stage::None
        };

        StageResolution {
            stage,
            documentation_complete,
            clearance_complete,
            accounts_complete,
            completion_eligible: accounts_complete,
            payments: summary,
            blockers,
            signal_conflict,
        }
    }
}
