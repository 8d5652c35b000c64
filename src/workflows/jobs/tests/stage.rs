use super::common::*;
use chrono::Utc;

use crate::workflows::jobs::domain::{
    BillOfLading, ClearanceTarget, Container, ContainerId, ContainerSize, Document, DocumentId,
    DocumentType, Job, JobId, JobStatus, PaymentStatus, ShipmentType, TransportMode,
};
use crate::workflows::jobs::engine::{EngineSettings, JobAction};
use crate::workflows::jobs::events::EventType;
use crate::workflows::jobs::money::Money;
use crate::workflows::jobs::stage::{
    ClearanceSignalPolicy, Gate, PaymentSummary, Requirement, Stage,
};
use crate::workflows::jobs::store::{EntityStore, JobUpdate, MemoryEntityStore};

#[test]
fn sea_job_without_containers_is_not_documented() {
    let (engine, store, _) = build_engine();
    let job_id = seed_documented_job(&store, "SEA-100", "Harbor Foods", 0);
    store
        .insert_bill_of_lading(BillOfLading::new(
            bl_id("SEA-100", 1),
            job_id.clone(),
            "MSKU777",
        ))
        .expect("insert bl");

    let view = engine.get_job_view(&job_id).expect("view");
    assert_eq!(view.stage, Stage::None);
    assert_eq!(view.progress_percent, 0);
    assert_eq!(
        view.resolution.blockers_for(Gate::Documentation),
        vec![Requirement::NoContainers]
    );
}

#[test]
fn air_job_needs_no_containers() {
    let (engine, store, _) = build_engine();
    let mut job = sea_job("AIR-1", "Harbor Foods");
    job.transport_mode = TransportMode::Air;
    job.shipment_type = ShipmentType::Imp;
    let job = store.insert_job(job).expect("insert job");
    store
        .insert_bill_of_lading(BillOfLading::new(bl_id("AIR-1", 1), job.id.clone(), "AWB-1"))
        .expect("insert awb");
    store
        .insert_document(Document {
            id: DocumentId::new("AIR-1-doc"),
            job_id: job.id.clone(),
            document_type: DocumentType::BlAwb,
            name: "awb.pdf".to_string(),
            size_bytes: 1_024,
            uploaded_by: "docs".to_string(),
            uploaded_at: Utc::now(),
        })
        .expect("insert document");

    let view = engine.get_job_view(&job.id).expect("view");
    assert_eq!(view.stage, Stage::Documentation);
    assert!(view.resolution.documentation_complete);
}

#[test]
fn blank_invoice_field_blocks_documentation() {
    let (engine, store, _) = build_engine();
    let job_id = seed_documented_job(&store, "SEA-101", "Harbor Foods", 1);
    let mut job = stored_job(&store, &job_id);
    job.invoice.cargo_type = Some("   ".to_string());
    store.update_job(JobUpdate::new(job)).expect("update job");

    let view = engine.get_job_view(&job_id).expect("view");
    assert_eq!(view.stage, Stage::None);
    assert!(view
        .resolution
        .blockers
        .contains(&Requirement::MissingInvoiceField {
            field: "cargo_type".to_string()
        }));
}

#[test]
fn every_bl_needs_its_own_delivery_note() {
    let (engine, store, _) = build_engine();
    let job_id = seed_documented_job(&store, "SEA-102", "Harbor Foods", 2);

    let first = schedule_bl(&engine, &job_id, &bl_id("SEA-102", 1));
    schedule_bl(&engine, &job_id, &bl_id("SEA-102", 2));
    issue_note(&engine, &job_id, "Harbor Foods", vec![first.id]);

    let view = engine.get_job_view(&job_id).expect("view");
    assert_eq!(view.stage, Stage::Documentation);
    assert!(!view.resolution.clearance_complete);
    assert_eq!(
        view.resolution.blockers_for(Gate::Clearance),
        vec![Requirement::UncoveredBillOfLading {
            bl_id: bl_id("SEA-102", 2),
            master_no: "MSKUSEA-1022".to_string(),
        }]
    );
    assert_eq!(stored_job(&store, &job_id).status, JobStatus::InClearance);
}

#[test]
fn container_schedule_covers_the_only_bl() {
    let (engine, store, _) = build_engine();
    let job = store
        .insert_job(sea_job("SEA-103", "Harbor Foods"))
        .expect("insert job");
    seed_documents_only(&store, &job);
    store
        .insert_bill_of_lading(BillOfLading::new(bl_id("SEA-103", 1), job.id.clone(), "MSKU1"))
        .expect("insert bl");
    store
        .insert_container(Container {
            id: ContainerId::new("SEA-103-ctr"),
            job_id: job.id.clone(),
            container_no: "TGHU0000001".to_string(),
            size: ContainerSize::Hc40,
            unloaded_date: None,
            bl_id: None,
        })
        .expect("insert container");

    let receipt = engine
        .perform_action(
            &job.id,
            JobAction::ScheduleClearance {
                target: ClearanceTarget::Container(ContainerId::new("SEA-103-ctr")),
                scheduled_date: date(2025, 3, 12),
                port: "Port Klang".to_string(),
                method: "Physical inspection".to_string(),
            },
        )
        .expect("schedule container");
    let schedule_id = receipt.view.awaiting_schedules[0].id.clone();
    issue_note(&engine, &job.id, "Harbor Foods", vec![schedule_id]);

    let view = engine.get_job_view(&job.id).expect("view");
    assert!(view.resolution.clearance_complete);
    assert_eq!(view.stage, Stage::Clearance);
}

#[test]
fn cleared_job_without_payments_never_reaches_accounts() {
    let (engine, store, _) = build_engine();
    let job_id = seed_documented_job(&store, "SEA-104", "Harbor Foods", 1);
    clear_job(&engine, &job_id, "Harbor Foods", 1);

    let view = engine.get_job_view(&job_id).expect("view");
    assert_eq!(view.stage, Stage::Clearance);
    assert_eq!(view.payment_summary, PaymentSummary::default());
    assert!(!view.payment_summary.is_fully_paid);
    assert!(!view.resolution.accounts_complete);
    assert_eq!(
        view.resolution.blockers_for(Gate::Accounts),
        vec![Requirement::NoPaymentRequests]
    );
}

#[test]
fn rejected_requests_drop_out_of_the_requested_total() {
    let (engine, store, _) = build_engine();
    let job_id = seed_documented_job(&store, "SEA-105", "Harbor Foods", 1);
    clear_job(&engine, &job_id, "Harbor Foods", 1);

    let kept = record_payment(&engine, &job_id, "ACME", 4_000);
    let dropped = record_payment(&engine, &job_id, "ACME", 9_900);
    engine
        .payments()
        .send_to_accounts(&job_id, &[kept.id.clone(), dropped.id.clone()])
        .expect("send");
    let results = engine.payments().confirm_batch(&[dropped.id.clone()], false);
    assert_eq!(results[0].outcome, Ok(PaymentStatus::Rejected));

    let summary = engine.payments().payment_summary(&job_id).expect("summary");
    assert_eq!(summary.request_count, 1);
    assert_eq!(summary.requested, Money::from_cents(4_000));
    assert_eq!(summary.outstanding, Money::from_cents(4_000));
}

#[test]
fn coverage_policy_reports_drifted_status_without_blocking() {
    let (engine, store, events) = build_engine();
    let job_id = seed_documented_job(&store, "SEA-106", "Harbor Foods", 1);
    clear_job(&engine, &job_id, "Harbor Foods", 1);
    drift_status(&store, &job_id);

    let view = engine.get_job_view(&job_id).expect("view");
    assert!(view.resolution.clearance_complete);
    let conflict = view.resolution.signal_conflict.expect("conflict surfaced");
    assert!(conflict.coverage_complete);
    assert_eq!(conflict.status, JobStatus::InClearance);

    let warnings = events.of_type(EventType::DataIntegrityWarning);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].details["coverage_complete"], "true");
}

#[test]
fn strict_policy_requires_both_signals() {
    let (engine, store, events) = build_engine_with(EngineSettings {
        clearance_signal: ClearanceSignalPolicy::Strict,
        integrity_warnings: false,
    });
    let job_id = seed_documented_job(&store, "SEA-107", "Harbor Foods", 1);
    clear_job(&engine, &job_id, "Harbor Foods", 1);
    assert_eq!(
        engine.get_job_view(&job_id).expect("view").stage,
        Stage::Clearance
    );

    drift_status(&store, &job_id);
    let view = engine.get_job_view(&job_id).expect("view");
    assert_eq!(view.stage, Stage::Documentation);
    assert!(view
        .resolution
        .blockers
        .contains(&Requirement::ClearanceSignalMismatch));
    assert!(events.of_type(EventType::DataIntegrityWarning).is_empty());
}

#[test]
fn stage_only_moves_forward_through_the_normal_flow() {
    let (engine, store, _) = build_engine();
    let job_id = seed_documented_job(&store, "SEA-108", "Harbor Foods", 2);
    let mut seen = vec![engine.get_job_view(&job_id).expect("view").stage];

    let first = schedule_bl(&engine, &job_id, &bl_id("SEA-108", 1));
    seen.push(engine.get_job_view(&job_id).expect("view").stage);
    let second = schedule_bl(&engine, &job_id, &bl_id("SEA-108", 2));
    let payment = record_payment(&engine, &job_id, "ACME", 2_500);
    seen.push(engine.get_job_view(&job_id).expect("view").stage);
    issue_note(&engine, &job_id, "Harbor Foods", vec![first.id]);
    seen.push(engine.get_job_view(&job_id).expect("view").stage);
    issue_note(&engine, &job_id, "Harbor Foods", vec![second.id]);
    seen.push(engine.get_job_view(&job_id).expect("view").stage);
    engine
        .payments()
        .send_to_accounts(&job_id, &[payment.id.clone()])
        .expect("send");
    engine.payments().approve(&payment.id).expect("approve");
    seen.push(engine.get_job_view(&job_id).expect("view").stage);

    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]), "{seen:?}");
    assert_eq!(seen.last(), Some(&Stage::Clearance));
}

fn drift_status(store: &MemoryEntityStore, job_id: &JobId) {
    let mut job = stored_job(store, job_id);
    job.status = JobStatus::InClearance;
    job.progress = 60;
    store.update_job(JobUpdate::new(job)).expect("update job");
}

fn seed_documents_only(store: &MemoryEntityStore, job: &Job) {
    store
        .insert_document(Document {
            id: DocumentId::new(format!("{}-doc", job.id)),
            job_id: job.id.clone(),
            document_type: DocumentType::PackingList,
            name: "packing-list.pdf".to_string(),
            size_bytes: 8_000,
            uploaded_by: "docs".to_string(),
            uploaded_at: Utc::now(),
        })
        .expect("insert document");
}
