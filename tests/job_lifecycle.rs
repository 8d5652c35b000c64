use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use freight_ops::workflows::jobs::{
    ActionKind, ActionOutcome, Actor, AuthorizationProvider, BillOfLading, BlId, Capability,
    ClearanceTarget, Container, ContainerId, ContainerSize, DeliveryNoteRequest, Document,
    DocumentId, DocumentType, EngineSettings, EntityStore, ErrorKind, EventType, Job, JobAction,
    JobId, JobLifecycleEngine, MemoryEntityStore, MemoryEventSink, Money, PaymentCsvImporter,
    PaymentStatus, Role, ScheduleId, SettlementBucket, SettlementDetails, ShipmentType, Stage,
    TransportMode, VehicleInfo,
};

type Engine = JobLifecycleEngine<MemoryEntityStore, MemoryEventSink>;

fn working_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 2).expect("valid working day")
}

fn desk() -> (Engine, Arc<MemoryEntityStore>, Arc<MemoryEventSink>) {
    let store = Arc::new(MemoryEntityStore::new());
    let events = Arc::new(MemoryEventSink::default());
    let engine = JobLifecycleEngine::new(store.clone(), events.clone(), EngineSettings::default());
    (engine, store, events)
}

fn open_sea_import(store: &MemoryEntityStore, id: &str, consignee: &str, bls: usize) -> JobId {
    let mut job = Job::new(JobId::new(id), TransportMode::Sea, ShipmentType::Imp, consignee);
    job.invoice.invoice_no = Some(format!("CI-{id}"));
    job.invoice.package_count = Some("40".to_string());
    job.invoice.cargo_type = Some("Frozen seafood".to_string());
    let job = store.insert_job(job).expect("insert job");
    store
        .insert_document(Document {
            id: DocumentId::new(format!("{id}-pl")),
            job_id: job.id.clone(),
            document_type: DocumentType::PackingList,
            name: "packing-list.pdf".to_string(),
            size_bytes: 20_480,
            uploaded_by: "documentation".to_string(),
            uploaded_at: Utc::now(),
        })
        .expect("insert document");
    for n in 1..=bls {
        let bl_id = BlId::new(format!("{id}-bl-{n}"));
        store
            .insert_bill_of_lading(BillOfLading::new(
                bl_id.clone(),
                job.id.clone(),
                format!("ONEY{id}{n}"),
            ))
            .expect("insert bl");
        store
            .insert_container(Container {
                id: ContainerId::new(format!("{id}-ctr-{n}")),
                job_id: job.id.clone(),
                container_no: format!("SEGU{n:07}"),
                size: ContainerSize::Hc40,
                unloaded_date: Some(working_day()),
                bl_id: Some(bl_id),
            })
            .expect("insert container");
    }
    job.id
}

fn schedule(engine: &Engine, job_id: &JobId, bl: &str) -> ScheduleId {
    let receipt = engine
        .perform_action(
            job_id,
            JobAction::ScheduleClearance {
                target: ClearanceTarget::BillOfLading(BlId::new(bl)),
                scheduled_date: working_day(),
                port: "Westport".to_string(),
                method: "Yellow lane".to_string(),
            },
        )
        .expect("schedule");
    match receipt.outcome {
        ActionOutcome::Scheduled(schedule) => schedule.id,
        other => panic!("expected schedule, got {other:?}"),
    }
}

fn note_for(consignee: &str, schedule_ids: Vec<ScheduleId>) -> JobAction {
    JobAction::IssueDeliveryNote(DeliveryNoteRequest {
        consignee: consignee.to_string(),
        schedule_ids,
        vehicle: VehicleInfo::default(),
        issued_by: "clearance".to_string(),
        issued_date: working_day(),
        exporter: None,
    })
}

#[test]
fn consignee_jobs_share_a_note_and_a_voucher() {
    let (engine, store, events) = desk();
    let first = open_sea_import(&store, "SEA-IMP-0042", "Harbor Foods", 2);
    let second = open_sea_import(&store, "SEA-IMP-0043", "Harbor Foods", 1);

    let a1 = schedule(&engine, &first, "SEA-IMP-0042-bl-1");
    let a2 = schedule(&engine, &first, "SEA-IMP-0042-bl-2");
    let b1 = schedule(&engine, &second, "SEA-IMP-0043-bl-1");
    let receipt = engine
        .perform_action(&first, note_for("Harbor Foods", vec![a1, a2, b1]))
        .expect("issue shared note");
    assert_eq!(receipt.view.stage, Stage::Clearance);
    assert_eq!(
        engine.get_job_view(&second).expect("view").stage,
        Stage::Clearance
    );

    let sheet = "\
Job,Payment Type,Vendor,Amount,Paid By,Requested By,Bill Ref
SEA-IMP-0042,Port Charges,,\"1,250.00\",Company,,PC-17
,Port Charges,,310.50,customer,,
SEA-IMP-0043,Customs Duty,,88.00,,,
";
    let requests = PaymentCsvImporter::new()
        .for_job(second.clone())
        .requested_by("clearance")
        .parse(sheet.as_bytes())
        .expect("parse sheet");
    assert_eq!(requests.len(), 3);

    let mut recorded = Vec::new();
    for request in requests {
        let job_id = request.job_id.clone();
        let receipt = engine
            .perform_action(&job_id, JobAction::RecordPayment(request))
            .expect("record");
        if let ActionOutcome::PaymentRecorded(payment) = receipt.outcome {
            recorded.push(payment);
        }
    }
    assert_eq!(recorded[0].vendor, "Port Authority");
    assert_eq!(recorded[2].vendor, "Customs Authority");

    for job_id in [&first, &second] {
        let ids = recorded
            .iter()
            .filter(|payment| &payment.job_id == job_id)
            .map(|payment| payment.id.clone())
            .collect();
        engine
            .perform_action(job_id, JobAction::SendToAccounts { payment_ids: ids })
            .expect("send");
    }
    for payment in &recorded {
        engine
            .perform_action(
                &payment.job_id,
                JobAction::ApprovePayment {
                    payment_id: payment.id.clone(),
                },
            )
            .expect("approve");
    }

    let mut port_bucket = SettlementBucket::new();
    for payment in engine
        .payments()
        .approved_for_vendor("Port Authority")
        .expect("approved")
    {
        port_bucket.add(&payment).expect("same vendor");
    }
    assert_eq!(port_bucket.total(), Ok(Money::from_cents(156_050)));
    let settled = engine
        .process_batch(
            &port_bucket,
            SettlementDetails {
                voucher_no: "PV-2025-0611".to_string(),
                payment_reference: Some("FT-3321".to_string()),
                payment_date: working_day(),
                processed_by: "accounts".to_string(),
            },
        )
        .expect("settle port charges");
    assert_eq!(settled.views.len(), 2);

    let first_view = engine.get_job_view(&first).expect("view");
    assert_eq!(first_view.stage, Stage::Accounts);
    let second_view = engine.get_job_view(&second).expect("view");
    assert_eq!(second_view.stage, Stage::Clearance);
    assert_eq!(second_view.payment_summary.outstanding, Money::from_cents(8_800));

    let completed = engine
        .perform_action(
            &first,
            JobAction::MarkCompleted {
                job_invoice_no: Some("JI-0042".to_string()),
            },
        )
        .expect("complete first job");
    assert_eq!(completed.view.stage, Stage::Completed);
    assert!(completed
        .view
        .payments
        .iter()
        .all(|payment| payment.status == PaymentStatus::Paid));

    let refused = engine
        .perform_action(
            &second,
            JobAction::MarkCompleted {
                job_invoice_no: Some("JI-0043".to_string()),
            },
        )
        .expect_err("duty unpaid");
    assert_eq!(refused.kind(), ErrorKind::Precondition);

    assert_eq!(events.of_type(EventType::PaymentSettled).len(), 2);
    assert_eq!(events.of_type(EventType::JobCompleted).len(), 1);
}

#[test]
fn actions_arrive_as_tagged_json() {
    let (engine, store, _) = desk();
    let job_id = open_sea_import(&store, "SEA-IMP-0050", "Delta Textiles", 1);

    let action: JobAction = serde_json::from_str(
        r#"{
            "action": "schedule_clearance",
            "target": { "kind": "bill_of_lading", "id": "SEA-IMP-0050-bl-1" },
            "scheduled_date": "2025-06-02",
            "port": "Westport",
            "method": "Green lane"
        }"#,
    )
    .expect("decode action");
    assert_eq!(action.kind(), ActionKind::ScheduleClearance);

    let receipt = engine.perform_action(&job_id, action).expect("perform");
    let json = serde_json::to_value(&receipt).expect("encode receipt");
    assert_eq!(json["outcome"]["outcome"], "scheduled");
    assert_eq!(json["view"]["stage"], "documentation");
}

struct ReadOnlyDesk;

impl AuthorizationProvider for ReadOnlyDesk {
    fn has_capability(&self, _actor: &Actor, capability: Capability) -> bool {
        capability == Capability::RequestPayment
    }
}

#[test]
fn hosts_can_plug_their_own_authorization() {
    let (engine, store, _) = desk();
    let job_id = open_sea_import(&store, "SEA-IMP-0051", "Delta Textiles", 1);
    let view = engine.get_job_view(&job_id).expect("view");

    let visitor = Actor::new("guest", Role::Clearance);
    assert_eq!(
        engine.legal_actions_for(&view, &visitor, &ReadOnlyDesk),
        vec![ActionKind::RecordPayment]
    );
}
