use chrono::{NaiveDate, Utc};
use freight_ops::error::AppError;
use freight_ops::workflows::jobs::{
    ActionOutcome, BillOfLading, BlId, ClearanceTarget, Container, ContainerId, ContainerSize,
    DeliveryNoteRequest, Document, DocumentId, DocumentType, EngineError, EngineSettings,
    EntityStore, EventSink, Job, JobAction, JobId, JobLifecycleEngine, JobView,
    MemoryEntityStore, ShipmentType, TransportMode, VehicleInfo,
};
use serde::Serialize;
use std::sync::Arc;

pub(crate) type DeskEngine = JobLifecycleEngine<MemoryEntityStore, dyn EventSink>;

pub(crate) fn build_engine(
    settings: EngineSettings,
    events: Arc<dyn EventSink>,
) -> (DeskEngine, Arc<MemoryEntityStore>) {
    let store = Arc::new(MemoryEntityStore::new());
    let engine = JobLifecycleEngine::new(Arc::clone(&store), events, settings);
    (engine, store)
}

/// Sea import with invoice details, one document and `bl_count` BLs, each
/// with one 40' container.
pub(crate) fn seed_sea_import(
    store: &MemoryEntityStore,
    job_id: &str,
    consignee: &str,
    bl_count: usize,
) -> Result<JobId, EngineError> {
    let mut job = Job::new(
        JobId::new(job_id),
        TransportMode::Sea,
        ShipmentType::Imp,
        consignee,
    );
    job.service_type = "Clearance & Delivery".to_string();
    job.invoice.invoice_no = Some(format!("CI-{job_id}"));
    job.invoice.package_count = Some("24".to_string());
    job.invoice.cargo_type = Some("General cargo".to_string());
    let job = store.insert_job(job)?;

    store.insert_document(Document {
        id: DocumentId::new(format!("{job_id}-invoice")),
        job_id: job.id.clone(),
        document_type: DocumentType::Invoice,
        name: "commercial-invoice.pdf".to_string(),
        size_bytes: 48_213,
        uploaded_by: "documentation".to_string(),
        uploaded_at: Utc::now(),
    })?;

    for n in 1..=bl_count {
        let bl_id = BlId::new(format!("{job_id}-bl-{n}"));
        store.insert_bill_of_lading(BillOfLading::new(
            bl_id.clone(),
            job.id.clone(),
            format!("MSKU{:07}", 4_410_000 + n),
        ))?;
        store.insert_container(Container {
            id: ContainerId::new(format!("{job_id}-ctr-{n}")),
            job_id: job.id.clone(),
            container_no: format!("TGHU{:07}", 8_800_000 + n),
            size: ContainerSize::Gp40,
            unloaded_date: None,
            bl_id: Some(bl_id),
        })?;
    }

    Ok(job.id)
}

/// Schedules every BL of the job and covers them with one delivery note.
pub(crate) fn clear_all_bls(
    engine: &DeskEngine,
    store: &MemoryEntityStore,
    job_id: &JobId,
    consignee: &str,
    on: NaiveDate,
) -> Result<JobView, EngineError> {
    let mut schedule_ids = Vec::new();
    for bl in store.bills_of_lading(job_id)? {
        let receipt = engine.perform_action(
            job_id,
            JobAction::ScheduleClearance {
                target: ClearanceTarget::BillOfLading(bl.id),
                scheduled_date: on,
                port: "Port Klang".to_string(),
                method: "Green lane".to_string(),
            },
        )?;
        if let ActionOutcome::Scheduled(schedule) = receipt.outcome {
            schedule_ids.push(schedule.id);
        }
    }

    let receipt = engine.perform_action(
        job_id,
        JobAction::IssueDeliveryNote(DeliveryNoteRequest {
            consignee: consignee.to_string(),
            schedule_ids,
            vehicle: VehicleInfo {
                vehicle_no: Some("WXY 4471".to_string()),
                driver_name: Some("Hafiz".to_string()),
                ..VehicleInfo::default()
            },
            issued_by: "clearance".to_string(),
            issued_date: on,
            exporter: None,
        }),
    )?;
    Ok(receipt.view)
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
    println!("{rendered}");
    Ok(())
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use freight_ops::workflows::jobs::{MemoryEventSink, Stage};

    #[test]
    fn seeded_job_clears_with_one_note() {
        let (engine, store) = build_engine(
            EngineSettings::default(),
            Arc::new(MemoryEventSink::default()),
        );
        let job_id = seed_sea_import(&store, "J7", "Harbor Foods", 2).expect("seed");
        assert_eq!(
            engine.get_job_view(&job_id).expect("view").stage,
            Stage::Documentation
        );

        let on = parse_date("2025-03-11").expect("date");
        let view = clear_all_bls(&engine, &store, &job_id, "Harbor Foods", on).expect("clear");
        assert_eq!(view.stage, Stage::Clearance);
        assert_eq!(view.delivery_notes.len(), 1);
    }

    #[test]
    fn parse_date_names_the_bad_input() {
        let err = parse_date("11/03/2025").expect_err("wrong format");
        assert!(err.contains("11/03/2025"));
    }
}
