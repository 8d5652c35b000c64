use crate::infra::{
    build_engine, clear_all_bls, parse_date, print_json, seed_sea_import, DeskEngine,
};
use chrono::{Local, NaiveDate};
use clap::{Args, ValueEnum};
use freight_ops::error::AppError;
use freight_ops::workflows::jobs::{
    ActionOutcome, ClearanceTarget, EngineError, EngineSettings, EntityStore, EventSink,
    JobAction, JobId, JobView, MemoryEventSink, Money, NewPayment, PaidBy, PaymentCsvImporter,
    SettlementBucket, SettlementDetails, TracingEventSink,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Job number for the demo shipment. Defaults to J1.
    #[arg(long)]
    pub(crate) job: Option<String>,
    /// Consignee on the job and its delivery note.
    #[arg(long)]
    pub(crate) consignee: Option<String>,
    /// Number of BLs on the shipment. Defaults to 1.
    #[arg(long)]
    pub(crate) bl_count: Option<usize>,
    /// Working date for schedules, notes and the voucher (defaults to today).
    #[arg(long, value_parser = parse_date)]
    pub(crate) today: Option<NaiveDate>,
    /// Print the final job view as JSON.
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct ImportPaymentsArgs {
    /// Payment sheet with Job, Payment Type, Vendor, Amount, Paid By columns
    #[arg(long)]
    pub(crate) csv: PathBuf,
    /// Demo job to create and clear; rows with a blank Job cell land here
    #[arg(long)]
    pub(crate) job: String,
    /// Consignee for the demo job
    #[arg(long, default_value = "Harbor Foods")]
    pub(crate) consignee: String,
    /// Requester for rows with a blank Requested By cell
    #[arg(long)]
    pub(crate) requested_by: Option<String>,
    /// Send the recorded requests to accounts straight away
    #[arg(long)]
    pub(crate) send: bool,
    /// Working date for the demo clearance (YYYY-MM-DD, defaults to today)
    #[arg(long, value_parser = parse_date)]
    pub(crate) today: Option<NaiveDate>,
}

/// How far the fixture job is walked before its view is printed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub(crate) enum Milestone {
    Documented,
    Scheduled,
    Cleared,
    Approved,
    Settled,
    Completed,
}

#[derive(Args, Debug)]
pub(crate) struct StageArgs {
    /// Last step applied to the fixture job
    #[arg(long, value_enum, default_value_t = Milestone::Documented)]
    pub(crate) through: Milestone,
    /// Number of BLs on the fixture job
    #[arg(long, default_value_t = 1)]
    pub(crate) bl_count: usize,
    /// Working date (YYYY-MM-DD, defaults to today)
    #[arg(long, value_parser = parse_date)]
    pub(crate) today: Option<NaiveDate>,
}

pub(crate) fn run_demo(args: DemoArgs, settings: EngineSettings) -> Result<(), AppError> {
    let DemoArgs {
        job,
        consignee,
        bl_count,
        today,
        json,
    } = args;
    let job = job.unwrap_or_else(|| "J1".to_string());
    let consignee = consignee.unwrap_or_else(|| "Harbor Foods".to_string());
    let bl_count = bl_count.unwrap_or(1).max(1);
    let today = today.unwrap_or_else(|| Local::now().date_naive());

    let events = Arc::new(MemoryEventSink::default());
    let (engine, store) = build_engine(settings, events.clone());
    let job_id = seed_sea_import(&store, &job, &consignee, bl_count)?;

    println!("Freight job lifecycle demo");
    println!("Job {job_id} | sea import | {consignee} | {bl_count} BL(s)");
    render_step("documents uploaded", &engine.get_job_view(&job_id)?);

    let view = clear_all_bls(&engine, &store, &job_id, &consignee, today)?;
    render_step("delivery note issued", &view);

    let receipt = engine.perform_action(
        &job_id,
        JobAction::RecordPayment(NewPayment {
            job_id: job_id.clone(),
            payment_type: "Port Charges".to_string(),
            vendor: Some("ACME Port Services".to_string()),
            amount: Money::from_cents(10_000),
            paid_by: PaidBy::Company,
            requested_by: "clearance".to_string(),
            bill_ref_no: Some(format!("{job_id}-PC-1")),
        }),
    )?;
    let ActionOutcome::PaymentRecorded(payment) = receipt.outcome else {
        return Err(EngineError::Validation {
            message: "payment was not recorded".to_string(),
        }
        .into());
    };
    render_step("payment requested", &receipt.view);

    engine.perform_action(
        &job_id,
        JobAction::SendToAccounts {
            payment_ids: vec![payment.id.clone()],
        },
    )?;
    let receipt = engine.perform_action(
        &job_id,
        JobAction::ApprovePayment {
            payment_id: payment.id.clone(),
        },
    )?;
    render_step("payment approved", &receipt.view);

    let mut bucket = SettlementBucket::new();
    let approved = engine
        .payments()
        .approved_for_vendor(&payment.vendor)
        .map_err(EngineError::from)?;
    for approved in approved {
        bucket.add(&approved).map_err(|err| EngineError::Validation {
            message: err.to_string(),
        })?;
    }
    let settled = engine.process_batch(
        &bucket,
        SettlementDetails {
            voucher_no: format!("V-{}", today.format("%Y%m%d")),
            payment_reference: Some("TT-DEMO".to_string()),
            payment_date: today,
            processed_by: "accounts".to_string(),
        },
    )?;
    println!(
        "Voucher {} paid {} to {} across {} payment(s)",
        settled.receipt.voucher_no,
        settled.receipt.total,
        settled.receipt.vendor,
        settled.receipt.payments.len()
    );
    if let Some(view) = settled.views.iter().find(|view| view.job.id == job_id) {
        render_step("vendor settled", view);
    }

    let receipt = engine.perform_action(
        &job_id,
        JobAction::MarkCompleted {
            job_invoice_no: Some("INV-001".to_string()),
        },
    )?;
    render_step("job completed", &receipt.view);

    println!("\nAudit trail");
    for event in events.events() {
        println!("- {} {}", event.event_type, event.job_id);
    }

    if json {
        print_json(&receipt.view)?;
    }
    Ok(())
}

pub(crate) fn run_import_payments(
    args: ImportPaymentsArgs,
    settings: EngineSettings,
) -> Result<(), AppError> {
    let ImportPaymentsArgs {
        csv,
        job,
        consignee,
        requested_by,
        send,
        today,
    } = args;
    let today = today.unwrap_or_else(|| Local::now().date_naive());

    let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);
    let (engine, store) = build_engine(settings, events);
    let job_id = seed_sea_import(&store, &job, &consignee, 1)?;
    clear_all_bls(&engine, &store, &job_id, &consignee, today)?;

    let mut importer = PaymentCsvImporter::new().for_job(job_id.clone());
    if let Some(requester) = requested_by {
        importer = importer.requested_by(requester);
    }
    let requests = importer.parse_path(&csv)?;
    println!("Read {} payment request(s) from {}", requests.len(), csv.display());

    let mut recorded = Vec::new();
    for request in requests {
        let target = request.job_id.clone();
        let label = format!("{} {} for {}", request.payment_type, request.amount, target);
        match engine.perform_action(&target, JobAction::RecordPayment(request)) {
            Ok(receipt) => {
                if let ActionOutcome::PaymentRecorded(payment) = receipt.outcome {
                    println!("- recorded {label} -> {} ({})", payment.id, payment.vendor);
                    recorded.push(payment);
                }
            }
            Err(err) => println!("- skipped {label}: {err}"),
        }
    }

    if send {
        let own: Vec<_> = recorded
            .iter()
            .filter(|payment| payment.job_id == job_id)
            .map(|payment| payment.id.clone())
            .collect();
        if !own.is_empty() {
            engine.perform_action(&job_id, JobAction::SendToAccounts { payment_ids: own })?;
        }
    }

    render_summary(&engine, &job_id)
}

fn render_step(label: &str, view: &JobView) {
    println!(
        "[{:>3}%] {:<22} stage: {:<13} next: {}",
        view.progress_percent,
        label,
        view.stage.label(),
        view.legal_actions
            .iter()
            .map(|action| format!("{action:?}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    for blocker in view.resolution.blockers.iter().take(3) {
        println!("         waiting on: {blocker}");
    }
}

fn render_summary(engine: &DeskEngine, job_id: &JobId) -> Result<(), AppError> {
    let view = engine.get_job_view(job_id)?;
    println!("\nJob {} payments", view.job.id);
    for payment in &view.payments {
        println!(
            "- {:<12} {:<20} {:<24} {:>12} {}",
            payment.id.as_str(),
            payment.payment_type,
            payment.vendor,
            payment.amount.to_string(),
            payment.status
        );
    }
    let summary = view.payment_summary;
    println!(
        "Requested {} | paid {} | outstanding {}",
        summary.requested, summary.paid, summary.outstanding
    );
    render_step("after import", &view);
    Ok(())
}

/// Prints the JSON view of the fixture job after walking it to `through`.
pub(crate) fn run_stage(args: StageArgs, settings: EngineSettings) -> Result<(), AppError> {
    let StageArgs {
        through,
        bl_count,
        today,
    } = args;
    let today = today.unwrap_or_else(|| Local::now().date_naive());
    let consignee = "Harbor Foods";

    let (engine, store) = build_engine(settings, Arc::new(MemoryEventSink::default()));
    let job_id = seed_sea_import(&store, "J1", consignee, bl_count.max(1))?;

    if through == Milestone::Scheduled {
        for bl in store.bills_of_lading(&job_id).map_err(EngineError::from)? {
            engine.perform_action(
                &job_id,
                JobAction::ScheduleClearance {
                    target: ClearanceTarget::BillOfLading(bl.id),
                    scheduled_date: today,
                    port: "Port Klang".to_string(),
                    method: "Green lane".to_string(),
                },
            )?;
        }
    }
    if through >= Milestone::Cleared {
        clear_all_bls(&engine, &store, &job_id, consignee, today)?;
    }
    if through >= Milestone::Approved {
        let receipt = engine.perform_action(
            &job_id,
            JobAction::RecordPayment(NewPayment {
                job_id: job_id.clone(),
                payment_type: "Delivery Order".to_string(),
                vendor: None,
                amount: Money::from_cents(10_000),
                paid_by: PaidBy::Company,
                requested_by: "clearance".to_string(),
                bill_ref_no: None,
            }),
        )?;
        if let ActionOutcome::PaymentRecorded(payment) = receipt.outcome {
            engine.perform_action(
                &job_id,
                JobAction::SendToAccounts {
                    payment_ids: vec![payment.id.clone()],
                },
            )?;
            engine.perform_action(
                &job_id,
                JobAction::ApprovePayment {
                    payment_id: payment.id,
                },
            )?;
        }
    }
    if through >= Milestone::Settled {
        let mut bucket = SettlementBucket::new();
        for payment in engine.get_job_view(&job_id)?.payments {
            bucket.add(&payment).map_err(|err| EngineError::Validation {
                message: err.to_string(),
            })?;
        }
        engine.process_batch(
            &bucket,
            SettlementDetails {
                voucher_no: "V-STAGE".to_string(),
                payment_reference: None,
                payment_date: today,
                processed_by: "accounts".to_string(),
            },
        )?;
    }
    if through >= Milestone::Completed {
        engine.perform_action(
            &job_id,
            JobAction::MarkCompleted {
                job_invoice_no: Some("INV-001".to_string()),
            },
        )?;
    }

    print_json(&engine.get_job_view(&job_id)?)
}
