use std::io::Read;

use serde::{Deserialize, Deserializer};

use crate::workflows::jobs::domain::{JobId, NewPayment, PaidBy};
use crate::workflows::jobs::money::{Money, MoneyParseError};

#[derive(Debug)]
pub enum PaymentImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    InvalidRow { line: u64, message: String },
}

impl std::fmt::Display for PaymentImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentImportError::Io(err) => write!(f, "failed to read payment sheet: {}", err),
            PaymentImportError::Csv(err) => write!(f, "invalid payment CSV data: {}", err),
            PaymentImportError::InvalidRow { line, message } => {
                write!(f, "payment sheet line {}: {}", line, message)
            }
        }
    }
}

impl std::error::Error for PaymentImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PaymentImportError::Io(err) => Some(err),
            PaymentImportError::Csv(err) => Some(err),
            PaymentImportError::InvalidRow { .. } => None,
        }
    }
}

impl From<std::io::Error> for PaymentImportError {
    fn from(err: std::io::Error) -> Self {
        PaymentImportError::Io(err)
    }
}

impl From<csv::Error> for PaymentImportError {
    fn from(err: csv::Error) -> Self {
        PaymentImportError::Csv(err)
    }
}

/// Reads payment requests from a spreadsheet export.
///
/// Columns: `Job`, `Payment Type`, `Vendor`, `Amount`, `Paid By`,
/// `Requested By`, `Bill Ref`. Blank vendors are left for the payment type
/// catalog to fill in.
#[derive(Debug, Clone, Default)]
pub struct PaymentCsvImporter {
    default_job: Option<JobId>,
    default_requester: Option<String>,
}

impl PaymentCsvImporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Job used for rows whose `Job` cell is blank.
    pub fn for_job(mut self, job_id: JobId) -> Self {
        self.default_job = Some(job_id);
        self
    }

    pub fn requested_by(mut self, requester: impl Into<String>) -> Self {
        self.default_requester = Some(requester.into());
        self
    }

    pub fn parse<R: Read>(&self, reader: R) -> Result<Vec<NewPayment>, PaymentImportError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = csv_reader.headers()?.clone();
        let mut requests = Vec::new();

        for record in csv_reader.records() {
            let record = record?;
            let line = record.position().map_or(0, |position| position.line());
            let row: PaymentRow = record.deserialize(Some(&headers))?;
            requests.push(self.to_request(line, row)?);
        }

        Ok(requests)
    }

    pub fn parse_path(
        &self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<Vec<NewPayment>, PaymentImportError> {
        let file = std::fs::File::open(path)?;
        self.parse(file)
    }

    fn to_request(&self, line: u64, row: PaymentRow) -> Result<NewPayment, PaymentImportError> {
        let invalid = |message: String| PaymentImportError::InvalidRow { line, message };

        let job_id = row
            .job
            .map(JobId::new)
            .or_else(|| self.default_job.clone())
            .ok_or_else(|| invalid("no job given".to_string()))?;
        let payment_type = row
            .payment_type
            .ok_or_else(|| invalid("payment type is empty".to_string()))?;
        let amount = row
            .amount
            .as_deref()
            .ok_or_else(|| invalid("amount is empty".to_string()))?
            .parse::<Money>()
            .map_err(|err: MoneyParseError| invalid(err.to_string()))?;
        let paid_by = match row.paid_by.as_deref() {
            None => PaidBy::Company,
            Some(value) => parse_paid_by(value)
                .ok_or_else(|| invalid(format!("unknown payer '{value}'")))?,
        };
        let requested_by = row
            .requested_by
            .or_else(|| self.default_requester.clone())
            .ok_or_else(|| invalid("requested by is empty".to_string()))?;

        Ok(NewPayment {
            job_id,
            payment_type,
            vendor: row.vendor,
            amount,
            paid_by,
            requested_by,
            bill_ref_no: row.bill_ref,
        })
    }
}

fn parse_paid_by(value: &str) -> Option<PaidBy> {
    match value.to_ascii_lowercase().as_str() {
        "company" => Some(PaidBy::Company),
        "customer" | "client" => Some(PaidBy::Customer),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct PaymentRow {
    #[serde(rename = "Job", default, deserialize_with = "empty_string_as_none")]
    job: Option<String>,
    #[serde(
        rename = "Payment Type",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    payment_type: Option<String>,
    #[serde(rename = "Vendor", default, deserialize_with = "empty_string_as_none")]
    vendor: Option<String>,
    #[serde(rename = "Amount", default, deserialize_with = "empty_string_as_none")]
    amount: Option<String>,
    #[serde(rename = "Paid By", default, deserialize_with = "empty_string_as_none")]
    paid_by: Option<String>,
    #[serde(
        rename = "Requested By",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    requested_by: Option<String>,
    #[serde(rename = "Bill Ref", default, deserialize_with = "empty_string_as_none")]
    bill_ref: Option<String>,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}
