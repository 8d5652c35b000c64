use serde::{Deserialize, Serialize};

use crate::workflows::jobs::domain::{JobId, Payment, PaymentId, PaymentStatus};
use crate::workflows::jobs::money::{Money, MoneyOverflow};
use crate::workflows::jobs::store::{EntityStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BucketError {
    #[error("payment {payment_id} is for vendor '{vendor}' but the bucket holds '{bucket_vendor}'")]
    VendorMismatch {
        payment_id: PaymentId,
        bucket_vendor: String,
        vendor: String,
    },
    #[error("payment {0} is already in the bucket")]
    AlreadyInBucket(PaymentId),
    #[error("payment {0} is not in the bucket")]
    NotInBucket(PaymentId),
    #[error("adding payment {0} would push the bucket total past the largest amount")]
    TotalOverflow(PaymentId),
}

/// What the bucket knew about a payment when it was added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketEntry {
    pub payment_id: PaymentId,
    pub job_id: JobId,
    pub vendor: String,
    pub amount: Money,
    pub status: PaymentStatus,
}

impl From<&Payment> for BucketEntry {
    fn from(payment: &Payment) -> Self {
        Self {
            payment_id: payment.id.clone(),
            job_id: payment.job_id.clone(),
            vendor: payment.vendor.clone(),
            amount: payment.amount,
            status: payment.status,
        }
    }
}

/// Selection of payments to settle under one voucher.
///
/// Holds snapshots only. Every member shares one vendor; the vendor is fixed
/// by the first addition and released when the bucket empties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementBucket {
    entries: Vec<BucketEntry>,
}

impl SettlementBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vendor(&self) -> Option<&str> {
        self.entries.first().map(|entry| entry.vendor.as_str())
    }

    pub fn add(&mut self, payment: &Payment) -> Result<(), BucketError> {
        if self.contains(&payment.id) {
            return Err(BucketError::AlreadyInBucket(payment.id.clone()));
        }
        if let Some(bucket_vendor) = self.vendor() {
            if !same_vendor(bucket_vendor, &payment.vendor) {
                return Err(BucketError::VendorMismatch {
                    payment_id: payment.id.clone(),
                    bucket_vendor: bucket_vendor.to_string(),
                    vendor: payment.vendor.clone(),
                });
            }
        }
        if self
            .total()
            .and_then(|total| total.try_add(payment.amount))
            .is_err()
        {
            return Err(BucketError::TotalOverflow(payment.id.clone()));
        }
        self.entries.push(BucketEntry::from(payment));
        Ok(())
    }

    pub fn remove(&mut self, payment_id: &PaymentId) -> Result<BucketEntry, BucketError> {
        let index = self
            .entries
            .iter()
            .position(|entry| &entry.payment_id == payment_id)
            .ok_or_else(|| BucketError::NotInBucket(payment_id.clone()))?;
        Ok(self.entries.remove(index))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, payment_id: &PaymentId) -> bool {
        self.entries.iter().any(|entry| &entry.payment_id == payment_id)
    }

    pub fn entries(&self) -> &[BucketEntry] {
        &self.entries
    }

    pub fn payment_ids(&self) -> Vec<PaymentId> {
        self.entries
            .iter()
            .map(|entry| entry.payment_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> Result<Money, MoneyOverflow> {
        Money::try_sum(self.entries.iter().map(|entry| entry.amount))
    }

    /// Members whose last known status is not `Approved`.
    pub fn ineligible(&self) -> Vec<&BucketEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.status != PaymentStatus::Approved)
            .collect()
    }

    pub fn is_eligible(&self) -> bool {
        !self.is_empty() && self.ineligible().is_empty()
    }

    /// Re-read member statuses. Members deleted from the store are dropped
    /// and returned.
    pub fn refresh<S: EntityStore + ?Sized>(
        &mut self,
        store: &S,
    ) -> Result<Vec<PaymentId>, StoreError> {
        let mut dropped = Vec::new();
        let mut kept = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            match store.payment(&entry.payment_id)? {
                Some(current) => kept.push(BucketEntry::from(&current)),
                None => dropped.push(entry.payment_id),
            }
        }
        self.entries = kept;
        Ok(dropped)
    }
}

pub(crate) fn same_vendor(left: &str, right: &str) -> bool {
    left.trim().eq_ignore_ascii_case(right.trim())
}
