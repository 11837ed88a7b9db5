//! Local receipt of the last confirmed payment.
//!
//! There is exactly one receipt slot per installation, named
//! [`RECEIPT_SLOT`]. Recording a payment overwrites whatever the slot held;
//! returning to the start of the flow clears it. The confirmation view reads
//! the slot and redirects to the start of the flow when it is empty.
//!
//! The stored record has no version field. Changing [`PaymentReceipt`]'s
//! fields makes previously stored receipts unreadable; [`ReceiptRecorder::read`]
//! then reports the slot as empty.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::plan::{BillingCycle, CustomerDetails};
use crate::timestamp::UnixTimestamp;

/// Name of the single receipt slot.
pub const RECEIPT_SLOT: &str = "calm_session";

/// Plan summary embedded in a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptPlan {
    /// Plan title.
    pub title: String,
    /// Amount paid, as a decimal string in display units.
    pub price: String,
    /// Billing cycle the customer chose.
    pub billing_cycle: BillingCycle,
}

/// Metadata of a confirmed payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    /// Signature of the confirmed transfer transaction.
    pub transaction_signature: String,
    /// What was bought.
    pub plan: ReceiptPlan,
    /// Where the confirmation is sent.
    pub user_email: String,
    /// Whether the customer booked anonymously.
    pub is_anonymous: bool,
    /// When the receipt was created.
    pub created_at: UnixTimestamp,
}

impl PaymentReceipt {
    /// Creates a receipt stamped with the current time.
    #[must_use]
    pub fn new(
        transaction_signature: impl Into<String>,
        plan: ReceiptPlan,
        customer: &CustomerDetails,
    ) -> Self {
        Self {
            transaction_signature: transaction_signature.into(),
            plan,
            user_email: customer.email.trim().to_owned(),
            is_anonymous: customer.is_anonymous,
            created_at: UnixTimestamp::now(),
        }
    }
}

/// Errors reading or writing the receipt slot.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The underlying file could not be accessed.
    #[error("receipt storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The receipt could not be serialized.
    #[error("could not encode receipt: {0}")]
    Encode(serde_json::Error),
    /// The slot holds something that is not a receipt.
    #[error("stored receipt is unreadable: {0}")]
    Corrupt(serde_json::Error),
    /// A previous writer panicked while holding the slot.
    #[error("receipt slot lock poisoned")]
    Poisoned,
}

/// Backing storage for the receipt slot.
pub trait ReceiptStore: Send + Sync {
    /// Reads the slot. An empty slot is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the slot exists but cannot be read or decoded.
    fn load(&self) -> Result<Option<PaymentReceipt>, StorageError>;

    /// Overwrites the slot.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the receipt cannot be written.
    fn save(&self, receipt: &PaymentReceipt) -> Result<(), StorageError>;

    /// Empties the slot. Emptying an empty slot succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the slot exists but cannot be removed.
    fn remove(&self) -> Result<(), StorageError>;
}

/// Receipt slot stored as `calm_session.json` inside a directory.
#[derive(Debug, Clone)]
pub struct FileReceiptStore {
    path: PathBuf,
}

impl FileReceiptStore {
    /// Creates a store in `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{RECEIPT_SLOT}.json")),
        }
    }

    /// Full path of the slot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReceiptStore for FileReceiptStore {
    fn load(&self) -> Result<Option<PaymentReceipt>, StorageError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(StorageError::Corrupt)
    }

    fn save(&self, receipt: &PaymentReceipt) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_vec_pretty(receipt).map_err(StorageError::Encode)?;
        // write-then-rename so a crash never leaves half a receipt behind
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn remove(&self) -> Result<(), StorageError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory receipt slot holding the serialized record.
#[derive(Debug, Default)]
pub struct MemoryReceiptStore {
    slot: Mutex<Option<String>>,
}

impl MemoryReceiptStore {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReceiptStore for MemoryReceiptStore {
    fn load(&self) -> Result<Option<PaymentReceipt>, StorageError> {
        let slot = self.slot.lock().map_err(|_| StorageError::Poisoned)?;
        slot.as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(StorageError::Corrupt)
    }

    fn save(&self, receipt: &PaymentReceipt) -> Result<(), StorageError> {
        let json = serde_json::to_string(receipt).map_err(StorageError::Encode)?;
        *self.slot.lock().map_err(|_| StorageError::Poisoned)? = Some(json);
        Ok(())
    }

    fn remove(&self) -> Result<(), StorageError> {
        *self.slot.lock().map_err(|_| StorageError::Poisoned)? = None;
        Ok(())
    }
}

/// Records, reads and clears the receipt of the last confirmed payment.
pub struct ReceiptRecorder {
    store: Box<dyn ReceiptStore>,
}

impl fmt::Debug for ReceiptRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiptRecorder").finish_non_exhaustive()
    }
}

impl ReceiptRecorder {
    /// Creates a recorder over `store`.
    pub fn new(store: impl ReceiptStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    /// Stores `receipt`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the slot cannot be written. The payment
    /// itself is unaffected; callers log and carry on.
    pub fn record(&self, receipt: &PaymentReceipt) -> Result<(), StorageError> {
        self.store.save(receipt)?;
        #[cfg(feature = "telemetry")]
        tracing::info!(
            signature = %receipt.transaction_signature,
            plan = %receipt.plan.title,
            "receipt recorded"
        );
        Ok(())
    }

    /// Empties the slot.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if an existing receipt cannot be removed.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove()
    }

    /// Returns the current receipt, or `None` when there is none.
    ///
    /// An unreadable slot is logged and reported as empty.
    #[must_use]
    pub fn read(&self) -> Option<PaymentReceipt> {
        match self.store.load() {
            Ok(receipt) => receipt,
            Err(_e) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(error = %_e, "ignoring unreadable receipt");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(signature: &str, price: &str) -> PaymentReceipt {
        PaymentReceipt {
            transaction_signature: signature.to_owned(),
            plan: ReceiptPlan {
                title: "MONTHLY FEE".to_owned(),
                price: price.to_owned(),
                billing_cycle: BillingCycle::Monthly,
            },
            user_email: "client@example.com".to_owned(),
            is_anonymous: false,
            created_at: UnixTimestamp::from_secs(1_760_832_000),
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "calmledger-{name}-{}-{}",
            std::process::id(),
            UnixTimestamp::now()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_wire_layout() {
        let json = serde_json::to_value(receipt("sig", "400")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "transactionSignature": "sig",
                "plan": { "title": "MONTHLY FEE", "price": "400", "billingCycle": "monthly" },
                "userEmail": "client@example.com",
                "isAnonymous": false,
                "createdAt": "1760832000"
            })
        );
    }

    #[test]
    fn test_new_trims_email() {
        let customer = CustomerDetails {
            email: " client@example.com ".to_owned(),
            is_anonymous: true,
        };
        let plan = receipt("sig", "150").plan;
        let r = PaymentReceipt::new("sig", plan, &customer);
        assert_eq!(r.user_email, "client@example.com");
        assert!(r.is_anonymous);
    }

    #[test]
    fn test_memory_record_overwrites_and_clear_is_idempotent() {
        let recorder = ReceiptRecorder::new(MemoryReceiptStore::new());
        assert!(recorder.read().is_none());

        recorder.record(&receipt("first", "150")).unwrap();
        recorder.record(&receipt("second", "400")).unwrap();
        assert_eq!(recorder.read().unwrap().transaction_signature, "second");

        recorder.clear().unwrap();
        recorder.clear().unwrap();
        assert!(recorder.read().is_none());
    }

    #[test]
    fn test_file_store_roundtrip_and_clear() {
        let dir = temp_dir("file");
        let store = FileReceiptStore::new(&dir);
        assert!(store.path().ends_with("calm_session.json"));

        let recorder = ReceiptRecorder::new(store.clone());
        assert!(recorder.read().is_none());
        recorder.record(&receipt("abc", "1000")).unwrap();
        assert_eq!(recorder.read().unwrap(), receipt("abc", "1000"));

        recorder.clear().unwrap();
        recorder.clear().unwrap();
        assert!(!store.path().exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corrupt_slot_reads_as_absent() {
        let dir = temp_dir("corrupt");
        let store = FileReceiptStore::new(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(store.path(), b"{\"selectedPlan\":{}}").unwrap();

        assert!(matches!(store.load(), Err(StorageError::Corrupt(_))));
        let recorder = ReceiptRecorder::new(store);
        assert!(recorder.read().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
