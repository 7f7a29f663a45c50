//! Recovery storage using sled database
//!
//! Transactions and verifier records are stored as JSON so a restarted
//! coordinator can resume from the last persisted phase and checkpoint state.

use serde::{de::DeserializeOwned, Serialize};
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use xshard_core::{XShardError, XShardResult};

const TRANSACTIONS_TREE: &str = "transactions";
const VERIFIER_TREE: &str = "verifier";
const VERIFIER_KEY: &[u8] = b"verifier";

fn storage_err(e: sled::Error) -> XShardError {
    XShardError::StorageError(e.to_string())
}

/// Persistent store for coordinator records
pub struct RecoveryStore {
    db: Db,
    transactions: Tree,
    verifier: Tree,
}

impl RecoveryStore {
    pub fn open<P: AsRef<Path>>(path: P) -> XShardResult<Self> {
        let db = sled::open(path).map_err(storage_err)?;
        Self::from_db(db)
    }

    /// Store that lives only as long as the process
    pub fn temporary() -> XShardResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> XShardResult<Self> {
        let transactions = db.open_tree(TRANSACTIONS_TREE).map_err(storage_err)?;
        let verifier = db.open_tree(VERIFIER_TREE).map_err(storage_err)?;
        Ok(Self {
            db,
            transactions,
            verifier,
        })
    }

    pub fn put_transaction<T: Serialize>(&self, tx_id: &str, record: &T) -> XShardResult<()> {
        let bytes = serde_json::to_vec(record)?;
        self.transactions
            .insert(tx_id.as_bytes(), bytes)
            .map_err(storage_err)?;
        debug!("Persisted transaction {}", tx_id);
        Ok(())
    }

    pub fn get_transaction<T: DeserializeOwned>(&self, tx_id: &str) -> XShardResult<Option<T>> {
        match self.transactions.get(tx_id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn remove_transaction(&self, tx_id: &str) -> XShardResult<bool> {
        Ok(self
            .transactions
            .remove(tx_id.as_bytes())
            .map_err(storage_err)?
            .is_some())
    }

    /// Ids of all persisted transactions, in key order
    pub fn transaction_ids(&self) -> XShardResult<Vec<String>> {
        self.transactions
            .iter()
            .keys()
            .map(|key| {
                let key = key.map_err(storage_err)?;
                String::from_utf8(key.to_vec())
                    .map_err(|e| XShardError::StorageError(e.to_string()))
            })
            .collect()
    }

    pub fn put_verifier<T: Serialize>(&self, record: &T) -> XShardResult<()> {
        let bytes = serde_json::to_vec(record)?;
        self.verifier
            .insert(VERIFIER_KEY, bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_verifier<T: DeserializeOwned>(&self) -> XShardResult<Option<T>> {
        match self.verifier.get(VERIFIER_KEY).map_err(storage_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn flush(&self) -> XShardResult<()> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }
}

/// Thread-safe recovery store wrapper
pub type SharedRecoveryStore = Arc<RecoveryStore>;

pub fn create_recovery_store<P: AsRef<Path>>(path: P) -> XShardResult<SharedRecoveryStore> {
    Ok(Arc::new(RecoveryStore::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        status: String,
        shards: Vec<u32>,
    }

    fn record(status: &str) -> Record {
        Record {
            status: status.into(),
            shards: vec![1, 2],
        }
    }

    #[test]
    fn test_transaction_records() {
        let store = RecoveryStore::temporary().unwrap();
        store.put_transaction("tx-b", &record("pending")).unwrap();
        store.put_transaction("tx-a", &record("completed")).unwrap();

        let loaded: Option<Record> = store.get_transaction("tx-a").unwrap();
        assert_eq!(loaded, Some(record("completed")));
        assert_eq!(store.transaction_ids().unwrap(), vec!["tx-a", "tx-b"]);

        assert!(store.remove_transaction("tx-a").unwrap());
        assert!(!store.remove_transaction("tx-a").unwrap());
        let missing: Option<Record> = store.get_transaction("tx-a").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_reopen() {
        let tmp = TempDir::new().unwrap();

        {
            let store = RecoveryStore::open(tmp.path()).unwrap();
            store.put_transaction("tx-1", &record("aborted")).unwrap();
            store.put_verifier(&record("verifier")).unwrap();
            store.flush().unwrap();
        }

        {
            let store = RecoveryStore::open(tmp.path()).unwrap();
            let tx: Option<Record> = store.get_transaction("tx-1").unwrap();
            assert_eq!(tx, Some(record("aborted")));
            let verifier: Option<Record> = store.get_verifier().unwrap();
            assert_eq!(verifier, Some(record("verifier")));
        }
    }

    #[test]
    fn test_corrupt_record_is_an_error() {
        let store = RecoveryStore::temporary().unwrap();
        store.put_transaction("tx", &"not a record").unwrap();
        let result: XShardResult<Option<Record>> = store.get_transaction("tx");
        assert!(result.is_err());
    }
}
