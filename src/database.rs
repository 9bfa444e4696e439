use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::lnurl::{self, PayInfo, PayInfoStore, SeedStore};

const CONFIG: TableDefinition<&str, &str> = TableDefinition::new("config");

// Config Keys
const LINK_SEED: &str = "lnurl_auth_seed";

// Key: Payment Hash
// Value: Serialized Pay Info
const PAY_INFO: TableDefinition<&str, &str> = TableDefinition::new("pay_info");

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Database(#[from] redb::DatabaseError),
    #[error(transparent)]
    Transaction(#[from] redb::TransactionError),
    #[error(transparent)]
    Table(#[from] redb::TableError),
    #[error(transparent)]
    Storage(#[from] redb::StorageError),
    #[error(transparent)]
    Commit(#[from] redb::CommitError),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct Db {
    db: Arc<Mutex<Database>>,
}

impl Db {
    /// Init Database
    pub async fn new(path: PathBuf) -> Result<Self, Error> {
        fs::create_dir_all(&path)?;
        let db_path = path.join("ln-outbound.redb");
        let database = Database::create(db_path)?;

        let write_txn = database.begin_write()?;
        {
            let _ = write_txn.open_table(CONFIG)?;
            let _ = write_txn.open_table(PAY_INFO)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(Mutex::new(database)),
        })
    }

    async fn get_config(&self, key: &str) -> Result<Option<String>, Error> {
        let db = self.db.lock().await;
        let read_txn = db.begin_read()?;
        let config_table = read_txn.open_table(CONFIG)?;

        let value = config_table.get(key)?.map(|v| v.value().to_string());

        Ok(value)
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<(), Error> {
        let db = self.db.lock().await;

        let write_txn = db.begin_write()?;
        {
            let mut config_table = write_txn.open_table(CONFIG)?;
            config_table.insert(key, value)?;
        }
        write_txn.commit()?;

        Ok(())
    }

    pub async fn get_pay_info(&self, payment_hash: &str) -> Result<Option<PayInfo>, Error> {
        let db = self.db.lock().await;
        let read_txn = db.begin_read()?;
        let pay_info_table = read_txn.open_table(PAY_INFO)?;

        let info = match pay_info_table.get(payment_hash.to_lowercase().as_str())? {
            Some(info) => Some(serde_json::from_str(info.value())?),
            None => None,
        };

        Ok(info)
    }

    pub async fn add_pay_info(&self, info: &PayInfo) -> Result<(), Error> {
        let db = self.db.lock().await;

        let write_txn = db.begin_write()?;
        {
            let mut pay_info_table = write_txn.open_table(PAY_INFO)?;
            pay_info_table.insert(
                info.payment_hash.to_lowercase().as_str(),
                serde_json::to_string(info)?.as_str(),
            )?;
        }
        write_txn.commit()?;
        debug!("Stored pay info for {}", info.payment_hash);

        Ok(())
    }
}

#[async_trait]
impl SeedStore for Db {
    async fn link_seed(&self) -> Result<Option<Vec<u8>>, lnurl::Error> {
        match self.get_config(LINK_SEED).await? {
            Some(seed) => Ok(Some(hex::decode(seed).map_err(Error::from)?)),
            None => Ok(None),
        }
    }

    async fn save_link_seed(&self, seed: &[u8]) -> Result<(), lnurl::Error> {
        Ok(self.set_config(LINK_SEED, &hex::encode(seed)).await?)
    }
}

#[async_trait]
impl PayInfoStore for Db {
    async fn save_pay_info(&self, info: &PayInfo) -> Result<(), lnurl::Error> {
        Ok(self.add_pay_info(info).await?)
    }

    async fn fetch_pay_info(&self, payment_hash: &str) -> Result<Option<PayInfo>, lnurl::Error> {
        Ok(self.get_pay_info(payment_hash).await?)
    }
}
