//! In-memory cookie session store with a capacity bound.
//!
//! Used when no database is configured. Expired records are filtered on load
//! and removed by [`ExpiredDeletion::delete_expired`]; when the store is full the
//! record closest to expiry is evicted, which under inactivity expiry is the
//! least recently used one.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tower_sessions::session::{Id, Record};
use tower_sessions::session_store::{self, ExpiredDeletion, SessionStore};

#[derive(Clone, Debug)]
pub struct BoundedMemoryStore {
    records: Arc<Mutex<HashMap<Id, Record>>>,
    capacity: usize,
}

impl BoundedMemoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

fn make_room(records: &mut HashMap<Id, Record>, capacity: usize) {
    let now = OffsetDateTime::now_utc();
    records.retain(|_, record| record.expiry_date > now);
    while records.len() >= capacity {
        let Some(oldest) = records
            .values()
            .min_by_key(|record| record.expiry_date)
            .map(|record| record.id)
        else {
            break;
        };
        records.remove(&oldest);
        tracing::debug!("Evicted cookie session to stay within {} records", capacity);
    }
}

#[async_trait]
impl SessionStore for BoundedMemoryStore {
    async fn create(&self, record: &mut Record) -> session_store::Result<()> {
        let mut records = self.records.lock().await;
        while records.contains_key(&record.id) {
            record.id = Id::default();
        }
        if records.len() >= self.capacity {
            make_room(&mut records, self.capacity);
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn save(&self, record: &Record) -> session_store::Result<()> {
        let mut records = self.records.lock().await;
        if !records.contains_key(&record.id) && records.len() >= self.capacity {
            make_room(&mut records, self.capacity);
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn load(&self, id: &Id) -> session_store::Result<Option<Record>> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .records
            .lock()
            .await
            .get(id)
            .filter(|record| record.expiry_date > now)
            .cloned())
    }

    async fn delete(&self, id: &Id) -> session_store::Result<()> {
        self.records.lock().await.remove(id);
        Ok(())
    }
}

#[async_trait]
impl ExpiredDeletion for BoundedMemoryStore {
    async fn delete_expired(&self) -> session_store::Result<()> {
        let now = OffsetDateTime::now_utc();
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| record.expiry_date > now);
        let removed = before - records.len();
        if removed > 0 {
            tracing::debug!("Deleted {} expired cookie sessions", removed);
        }
        Ok(())
    }
}
