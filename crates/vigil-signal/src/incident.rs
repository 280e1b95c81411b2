//! Log of sensitive access events reported by devices.

use std::sync::Arc;

use tracing::info;
use vigil_common::{Document, Error, IncidentRecord, Result, MULE_LOGS};

use crate::feed::LiveFeed;
use crate::store::SignalingStore;

pub struct IncidentLog {
    store: Arc<dyn SignalingStore>,
}

impl IncidentLog {
    pub fn new(store: Arc<dyn SignalingStore>) -> Self {
        Self { store }
    }

    /// Follow `mule_logs`, newest first.
    pub fn subscribe(
        &self,
        on_error: impl FnMut(Error) + Send + 'static,
    ) -> Result<LiveFeed<IncidentRecord>> {
        let subscription = self.store.list(MULE_LOGS)?;
        LiveFeed::spawn(
            "incidents",
            subscription,
            newest_first,
            on_error,
        )
    }

    /// Irreversible. The live feed is the only confirmation that it landed.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::invalid_input("incident id is empty"));
        }
        self.store.delete(MULE_LOGS, id).await?;
        info!(id, "incident deleted");
        Ok(())
    }
}

fn newest_first(docs: &[Document]) -> Vec<IncidentRecord> {
    let mut records: Vec<IncidentRecord> = docs.iter().map(IncidentRecord::from_document).collect();
    // Stable: records sharing a timestamp keep arrival order; undated ones sink.
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};
    use vigil_common::{fields, Evidence, FIELD_IMAGE_BASE64, FIELD_TIMESTAMP, FIELD_USER};

    fn seed(store: &MemoryStore, id: &str, user: &str, minutes: Option<i64>) {
        let mut fields = fields! { FIELD_USER => user };
        if let Some(m) = minutes {
            let ts = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap() + Duration::minutes(m);
            fields.insert(FIELD_TIMESTAMP.into(), ts.into());
        }
        store.put_now(MULE_LOGS, id, fields).unwrap();
    }

    #[tokio::test]
    async fn test_records_are_newest_first() {
        let store = MemoryStore::new();
        seed(&store, "old", "u1", Some(0));
        seed(&store, "undated", "u2", None);
        seed(&store, "new", "u3", Some(30));
        seed(&store, "mid", "u4", Some(10));

        let log = IncidentLog::new(Arc::new(store));
        let mut feed = log.subscribe(|_| {}).unwrap();
        let records = feed.wait_for(|r| r.len() == 4).await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old", "undated"]);
    }

    #[tokio::test]
    async fn test_delete_is_observed_through_feed() {
        let store = MemoryStore::new();
        seed(&store, "a", "u1", Some(0));
        seed(&store, "b", "u2", Some(1));

        let log = IncidentLog::new(Arc::new(store.clone()));
        let mut feed = log.subscribe(|_| {}).unwrap();
        feed.wait_for(|r| r.len() == 2).await.unwrap();

        log.delete("a").await.unwrap();
        let records = feed
            .wait_for(|r| r.iter().all(|rec| rec.id != "a"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "b");
    }

    #[tokio::test]
    async fn test_evidence_is_decoded() {
        let store = MemoryStore::new();
        store
            .put_now(
                MULE_LOGS,
                "e1",
                fields! { FIELD_USER => "eve", FIELD_IMAGE_BASE64 => "iVBORw==" },
            )
            .unwrap();
        let log = IncidentLog::new(Arc::new(store));
        let mut feed = log.subscribe(|_| {}).unwrap();
        let records = feed.wait_for(|r| !r.is_empty()).await.unwrap();
        assert_eq!(
            records[0].evidence,
            Some(Evidence::Image(vec![0x89, b'P', b'N', b'G']))
        );
    }

    #[tokio::test]
    async fn test_delete_rejects_empty_id() {
        let log = IncidentLog::new(Arc::new(MemoryStore::new()));
        assert!(matches!(log.delete("").await, Err(Error::InvalidInput(_))));
    }
}
