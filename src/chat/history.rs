use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backend::{decode_rows, format_timestamp, Query, RowStore, Table};
use crate::error::{AppError, BackendError};
use crate::session::SessionCache;

/// Upper bound on rows pulled for client-side keyword search.
const SEARCH_SCAN_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(pub Uuid);

/// One question/answer pair in the session log.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: EntryId,
    pub time: DateTime<Local>,
    pub question: String,
    pub answer: String,
}

/// Persisted exchange, as stored in `conversations` / `conversations_add`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    #[serde(deserialize_with = "crate::backend::id_as_string")]
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub user_message: String,
    pub assistant_message: String,
}

impl ConversationRecord {
    pub fn local_date(&self) -> NaiveDate {
        self.created_at.with_timezone(&Local).date_naive()
    }

    pub fn matches(&self, keyword: &str) -> bool {
        let needle = keyword.trim().to_lowercase();
        needle.is_empty()
            || self.user_message.to_lowercase().contains(&needle)
            || self.assistant_message.to_lowercase().contains(&needle)
    }
}

struct PendingAnswer {
    entry: EntryId,
    text: String,
    timer: JoinHandle<()>,
}

/// Session transcript log plus the bridge to persisted history.
#[derive(Clone)]
pub struct HistoryStore {
    log: Arc<Mutex<Vec<HistoryEntry>>>,
    pending: Arc<Mutex<Option<PendingAnswer>>>,
    rows: Arc<dyn RowStore>,
    session: SessionCache,
    runtime: tokio::runtime::Handle,
    query_timeout: Duration,
}

impl HistoryStore {
    pub fn new(
        rows: Arc<dyn RowStore>,
        session: SessionCache,
        runtime: tokio::runtime::Handle,
        query_timeout: Duration,
    ) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            pending: Arc::new(Mutex::new(None)),
            rows,
            session,
            runtime,
            query_timeout,
        }
    }

    fn log(&self) -> MutexGuard<'_, Vec<HistoryEntry>> {
        lock(&self.log)
    }

    pub fn record_question(&self, text: &str) -> EntryId {
        let id = EntryId(Uuid::new_v4());
        self.log().push(HistoryEntry {
            id,
            time: Local::now(),
            question: text.to_string(),
            answer: String::new(),
        });
        id
    }

    /// Fills the answer of the most recent entry. With `defer`, the fill waits
    /// that long so the stored transcript never runs ahead of a typewriter
    /// reveal that is still on screen.
    pub fn record_answer(&self, text: &str, defer: Option<Duration>) {
        let Some(entry) = self.log().last().map(|e| e.id) else {
            tracing::debug!("record_answer with an empty log; ignoring");
            return;
        };

        // A newer answer supersedes whatever was still waiting.
        self.flush_pending();

        match defer {
            None | Some(Duration::ZERO) => fill_answer(&self.log, entry, text),
            Some(delay) => {
                let log = Arc::clone(&self.log);
                let pending = Arc::clone(&self.pending);
                let owned = text.to_string();
                let timer = self.runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    fill_answer(&log, entry, &owned);
                    let mut slot = lock(&pending);
                    if slot.as_ref().is_some_and(|p| p.entry == entry) {
                        *slot = None;
                    }
                });
                *lock(&self.pending) = Some(PendingAnswer {
                    entry,
                    text: text.to_string(),
                    timer,
                });
            }
        }
    }

    /// Applies a deferred answer now (used when a reveal is cut short).
    pub fn flush_pending(&self) {
        let pending = lock(&self.pending).take();
        if let Some(pending) = pending {
            pending.timer.abort();
            fill_answer(&self.log, pending.entry, &pending.text);
        }
    }

    #[cfg(test)]
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.log().clone()
    }

    pub fn entry(&self, id: EntryId) -> Option<HistoryEntry> {
        self.log().iter().find(|e| e.id == id).cloned()
    }

    pub fn remove_entry(&self, id: EntryId) -> bool {
        let mut log = self.log();
        let before = log.len();
        log.retain(|e| e.id != id);
        log.len() != before
    }

    pub fn clear(&self) {
        self.flush_pending();
        self.log().clear();
    }

    /// Writes one exchange to `table` in the background. Unauthenticated
    /// callers get a warning and no write; a failed write is only logged.
    pub fn persist(
        &self,
        table: Table,
        user_message: &str,
        assistant_message: &str,
    ) -> Option<JoinHandle<Result<(), BackendError>>> {
        let Some(user_id) = self.session.current_user_id() else {
            tracing::warn!("Not signed in; conversation record not saved");
            return None;
        };

        let row = json!({
            "user_id": user_id,
            "user_message": user_message,
            "assistant_message": assistant_message,
            "created_at": format_timestamp(Utc::now()),
        });
        let rows = Arc::clone(&self.rows);
        Some(self.runtime.spawn(async move {
            match rows.insert(table, row).await {
                Ok(_) => {
                    tracing::debug!("Conversation record saved to {}", table.as_str());
                    Ok(())
                }
                Err(error) => {
                    tracing::error!("Failed to save conversation record: {}", error);
                    Err(error)
                }
            }
        }))
    }

    /// Adds one to the signed-in user's `conversations` counter in the
    /// background.
    pub fn count_reply(&self) -> Option<JoinHandle<()>> {
        let user_id = self.session.current_user_id()?;
        let rows = Arc::clone(&self.rows);
        Some(self.runtime.spawn(async move {
            if let Err(error) = bump_reply_count(rows.as_ref(), &user_id).await {
                tracing::warn!("Could not update conversation count: {}", error);
            }
        }))
    }

    pub async fn list_recent(
        &self,
        table: Table,
        limit: usize,
    ) -> Result<Vec<ConversationRecord>, AppError> {
        let user_id = self.require_user()?;
        let query = Query::new()
            .eq("user_id", user_id)
            .order("created_at", true)
            .limit(limit);
        self.query(table, query).await
    }

    /// Case-insensitive substring match over both sides of each exchange.
    pub async fn search(
        &self,
        table: Table,
        keyword: &str,
    ) -> Result<Vec<ConversationRecord>, AppError> {
        let records = self.list_recent(table, SEARCH_SCAN_LIMIT).await?;
        Ok(records.into_iter().filter(|r| r.matches(keyword)).collect())
    }

    /// Records whose creation time falls on `date` in the local time zone.
    pub async fn list_by_date(
        &self,
        table: Table,
        date: NaiveDate,
    ) -> Result<Vec<ConversationRecord>, AppError> {
        let user_id = self.require_user()?;
        let (start, end) = local_day_bounds(date)
            .ok_or_else(|| AppError::validation(format!("{date} is not a valid local date")))?;
        let query = Query::new()
            .eq("user_id", user_id)
            .gte("created_at", format_timestamp(start))
            .lt("created_at", format_timestamp(end))
            .order("created_at", false);
        self.query(table, query).await
    }

    fn require_user(&self) -> Result<String, AppError> {
        self.session
            .current_user_id()
            .ok_or(AppError::Persistence(BackendError::Unauthenticated))
    }

    async fn query(&self, table: Table, query: Query) -> Result<Vec<ConversationRecord>, AppError> {
        let rows = tokio::time::timeout(self.query_timeout, self.rows.select(table, &query))
            .await
            .map_err(|_| AppError::Timeout {
                what: "history query",
                seconds: self.query_timeout.as_secs(),
            })??;
        Ok(decode_rows(table, rows))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn fill_answer(log: &Mutex<Vec<HistoryEntry>>, entry: EntryId, text: &str) {
    if let Some(target) = lock(log).iter_mut().find(|e| e.id == entry) {
        target.answer = text.to_string();
    }
}

/// UTC bounds of a local calendar day, `[start, end)`.
async fn bump_reply_count(rows: &dyn RowStore, user_id: &str) -> Result<(), BackendError> {
    let by_id = Query::new().eq("id", user_id);
    let Some(profile) = rows
        .select(Table::Users, &by_id.clone().limit(1))
        .await?
        .into_iter()
        .next()
    else {
        tracing::debug!("No profile row for {}; conversation count skipped", user_id);
        return Ok(());
    };
    let count = profile
        .get("conversations")
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(0);
    rows.update(Table::Users, &by_id, json!({ "conversations": count + 1 }))
        .await?;
    Ok(())
}

pub fn local_day_bounds(date: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = Local
        .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
        .earliest()?;
    let next = date.succ_opt()?;
    let end = Local
        .from_local_datetime(&next.and_hms_opt(0, 0, 0)?)
        .earliest()?;
    Some((start.with_timezone(&Utc), end.with_timezone(&Utc)))
}

/// Groups records by local calendar date, newest day first when iterated in
/// reverse.
pub fn bucket_by_date(records: &[ConversationRecord]) -> BTreeMap<NaiveDate, Vec<ConversationRecord>> {
    let mut buckets: BTreeMap<NaiveDate, Vec<ConversationRecord>> = BTreeMap::new();
    for record in records {
        buckets
            .entry(record.local_date())
            .or_default()
            .push(record.clone());
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sqlite::SqliteRowStore;
    use crate::backend::testing::FakeAuth;
    use crate::backend::AuthEvent;

    fn signed_in_store(rows: Arc<dyn RowStore>) -> HistoryStore {
        let session = SessionCache::new();
        session.apply(&AuthEvent::SignedIn {
            user: FakeAuth::user("u1", "u1@example.com"),
        });
        HistoryStore::new(
            rows,
            session,
            tokio::runtime::Handle::current(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn question_then_answer_fills_latest_entry() {
        let store = signed_in_store(Arc::new(SqliteRowStore::open_in_memory().unwrap()));
        store.record_question("first");
        store.record_answer("one", None);
        store.record_question("second");
        assert_eq!(store.entries()[1].answer, "");
        store.record_answer("two", None);

        let entries = store.entries();
        assert_eq!(entries[0].answer, "one");
        assert_eq!(entries[1].answer, "two");
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_answer_lands_after_reveal_time() {
        let store = signed_in_store(Arc::new(SqliteRowStore::open_in_memory().unwrap()));
        store.record_question("q");
        let reply = "four";
        let interval = Duration::from_millis(30);
        let delay = interval * reply.chars().count() as u32;
        store.record_answer(reply, Some(delay));

        tokio::time::sleep(delay - Duration::from_millis(1)).await;
        assert_eq!(store.entries()[0].answer, "");

        tokio::time::sleep(Duration::from_millis(1)).await;
        for _ in 0..10 {
            if !store.entries()[0].answer.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(store.entries()[0].answer, "four");
    }

    #[tokio::test(start_paused = true)]
    async fn flush_applies_deferred_answer_immediately() {
        let store = signed_in_store(Arc::new(SqliteRowStore::open_in_memory().unwrap()));
        store.record_question("q");
        store.record_answer("later", Some(Duration::from_secs(60)));
        store.flush_pending();
        assert_eq!(store.entries()[0].answer, "later");
    }

    #[tokio::test]
    async fn persist_requires_a_session() {
        let rows = Arc::new(SqliteRowStore::open_in_memory().unwrap());
        let store = HistoryStore::new(
            rows.clone(),
            SessionCache::new(),
            tokio::runtime::Handle::current(),
            Duration::from_secs(5),
        );
        assert!(store.persist(Table::Conversations, "q", "a").is_none());
        assert!(rows
            .select(Table::Conversations, &Query::new())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn search_is_case_insensitive_across_both_fields() {
        let store = signed_in_store(Arc::new(SqliteRowStore::open_in_memory().unwrap()));
        for (q, a) in [("Rust lifetimes?", "They bound borrows."), ("weather", "Sunny"), ("hi", "RUSTY nail")] {
            store
                .persist(Table::Conversations, q, a)
                .unwrap()
                .await
                .unwrap()
                .unwrap();
        }

        let hits = store.search(Table::Conversations, "rust").await.unwrap();
        let questions: Vec<&str> = hits.iter().map(|r| r.user_message.as_str()).collect();
        assert_eq!(hits.len(), 2);
        assert!(questions.contains(&"Rust lifetimes?"));
        assert!(questions.contains(&"hi"));
    }

    #[tokio::test]
    async fn list_by_date_uses_local_calendar_day() {
        let rows: Arc<dyn RowStore> = Arc::new(SqliteRowStore::open_in_memory().unwrap());
        let store = signed_in_store(Arc::clone(&rows));
        let day = NaiveDate::from_ymd_opt(2024, 5, 17).unwrap();
        let (start, end) = local_day_bounds(day).unwrap();

        for (label, at) in [
            ("before", start - chrono::Duration::seconds(1)),
            ("inside", start + chrono::Duration::hours(12)),
            ("after", end),
        ] {
            rows.insert(
                Table::Conversations,
                json!({
                    "user_id": "u1",
                    "user_message": label,
                    "assistant_message": "",
                    "created_at": format_timestamp(at),
                }),
            )
            .await
            .unwrap();
        }

        let hits = store.list_by_date(Table::Conversations, day).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].user_message, "inside");
        assert_eq!(hits[0].local_date(), day);
    }

    #[tokio::test]
    async fn queries_time_out_instead_of_hanging() {
        struct StalledRows;

        #[async_trait::async_trait]
        impl RowStore for StalledRows {
            async fn insert(&self, _: Table, row: serde_json::Value) -> Result<serde_json::Value, BackendError> {
                Ok(row)
            }
            async fn select(&self, _: Table, _: &Query) -> Result<Vec<serde_json::Value>, BackendError> {
                std::future::pending().await
            }
            async fn update(&self, _: Table, _: &Query, _: serde_json::Value) -> Result<usize, BackendError> {
                Ok(0)
            }
            async fn delete(&self, _: Table, _: &Query) -> Result<usize, BackendError> {
                Ok(0)
            }
        }

        let session = SessionCache::new();
        session.apply(&AuthEvent::SignedIn {
            user: FakeAuth::user("u1", "u1@example.com"),
        });
        let store = HistoryStore::new(
            Arc::new(StalledRows),
            session,
            tokio::runtime::Handle::current(),
            Duration::from_millis(20),
        );
        let error = store.list_recent(Table::Conversations, 10).await.unwrap_err();
        assert!(matches!(error, AppError::Timeout { .. }));
    }

    #[test]
    fn buckets_group_by_local_date() {
        let now = Utc::now();
        let record = |id: &str, at: DateTime<Utc>| ConversationRecord {
            id: id.to_string(),
            user_id: "u1".to_string(),
            created_at: at,
            user_message: String::new(),
            assistant_message: String::new(),
        };
        let records = vec![
            record("a", now),
            record("b", now),
            record("c", now - chrono::Duration::days(3)),
        ];
        let buckets = bucket_by_date(&records);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[&now.with_timezone(&Local).date_naive()].len(), 2);
    }
}
