//! Read side of the append-only assignment event log.

use serde::{Deserialize, Serialize};

use crate::{
    db::{AssignmentEvent, Database, HistoryEntry, NumberState},
    error::{LifecycleError, LifecycleResult},
    lifecycle::replay_state,
};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub phone_number_id: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

#[derive(Clone)]
pub struct AssignmentHistory {
    db: Database,
}

impl AssignmentHistory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Newest events first. `limit` defaults to 50 and is capped at 500.
    pub async fn list(&self, query: HistoryQuery) -> LifecycleResult<HistoryPage> {
        let limit = match query.limit {
            Some(0) => {
                return Err(LifecycleError::Validation(
                    "limit must be greater than zero".into(),
                ))
            }
            Some(limit) => limit.min(MAX_PAGE_SIZE),
            None => DEFAULT_PAGE_SIZE,
        };

        // One extra row tells us whether another page exists.
        let mut entries = self
            .db
            .list_assignment_history(query.phone_number_id, limit + 1, query.offset)
            .await
            .map_err(LifecycleError::from_storage)?;
        let has_more = entries.len() > limit;
        entries.truncate(limit);

        Ok(HistoryPage {
            entries,
            limit,
            offset: query.offset,
            has_more,
        })
    }

    /// Full event log of one number, oldest first.
    pub async fn timeline(&self, phone_number_id: &str) -> LifecycleResult<Vec<AssignmentEvent>> {
        let events = self
            .db
            .list_events_for_number(phone_number_id)
            .await
            .map_err(LifecycleError::from_storage)?;
        if events.is_empty()
            && self
                .db
                .get_phone_number(phone_number_id)
                .await
                .map_err(LifecycleError::from_storage)?
                .is_none()
        {
            return Err(LifecycleError::NotFound(phone_number_id.to_string()));
        }
        Ok(events)
    }

    /// State implied by replaying the number's events from the beginning.
    pub async fn replayed_state(&self, phone_number_id: &str) -> LifecycleResult<Option<NumberState>> {
        let events = self.timeline(phone_number_id).await?;
        Ok(replay_state(&events))
    }
}
