pub mod local;
pub mod memory;

use async_trait::async_trait;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::booking::{Booking, BookingDraft, BookingStatus};
use crate::models::worker::{LocationUpdate, WorkerLocationRecord};

/// Explicit result of a mutation, so callers can decide on retry or
/// surfacing instead of writes failing silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    NotFound,
    /// A conditional update found a different current status than expected.
    Conflict,
}

/// Durable booking records plus change notification.
///
/// Both backends satisfy the same subscribe contract: the receiver's current
/// value is the full booking list ordered by creation time descending, and a
/// fresh value is delivered after every mutation from any handle.
#[async_trait]
pub trait TripStore: Send + Sync {
    /// Persists a draft as a pending booking and notifies all subscribers.
    /// Fails only when the backend cannot complete the write.
    async fn create(&self, draft: BookingDraft) -> Result<Uuid, AppError>;

    fn subscribe(&self) -> watch::Receiver<Vec<Booking>>;

    async fn get(&self, id: Uuid) -> Result<Option<Booking>, AppError>;

    /// Sets status (and worker id, when given). Unknown ids are absorbed as
    /// `WriteOutcome::NotFound`.
    async fn update_status(
        &self,
        id: Uuid,
        status: BookingStatus,
        worker_id: Option<Uuid>,
    ) -> Result<WriteOutcome, AppError>;

    /// Like `update_status`, but applied only while the current status still
    /// equals `expected`. Losing a race yields `WriteOutcome::Conflict` and
    /// leaves the winner's write intact.
    async fn update_status_if(
        &self,
        id: Uuid,
        expected: BookingStatus,
        status: BookingStatus,
        worker_id: Option<Uuid>,
    ) -> Result<WriteOutcome, AppError>;

    /// Last write wins; idempotent for repeated identical values.
    async fn update_rating(&self, id: Uuid, rating: f64) -> Result<WriteOutcome, AppError>;
}

/// One current-position record per worker plus change notification.
#[async_trait]
pub trait LocationChannel: Send + Sync {
    /// Upsert with merge semantics: fields the update leaves unset retain
    /// their prior values. The first publish for a worker creates the record.
    async fn publish(&self, worker_id: Uuid, update: LocationUpdate) -> Result<(), AppError>;

    /// The receiver's current value is `Some(record)` when the worker has
    /// published before and `None` otherwise; `None` is the defined absent
    /// value in both backends. A fresh value arrives on every publish.
    fn subscribe(&self, worker_id: Uuid) -> watch::Receiver<Option<WorkerLocationRecord>>;

    async fn snapshot(&self) -> Result<Vec<WorkerLocationRecord>, AppError>;
}

pub(crate) fn sort_newest_first(bookings: &mut [Booking]) {
    bookings.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}
