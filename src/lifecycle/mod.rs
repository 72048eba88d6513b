use std::sync::Arc;

use uuid::Uuid;

use crate::error::AppError;
use crate::models::booking::{BookingDraft, BookingStatus};
use crate::store::{TripStore, WriteOutcome};

/// Result of attempting a lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The requested move is not in the transition table.
    Rejected,
    NotFound,
    /// Another actor won the race for the same transition.
    Conflict,
}

/// The only legal status moves. Everything else is rejected and leaves the
/// booking unchanged.
pub fn transition_allowed(from: BookingStatus, to: BookingStatus) -> bool {
    matches!(
        (from, to),
        (BookingStatus::Pending, BookingStatus::Accepted)
            | (BookingStatus::Pending, BookingStatus::Cancelled)
            | (BookingStatus::Accepted, BookingStatus::Arrived)
            | (BookingStatus::Arrived, BookingStatus::InProgress)
            | (BookingStatus::InProgress, BookingStatus::Completed)
    )
}

/// Booking state machine over the trip store. Transitions are applied with a
/// conditional update, so two actors racing for the same move cannot both
/// win.
#[derive(Clone)]
pub struct TripLifecycle {
    store: Arc<dyn TripStore>,
}

impl TripLifecycle {
    pub fn new(store: Arc<dyn TripStore>) -> Self {
        Self { store }
    }

    /// Creates a booking; the store materializes it as pending with no
    /// worker assigned.
    pub async fn create(&self, draft: BookingDraft) -> Result<Uuid, AppError> {
        self.store.create(draft).await
    }

    /// Applies one transition from the table, conditioned on the status the
    /// booking currently has.
    pub async fn advance(
        &self,
        id: Uuid,
        to: BookingStatus,
        worker_id: Option<Uuid>,
    ) -> Result<TransitionOutcome, AppError> {
        let Some(current) = self.store.get(id).await? else {
            return Ok(TransitionOutcome::NotFound);
        };
        if !transition_allowed(current.status, to) {
            return Ok(TransitionOutcome::Rejected);
        }

        let outcome = self
            .store
            .update_status_if(id, current.status, to, worker_id)
            .await?;
        Ok(match outcome {
            WriteOutcome::Applied => TransitionOutcome::Applied,
            WriteOutcome::NotFound => TransitionOutcome::NotFound,
            WriteOutcome::Conflict => TransitionOutcome::Conflict,
        })
    }

    /// Worker takes a pending booking; only the first of two racing accepts
    /// wins.
    pub async fn accept(&self, id: Uuid, worker_id: Uuid) -> Result<TransitionOutcome, AppError> {
        self.advance(id, BookingStatus::Accepted, Some(worker_id))
            .await
    }

    /// Cancellation is only possible while the booking is still pending.
    pub async fn cancel(&self, id: Uuid) -> Result<TransitionOutcome, AppError> {
        self.advance(id, BookingStatus::Cancelled, None).await
    }

    pub async fn mark_arrived(&self, id: Uuid) -> Result<TransitionOutcome, AppError> {
        self.advance(id, BookingStatus::Arrived, None).await
    }

    pub async fn begin_trip(&self, id: Uuid) -> Result<TransitionOutcome, AppError> {
        self.advance(id, BookingStatus::InProgress, None).await
    }

    pub async fn complete(&self, id: Uuid) -> Result<TransitionOutcome, AppError> {
        self.advance(id, BookingStatus::Completed, None).await
    }

    /// Rating is accepted only once the trip has completed; repeated ratings
    /// are last-write-wins.
    pub async fn rate(&self, id: Uuid, rating: f64) -> Result<TransitionOutcome, AppError> {
        let Some(current) = self.store.get(id).await? else {
            return Ok(TransitionOutcome::NotFound);
        };
        if current.status != BookingStatus::Completed {
            return Ok(TransitionOutcome::Rejected);
        }

        let outcome = self
            .store
            .update_rating(id, rating.clamp(0.0, 5.0))
            .await?;
        Ok(match outcome {
            WriteOutcome::Applied => TransitionOutcome::Applied,
            WriteOutcome::NotFound => TransitionOutcome::NotFound,
            WriteOutcome::Conflict => TransitionOutcome::Conflict,
        })
    }
}
