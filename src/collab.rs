use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::model::{Appointment, Money, SlotRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollabError {
    Unavailable(String),
    Rejected(String),
    TimedOut,
}

impl std::fmt::Display for CollabError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollabError::Unavailable(e) => write!(f, "collaborator unavailable: {e}"),
            CollabError::Rejected(e) => write!(f, "collaborator rejected request: {e}"),
            CollabError::TimedOut => write!(f, "collaborator timed out"),
        }
    }
}

impl std::error::Error for CollabError {}

/// Absolute instants at which an external scheduler should fire reminders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderRequest {
    pub appointment_id: Ulid,
    pub business_id: Ulid,
    pub client_id: Ulid,
    pub start_at: NaiveDateTime,
    pub fire_at: Vec<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeHandle(pub String);

/// Outbound notifications. Fire-and-forget: results are only logged.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn schedule_reminders(&self, request: ReminderRequest) -> Result<(), CollabError>;
    async fn cancel_reminders(&self, appointment_id: Ulid) -> Result<(), CollabError>;
    async fn send_confirmation(&self, appointment: &Appointment) -> Result<(), CollabError>;
    async fn send_cancellation(
        &self,
        appointment: &Appointment,
        refund_amount: Money,
    ) -> Result<(), CollabError>;
    async fn send_reschedule(
        &self,
        appointment: &Appointment,
        previous: SlotRef,
    ) -> Result<(), CollabError>;
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_deposit_charge(
        &self,
        amount: Money,
        payer: Ulid,
        reference: Ulid,
    ) -> Result<ChargeHandle, CollabError>;
}

pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn schedule_reminders(&self, _request: ReminderRequest) -> Result<(), CollabError> {
        Ok(())
    }

    async fn cancel_reminders(&self, _appointment_id: Ulid) -> Result<(), CollabError> {
        Ok(())
    }

    async fn send_confirmation(&self, _appointment: &Appointment) -> Result<(), CollabError> {
        Ok(())
    }

    async fn send_cancellation(
        &self,
        _appointment: &Appointment,
        _refund_amount: Money,
    ) -> Result<(), CollabError> {
        Ok(())
    }

    async fn send_reschedule(
        &self,
        _appointment: &Appointment,
        _previous: SlotRef,
    ) -> Result<(), CollabError> {
        Ok(())
    }
}

/// Gateway for deployments that take no online deposits.
pub struct NoPayments;

#[async_trait]
impl PaymentGateway for NoPayments {
    async fn create_deposit_charge(
        &self,
        _amount: Money,
        _payer: Ulid,
        _reference: Ulid,
    ) -> Result<ChargeHandle, CollabError> {
        Err(CollabError::Unavailable("no payment gateway configured".into()))
    }
}

/// Everything an engine talks to outside its own state.
#[derive(Clone)]
pub struct Collaborators {
    pub notifier: Arc<dyn Notifier>,
    pub payments: Arc<dyn PaymentGateway>,
    pub clock: Arc<dyn Clock>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            notifier: Arc::new(NoopNotifier),
            payments: Arc::new(NoPayments),
            clock: Arc::new(SystemClock),
        }
    }
}
