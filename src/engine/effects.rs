use std::future::Future;
use std::time::Duration;

use chrono::NaiveDateTime;

use crate::collab::{CollabError, ReminderRequest};
use crate::model::*;
use crate::observability::SIDE_EFFECT_FAILURES_TOTAL;

use super::{Engine, EngineError, locked_days};

/// Run one outbound call with a deadline. Failures are logged and counted only.
async fn run_effect<F>(effect: &'static str, appointment_id: ulid::Ulid, timeout: Duration, call: F)
where
    F: Future<Output = Result<(), CollabError>>,
{
    let result = match tokio::time::timeout(timeout, call).await {
        Ok(r) => r,
        Err(_) => Err(CollabError::TimedOut),
    };
    if let Err(e) = result {
        metrics::counter!(SIDE_EFFECT_FAILURES_TOTAL, "effect" => effect).increment(1);
        tracing::warn!("{effect} for appointment {appointment_id} failed: {e}");
    }
}

/// Instants `offsets` minutes before `start_at` that are still in the future.
pub fn reminder_instants(start_at: NaiveDateTime, offsets: &[i64], now: NaiveDateTime) -> Vec<NaiveDateTime> {
    let mut instants: Vec<NaiveDateTime> = offsets
        .iter()
        .map(|m| start_at - chrono::Duration::minutes(*m))
        .filter(|t| *t > now)
        .collect();
    instants.sort();
    instants.dedup();
    instants
}

impl Engine {
    fn reminder_request(&self, appointment: &Appointment) -> Option<ReminderRequest> {
        let fire_at = reminder_instants(appointment.start_at, &self.config.reminder_offsets, self.now());
        if fire_at.is_empty() {
            return None;
        }
        Some(ReminderRequest {
            appointment_id: appointment.id,
            business_id: appointment.business_id,
            client_id: appointment.client_id,
            start_at: appointment.start_at,
            fire_at,
        })
    }

    pub(super) fn after_create(&self, appointment: &Appointment) {
        let notifier = self.collab.notifier.clone();
        let timeout = self.config.collaborator_timeout;
        let reminders = self.reminder_request(appointment);
        let appointment = appointment.clone();
        tokio::spawn(async move {
            let id = appointment.id;
            run_effect("send_confirmation", id, timeout, notifier.send_confirmation(&appointment)).await;
            if let Some(request) = reminders {
                run_effect("schedule_reminders", id, timeout, notifier.schedule_reminders(request)).await;
            }
        });
    }

    pub(super) fn after_confirm(&self, appointment: &Appointment) {
        let notifier = self.collab.notifier.clone();
        let timeout = self.config.collaborator_timeout;
        let appointment = appointment.clone();
        tokio::spawn(async move {
            run_effect(
                "send_confirmation",
                appointment.id,
                timeout,
                notifier.send_confirmation(&appointment),
            )
            .await;
        });
    }

    pub(super) fn after_cancel(&self, appointment: &Appointment, refund_amount: Money) {
        let notifier = self.collab.notifier.clone();
        let timeout = self.config.collaborator_timeout;
        let appointment = appointment.clone();
        tokio::spawn(async move {
            let id = appointment.id;
            run_effect("cancel_reminders", id, timeout, notifier.cancel_reminders(id)).await;
            run_effect(
                "send_cancellation",
                id,
                timeout,
                notifier.send_cancellation(&appointment, refund_amount),
            )
            .await;
        });
    }

    /// Old reminders are cancelled before new ones are scheduled.
    pub(super) fn after_reschedule(&self, appointment: &Appointment, previous: SlotRef) {
        let notifier = self.collab.notifier.clone();
        let timeout = self.config.collaborator_timeout;
        let reminders = self.reminder_request(appointment);
        let appointment = appointment.clone();
        tokio::spawn(async move {
            let id = appointment.id;
            run_effect("cancel_reminders", id, timeout, notifier.cancel_reminders(id)).await;
            if let Some(request) = reminders {
                run_effect("schedule_reminders", id, timeout, notifier.schedule_reminders(request)).await;
            }
            run_effect(
                "send_reschedule",
                id,
                timeout,
                notifier.send_reschedule(&appointment, previous),
            )
            .await;
        });
    }

    /// Charge the deposit of a freshly committed appointment.
    ///
    /// Runs after commit with no lock held, and the caller waits for it (at
    /// most `collaborator_timeout`) so the returned appointment reports
    /// `deposit_paid`. A failed or timed-out charge leaves the appointment
    /// unpaid; the booking is not rolled back.
    pub(super) async fn capture_deposit(&self, appointment: Appointment) -> Appointment {
        let amount = appointment.pricing.deposit;
        if amount <= 0 {
            return appointment;
        }
        let timeout = self.config.collaborator_timeout;
        let charge = self
            .collab
            .payments
            .create_deposit_charge(amount, appointment.client_id, appointment.id);
        let handle = match tokio::time::timeout(timeout, charge).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                metrics::counter!(SIDE_EFFECT_FAILURES_TOTAL, "effect" => "deposit_charge").increment(1);
                tracing::warn!("deposit charge for appointment {} failed: {e}", appointment.id);
                return appointment;
            }
            Err(_) => {
                metrics::counter!(SIDE_EFFECT_FAILURES_TOTAL, "effect" => "deposit_charge").increment(1);
                tracing::warn!("deposit charge for appointment {} timed out", appointment.id);
                return appointment;
            }
        };

        match self.record_deposit(appointment.id, handle.0).await {
            Ok(updated) => updated,
            Err(e) => {
                tracing::error!("charged deposit for appointment {} but could not record it: {e}", appointment.id);
                appointment
            }
        }
    }

    /// Record a captured deposit charge against a pending or confirmed
    /// appointment.
    pub async fn record_deposit(&self, id: ulid::Ulid, charge: String) -> Result<Appointment, EngineError> {
        let _gate = self.commit_gate.read().await;
        let (appointment, mut guards) = self.lock_appointment(id, None, None).await?;
        if appointment.pricing.deposit_paid {
            return Err(EngineError::invalid("deposit already recorded"));
        }
        if !appointment.status.is_open_booking() {
            tracing::warn!(
                "deposit charge {charge} arrived for appointment {id} which is already {}",
                appointment.status
            );
            return Err(EngineError::invalid(format!(
                "cannot record a deposit for an appointment that is {}",
                appointment.status
            )));
        }
        let event = Event::DepositCaptured { id, charge };
        self.persist_and_apply(&event, locked_days(&mut guards)).await?;
        tracing::info!("deposit of {} captured for appointment {id}", appointment.pricing.deposit);
        self.store.appointment(&id).ok_or(EngineError::NotFound(id))
    }
}
