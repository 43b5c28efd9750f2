//! Single-flight guard for protocol operations.
//!
//! Only one protocol operation may run per session. Acquisition never queues:
//! a second caller fails immediately with the operation that holds the gate.
//! The only waiter is a report preempting a status check, which signals the
//! holder and waits for it to release.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use tokio::sync::Notify;

use crate::event::Operation;

struct InFlight {
    operation: Operation,
    ticket: u64,
    preempt: Arc<Notify>,
}

/// Tracks the in-flight operation.
#[derive(Default)]
pub(crate) struct OperationGate {
    current: Mutex<Option<InFlight>>,
    released: Notify,
    next_ticket: AtomicU64,
}

impl OperationGate {
    /// Operation currently holding the gate.
    pub(crate) fn current(&self) -> Option<Operation> {
        self.lock().as_ref().map(|f| f.operation)
    }

    /// Take the gate for `operation`, or return the operation holding it.
    pub(crate) fn try_acquire(
        &self,
        operation: Operation,
    ) -> Result<OperationGuard<'_>, Operation> {
        let mut current = self.lock();
        if let Some(holder) = current.as_ref() {
            return Err(holder.operation);
        }
        Ok(self.install(&mut current, operation))
    }

    /// Take the gate for `operation`, preempting `victim` if it holds it.
    ///
    /// Fails immediately if any other operation holds the gate.
    pub(crate) async fn acquire_preempting(
        &self,
        operation: Operation,
        victim: Operation,
    ) -> Result<OperationGuard<'_>, Operation> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            {
                let mut current = self.lock();
                match current.as_ref() {
                    None => return Ok(self.install(&mut current, operation)),
                    Some(holder) if holder.operation == victim => {
                        tracing::debug!(%operation, %victim, "preempting in-flight operation");
                        holder.preempt.notify_one();
                    },
                    Some(holder) => return Err(holder.operation),
                }
            }

            released.await;
        }
    }

    fn install(&self, current: &mut Option<InFlight>, operation: Operation) -> OperationGuard<'_> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let preempt = Arc::new(Notify::new());
        *current = Some(InFlight { operation, ticket, preempt: Arc::clone(&preempt) });
        OperationGuard { gate: self, ticket, preempt }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<InFlight>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds the gate until dropped.
pub(crate) struct OperationGuard<'a> {
    gate: &'a OperationGate,
    ticket: u64,
    preempt: Arc<Notify>,
}

impl OperationGuard<'_> {
    /// Resolves once another operation asks this one to yield.
    pub(crate) async fn preempted(&self) {
        self.preempt.notified().await;
    }

    /// Relabel the held operation (report continuing as unregister).
    pub(crate) fn switch_to(&self, operation: Operation) {
        if let Some(holder) = self.gate.lock().as_mut().filter(|h| h.ticket == self.ticket) {
            holder.operation = operation;
        }
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        {
            let mut current = self.gate.lock();
            if current.as_ref().is_some_and(|h| h.ticket == self.ticket) {
                *current = None;
            }
        }
        self.gate.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn second_acquire_fails_with_holder() {
        let gate = OperationGate::default();
        let guard = gate.try_acquire(Operation::CheckStatus).unwrap();

        assert_eq!(gate.try_acquire(Operation::Unregister).err(), Some(Operation::CheckStatus));
        assert_eq!(gate.current(), Some(Operation::CheckStatus));

        drop(guard);
        assert_eq!(gate.current(), None);
        assert!(gate.try_acquire(Operation::Unregister).is_ok());
    }

    #[test]
    fn switch_relabels_held_operation() {
        let gate = OperationGate::default();
        let guard = gate.try_acquire(Operation::Report).unwrap();
        guard.switch_to(Operation::Unregister);
        assert_eq!(gate.current(), Some(Operation::Unregister));
    }

    #[tokio::test]
    async fn preempting_acquire_fails_on_non_victim() {
        let gate = OperationGate::default();
        let _held = gate.try_acquire(Operation::Register).unwrap();

        let result = gate.acquire_preempting(Operation::Report, Operation::CheckStatus).await;
        assert_eq!(result.err(), Some(Operation::Register));
    }

    #[tokio::test(start_paused = true)]
    async fn preempting_acquire_signals_and_waits() {
        let gate = Arc::new(OperationGate::default());
        let holder_gate = Arc::clone(&gate);

        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let holder = tokio::spawn(async move {
            let guard = holder_gate.try_acquire(Operation::CheckStatus).unwrap();
            ready_tx.send(()).unwrap();
            tokio::select! {
                () = guard.preempted() => "preempted",
                () = tokio::time::sleep(Duration::from_secs(3600)) => "finished",
            }
        });
        ready_rx.await.unwrap();

        let guard = gate.acquire_preempting(Operation::Report, Operation::CheckStatus).await;
        assert!(guard.is_ok());
        assert_eq!(holder.await.unwrap(), "preempted");
        assert_eq!(gate.current(), Some(Operation::Report));
    }
}
