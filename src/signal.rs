//! Typed event wiring between workers.
//!
//! `Signal<T>` is a small callback registry: consumers connect boxed slots,
//! the owning worker emits values to every slot in connection order. Slots
//! typically forward into a `WorkerHandle` or an mpsc sender, so delivery
//! crosses threads as explicit messages rather than shared state.

use std::sync::mpsc::Sender;

pub struct Signal<T> {
    slots: Vec<Box<dyn Fn(T) + Send>>,
}

impl<T: Clone> Signal<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Register a slot. Slots are invoked in connection order on the
    /// emitting worker's thread.
    pub fn connect(&mut self, slot: impl Fn(T) + Send + 'static) {
        self.slots.push(Box::new(slot));
    }

    /// Register an mpsc sender as a slot. Send failures are ignored: a
    /// dropped receiver just means the consumer went away.
    pub fn connect_sender(&mut self, tx: Sender<T>)
    where
        T: Send + 'static,
    {
        self.connect(move |value| {
            let _ = tx.send(value);
        });
    }

    /// Deliver `value` to every slot, exactly once per slot.
    pub fn emit(&self, value: T) {
        for slot in &self.slots {
            slot(value.clone());
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.slots.is_empty()
    }
}

impl<T: Clone> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn emit_reaches_all_slots_in_order() {
        let mut signal = Signal::new();
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        signal.connect_sender(tx_a);
        signal.connect_sender(tx_b);

        signal.emit(7u32);
        signal.emit(8u32);

        assert_eq!(rx_a.try_recv().unwrap(), 7);
        assert_eq!(rx_a.try_recv().unwrap(), 8);
        assert_eq!(rx_b.try_recv().unwrap(), 7);
        assert_eq!(rx_b.try_recv().unwrap(), 8);
    }

    #[test]
    fn dropped_receiver_does_not_break_emit() {
        let mut signal = Signal::new();
        let (tx, rx) = mpsc::channel::<u32>();
        signal.connect_sender(tx);
        drop(rx);
        signal.emit(1);
    }
}
