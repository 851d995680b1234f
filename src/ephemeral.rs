//! Короткоживущие индикаторы (печатает, реакция) с автоматическим истечением.
//!
//! У каждого индикатора один слот и одна задача-таймер. Новый `set` отменяет
//! прежний таймер и ставит свежий, так что старое значение не может погасить
//! более позднее.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

struct Slot<T> {
    value: Option<T>,
    expires_at: Option<Instant>,
    // номер установки: таймер чистит слот только если он всё ещё "свой"
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

impl<T> Slot<T> {
    fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}

pub struct Indicator<T> {
    slot: Arc<Mutex<Slot<T>>>,
    ttl: Duration,
    tx: watch::Sender<Option<T>>,
}

impl<T> Indicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            slot: Arc::new(Mutex::new(Slot {
                value: None,
                expires_at: None,
                epoch: 0,
                timer: None,
            })),
            ttl,
            tx,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Ставит значение на полный TTL, отменяя предыдущий таймер
    pub fn set(&self, value: T) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.cancel_timer();
        slot.epoch += 1;
        slot.value = Some(value.clone());
        slot.expires_at = Some(Instant::now() + self.ttl);
        self.tx.send_replace(Some(value));

        let epoch = slot.epoch;
        let ttl = self.ttl;
        let weak = Arc::downgrade(&self.slot);
        let tx = self.tx.clone();
        slot.timer = Some(tokio::spawn(async move {
            sleep(ttl).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let mut slot = shared.lock().unwrap_or_else(|e| e.into_inner());
            if slot.epoch == epoch {
                slot.value = None;
                slot.expires_at = None;
                slot.timer = None;
                tx.send_replace(None);
            }
        }));
    }

    /// Текущее значение или `None` после истечения
    pub fn get(&self) -> Option<T> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match (&slot.value, slot.expires_at) {
            (Some(value), Some(deadline)) if Instant::now() < deadline => Some(value.clone()),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.get().is_some()
    }

    /// Немедленно гасит индикатор и отменяет таймер
    pub fn clear(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.cancel_timer();
        slot.epoch += 1;
        slot.expires_at = None;
        if slot.value.take().is_some() {
            self.tx.send_replace(None);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.tx.subscribe()
    }
}

impl<T> Drop for Indicator<T> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.cancel_timer();
        }
    }
}
