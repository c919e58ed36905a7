use crossbeam_channel::{unbounded, Receiver, Sender};

/// Fans each notification out to every live subscriber, in subscription order.
///
/// Subscribers whose receiver has been dropped are pruned on the next notify.
#[derive(Debug)]
pub struct Notifier<E> {
    subscribers: Vec<Sender<E>>,
}

impl<E> Default for Notifier<E> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }
}

impl<E: Clone> Notifier<E> {
    pub fn subscribe(&mut self) -> Receiver<E> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn notify(&mut self, event: E) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
