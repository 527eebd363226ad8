use async_broadcast::{broadcast, InactiveReceiver, Sender};

/// Cooperative shutdown signal. Nothing is ever sent on the channel; closing
/// it is the signal, observed by every token at its next suspension point.
pub(crate) fn channel() -> (ShutdownTrigger, ShutdownToken) {
    let (tx, rx) = broadcast::<()>(1);
    (
        ShutdownTrigger { tx },
        ShutdownToken {
            rx: rx.deactivate(),
        },
    )
}

pub(crate) struct ShutdownTrigger {
    tx: Sender<()>,
}

impl ShutdownTrigger {
    pub(crate) fn trigger(&self) {
        self.tx.close();
    }
}

#[derive(Clone)]
pub(crate) struct ShutdownToken {
    rx: InactiveReceiver<()>,
}

impl ShutdownToken {
    pub(crate) async fn triggered(&self) {
        let mut rx = self.rx.activate_cloned();
        while rx.recv().await.is_ok() {}
    }
}
