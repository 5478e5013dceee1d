//! Notification dispatcher: a single background worker draining a bounded queue
//! of mail tasks. Producers never wait on delivery.
//!
//! Delivery is best effort and at most once: a failed send is logged and dropped.
//! There is no retry queue yet; bounded retry with backoff would go in `deliver_one`.

pub mod template;
pub mod transport;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::MailConfig;
use crate::error::{BookingError, DeliveryError};
use crate::model::{now_ms, Ms};
use crate::observability::{NOTIFICATIONS_TOTAL, NOTIFICATION_QUEUE_DEPTH};

pub use template::TemplateSet;
pub use transport::{LogTransport, Mail, MailTransport};

/// One outbound mail task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub recipient: String,
    pub from: String,
    pub subject: String,
    pub template: String,
    pub data: Value,
    pub created_at: Ms,
}

impl Notification {
    pub fn new(
        recipient: impl Into<String>,
        from: impl Into<String>,
        subject: impl Into<String>,
        template: &str,
        data: Value,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            from: from.into(),
            subject: subject.into(),
            template: template.to_string(),
            data,
            created_at: now_ms(),
        }
    }
}

/// Where the reservation flow hands its notifications. Must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<(), BookingError>;
}

pub struct Dispatcher {
    tx: mpsc::Sender<Notification>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn the worker. Must run inside a tokio runtime.
    pub fn start(transport: Arc<dyn MailTransport>, templates: TemplateSet, config: &MailConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run_worker(
            rx,
            transport,
            templates,
            config.delivery_timeout,
            shutdown.clone(),
        ));
        tracing::info!("notification dispatcher started (queue {})", config.queue_capacity);
        Self {
            tx,
            shutdown,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a notification without waiting.
    pub fn enqueue(&self, notification: Notification) -> Result<(), BookingError> {
        if self.shutdown.is_cancelled() {
            return Err(BookingError::DispatcherClosed);
        }
        match self.tx.try_send(notification) {
            Ok(()) => {
                let depth = self.tx.max_capacity() - self.tx.capacity();
                metrics::gauge!(NOTIFICATION_QUEUE_DEPTH).set(depth as f64);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(n)) => {
                metrics::counter!(NOTIFICATIONS_TOTAL, "status" => "dropped").increment(1);
                tracing::warn!("notification queue full, dropping {} mail to {}", n.template, n.recipient);
                Err(BookingError::DispatcherFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BookingError::DispatcherClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Close the queue and let the worker deliver what is already queued.
    /// Returns false if `grace` ran out and the remainder was abandoned.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.shutdown.cancel();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut handle) = handle else {
            return true;
        };
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!("notification worker failed: {e}");
                false
            }
            Err(_) => {
                handle.abort();
                tracing::warn!("notification drain exceeded {grace:?}, abandoning queued mail");
                false
            }
        }
    }
}

impl Notifier for Dispatcher {
    fn notify(&self, notification: Notification) -> Result<(), BookingError> {
        self.enqueue(notification)
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Notification>,
    transport: Arc<dyn MailTransport>,
    templates: TemplateSet,
    delivery_timeout: Duration,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(notification) => {
                    metrics::gauge!(NOTIFICATION_QUEUE_DEPTH).set(rx.len() as f64);
                    deliver_logged(&*transport, &templates, delivery_timeout, notification).await;
                }
                None => return,
            },
        }
    }

    // Refuse new work, then flush what producers already queued.
    rx.close();
    let mut drained = 0usize;
    while let Some(notification) = rx.recv().await {
        deliver_logged(&*transport, &templates, delivery_timeout, notification).await;
        drained += 1;
    }
    metrics::gauge!(NOTIFICATION_QUEUE_DEPTH).set(0.0);
    tracing::info!("notification dispatcher stopped, drained {drained} queued mail");
}

async fn deliver_logged(
    transport: &dyn MailTransport,
    templates: &TemplateSet,
    delivery_timeout: Duration,
    notification: Notification,
) {
    match deliver_one(transport, templates, delivery_timeout, &notification).await {
        Ok(()) => {
            metrics::counter!(NOTIFICATIONS_TOTAL, "status" => "sent").increment(1);
            tracing::debug!("sent {} mail to {}", notification.template, notification.recipient);
        }
        Err(e) => {
            metrics::counter!(NOTIFICATIONS_TOTAL, "status" => "failed").increment(1);
            tracing::error!(
                "dropping {} mail to {} (queued at {}): {e}",
                notification.template,
                notification.recipient,
                notification.created_at
            );
        }
    }
}

async fn deliver_one(
    transport: &dyn MailTransport,
    templates: &TemplateSet,
    delivery_timeout: Duration,
    notification: &Notification,
) -> Result<(), DeliveryError> {
    let mail = Mail {
        to: notification.recipient.clone(),
        from: notification.from.clone(),
        subject: notification.subject.clone(),
        body: templates.render(&notification.template, &notification.data)?,
    };
    tokio::time::timeout(delivery_timeout, transport.deliver(&mail))
        .await
        .map_err(|_| DeliveryError::Timeout)?
}
