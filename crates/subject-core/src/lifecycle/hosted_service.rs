//! `HostedService`: a long-running capability started when its subject
//! attaches and stopped when it detaches, fed by a single-consumer action
//! queue so actions submitted concurrently are processed one at a time in
//! submission order.
//!
//! Grounded on the teacher's service-lifecycle convention
//! (`spark-core::status::ready::ReadyState` gates readiness; here a
//! [`HostedServiceHandler`] plays the same "don't let two lifecycle events
//! race on the same subject" role, scoped per subject id).

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::Context;
use crate::error::Result;
use crate::lifecycle::dispatch::{LifecycleEvent, LifecycleHandler};
use crate::observability::Field;
use crate::property::{subject_id, SubjectId};
use crate::subject::Subject;

/// A capability that runs for as long as its subject is attached. `start`
/// is awaited once per attach; `on_action` processes queued actions one at
/// a time; `stop` is awaited once per detach, after the action queue has
/// drained and been closed.
#[async_trait]
pub trait HostedService: Send + Sync + 'static {
    async fn start(&self, context: Context, subject: Arc<dyn Subject>) -> Result<()>;
    async fn on_action(&self, context: &Context, subject: &Arc<dyn Subject>, action: Box<dyn Any + Send>);
    async fn stop(&self, context: &Context, subject: &Arc<dyn Subject>);
}

struct RunningService {
    actions: mpsc::UnboundedSender<Box<dyn Any + Send>>,
    task: JoinHandle<()>,
}

/// Lifecycle handler that starts/stops a single [`HostedService`] instance
/// for every subject it attaches, keyed by subject identity.
pub struct HostedServiceHandler<S: HostedService> {
    service: Arc<S>,
    running: DashMap<SubjectId, RunningService>,
}

impl<S: HostedService> HostedServiceHandler<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self {
            service,
            running: DashMap::new(),
        }
    }

    /// Enqueues `action` for the hosted service instance backing `subject`,
    /// if one is currently running. Returns `false` if the subject has no
    /// running instance (not attached, or already stopped).
    pub fn submit(&self, subject: &Arc<dyn Subject>, action: Box<dyn Any + Send>) -> bool {
        match self.running.get(&subject_id(subject)) {
            Some(running) => running.actions.send(action).is_ok(),
            None => false,
        }
    }
}

impl<S: HostedService> LifecycleHandler for HostedServiceHandler<S> {
    fn handle(&self, context: &Context, subject: &Arc<dyn Subject>, event: LifecycleEvent) -> Result<()> {
        let id = subject_id(subject);
        match event {
            LifecycleEvent::Attached => {
                let (tx, mut rx) = mpsc::unbounded_channel::<Box<dyn Any + Send>>();
                let service = self.service.clone();
                let context = context.clone();
                let subject = subject.clone();
                let task = tokio::spawn(async move {
                    if let Err(err) = service.start(context.clone(), subject.clone()).await {
                        // spec.md §7: a hosted service's `start` failure is
                        // `LifecycleFailure` — logged, not propagated; the
                        // subject stays attached.
                        context.logger().error(
                            "hosted_service.start_failed",
                            &[
                                Field::new("subject", subject.type_name()),
                                Field::new("error", err.to_string()),
                            ],
                        );
                        return;
                    }
                    while let Some(action) = rx.recv().await {
                        service.on_action(&context, &subject, action).await;
                    }
                    service.stop(&context, &subject).await;
                });
                self.running.insert(id, RunningService { actions: tx, task });
            }
            LifecycleEvent::Detached => {
                if let Some((_, running)) = self.running.remove(&id) {
                    drop(running.actions);
                    // Detach doesn't block on the drain; the spawned task
                    // finishes it and calls `stop` asynchronously.
                    drop(running.task);
                }
            }
        }
        Ok(())
    }
}
