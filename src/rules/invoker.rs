//! Serialized rule invoker: one global FIFO queue of evaluation tasks.
//!
//! Every rule-batch evaluation, whatever triggered it, goes through this
//! queue and runs strictly one at a time to completion. Rule actions read
//! proposal and ledger state to decide quantities; two concurrent batches
//! for the same asset could both see "no existing proposal" and
//! double-propose. Serializing globally trades throughput for that
//! invariant. A failing task is logged and the queue moves on; tasks are
//! never cancelled or reordered.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::{EvalContext, EvalError, RuleEngine};

struct Task {
    label: String,
    fut: BoxFuture<'static, Result<(), EvalError>>,
}

/// Handle for enqueueing evaluation tasks. Cheap to clone.
#[derive(Clone)]
pub struct RuleInvoker {
    tx: mpsc::UnboundedSender<Task>,
}

impl RuleInvoker {
    /// Start the single worker and return the enqueue handle.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let worker = tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                debug!(task = %task.label, "running rule task");
                if let Err(e) = task.fut.await {
                    error!(task = %task.label, "rule task failed: {}", e);
                }
            }
        });
        (Self { tx }, worker)
    }

    /// Append a task to the queue. Arrival order is execution order.
    pub fn enqueue<F>(&self, label: impl Into<String>, fut: F)
    where
        F: std::future::Future<Output = Result<(), EvalError>> + Send + 'static,
    {
        let task = Task {
            label: label.into(),
            fut: fut.boxed(),
        };
        // Send fails only when the worker is gone, i.e. during shutdown.
        if self.tx.send(task).is_err() {
            error!("rule invoker worker is gone, dropping task");
        }
    }

    pub fn enqueue_buy(&self, engine: Arc<RuleEngine>, ctx: EvalContext) {
        let label = format!("buy-rules:{}:{}", ctx.trigger, ctx.asset);
        self.enqueue(label, async move { engine.evaluate_buy(ctx).await });
    }

    pub fn enqueue_sell(&self, engine: Arc<RuleEngine>, ctx: EvalContext) {
        let label = format!("sell-rules:{}:{}", ctx.trigger, ctx.asset);
        self.enqueue(label, async move { engine.evaluate_sell(ctx).await });
    }

    /// Wait until every task enqueued before this call has completed.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.enqueue("flush", async move {
            let _ = done_tx.send(());
            Ok(())
        });
        let _ = done_rx.await;
    }
}
