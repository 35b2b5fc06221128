use std::future::Future;
use std::ops::ControlFlow;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Run `job` over `items` with at most `width` tasks in flight, feeding each
/// result to `on_result` in completion order.
///
/// When `on_result` breaks, `cancel` is triggered: queued items are never
/// started, in-flight tasks are dropped at their next await point and their
/// results are discarded. Returns once every spawned task has finished, and
/// reports whether the run was cut short.
pub(crate) async fn fan_out<I, F, Fut, T, R>(
    items: I,
    width: usize,
    cancel: &CancellationToken,
    mut job: F,
    mut on_result: R,
) -> bool
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
    R: FnMut(T) -> ControlFlow<()>,
{
    let width = width.max(1);
    let mut items = items.into_iter();
    let mut tasks = JoinSet::new();
    let mut stopped = cancel.is_cancelled();
    loop {
        while !stopped && tasks.len() < width {
            let Some(item) = items.next() else { break };
            let token = cancel.clone();
            let fut = job(item);
            tasks.spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => None,
                    out = fut => Some(out),
                }
            });
        }
        let Some(joined) = tasks.join_next().await else { break };
        match joined {
            Ok(Some(out)) if !stopped => {
                if on_result(out).is_break() {
                    stopped = true;
                    cancel.cancel();
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "worker task failed"),
        }
    }
    stopped
}
