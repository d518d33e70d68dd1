//! Bounded per-node fan-out

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::errors::DeployError;

/// Run `job` for every item with at most `workers` in flight.
///
/// Every item gets exactly one result, in input order, whatever the order of
/// completion. A failing item never cancels the others.
pub async fn fan_out<T, R, F, Fut>(items: Vec<T>, workers: usize, job: F) -> Vec<Result<R, DeployError>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, DeployError>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let job = Arc::new(job);

    let handles: Vec<_> = items
        .into_iter()
        .map(|item| {
            let sem = Arc::clone(&semaphore);
            let job = Arc::clone(&job);
            tokio::spawn(async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|e| DeployError::Internal(format!("worker pool closed: {}", e)))?;
                job(item).await
            })
        })
        .collect();

    futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.map_err(DeployError::from).and_then(|result| result))
        .collect()
}
