use std::{io, sync::Arc, time::Instant};

use log::{debug, info, warn};
use machine_learning::{Batch, Forward, TrainableModel};
use process_group::{GroupErr, ProcessGroup, ReduceOp, Rendezvous};
use tokio::task;

use crate::{
    config::TrainingConfig,
    data::{DataLoader, Dataset, load_batch},
    error::{Result, WorkerErr},
    metrics::WorkerMetrics,
    schedule::LogSchedule,
};

/// What one rank computed for one batch, before the group reduces it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub loss: f32,
    pub samples: usize,
}

/// The gradient-synchronized training loop.
///
/// Every batch runs forward and backward locally, then the gradients, the
/// loss and the sample count are averaged across the group in a single
/// reduction before the update is applied. No rank starts batch `i + 1`
/// before every rank finished reducing batch `i`, so the replicas only
/// diverge by floating point noise.
///
/// Compute is CPU-bound and runs on tokio's blocking pool. The model and the
/// buffers are moved in and out of the blocking task instead of cloned.
pub struct Trainer<M> {
    config: TrainingConfig,
    model: M,
}

impl<M> Trainer<M>
where
    M: TrainableModel + 'static,
{
    pub fn new(config: TrainingConfig, model: M) -> Self {
        Self { config, model }
    }

    /// Trains for `config.epochs` epochs over this rank's shards of `dataset`.
    ///
    /// The parameters are broadcast from rank 0 first so every replica starts
    /// from the same point.
    ///
    /// # Returns
    /// The trained model and this rank's metrics.
    ///
    /// # Errors
    /// A failed local step aborts the group before returning. A reduction
    /// that times out fails with `WorkerErr::StepTimeout`.
    pub async fn run<Z, D>(
        self,
        group: &mut ProcessGroup<Z>,
        dataset: Arc<D>,
    ) -> Result<(M, WorkerMetrics)>
    where
        Z: Rendezvous,
        D: Dataset + 'static,
    {
        let Self { config, mut model } = self;

        let rank = group.rank();
        let world_size = group.world_size();
        let designated = group.is_designated();
        let num_params = model.num_params();

        group.broadcast(model.params_mut(), 0).await?;

        let plan = config.shard_plan();
        let schedule = LogSchedule::new(config.log_interval);
        let mut metrics = WorkerMetrics::default();

        let mut batch = Batch::with_capacity(dataset.dim(), config.batch_size.get());
        let mut grads = vec![0.0; num_params];
        let mut payload = Vec::with_capacity(num_params + 2);

        for epoch in 1..=config.epochs.get() {
            let shard = plan.shard(dataset.len(), world_size, rank, epoch)?;
            let mut loader = DataLoader::new(shard, config.batch_size);
            let total = loader.len() * world_size;
            let mut processed = 0;

            debug!(
                rank = rank,
                epoch = epoch;
                "starting epoch over {} samples in {} batches",
                loader.len(),
                loader.num_batches()
            );

            let mut step = 0;
            while let Some(range) = loader.next_batch() {
                let started = Instant::now();
                let indices = loader.indices().clone();
                let data = dataset.clone();

                let (m, b, g, res) = task::spawn_blocking(move || {
                    let res = local_step(&mut model, &*data, &indices[range], &mut batch, &mut grads);
                    (model, batch, grads, res)
                })
                .await
                .map_err(io::Error::other)?;

                model = m;
                batch = b;
                grads = g;
                metrics.compute_time += started.elapsed();

                let outcome = match res {
                    Ok(outcome) => outcome,
                    Err(e) => return Err(fail_step(group, epoch, step, e).await),
                };

                payload.clear();
                payload.extend_from_slice(&grads);
                payload.push(outcome.loss);
                payload.push(outcome.samples as f32);

                let synced = Instant::now();
                group
                    .all_reduce(&mut payload, ReduceOp::Avg)
                    .await
                    .map_err(|e| step_err(e, epoch, step))?;
                metrics.sync_time += synced.elapsed();

                let (avg_grads, stats) = payload.split_at(num_params);
                let loss = stats[0];
                processed += (stats[1] * world_size as f32).round() as usize;

                if let Err(e) = model.apply_update(avg_grads) {
                    return Err(fail_step(group, epoch, step, e.into()).await);
                }

                metrics.bump_step();
                metrics.add_samples(outcome.samples);
                metrics.last_loss = Some(loss);

                if designated && schedule.should_log(step) {
                    let pct = 100.0 * processed as f64 / total as f64;
                    info!(
                        epoch = epoch,
                        step = step;
                        "Train Epoch: {epoch} [{processed}/{total} ({pct:.0}%)]\tLoss: {loss:.6}"
                    );
                }

                step += 1;
            }

            metrics.bump_epoch();
        }

        Ok((model, metrics))
    }
}

/// Loads the batch and runs the local forward and backward passes.
fn local_step<M, D>(
    model: &mut M,
    dataset: &D,
    indices: &[usize],
    batch: &mut Batch,
    grads: &mut [f32],
) -> Result<StepOutcome>
where
    M: TrainableModel,
    D: Dataset + ?Sized,
{
    load_batch(dataset, indices, batch)?;

    let Forward { loss, .. } = model.forward(batch.as_ref())?;
    model.backward(loss, grads)?;

    Ok(StepOutcome {
        loss,
        samples: batch.len(),
    })
}

fn step_err(e: GroupErr, epoch: usize, step: usize) -> WorkerErr {
    match e {
        GroupErr::Timeout { .. } => WorkerErr::StepTimeout {
            epoch,
            step,
            source: e,
        },
        other => WorkerErr::Group(other),
    }
}

/// Makes a local failure visible to the group and returns it.
async fn fail_step<Z: Rendezvous>(
    group: &mut ProcessGroup<Z>,
    epoch: usize,
    step: usize,
    e: WorkerErr,
) -> WorkerErr {
    warn!(rank = group.rank(), epoch = epoch, step = step; "local step failed: {e}");

    if let Err(abort_err) = group.abort(&e.to_string()).await {
        debug!("abort after failed step: {abort_err}");
    }

    e
}
