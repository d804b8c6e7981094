use std::sync::Arc;

use log::{debug, info, warn};
use machine_learning::TrainableModel;
use process_group::{GroupState, ProcessGroup, Rendezvous};

use crate::{
    config::TrainingConfig,
    data::DataSource,
    error::Result,
    gate,
    metrics::WorkerMetrics,
    trainer::Trainer,
};

/// The outcome of a successful run.
#[derive(Debug)]
pub struct Trained<M> {
    pub model: M,
    pub metrics: WorkerMetrics,
}

/// One rank of a data-parallel training run, from bootstrap to teardown.
pub struct Worker<M, S> {
    config: TrainingConfig,
    model: M,
    source: Arc<S>,
}

impl<M, S> Worker<M, S>
where
    M: TrainableModel + 'static,
    S: DataSource,
{
    /// Creates a new `Worker`.
    ///
    /// # Args
    /// * `config` - The run's settings, the same on every rank.
    /// * `model` - This rank's replica.
    /// * `source` - Where the dataset is acquired from.
    pub fn new(config: TrainingConfig, model: M, source: S) -> Self {
        Self {
            config,
            model,
            source: Arc::new(source),
        }
    }

    /// Joins the group, trains and leaves the group.
    ///
    /// The group is torn down on every path. If the run fails while the group
    /// is still healthy the other ranks are told first, so none of them waits
    /// for a collective this rank will never issue.
    ///
    /// # Errors
    /// Whatever failed first: bootstrap, acquisition, sharding, a local step,
    /// a timed out step or the final teardown.
    pub async fn run<Z: Rendezvous>(self, group: &mut ProcessGroup<Z>) -> Result<Trained<M>> {
        group.init().await?;

        info!(
            "Distributed Training for WORLD_SIZE: {}, RANK: {}, LOCAL_RANK: {}",
            group.world_size(),
            group.rank(),
            group.local_rank()
        );

        match self.train(group).await {
            Ok(trained) => {
                group.destroy().await?;
                Ok(trained)
            }
            Err(e) => {
                teardown(group, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn train<Z: Rendezvous>(self, group: &mut ProcessGroup<Z>) -> Result<Trained<M>> {
        let Self {
            config,
            model,
            source,
        } = self;

        let dataset = gate::open_dataset(group, &source, config.gate).await?;
        let trainer = Trainer::new(config, model);
        let (model, metrics) = trainer.run(group, Arc::new(dataset)).await?;

        // Wait for the distributed training to complete.
        group.barrier().await?;

        if group.is_designated() {
            info!(steps = metrics.steps; "Training is finished");
        }

        Ok(Trained { model, metrics })
    }
}

/// Best effort cleanup after a failed run.
async fn teardown<Z: Rendezvous>(group: &mut ProcessGroup<Z>, reason: &str) {
    if group.state() == GroupState::Active {
        warn!(rank = group.rank(); "aborting the group: {reason}");

        if let Err(e) = group.abort(reason).await {
            debug!("abort during teardown: {e}");
        }
    }

    if let Err(e) = group.destroy().await {
        debug!("destroy during teardown: {e}");
    }
}
