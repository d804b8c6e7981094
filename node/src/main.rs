use std::{
    env, io,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
};

use log::{debug, info, warn};
use machine_learning::{LinearRegression, optimization::GradientDescentWithMomentum};
use process_group::{GroupConfig, GroupState, ProcessGroup, TcpRendezvous};
use tokio::signal;
use worker::{
    TrainingConfig, Worker,
    data::{Shuffle, SyntheticSource, SyntheticSpec},
};

const DEFAULT_SEED: u64 = 42;
const DEFAULT_DATASET_LEN: usize = 60_000;
const DEFAULT_DATASET_DIM: usize = 8;
const DEFAULT_LEARNING_RATE: f32 = 0.1;
const DEFAULT_MOMENTUM: f32 = 0.9;

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let group_config = GroupConfig::from_env().map_err(io::Error::other)?;
    let rendezvous = TcpRendezvous::new(group_config.master_addr.clone());
    let mut group = ProcessGroup::new(group_config, rendezvous);

    let defaults = TrainingConfig::default();
    let seed = var_or("SEED", DEFAULT_SEED)?;
    let config = TrainingConfig {
        epochs: var_or::<NonZeroUsize>("EPOCHS", defaults.epochs)?,
        batch_size: var_or::<NonZeroUsize>("BATCH_SIZE", defaults.batch_size)?,
        shuffle: Shuffle::Seeded(seed),
        ..defaults
    };

    let spec = SyntheticSpec {
        len: var_or("DATASET_LEN", DEFAULT_DATASET_LEN)?,
        dim: var_or("DATASET_DIM", DEFAULT_DATASET_DIM)?,
        seed,
    };
    let dir = match env::var("DATA_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => env::temp_dir().join("synthetic-data"),
    };
    let source = SyntheticSource::new(dir, spec);

    let optimizer = GradientDescentWithMomentum::new(
        spec.dim + 1,
        var_or("LEARNING_RATE", DEFAULT_LEARNING_RATE)?,
        var_or("MOMENTUM", DEFAULT_MOMENTUM)?,
    );
    let model = LinearRegression::seeded(spec.dim, seed, optimizer);
    let worker = Worker::new(config, model, source);

    tokio::select! {
        ret = worker.run(&mut group) => {
            let trained = ret?;

            if group.is_designated() {
                info!(
                    steps = trained.metrics.steps,
                    compute_ms = trained.metrics.compute_time.as_millis() as u64,
                    sync_ms = trained.metrics.sync_time.as_millis() as u64;
                    "weights: {:?}, bias: {}",
                    trained.model.weights(),
                    trained.model.bias()
                );
            }
        }
        _ = signal::ctrl_c() => {
            info!("received SIGTERM");

            if group.state() == GroupState::Active {
                if let Err(e) = group.abort("interrupted").await {
                    debug!("abort after interrupt: {e}");
                }
            }

            if let Err(e) = group.destroy().await {
                warn!("destroy after interrupt: {e}");
            }
        }
    }

    Ok(())
}

/// Reads `var` from the environment, falling back to `default` when unset.
fn var_or<T: FromStr>(var: &str, default: T) -> io::Result<T> {
    match env::var(var) {
        Ok(value) => value.parse().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid value for {var}: {value}"),
            )
        }),
        Err(_) => Ok(default),
    }
}
