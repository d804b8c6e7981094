use rand::{SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;

use crate::error::ShardingErr;

/// How the sample order is permuted before splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shuffle {
    /// Keep `[0, len)` in order.
    DontShuffle,
    /// Fisher-Yates with a generator seeded from `base_seed + epoch`.
    Seeded(u64),
}

/// What to do when the dataset does not split evenly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Remainder {
    /// Repeat leading samples until every rank gets `ceil(len / world_size)`.
    #[default]
    Pad,
    /// Drop the tail, every rank gets `floor(len / world_size)`.
    Truncate,
}

/// Which slice of the (padded) permutation each rank takes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShardLayout {
    /// Rank `r` takes positions `r, r + world_size, r + 2 * world_size, ...`.
    #[default]
    Strided,
    /// Rank `r` takes the `r`-th run of `per_rank` consecutive positions.
    Contiguous,
}

/// A rank's samples for one epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub rank: usize,
    pub epoch: usize,
    pub indices: Vec<usize>,
}

impl Shard {
    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Everything that decides how a dataset is split, besides who asks and when.
///
/// Computing a shard is a pure function of the plan, the dataset length, the
/// rank, the world size and the epoch. Every rank derives its own shard
/// without talking to the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardPlan {
    pub shuffle: Shuffle,
    pub remainder: Remainder,
    pub layout: ShardLayout,
}

impl Default for ShardPlan {
    fn default() -> Self {
        Self {
            shuffle: Shuffle::Seeded(0),
            remainder: Remainder::default(),
            layout: ShardLayout::default(),
        }
    }
}

impl ShardPlan {
    /// Computes the shard of `rank` for `epoch`.
    ///
    /// # Arguments
    /// * `len` - The amount of samples in the dataset.
    /// * `world_size` - The amount of ranks sharing it.
    /// * `rank` - Who asks.
    /// * `epoch` - Reseeds the shuffle.
    ///
    /// # Errors
    /// `ShardingErr` if the world is empty, the rank is out of range, the
    /// dataset is empty or truncation leaves nothing for a rank.
    pub fn shard(
        &self,
        len: usize,
        world_size: usize,
        rank: usize,
        epoch: usize,
    ) -> Result<Shard, ShardingErr> {
        if world_size == 0 {
            return Err(ShardingErr::EmptyWorld);
        }

        if rank >= world_size {
            return Err(ShardingErr::RankOutOfRange { rank, world_size });
        }

        if len == 0 {
            return Err(ShardingErr::EmptyDataset);
        }

        let per_rank = match self.remainder {
            Remainder::Pad => len.div_ceil(world_size),
            Remainder::Truncate => len / world_size,
        };

        if per_rank == 0 {
            return Err(ShardingErr::EmptyShard { len, world_size });
        }

        let perm = permutation(len, self.shuffle, epoch);

        // Padding wraps around as many times as needed, `len < world_size` included.
        let total = per_rank * world_size;
        let mut positions = perm.iter().copied().cycle().take(total);

        let indices = match self.layout {
            ShardLayout::Strided => positions.skip(rank).step_by(world_size).collect(),
            ShardLayout::Contiguous => {
                if rank > 0 {
                    positions.nth(rank * per_rank - 1);
                }

                positions.take(per_rank).collect()
            }
        };

        Ok(Shard {
            rank,
            epoch,
            indices,
        })
    }
}

/// The epoch's order of `[0, len)`.
pub fn permutation(len: usize, shuffle: Shuffle, epoch: usize) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..len).collect();

    if let Shuffle::Seeded(base_seed) = shuffle {
        let mut rng = ChaCha8Rng::seed_from_u64(base_seed.wrapping_add(epoch as u64));
        perm.shuffle(&mut rng);
    }

    perm
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(shuffle: Shuffle, remainder: Remainder, layout: ShardLayout) -> ShardPlan {
        ShardPlan {
            shuffle,
            remainder,
            layout,
        }
    }

    fn all_shards(plan: ShardPlan, len: usize, world_size: usize, epoch: usize) -> Vec<Shard> {
        (0..world_size)
            .map(|rank| plan.shard(len, world_size, rank, epoch).unwrap())
            .collect()
    }

    #[test]
    fn padded_shards_cover_every_sample() {
        for layout in [ShardLayout::Strided, ShardLayout::Contiguous] {
            let plan = plan(Shuffle::Seeded(3), Remainder::Pad, layout);

            for len in 1..40 {
                for world_size in 1..9 {
                    let shards = all_shards(plan, len, world_size, 1);
                    let per_rank = len.div_ceil(world_size);
                    let mut counts = vec![0usize; len];

                    for shard in &shards {
                        assert_eq!(shard.len(), per_rank, "len {len} world {world_size}");
                        shard.indices.iter().for_each(|&i| counts[i] += 1);
                    }

                    // Every sample is seen, padding only adds whole wraps plus a prefix.
                    let padding = per_rank * world_size - len;
                    let min = counts.iter().min().copied().unwrap();
                    let max = counts.iter().max().copied().unwrap();
                    assert!(min >= 1, "len {len} world {world_size}");
                    assert!(max <= 1 + padding.div_ceil(len), "len {len} world {world_size}");
                    assert_eq!(counts.iter().sum::<usize>(), len + padding);
                }
            }
        }
    }

    #[test]
    fn even_split_is_a_partition() {
        let plan = plan(Shuffle::Seeded(11), Remainder::Pad, ShardLayout::Strided);
        let mut seen: Vec<usize> = all_shards(plan, 12, 4, 2)
            .into_iter()
            .flat_map(|s| s.indices)
            .collect();

        seen.sort_unstable();
        assert_eq!(seen, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn truncated_shards_never_repeat() {
        let plan = plan(Shuffle::Seeded(5), Remainder::Truncate, ShardLayout::Contiguous);
        let shards = all_shards(plan, 10, 3, 1);

        let mut seen: Vec<usize> = shards.iter().flat_map(|s| s.indices.clone()).collect();
        assert!(shards.iter().all(|s| s.len() == 3));

        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 9);
    }

    #[test]
    fn shards_are_pure() {
        let plan = ShardPlan::default();
        assert_eq!(plan.shard(97, 4, 2, 3), plan.shard(97, 4, 2, 3));
    }

    #[test]
    fn epochs_reshuffle() {
        let plan = ShardPlan::default();
        let first = plan.shard(100, 2, 0, 1).unwrap();
        let second = plan.shard(100, 2, 0, 2).unwrap();
        assert_ne!(first.indices, second.indices);

        assert_eq!(
            permutation(10, Shuffle::DontShuffle, 7),
            (0..10).collect::<Vec<_>>()
        );
    }

    #[test]
    fn contiguous_identity_split() {
        let plan = plan(Shuffle::DontShuffle, Remainder::Pad, ShardLayout::Contiguous);
        let shards = all_shards(plan, 10, 2, 1);

        assert_eq!(shards[0].indices, (0..5).collect::<Vec<_>>());
        assert_eq!(shards[1].indices, (5..10).collect::<Vec<_>>());
    }

    #[test]
    fn padding_repeats_leading_samples() {
        let plan = plan(Shuffle::DontShuffle, Remainder::Pad, ShardLayout::Strided);
        let shards = all_shards(plan, 5, 3, 1);

        assert_eq!(shards[0].indices, vec![0, 3]);
        assert_eq!(shards[1].indices, vec![1, 4]);
        assert_eq!(shards[2].indices, vec![2, 0]);

        // Fewer samples than ranks wraps more than once.
        let shards = all_shards(plan, 2, 5, 1);
        let flat: Vec<usize> = shards.into_iter().flat_map(|s| s.indices).collect();
        assert_eq!(flat, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn invalid_requests() {
        let plan = ShardPlan::default();

        assert_eq!(plan.shard(10, 0, 0, 1), Err(ShardingErr::EmptyWorld));
        assert_eq!(
            plan.shard(10, 2, 2, 1),
            Err(ShardingErr::RankOutOfRange {
                rank: 2,
                world_size: 2
            })
        );
        assert_eq!(plan.shard(0, 2, 0, 1), Err(ShardingErr::EmptyDataset));

        let truncate = ShardPlan {
            remainder: Remainder::Truncate,
            ..plan
        };
        assert_eq!(
            truncate.shard(2, 3, 0, 1),
            Err(ShardingErr::EmptyShard {
                len: 2,
                world_size: 3
            })
        );
    }
}
