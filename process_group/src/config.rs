use std::{env, num::NonZeroUsize, str::FromStr, time::Duration};

use crate::error::ConfigErr;

const RANK: &str = "RANK";
const LOCAL_RANK: &str = "LOCAL_RANK";
const WORLD_SIZE: &str = "WORLD_SIZE";
const MASTER_ADDR: &str = "MASTER_ADDR";
const MASTER_PORT: &str = "MASTER_PORT";
const GROUP_TIMEOUT_SECS: &str = "GROUP_TIMEOUT_SECS";

/// Bound applied to bootstrap and to every collective when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// The identity of this process inside the group and where to meet the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupConfig {
    pub rank: usize,
    pub local_rank: usize,
    pub world_size: NonZeroUsize,
    /// `host:port` of rank 0.
    pub master_addr: String,
    pub timeout: Duration,
}

impl GroupConfig {
    /// Creates a new group configuration.
    ///
    /// # Args
    /// * `rank` - This process' rank, in `[0, world_size)`.
    /// * `local_rank` - Index of this process' device on its machine.
    /// * `world_size` - The amount of ranks in the group.
    /// * `master_addr` - The `host:port` rank 0 listens on.
    ///
    /// # Errors
    /// `ConfigErr::RankOutOfRange` if `rank >= world_size`.
    pub fn new(
        rank: usize,
        local_rank: usize,
        world_size: NonZeroUsize,
        master_addr: impl Into<String>,
    ) -> Result<Self, ConfigErr> {
        if rank >= world_size.get() {
            return Err(ConfigErr::RankOutOfRange {
                rank,
                world_size: world_size.get(),
            });
        }

        Ok(Self {
            rank,
            local_rank,
            world_size,
            master_addr: master_addr.into(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Overrides the bootstrap and collective timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reads the configuration from the launcher-provided environment
    /// (`RANK`, `LOCAL_RANK`, `WORLD_SIZE`, `MASTER_ADDR`, `MASTER_PORT` and
    /// the optional `GROUP_TIMEOUT_SECS`).
    pub fn from_env() -> Result<Self, ConfigErr> {
        Self::from_vars(|var| env::var(var).ok())
    }

    /// Same as `from_env` but reading variables through `lookup`.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigErr>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rank = parse(&lookup, RANK)?;
        let local_rank = parse(&lookup, LOCAL_RANK)?;
        let world_size = parse(&lookup, WORLD_SIZE)?;
        let host = lookup(MASTER_ADDR).ok_or(ConfigErr::Missing(MASTER_ADDR))?;
        let port: u16 = parse(&lookup, MASTER_PORT)?;

        let config = Self::new(rank, local_rank, world_size, format!("{host}:{port}"))?;

        match lookup(GROUP_TIMEOUT_SECS) {
            Some(value) => {
                let secs = value.parse().map_err(|_| ConfigErr::Invalid {
                    var: GROUP_TIMEOUT_SECS,
                    value,
                })?;

                Ok(config.with_timeout(Duration::from_secs(secs)))
            }
            None => Ok(config),
        }
    }

    /// Whether this rank is the group's designated one.
    #[inline]
    pub fn is_designated(&self) -> bool {
        self.rank == 0
    }
}

fn parse<F, T>(lookup: &F, var: &'static str) -> Result<T, ConfigErr>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let value = lookup(var).ok_or(ConfigErr::Missing(var))?;
    value.trim().parse().map_err(|_| ConfigErr::Invalid { var, value })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |var| map.get(var).cloned()
    }

    #[test]
    fn reads_launcher_variables() {
        let lookup = vars(&[
            ("RANK", "1"),
            ("LOCAL_RANK", "0"),
            ("WORLD_SIZE", "2"),
            ("MASTER_ADDR", "localhost"),
            ("MASTER_PORT", "1234"),
            ("GROUP_TIMEOUT_SECS", "5"),
        ]);

        let config = GroupConfig::from_vars(lookup).unwrap();
        assert_eq!(config.rank, 1);
        assert_eq!(config.local_rank, 0);
        assert_eq!(config.world_size.get(), 2);
        assert_eq!(config.master_addr, "localhost:1234");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(!config.is_designated());
    }

    #[test]
    fn missing_variable_is_named() {
        let lookup = vars(&[("RANK", "0"), ("WORLD_SIZE", "1")]);
        let err = GroupConfig::from_vars(lookup).unwrap_err();
        assert!(matches!(err, ConfigErr::Missing("LOCAL_RANK")));
    }

    #[test]
    fn zero_world_size_is_invalid() {
        let lookup = vars(&[
            ("RANK", "0"),
            ("LOCAL_RANK", "0"),
            ("WORLD_SIZE", "0"),
            ("MASTER_ADDR", "localhost"),
            ("MASTER_PORT", "1234"),
        ]);

        let err = GroupConfig::from_vars(lookup).unwrap_err();
        assert!(matches!(err, ConfigErr::Invalid { var: "WORLD_SIZE", .. }));
    }

    #[test]
    fn rank_must_fit_world_size() {
        let err = GroupConfig::new(2, 0, NonZeroUsize::new(2).unwrap(), "h:1").unwrap_err();
        assert!(matches!(
            err,
            ConfigErr::RankOutOfRange {
                rank: 2,
                world_size: 2
            }
        ));
    }
}
