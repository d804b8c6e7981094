use std::fmt;

use serde::{Deserialize, Serialize};

/// How the per-rank values of a reduction are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceOp {
    Sum,
    /// Sum divided by the world size.
    Avg,
    Max,
    Min,
}

impl ReduceOp {
    fn code(self) -> u32 {
        match self {
            Self::Sum => 0,
            Self::Avg => 1,
            Self::Max => 2,
            Self::Min => 3,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        let op = match code {
            0 => Self::Sum,
            1 => Self::Avg,
            2 => Self::Max,
            3 => Self::Min,
            _ => return None,
        };

        Some(op)
    }

    /// Folds `other` into `acc` element-wise.
    ///
    /// `Avg` accumulates as a sum, the division happens once in `finish`.
    pub fn combine(self, acc: &mut [f32], other: &[f32]) {
        let f: fn(f32, f32) -> f32 = match self {
            Self::Sum | Self::Avg => |a: f32, b: f32| a + b,
            Self::Max => f32::max,
            Self::Min => f32::min,
        };

        for (a, b) in acc.iter_mut().zip(other) {
            *a = f(*a, *b);
        }
    }

    /// Applies the final step of the reduction once every contribution was combined.
    pub fn finish(self, acc: &mut [f32], world_size: usize) {
        if let Self::Avg = self {
            let n = world_size as f32;
            acc.iter_mut().for_each(|a| *a /= n);
        }
    }
}

/// The kind of collective a frame belongs to.
///
/// Every rank must issue the same kind for the same sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectiveOp {
    Barrier,
    Reduce(ReduceOp),
    Broadcast { src: usize },
}

impl CollectiveOp {
    /// Encodes the op as a `(tag, argument)` pair for the frame header.
    pub(crate) fn encode(self) -> (u32, u32) {
        match self {
            Self::Barrier => (0, 0),
            Self::Reduce(op) => (1, op.code()),
            Self::Broadcast { src } => (2, src as u32),
        }
    }

    pub(crate) fn decode(tag: u32, arg: u32) -> Option<Self> {
        let op = match tag {
            0 => Self::Barrier,
            1 => Self::Reduce(ReduceOp::from_code(arg)?),
            2 => Self::Broadcast { src: arg as usize },
            _ => return None,
        };

        Some(op)
    }
}

impl fmt::Display for CollectiveOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Barrier => f.write_str("barrier"),
            Self::Reduce(op) => write!(f, "reduce({op:?})"),
            Self::Broadcast { src } => write!(f, "broadcast(src={src})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_divides_once_after_combining() {
        let mut acc = vec![1.0, 2.0];
        ReduceOp::Avg.combine(&mut acc, &[3.0, 4.0]);
        ReduceOp::Avg.combine(&mut acc, &[5.0, 6.0]);
        ReduceOp::Avg.finish(&mut acc, 3);
        assert_eq!(acc, vec![3.0, 4.0]);
    }

    #[test]
    fn max_and_min_are_elementwise() {
        let mut hi = vec![1.0, 9.0];
        ReduceOp::Max.combine(&mut hi, &[4.0, -1.0]);
        assert_eq!(hi, vec![4.0, 9.0]);

        let mut lo = vec![1.0, 9.0];
        ReduceOp::Min.combine(&mut lo, &[4.0, -1.0]);
        assert_eq!(lo, vec![1.0, -1.0]);
    }

    #[test]
    fn op_codes_are_stable() {
        for op in [
            CollectiveOp::Barrier,
            CollectiveOp::Reduce(ReduceOp::Min),
            CollectiveOp::Broadcast { src: 3 },
        ] {
            let (tag, arg) = op.encode();
            assert_eq!(CollectiveOp::decode(tag, arg), Some(op));
        }

        assert_eq!(CollectiveOp::decode(7, 0), None);
        assert_eq!(CollectiveOp::decode(1, 9), None);
    }
}
