use std::{borrow::Cow, io};

use crate::{
    Deserialize, Serialize,
    specs::{
        collective::CollectiveOp,
        group::{AbortCause, JoinSpec},
    },
};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_KIND: Header = 0;
const CONTROL_KIND: Header = 1;
const DATA_KIND: Header = 2;

/// `seq: u64` followed by the op's `tag: u32` and `arg: u32`.
const FRAME_META_SIZE: usize = size_of::<u64>() + 2 * size_of::<u32>();

/// One rank's share of a collective, or the hub's answer to it.
///
/// Going up (peer to hub) `values` is the rank's contribution; going down it is
/// the group-consistent result. A barrier carries no values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame<'a> {
    pub seq: u64,
    pub op: CollectiveOp,
    pub values: &'a [f32],
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Join(JoinSpec),
    Welcome { world_size: usize },
    Reject { reason: String },
    Abort {
        rank: usize,
        #[serde(default)]
        cause: AbortCause,
        reason: String,
    },
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Frame<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short name of the message kind, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Join(_)) => "control/join",
            Msg::Control(Command::Welcome { .. }) => "control/welcome",
            Msg::Control(Command::Reject { .. }) => "control/reject",
            Msg::Control(Command::Abort { .. }) => "control/abort",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(_) => "data/frame",
            Msg::Err(_) => "err",
        }
    }

    fn invalid<T>(text: String) -> io::Result<T> {
        Err(io::Error::new(io::ErrorKind::InvalidData, text))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_KIND.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_KIND.to_be_bytes());

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, cmd).unwrap();
                None
            }
            Msg::Data(Frame { seq, op, values }) => {
                let (tag, arg) = op.encode();

                buf.extend_from_slice(&DATA_KIND.to_be_bytes());
                buf.extend_from_slice(&seq.to_be_bytes());
                buf.extend_from_slice(&tag.to_be_bytes());
                buf.extend_from_slice(&arg.to_be_bytes());
                Some(bytemuck::cast_slice(values))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::invalid(format!(
                "The given buffer is too small {}, must at least be {HEADER_SIZE} bytes",
                buf.len()
            ));
        }

        let (kind_buf, rest) = buf.split_at_mut(HEADER_SIZE);
        let kind = Header::from_be_bytes([kind_buf[0], kind_buf[1], kind_buf[2], kind_buf[3]]);

        match kind {
            ERR_KIND => {
                let string = str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL_KIND => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            DATA_KIND => {
                if rest.len() < FRAME_META_SIZE {
                    return Self::invalid(format!(
                        "Data frame of {} bytes is shorter than its {FRAME_META_SIZE} bytes header",
                        rest.len()
                    ));
                }

                let rest: &'a [u8] = rest;
                let (meta, nums) = rest.split_at(FRAME_META_SIZE);
                let mut seq = [0; 8];
                seq.copy_from_slice(&meta[..8]);
                let tag = u32::from_be_bytes([meta[8], meta[9], meta[10], meta[11]]);
                let arg = u32::from_be_bytes([meta[12], meta[13], meta[14], meta[15]]);

                let Some(op) = CollectiveOp::decode(tag, arg) else {
                    return Self::invalid(format!("Received an invalid collective op {tag}/{arg}"));
                };

                let values = bytemuck::try_cast_slice(nums).map_err(|e| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("bad frame values: {e}"))
                })?;

                Ok(Self::Data(Frame {
                    seq: u64::from_be_bytes(seq),
                    op,
                    values,
                }))
            }
            byte => Self::invalid(format!("Received an invalid kind byte {byte}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specs::collective::ReduceOp;

    fn body(msg: &Msg<'_>) -> Vec<u32> {
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf);
        buf.extend_from_slice(tail.unwrap_or_default());

        // Copy into a 4-aligned buffer, as the receiver does.
        let mut aligned = vec![0u32; buf.len().div_ceil(4)];
        bytemuck::cast_slice_mut::<u32, u8>(&mut aligned)[..buf.len()].copy_from_slice(&buf);
        assert_eq!(buf.len() % 4, 0, "test frames are word sized");
        aligned
    }

    #[test]
    fn data_frame_keeps_seq_op_and_values() {
        let values = [1.5_f32, -2.0, 3.25];
        let msg = Msg::Data(Frame {
            seq: 41,
            op: CollectiveOp::Reduce(ReduceOp::Avg),
            values: &values,
        });

        let mut words = body(&msg);
        let bytes = bytemuck::cast_slice_mut(&mut words);

        match Msg::deserialize(bytes).unwrap() {
            Msg::Data(frame) => {
                assert_eq!(frame.seq, 41);
                assert_eq!(frame.op, CollectiveOp::Reduce(ReduceOp::Avg));
                assert_eq!(frame.values, &values);
            }
            other => panic!("unexpected msg: {other:?}"),
        }
    }

    #[test]
    fn barrier_frame_has_no_values() {
        let msg = Msg::Data(Frame {
            seq: 0,
            op: CollectiveOp::Barrier,
            values: &[],
        });

        let mut words = body(&msg);
        let bytes = bytemuck::cast_slice_mut(&mut words);
        let Msg::Data(frame) = Msg::deserialize(bytes).unwrap() else {
            panic!("expected a data frame");
        };

        assert!(frame.values.is_empty());
    }

    #[test]
    fn short_data_frame_is_rejected() {
        let mut buf = DATA_KIND.to_be_bytes().to_vec();
        buf.extend_from_slice(&[0; 4]);
        let err = Msg::deserialize(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut buf = 9u32.to_be_bytes().to_vec();
        assert!(Msg::deserialize(&mut buf).is_err());
    }
}
