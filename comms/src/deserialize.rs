use std::io;

/// A type that can be read back from the body of a frame.
pub trait Deserialize<'a>: Sized {
    /// Parses `buf`, the returned value may borrow from it.
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self>;
}
