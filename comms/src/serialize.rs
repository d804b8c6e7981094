/// A type that can be written as the body of a frame.
pub trait Serialize<'a> {
    /// Writes the owned part of the body into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The buffer to extend, it already holds the frame's length prefix.
    ///
    /// # Returns
    /// An optional borrowed tail that will be written right after `buf` without copying.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
