/// Plain numeric types a receive buffer may be made of.
pub trait Align1: bytemuck::Pod {}

/// Buffer element types whose alignment is at least 4 bytes, so a frame body
/// read into them can be reinterpreted as `f32`s after the frame header.
pub trait Align4: Align1 {}

macro_rules! impl_align {
    ($tr:ident: $($ty:ty),+) => {
        $(impl $tr for $ty {})+
    };
}

impl_align!(Align1: u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);
impl_align!(Align4: u32, i32, u64, i64, f32, f64);
