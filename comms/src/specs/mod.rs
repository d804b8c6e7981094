pub mod collective;
pub mod group;
