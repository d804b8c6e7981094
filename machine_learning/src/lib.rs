pub mod dataset;
pub mod error;
pub mod linear;
pub mod model;
pub mod optimization;

pub use dataset::{Batch, BatchRef};
pub use error::{MlErr, Result};
pub use linear::LinearRegression;
pub use model::{Forward, TrainableModel};
