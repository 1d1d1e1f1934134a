mod data_parallel;
pub mod init;
pub mod layers;
pub mod loss;
mod model;
mod sequential;

pub use data_parallel::DataParallel;
pub use model::{Loss, Model, ModelOutput, RawModel, StateDict};
pub use sequential::Sequential;
