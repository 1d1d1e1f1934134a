mod dense;
mod layer;
mod sigmoid;

pub use dense::Dense;
pub use layer::Layer;
pub use sigmoid::Sigmoid;
