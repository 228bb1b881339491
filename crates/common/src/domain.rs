mod event;
mod feature;
mod feature_vector;
mod result;
mod training;

pub use event::*;
pub use feature::*;
pub use feature_vector::*;
pub use result::*;
pub use training::*;
