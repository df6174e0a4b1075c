pub mod digest;
pub mod layer;

pub use digest::Digest;
pub use layer::{CacheError, LayerCache};
