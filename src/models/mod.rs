pub mod relay;
pub mod stream;

pub use relay::*;
pub use stream::*;
