mod buyer;
mod order;
mod product;

pub use buyer::*;
pub use order::*;
pub use product::*;
