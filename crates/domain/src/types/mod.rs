//! Domain data types.

pub mod checkout;
pub mod mutation;
pub mod product;
pub mod sync;

pub use checkout::*;
pub use mutation::*;
pub use product::*;
pub use sync::*;
