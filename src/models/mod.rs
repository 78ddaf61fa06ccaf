mod cart;
mod gateway;
mod order;
mod payment;
mod product;
mod user;

pub use cart::*;
pub use gateway::*;
pub use order::*;
pub use payment::*;
pub use product::*;
pub use user::*;
