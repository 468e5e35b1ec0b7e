pub mod billing_event;
pub mod plan;
pub mod subscription;
pub mod user;

pub use billing_event::*;
pub use plan::*;
pub use subscription::*;
pub use user::*;
