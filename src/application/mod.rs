pub mod account;
pub mod checkout;
pub mod reconciler;
pub mod seeding;

pub use account::*;
pub use checkout::*;
pub use reconciler::*;
pub use seeding::*;
