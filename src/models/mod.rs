mod followup;
mod order;
mod plan;
mod promo_code;
mod subscription;
mod transaction;
mod user_account;

pub use followup::*;
pub use order::*;
pub use plan::*;
pub use promo_code::*;
pub use subscription::*;
pub use transaction::*;
pub use user_account::*;
