pub mod types;

pub use types::{BalanceMap, TokenPreview};
