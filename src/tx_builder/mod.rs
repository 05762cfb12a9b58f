//! Transfer construction
//!
//! - **order**: [`TransferOrder`], the user's request
//! - **output**: [`BuiltTransaction`], the unsigned result
//! - **builder**: [`TxBuilder`], resolves accounts and checkpoint through the
//!   chain adapter with primary / fallback fault tolerance
//!
//! ## Side effects
//!
//! Building is read-only unless a signer is passed. The send path passes one
//! so that missing token accounts get created; previews and fee estimates
//! never do.

mod builder;
mod order;
mod output;

pub use builder::TxBuilder;
pub use order::TransferOrder;
pub use output::BuiltTransaction;
