//! Transfer Engine - multi-chain transfer pipeline
//!
//! Builds, signs and broadcasts native and token transfers on Solana and TON,
//! and tracks what was sent until it shows up in polled chain history.
//!
//! ## Modules
//!
//! - **errors**: sanitizer and classifier for raw RPC / SDK failures
//! - **backoff**: bounded retry executor and primary/fallback combinator
//! - **chain**: `ChainAdapter` trait with Solana and TON implementations
//! - **tx_builder**: transfer order to unsigned transaction
//! - **orchestrator**: authenticate, build, sign, broadcast
//! - **pending**: per-account store of submitted transactions
//! - **reconcile**: merge pending entries with chain history, collect resolved ones
//! - **config**, **logging**, **metrics**: ambient plumbing

pub mod backoff;
pub mod chain;
pub mod config;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod pending;
pub mod reconcile;
pub mod test_utils;
pub mod tx_builder;

// Re-export commonly used types
pub use backoff::{with_fallback, Backoff, BackoffConfig};
pub use chain::{ChainAdapter, ChainKind, RpcPair, SolanaAdapter, TokenRef, TonAdapter};
pub use errors::{classify, sanitize, ChainError, ClassifiedError, ErrorKind};
pub use orchestrator::{AuthContext, AuthError, KeyMaterial, KeyStore, Orchestrator, SubmitError};
pub use pending::{PendingScope, PendingStatus, PendingStore, PendingTransaction};
pub use reconcile::{reconcile, MergedEntry, Reconciler};
pub use tx_builder::{BuiltTransaction, TransferOrder, TxBuilder};
