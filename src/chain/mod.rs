//! Chain abstraction layer
//!
//! Every chain-specific concern sits behind [`ChainAdapter`]:
//! - checkpoint fetch (Solana blockhash, TON wallet seqno)
//! - native / token transfer instruction construction
//! - token account resolution (ATA on Solana, jetton wallet on TON)
//! - signing, encoding and broadcast
//! - history polling for reconciliation
//!
//! The builder, orchestrator and reconciliation code is written once against
//! this trait. Adapters are stateless apart from configuration; the RPC client
//! is passed in per call so that the same adapter serves both the primary and
//! fallback endpoint of an [`RpcPair`].

pub mod solana;
pub mod ton;

use crate::errors::ChainError;
use crate::orchestrator::KeyMaterial;
use crate::pending::PendingScope;
use crate::tx_builder::BuiltTransaction;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};

pub use solana::{SolanaAdapter, SolanaRpc};
pub use ton::{TonAdapter, TonRpc};

/// Supported chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Solana,
    Ton,
}

impl Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainKind::Solana => write!(f, "solana"),
            ChainKind::Ton => write!(f, "ton"),
        }
    }
}

/// Primary and fallback ("public") endpoint for one network
#[derive(Debug, Clone)]
pub struct RpcPair<C> {
    pub primary: C,
    pub fallback: C,
}

impl<C> RpcPair<C> {
    pub fn new(primary: C, fallback: C) -> Self {
        Self { primary, fallback }
    }
}

/// Non-native token being transferred
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenRef {
    /// Mint (Solana) or jetton master (TON) address
    pub address: String,
    pub decimals: u8,
}

/// One entry of polled on-chain history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHistoryEntry {
    /// Signature (Solana) or transaction hash (TON)
    pub id: String,
    /// Block time, epoch seconds
    pub time: i64,
    /// Whether the transaction failed on-chain
    #[serde(default)]
    pub failed: bool,
    /// Wallet seqno the transaction was sent with (TON), when known
    #[serde(default)]
    pub seqno: Option<u32>,
}

/// Short description of one instruction of a pre-built transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionSummary {
    pub program_id: String,
    pub accounts: usize,
    pub data_len: usize,
}

/// Inputs of a token transfer instruction, addresses already resolved
#[derive(Debug, Clone, Copy)]
pub struct TokenTransfer<'a> {
    /// Sender's token account
    pub source: &'a str,
    /// Recipient's token account
    pub destination: &'a str,
    /// Recipient wallet address as given in the order
    pub recipient_owner: &'a str,
    /// Sender wallet, owner of `source`
    pub owner: &'a str,
    pub amount: u64,
    pub reference: &'a [String],
}

/// Per-chain transfer operations
#[async_trait]
pub trait ChainAdapter: Send + Sync + Sized {
    /// RPC client the adapter talks to
    type Client: Send + Sync;
    type Instruction: Clone + Debug + Send + Sync;
    type Checkpoint: Clone + Debug + Display + Send + Sync;
    type Signer: Send + Sync;
    /// Signed (or partially signed) transaction ready to encode
    type Signed: Clone + Debug + Send + Sync;

    fn kind(&self) -> ChainKind;

    /// Validate and normalise a user supplied address.
    fn parse_address(&self, address: &str) -> Result<String, ChainError>;

    fn signer_from_key(&self, key: &KeyMaterial) -> Result<Self::Signer, ChainError>;

    /// Whether `signer` controls `sender`. Chains that cannot derive the
    /// wallet address from a key accept any signer.
    fn signer_matches(&self, _signer: &Self::Signer, _sender: &str) -> bool {
        true
    }

    async fn latest_checkpoint(&self, client: &Self::Client) -> Result<Self::Checkpoint, ChainError>;

    fn build_native_transfer(
        &self,
        sender: &str,
        target: &str,
        amount: u64,
        reference: &[String],
    ) -> Result<Self::Instruction, ChainError>;

    /// Token account of `owner` for `token`. With a signer the account is
    /// created on-chain when it does not exist yet.
    async fn resolve_token_account(
        &self,
        client: &Self::Client,
        token: &TokenRef,
        owner: &str,
        signer: Option<&Self::Signer>,
    ) -> Result<String, ChainError>;

    /// Whether `address` already is a token account for `token`.
    async fn is_token_account(
        &self,
        client: &Self::Client,
        address: &str,
        token: &TokenRef,
    ) -> Result<bool, ChainError>;

    fn build_token_transfer(&self, transfer: TokenTransfer<'_>) -> Result<Self::Instruction, ChainError>;

    /// Attach a comment to the transfer being built.
    fn attach_memo(
        &self,
        instructions: &mut Vec<Self::Instruction>,
        sender: &str,
        comment: &str,
    ) -> Result<(), ChainError>;

    /// Unsigned transaction object for `tx`.
    fn unsigned(&self, tx: &BuiltTransaction<Self>) -> Result<Self::Signed, ChainError>;

    /// Add `signer`'s signature, leaving other signatures in place.
    fn cosign(&self, tx: &mut Self::Signed, signer: &Self::Signer) -> Result<(), ChainError>;

    fn is_fully_signed(&self, tx: &Self::Signed) -> bool;

    /// Sign a freshly built transaction. All required signatures must be
    /// present afterwards.
    fn sign(&self, tx: &BuiltTransaction<Self>, signer: &Self::Signer) -> Result<Self::Signed, ChainError> {
        let mut signed = self.unsigned(tx)?;
        self.cosign(&mut signed, signer)?;
        if !self.is_fully_signed(&signed) {
            return Err(ChainError::Signing("missing required signatures".to_string()));
        }
        Ok(signed)
    }

    /// Id the network will report for `tx`, when it can be computed locally.
    fn transaction_id(&self, tx: &Self::Signed) -> Option<String>;

    /// Checkpoint `tx` was built against.
    fn signed_checkpoint(&self, tx: &Self::Signed) -> String;

    /// Wallet sequence number `tx` consumes, on chains that have one.
    fn signed_seqno(&self, _tx: &Self::Signed) -> Option<u32> {
        None
    }

    fn summarize(&self, tx: &Self::Signed) -> Vec<InstructionSummary>;

    /// Base64 wire form of `tx`.
    fn encode(&self, tx: &Self::Signed) -> Result<String, ChainError>;

    /// Send an encoded transaction, returning its submission id.
    async fn broadcast(&self, client: &Self::Client, encoded: &str) -> Result<String, ChainError>;

    /// Newest-first history page for `scope`.
    async fn poll_history(
        &self,
        client: &Self::Client,
        scope: &PendingScope,
        limit: usize,
    ) -> Result<Vec<ChainHistoryEntry>, ChainError>;
}
