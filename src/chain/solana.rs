//! Solana adapter
//!
//! Checkpoint is the latest blockhash, token accounts are associated token
//! accounts (ATA) of the SPL token program, comments travel as a Memo program
//! instruction signed by the sender.
//!
//! The RPC boundary is the [`SolanaRpc`] trait so that the adapter can run
//! against the nonblocking [`RpcClient`] in production and a recording mock
//! in tests.

use super::{ChainAdapter, ChainHistoryEntry, ChainKind, InstructionSummary, TokenRef, TokenTransfer};
use crate::errors::{sanitize, ChainError};
use crate::metrics::metrics;
use crate::orchestrator::KeyMaterial;
use crate::pending::PendingScope;
use crate::tx_builder::BuiltTransaction;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::json;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::client_error::{Error as ClientError, ErrorKind as ClientErrorKind};
use solana_rpc_client_api::request::{RpcError, RpcRequest, RpcResponseErrorData};
use solana_rpc_client_api::response::RpcConfirmedTransactionStatusWithSignature;
use solana_sdk::{
    account::Account,
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    message::Message,
    pubkey,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    system_instruction,
    transaction::Transaction,
};
use solana_transaction_status::EncodedConfirmedTransactionWithStatusMeta;
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};
use spl_token::solana_program::program_pack::Pack;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// SPL Memo program (v2)
pub const MEMO_PROGRAM_ID: Pubkey = pubkey!("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr");

/// One row of `getSignaturesForAddress`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInfo {
    pub signature: String,
    pub block_time: Option<i64>,
    pub failed: bool,
}

/// Subset of `getTransaction` the reconciliation needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub failed: bool,
}

/// Minimal Solana RPC surface used by the pipeline
#[async_trait]
pub trait SolanaRpc: Send + Sync {
    /// Latest blockhash and its last valid block height
    async fn get_latest_blockhash(&self) -> Result<(Hash, u64), ChainError>;

    async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Account>, ChainError>;

    /// Submit a base64 encoded transaction, returning its signature
    async fn send_encoded_transaction(&self, encoded: &str) -> Result<String, ChainError>;

    /// Newest-first signatures touching `address`
    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, ChainError>;

    async fn get_transaction(&self, signature: &str) -> Result<Option<TransactionInfo>, ChainError>;
}

impl From<ClientError> for ChainError {
    fn from(err: ClientError) -> Self {
        let message = err.to_string();
        match err.kind() {
            ClientErrorKind::Reqwest(e) => match e.status() {
                Some(status) => ChainError::http(status.as_u16(), message),
                None => ChainError::rpc(message),
            },
            ClientErrorKind::RpcError(RpcError::RpcResponseError {
                message: response_message,
                data: RpcResponseErrorData::SendTransactionPreflightFailure(result),
                ..
            }) => ChainError::Transaction {
                message: response_message.clone(),
                logs: result.logs.clone().unwrap_or_default(),
                transaction_error: Some(response_message.clone()),
            },
            ClientErrorKind::TransactionError(tx_err) => ChainError::Transaction {
                message,
                logs: Vec::new(),
                transaction_error: Some(tx_err.to_string()),
            },
            ClientErrorKind::SigningError(_) => ChainError::Signing(message),
            _ => ChainError::rpc(message),
        }
    }
}

#[async_trait]
impl SolanaRpc for RpcClient {
    async fn get_latest_blockhash(&self) -> Result<(Hash, u64), ChainError> {
        Ok(self
            .get_latest_blockhash_with_commitment(self.commitment())
            .await?)
    }

    async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Account>, ChainError> {
        Ok(self
            .get_account_with_commitment(address, self.commitment())
            .await?
            .value)
    }

    async fn send_encoded_transaction(&self, encoded: &str) -> Result<String, ChainError> {
        let params = json!([
            encoded,
            {
                "encoding": "base64",
                "preflightCommitment": self.commitment().commitment,
            }
        ]);
        Ok(self.send::<String>(RpcRequest::SendTransaction, params).await?)
    }

    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, ChainError> {
        let params = json!([
            address.to_string(),
            {
                "limit": limit,
                "commitment": self.commitment().commitment,
            }
        ]);
        let rows: Vec<RpcConfirmedTransactionStatusWithSignature> =
            self.send(RpcRequest::GetSignaturesForAddress, params).await?;

        Ok(rows
            .into_iter()
            .map(|row| SignatureInfo {
                signature: row.signature,
                block_time: row.block_time,
                failed: row.err.is_some(),
            })
            .collect())
    }

    async fn get_transaction(&self, signature: &str) -> Result<Option<TransactionInfo>, ChainError> {
        let params = json!([
            signature,
            {
                "encoding": "json",
                "commitment": self.commitment().commitment,
                "maxSupportedTransactionVersion": 0,
            }
        ]);
        let tx: Option<EncodedConfirmedTransactionWithStatusMeta> =
            self.send(RpcRequest::GetTransaction, params).await?;

        Ok(tx.map(|tx| TransactionInfo {
            signature: signature.to_string(),
            slot: tx.slot,
            block_time: tx.block_time,
            failed: tx
                .transaction
                .meta
                .as_ref()
                .map(|meta| meta.err.is_some())
                .unwrap_or(false),
        }))
    }
}

/// Recent blockhash plus its validity bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolanaCheckpoint {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

impl fmt::Display for SolanaCheckpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.blockhash)
    }
}

/// Solana implementation of [`ChainAdapter`]
#[derive(Debug, Clone)]
pub struct SolanaAdapter {
    /// Delay between existence checks after creating a token account
    pub creation_poll_interval: Duration,
    /// Existence checks before a created token account is given up on
    pub creation_poll_attempts: u32,
}

impl Default for SolanaAdapter {
    fn default() -> Self {
        Self {
            creation_poll_interval: Duration::from_millis(500),
            creation_poll_attempts: 20,
        }
    }
}

fn parse_pubkey(address: &str) -> Result<Pubkey, ChainError> {
    Pubkey::from_str(address.trim())
        .map_err(|e| ChainError::Other(format!("invalid Solana address: {}", e)))
}

fn reference_metas(reference: &[String]) -> Result<Vec<AccountMeta>, ChainError> {
    reference
        .iter()
        .map(|key| parse_pubkey(key).map(|pk| AccountMeta::new(pk, false)))
        .collect()
}

impl SolanaAdapter {
    /// Create `owner`'s ATA for `mint`, paid by `payer`, and wait until the
    /// account is visible.
    async fn create_token_account(
        &self,
        client: &Arc<dyn SolanaRpc>,
        owner: &Pubkey,
        mint: &Pubkey,
        ata: &Pubkey,
        payer: &Keypair,
    ) -> Result<(), ChainError> {
        let ix = create_associated_token_account_idempotent(
            &payer.pubkey(),
            owner,
            mint,
            &spl_token::id(),
        );
        let (blockhash, _) = client.get_latest_blockhash().await?;
        let tx = Transaction::new_signed_with_payer(&[ix], Some(&payer.pubkey()), &[payer], blockhash);
        let encoded = self.encode(&tx)?;

        let signature = client.send_encoded_transaction(&encoded).await?;
        info!(
            token_account = %ata,
            signature = %signature,
            "Submitted token account creation"
        );
        metrics().token_accounts_created.inc();

        // Broadcast already happened: failures past this point are terminal
        for attempt in 1..=self.creation_poll_attempts {
            match client.get_account_info(ata).await {
                Ok(Some(_)) => {
                    debug!(token_account = %ata, attempt, "Token account visible");
                    return Ok(());
                }
                Ok(None) => {}
                Err(e) => debug!(
                    token_account = %ata,
                    attempt,
                    error = %sanitize(&e.to_string()),
                    "Token account lookup failed"
                ),
            }
            sleep(self.creation_poll_interval).await;
        }

        warn!(
            token_account = %ata,
            signature = %signature,
            attempts = self.creation_poll_attempts,
            "Token account creation not confirmed"
        );
        Err(ChainError::Other(
            "token account creation submitted but not confirmed".to_string(),
        ))
    }
}

#[async_trait]
impl ChainAdapter for SolanaAdapter {
    type Client = Arc<dyn SolanaRpc>;
    type Instruction = Instruction;
    type Checkpoint = SolanaCheckpoint;
    type Signer = Keypair;
    type Signed = Transaction;

    fn kind(&self) -> ChainKind {
        ChainKind::Solana
    }

    fn parse_address(&self, address: &str) -> Result<String, ChainError> {
        parse_pubkey(address).map(|pk| pk.to_string())
    }

    fn signer_from_key(&self, key: &KeyMaterial) -> Result<Keypair, ChainError> {
        let bytes = key.secret_key();
        if bytes.len() != 64 {
            return Err(ChainError::Signing(format!(
                "invalid keypair length: expected 64 bytes, got {}",
                bytes.len()
            )));
        }
        Keypair::try_from(bytes).map_err(|e| ChainError::Signing(e.to_string()))
    }

    fn signer_matches(&self, signer: &Keypair, sender: &str) -> bool {
        parse_pubkey(sender)
            .map(|pk| pk == signer.pubkey())
            .unwrap_or(false)
    }

    async fn latest_checkpoint(&self, client: &Self::Client) -> Result<SolanaCheckpoint, ChainError> {
        let (blockhash, last_valid_block_height) = client.get_latest_blockhash().await?;
        Ok(SolanaCheckpoint {
            blockhash,
            last_valid_block_height,
        })
    }

    fn build_native_transfer(
        &self,
        sender: &str,
        target: &str,
        amount: u64,
        reference: &[String],
    ) -> Result<Instruction, ChainError> {
        let from = parse_pubkey(sender)?;
        let to = parse_pubkey(target)?;

        let mut ix = system_instruction::transfer(&from, &to, amount);
        ix.accounts.extend(reference_metas(reference)?);
        Ok(ix)
    }

    async fn resolve_token_account(
        &self,
        client: &Self::Client,
        token: &TokenRef,
        owner: &str,
        signer: Option<&Keypair>,
    ) -> Result<String, ChainError> {
        let owner = parse_pubkey(owner)?;
        let mint = parse_pubkey(&token.address)?;
        let ata = get_associated_token_address(&owner, &mint);

        if let Some(payer) = signer {
            if client.get_account_info(&ata).await?.is_none() {
                self.create_token_account(client, &owner, &mint, &ata, payer)
                    .await?;
            }
        }

        Ok(ata.to_string())
    }

    async fn is_token_account(
        &self,
        client: &Self::Client,
        address: &str,
        token: &TokenRef,
    ) -> Result<bool, ChainError> {
        let address = parse_pubkey(address)?;
        let mint = parse_pubkey(&token.address)?;

        let account = match client.get_account_info(&address).await? {
            Some(account) => account,
            None => return Ok(false),
        };
        if account.owner != spl_token::id() {
            return Ok(false);
        }

        Ok(spl_token::state::Account::unpack(&account.data)
            .map(|state| state.mint == mint)
            .unwrap_or(false))
    }

    fn build_token_transfer(&self, transfer: TokenTransfer<'_>) -> Result<Instruction, ChainError> {
        let source = parse_pubkey(transfer.source)?;
        let destination = parse_pubkey(transfer.destination)?;
        let owner = parse_pubkey(transfer.owner)?;

        let mut ix = spl_token::instruction::transfer(
            &spl_token::id(),
            &source,
            &destination,
            &owner,
            &[],
            transfer.amount,
        )
        .map_err(|e| ChainError::Other(e.to_string()))?;
        ix.accounts.extend(reference_metas(transfer.reference)?);
        Ok(ix)
    }

    fn attach_memo(
        &self,
        instructions: &mut Vec<Instruction>,
        sender: &str,
        comment: &str,
    ) -> Result<(), ChainError> {
        let sender = parse_pubkey(sender)?;
        instructions.push(Instruction {
            program_id: MEMO_PROGRAM_ID,
            accounts: vec![AccountMeta::new(sender, true)],
            data: comment.as_bytes().to_vec(),
        });
        Ok(())
    }

    fn unsigned(&self, tx: &BuiltTransaction<Self>) -> Result<Transaction, ChainError> {
        let payer = parse_pubkey(&tx.fee_payer)?;
        let message =
            Message::new_with_blockhash(&tx.instructions, Some(&payer), &tx.checkpoint.blockhash);
        Ok(Transaction::new_unsigned(message))
    }

    fn cosign(&self, tx: &mut Transaction, signer: &Keypair) -> Result<(), ChainError> {
        let blockhash = tx.message.recent_blockhash;
        tx.try_partial_sign(&[signer], blockhash)
            .map_err(|e| ChainError::Signing(e.to_string()))
    }

    fn is_fully_signed(&self, tx: &Transaction) -> bool {
        tx.is_signed()
    }

    fn transaction_id(&self, tx: &Transaction) -> Option<String> {
        tx.signatures
            .first()
            .filter(|sig| **sig != Signature::default())
            .map(|sig| sig.to_string())
    }

    fn signed_checkpoint(&self, tx: &Transaction) -> String {
        tx.message.recent_blockhash.to_string()
    }

    fn summarize(&self, tx: &Transaction) -> Vec<InstructionSummary> {
        let keys = &tx.message.account_keys;
        tx.message
            .instructions
            .iter()
            .map(|ix| InstructionSummary {
                program_id: keys
                    .get(ix.program_id_index as usize)
                    .map(|pk| pk.to_string())
                    .unwrap_or_default(),
                accounts: ix.accounts.len(),
                data_len: ix.data.len(),
            })
            .collect()
    }

    fn encode(&self, tx: &Transaction) -> Result<String, ChainError> {
        let bytes = bincode::serialize(tx)
            .map_err(|e| ChainError::Other(format!("transaction serialization failed: {}", e)))?;
        Ok(BASE64.encode(bytes))
    }

    async fn broadcast(&self, client: &Self::Client, encoded: &str) -> Result<String, ChainError> {
        client.send_encoded_transaction(encoded).await
    }

    async fn poll_history(
        &self,
        client: &Self::Client,
        scope: &PendingScope,
        limit: usize,
    ) -> Result<Vec<ChainHistoryEntry>, ChainError> {
        let owner = parse_pubkey(&scope.account)?;
        let address = match &scope.token {
            Some(mint) => get_associated_token_address(&owner, &parse_pubkey(mint)?),
            None => owner,
        };

        let rows = client.get_signatures_for_address(&address, limit).await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let time = match row.block_time {
                Some(time) => Some(time),
                None => client
                    .get_transaction(&row.signature)
                    .await?
                    .and_then(|tx| tx.block_time),
            };

            match time {
                Some(time) => entries.push(ChainHistoryEntry {
                    id: row.signature,
                    time,
                    failed: row.failed,
                    seqno: None,
                }),
                None => debug!(signature = %row.signature, "Skipping history entry without block time"),
            }
        }

        Ok(entries)
    }
}
