//! Test Utilities Module
//!
//! In-process stand-ins for the external collaborators of the pipeline:
//! Solana and TON RPC endpoints and the key store. Every mock records what
//! it was asked to do so tests can assert on side effects (sends, token
//! account creations, authentication prompts).
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use crate::chain::solana::{SignatureInfo, SolanaRpc, TransactionInfo};
use crate::chain::{ChainHistoryEntry, TonRpc};
use crate::errors::ChainError;
use crate::orchestrator::{AuthContext, AuthError, KeyMaterial, KeyStore};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use solana_sdk::{
    account::Account, hash::Hash, pubkey::Pubkey, signature::Keypair, transaction::Transaction,
};
use spl_token::solana_program::program_option::COption;
use spl_token::solana_program::program_pack::Pack;
use spl_token::state::{Account as TokenAccount, AccountState};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Packed SPL token account holding `mint` for `owner`
pub fn token_account(mint: &Pubkey, owner: &Pubkey) -> Account {
    let state = TokenAccount {
        mint: *mint,
        owner: *owner,
        amount: 0,
        delegate: COption::None,
        state: AccountState::Initialized,
        is_native: COption::None,
        delegated_amount: 0,
        close_authority: COption::None,
    };
    let mut data = vec![0u8; TokenAccount::LEN];
    TokenAccount::pack(state, &mut data).expect("token account packs");

    Account {
        lamports: 2_039_280,
        data,
        owner: spl_token::id(),
        executable: false,
        rent_epoch: 0,
    }
}

/// Recording Solana RPC
///
/// Failures are injected per method: queued errors are returned one per
/// call before the mock starts succeeding, a persistent error is returned
/// on every call.
#[derive(Clone, Default)]
pub struct MockSolanaRpc {
    pub blockhash: Hash,
    accounts: Arc<Mutex<HashMap<Pubkey, Account>>>,
    blockhash_failures: Arc<Mutex<VecDeque<ChainError>>>,
    send_failures: Arc<Mutex<VecDeque<ChainError>>>,
    persistent_send_failure: Arc<Mutex<Option<ChainError>>>,
    history_failure: Arc<Mutex<Option<ChainError>>>,
    history: Arc<Mutex<Vec<SignatureInfo>>>,
    sent: Arc<Mutex<Vec<Transaction>>>,
    blockhash_calls: Arc<Mutex<usize>>,
    send_calls: Arc<Mutex<usize>>,
    account_creations: Arc<Mutex<usize>>,
    hide_created_accounts: Arc<Mutex<bool>>,
}

impl MockSolanaRpc {
    pub fn new() -> Self {
        Self {
            blockhash: Hash::new_unique(),
            ..Self::default()
        }
    }

    pub fn into_client(self) -> Arc<dyn SolanaRpc> {
        Arc::new(self)
    }

    pub async fn add_account(&self, address: Pubkey, account: Account) {
        self.accounts.lock().await.insert(address, account);
    }

    pub async fn fail_blockhash_once(&self, error: ChainError) {
        self.blockhash_failures.lock().await.push_back(error);
    }

    pub async fn fail_send_once(&self, error: ChainError) {
        self.send_failures.lock().await.push_back(error);
    }

    pub async fn fail_every_send(&self, error: ChainError) {
        *self.persistent_send_failure.lock().await = Some(error);
    }

    /// Accept creation transactions but never make the accounts visible.
    pub async fn hide_created_accounts(&self) {
        *self.hide_created_accounts.lock().await = true;
    }

    pub async fn fail_history(&self, error: ChainError) {
        *self.history_failure.lock().await = Some(error);
    }

    pub async fn set_history(&self, history: Vec<SignatureInfo>) {
        *self.history.lock().await = history;
    }

    pub async fn blockhash_calls(&self) -> usize {
        *self.blockhash_calls.lock().await
    }

    pub async fn send_calls(&self) -> usize {
        *self.send_calls.lock().await
    }

    pub async fn account_creations(&self) -> usize {
        *self.account_creations.lock().await
    }

    /// Transactions accepted by this endpoint
    pub async fn sent(&self) -> Vec<Transaction> {
        self.sent.lock().await.clone()
    }

    /// Materialize the ATAs a creation transaction asks for.
    async fn apply_account_creations(&self, tx: &Transaction) {
        let keys = &tx.message.account_keys;
        for ix in &tx.message.instructions {
            let program = keys[ix.program_id_index as usize];
            if program != spl_associated_token_account::id() {
                continue;
            }
            let key = |i: usize| keys[ix.accounts[i] as usize];
            let (ata, wallet, mint) = (key(1), key(2), key(3));

            *self.account_creations.lock().await += 1;
            if *self.hide_created_accounts.lock().await {
                continue;
            }
            self.accounts
                .lock()
                .await
                .insert(ata, token_account(&mint, &wallet));
        }
    }
}

#[async_trait]
impl SolanaRpc for MockSolanaRpc {
    async fn get_latest_blockhash(&self) -> Result<(Hash, u64), ChainError> {
        *self.blockhash_calls.lock().await += 1;
        if let Some(err) = self.blockhash_failures.lock().await.pop_front() {
            return Err(err);
        }
        Ok((self.blockhash, 1_000))
    }

    async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Account>, ChainError> {
        Ok(self.accounts.lock().await.get(address).cloned())
    }

    async fn send_encoded_transaction(&self, encoded: &str) -> Result<String, ChainError> {
        *self.send_calls.lock().await += 1;
        if let Some(err) = self.persistent_send_failure.lock().await.clone() {
            return Err(err);
        }
        if let Some(err) = self.send_failures.lock().await.pop_front() {
            return Err(err);
        }

        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| ChainError::rpc(format!("invalid base64: {}", e)))?;
        let tx: Transaction = bincode::deserialize(&bytes)
            .map_err(|e| ChainError::rpc(format!("invalid transaction: {}", e)))?;
        if !tx.is_signed() {
            return Err(ChainError::transaction("signature verification failure", Vec::new()));
        }

        self.apply_account_creations(&tx).await;
        let signature = tx.signatures[0].to_string();
        self.sent.lock().await.push(tx);
        Ok(signature)
    }

    async fn get_signatures_for_address(
        &self,
        _address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, ChainError> {
        if let Some(err) = self.history_failure.lock().await.clone() {
            return Err(err);
        }
        Ok(self.history.lock().await.iter().take(limit).cloned().collect())
    }

    async fn get_transaction(&self, signature: &str) -> Result<Option<TransactionInfo>, ChainError> {
        Ok(self
            .history
            .lock()
            .await
            .iter()
            .find(|row| row.signature == signature)
            .map(|row| TransactionInfo {
                signature: row.signature.clone(),
                slot: 1,
                block_time: row.block_time,
                failed: row.failed,
            }))
    }
}

/// Recording TON RPC
#[derive(Clone, Default)]
pub struct MockTonRpc {
    pub seqno: u32,
    pub now: i64,
    jetton_wallets: Arc<Mutex<Vec<String>>>,
    send_failures: Arc<Mutex<VecDeque<ChainError>>>,
    history: Arc<Mutex<Vec<ChainHistoryEntry>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl MockTonRpc {
    pub fn new(seqno: u32, now: i64) -> Self {
        Self {
            seqno,
            now,
            ..Self::default()
        }
    }

    pub fn into_client(self) -> Arc<dyn TonRpc> {
        Arc::new(self)
    }

    /// Deterministic jetton wallet address of `owner` for `master`
    pub fn jetton_wallet_of(master: &str, owner: &str) -> String {
        let digest = Sha256::digest(format!("{master}/{owner}").as_bytes());
        format!("0:{}", hex::encode(digest))
    }

    pub async fn fail_send_once(&self, error: ChainError) {
        self.send_failures.lock().await.push_back(error);
    }

    pub async fn set_history(&self, history: Vec<ChainHistoryEntry>) {
        *self.history.lock().await = history;
    }

    pub async fn sent(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl TonRpc for MockTonRpc {
    async fn get_seqno(&self, _wallet: &str) -> Result<u32, ChainError> {
        Ok(self.seqno)
    }

    async fn get_jetton_wallet(&self, master: &str, owner: &str) -> Result<String, ChainError> {
        let wallet = Self::jetton_wallet_of(master, owner);
        self.jetton_wallets.lock().await.push(wallet.clone());
        Ok(wallet)
    }

    async fn is_jetton_wallet(&self, address: &str, _master: &str) -> Result<bool, ChainError> {
        Ok(self.jetton_wallets.lock().await.iter().any(|w| w == address))
    }

    async fn send_boc(&self, encoded: &str) -> Result<String, ChainError> {
        if let Some(err) = self.send_failures.lock().await.pop_front() {
            return Err(err);
        }
        self.sent.lock().await.push(encoded.to_string());
        Ok(hex::encode(Sha256::digest(encoded.as_bytes())))
    }

    async fn get_transactions(
        &self,
        _address: &str,
        limit: usize,
    ) -> Result<Vec<ChainHistoryEntry>, ChainError> {
        Ok(self.history.lock().await.iter().take(limit).cloned().collect())
    }

    async fn get_time(&self) -> Result<i64, ChainError> {
        Ok(self.now)
    }
}

/// Key store returning a fixed key, or a fixed refusal
#[derive(Clone)]
pub struct MockKeyStore {
    secret: Option<Vec<u8>>,
    refusal: AuthError,
    calls: Arc<Mutex<usize>>,
}

impl MockKeyStore {
    pub fn with_keypair(keypair: &Keypair) -> Self {
        Self::with_secret(keypair.to_bytes().to_vec())
    }

    pub fn with_secret(secret: Vec<u8>) -> Self {
        Self {
            secret: Some(secret),
            refusal: AuthError::Cancelled,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn refusing(error: AuthError) -> Self {
        Self {
            secret: None,
            refusal: error,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub async fn calls(&self) -> usize {
        *self.calls.lock().await
    }
}

#[async_trait]
impl KeyStore for MockKeyStore {
    async fn authenticate(&self, _ctx: &AuthContext) -> Result<KeyMaterial, AuthError> {
        *self.calls.lock().await += 1;
        match &self.secret {
            Some(secret) => Ok(KeyMaterial::new(secret.clone())),
            None => Err(self.refusal.clone()),
        }
    }
}
