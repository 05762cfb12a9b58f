//! TON adapter
//!
//! The wallet contract's `seqno` plays the role of the checkpoint, bounded by
//! a `valid_until` timestamp. Token transfers go through the sender's jetton
//! wallet; jetton wallets are deployed implicitly by the first incoming
//! transfer, so resolution never creates anything on-chain.
//!
//! Cell / BOC serialization is owned by the TON RPC gateway behind
//! [`TonRpc::send_boc`]: the adapter signs a canonical bincode encoding of the
//! transfer and hands the gateway the signed envelope.

use super::{ChainAdapter, ChainHistoryEntry, ChainKind, InstructionSummary, TokenRef, TokenTransfer};
use crate::errors::ChainError;
use crate::orchestrator::KeyMaterial;
use crate::pending::PendingScope;
use crate::tx_builder::BuiltTransaction;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer as _, SigningKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Jetton `transfer` op code
pub const JETTON_TRANSFER_OP: u32 = 0x0f8a_7ea5;

/// TON attached to a jetton transfer message to pay for its execution (0.05 TON)
pub const JETTON_TRANSFER_TON_AMOUNT: u64 = 50_000_000;

/// TON forwarded to the recipient with the transfer notification
pub const JETTON_FORWARD_TON_AMOUNT: u64 = 1;

/// Seconds a signed transfer stays valid
pub const DEFAULT_VALIDITY_SECS: i64 = 60;

/// Minimal TON RPC surface used by the pipeline
#[async_trait]
pub trait TonRpc: Send + Sync {
    /// Current `seqno` of a wallet contract (0 when undeployed)
    async fn get_seqno(&self, wallet: &str) -> Result<u32, ChainError>;

    /// Jetton wallet of `owner` for the jetton `master`
    async fn get_jetton_wallet(&self, master: &str, owner: &str) -> Result<String, ChainError>;

    /// Whether `address` is a jetton wallet minted by `master`
    async fn is_jetton_wallet(&self, address: &str, master: &str) -> Result<bool, ChainError>;

    /// Submit a signed transfer, returning its message hash
    async fn send_boc(&self, encoded: &str) -> Result<String, ChainError>;

    /// Newest-first transactions of `address`
    async fn get_transactions(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<ChainHistoryEntry>, ChainError>;

    /// Wall clock of the node, epoch seconds
    async fn get_time(&self) -> Result<i64, ChainError>;
}

/// Wallet seqno plus the deadline of the transfer built against it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TonCheckpoint {
    pub seqno: u32,
    pub valid_until: i64,
}

impl fmt::Display for TonCheckpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seqno:{}", self.seqno)
    }
}

/// Message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TonBody {
    Empty,
    Comment(String),
    JettonTransfer {
        query_id: u64,
        amount: u64,
        destination: String,
        response_destination: String,
        forward_ton_amount: u64,
        forward_comment: Option<String>,
    },
}

/// Internal message sent by the wallet contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TonMessage {
    pub destination: String,
    /// Nanotons attached
    pub amount: u64,
    pub bounce: bool,
    pub body: TonBody,
}

/// Transfer signed by the wallet key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TonSignedTransfer {
    pub wallet: String,
    pub seqno: u32,
    pub valid_until: i64,
    pub messages: Vec<TonMessage>,
    pub signature: Option<Vec<u8>>,
}

#[derive(Serialize)]
struct SigningPayload<'a> {
    wallet: &'a str,
    seqno: u32,
    valid_until: i64,
    messages: &'a [TonMessage],
}

impl TonSignedTransfer {
    fn digest(&self) -> Result<[u8; 32], ChainError> {
        let payload = SigningPayload {
            wallet: &self.wallet,
            seqno: self.seqno,
            valid_until: self.valid_until,
            messages: &self.messages,
        };
        let bytes = bincode::serialize(&payload)
            .map_err(|e| ChainError::Other(format!("transfer serialization failed: {}", e)))?;
        Ok(Sha256::digest(&bytes).into())
    }
}

/// TON implementation of [`ChainAdapter`]
#[derive(Debug, Clone)]
pub struct TonAdapter {
    pub validity_secs: i64,
    /// Wallet whose seqno the checkpoint tracks
    pub wallet: String,
}

impl TonAdapter {
    pub fn new(wallet: impl Into<String>) -> Self {
        Self {
            validity_secs: DEFAULT_VALIDITY_SECS,
            wallet: wallet.into(),
        }
    }
}

/// Accepts raw (`wc:hex64`) and user-friendly (48 char base64url) forms.
fn parse_ton_address(address: &str) -> Result<String, ChainError> {
    let address = address.trim();

    if let Some((wc, hash)) = address.split_once(':') {
        let wc_ok = wc.parse::<i32>().is_ok();
        let hash_ok = hash.len() == 64 && hex::decode(hash).is_ok();
        if wc_ok && hash_ok {
            return Ok(format!("{}:{}", wc, hash.to_ascii_lowercase()));
        }
    } else if address.len() == 48 {
        let normalized: String = address
            .chars()
            .map(|c| match c {
                '-' => '+',
                '_' => '/',
                c => c,
            })
            .collect();
        if let Ok(bytes) = BASE64.decode(normalized) {
            if bytes.len() == 36 {
                return Ok(address.to_string());
            }
        }
    }

    Err(ChainError::Other("invalid TON address".to_string()))
}

#[async_trait]
impl ChainAdapter for TonAdapter {
    type Client = Arc<dyn TonRpc>;
    type Instruction = TonMessage;
    type Checkpoint = TonCheckpoint;
    type Signer = SigningKey;
    type Signed = TonSignedTransfer;

    fn kind(&self) -> ChainKind {
        ChainKind::Ton
    }

    fn parse_address(&self, address: &str) -> Result<String, ChainError> {
        parse_ton_address(address)
    }

    fn signer_from_key(&self, key: &KeyMaterial) -> Result<SigningKey, ChainError> {
        let bytes = key.secret_key();
        match bytes.len() {
            32 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(bytes);
                Ok(SigningKey::from_bytes(&seed))
            }
            64 => {
                let mut pair = [0u8; 64];
                pair.copy_from_slice(bytes);
                SigningKey::from_keypair_bytes(&pair)
                    .map_err(|e| ChainError::Signing(e.to_string()))
            }
            n => Err(ChainError::Signing(format!(
                "invalid key length: expected 32 or 64 bytes, got {}",
                n
            ))),
        }
    }

    async fn latest_checkpoint(&self, client: &Self::Client) -> Result<TonCheckpoint, ChainError> {
        let seqno = client.get_seqno(&self.wallet).await?;
        let now = client.get_time().await?;
        Ok(TonCheckpoint {
            seqno,
            valid_until: now + self.validity_secs,
        })
    }

    fn build_native_transfer(
        &self,
        _sender: &str,
        target: &str,
        amount: u64,
        _reference: &[String],
    ) -> Result<TonMessage, ChainError> {
        Ok(TonMessage {
            destination: parse_ton_address(target)?,
            amount,
            bounce: false,
            body: TonBody::Empty,
        })
    }

    async fn resolve_token_account(
        &self,
        client: &Self::Client,
        token: &TokenRef,
        owner: &str,
        _signer: Option<&SigningKey>,
    ) -> Result<String, ChainError> {
        let owner = parse_ton_address(owner)?;
        client.get_jetton_wallet(&token.address, &owner).await
    }

    async fn is_token_account(
        &self,
        client: &Self::Client,
        address: &str,
        token: &TokenRef,
    ) -> Result<bool, ChainError> {
        client.is_jetton_wallet(address, &token.address).await
    }

    fn build_token_transfer(&self, transfer: TokenTransfer<'_>) -> Result<TonMessage, ChainError> {
        // Jettons are addressed to the recipient's wallet, the jetton wallet
        // derives the destination jetton wallet itself.
        Ok(TonMessage {
            destination: parse_ton_address(transfer.source)?,
            amount: JETTON_TRANSFER_TON_AMOUNT,
            bounce: true,
            body: TonBody::JettonTransfer {
                query_id: 0,
                amount: transfer.amount,
                destination: parse_ton_address(transfer.recipient_owner)?,
                response_destination: parse_ton_address(transfer.owner)?,
                forward_ton_amount: JETTON_FORWARD_TON_AMOUNT,
                forward_comment: None,
            },
        })
    }

    fn attach_memo(
        &self,
        instructions: &mut Vec<TonMessage>,
        _sender: &str,
        comment: &str,
    ) -> Result<(), ChainError> {
        let message = instructions
            .last_mut()
            .ok_or_else(|| ChainError::Other("no message to attach a comment to".to_string()))?;

        match &mut message.body {
            body @ TonBody::Empty => *body = TonBody::Comment(comment.to_string()),
            TonBody::Comment(existing) => *existing = comment.to_string(),
            TonBody::JettonTransfer {
                forward_comment, ..
            } => *forward_comment = Some(comment.to_string()),
        }
        Ok(())
    }

    fn unsigned(&self, tx: &BuiltTransaction<Self>) -> Result<TonSignedTransfer, ChainError> {
        Ok(TonSignedTransfer {
            wallet: parse_ton_address(&tx.fee_payer)?,
            seqno: tx.checkpoint.seqno,
            valid_until: tx.checkpoint.valid_until,
            messages: tx.instructions.clone(),
            signature: None,
        })
    }

    fn cosign(&self, tx: &mut TonSignedTransfer, signer: &SigningKey) -> Result<(), ChainError> {
        let digest = tx.digest()?;
        let signature: Signature = signer.sign(&digest);
        tx.signature = Some(signature.to_bytes().to_vec());
        Ok(())
    }

    fn is_fully_signed(&self, tx: &TonSignedTransfer) -> bool {
        tx.signature.as_ref().map(|s| s.len() == 64).unwrap_or(false)
    }

    fn transaction_id(&self, tx: &TonSignedTransfer) -> Option<String> {
        let signature = tx.signature.as_ref()?;
        let digest = tx.digest().ok()?;
        let mut hasher = Sha256::new();
        hasher.update(digest);
        hasher.update(signature);
        Some(hex::encode(hasher.finalize()))
    }

    fn signed_checkpoint(&self, tx: &TonSignedTransfer) -> String {
        TonCheckpoint {
            seqno: tx.seqno,
            valid_until: tx.valid_until,
        }
        .to_string()
    }

    fn signed_seqno(&self, tx: &TonSignedTransfer) -> Option<u32> {
        Some(tx.seqno)
    }

    fn summarize(&self, tx: &TonSignedTransfer) -> Vec<InstructionSummary> {
        tx.messages
            .iter()
            .map(|msg| InstructionSummary {
                program_id: msg.destination.clone(),
                accounts: 1,
                data_len: match &msg.body {
                    TonBody::Empty => 0,
                    TonBody::Comment(text) => text.len(),
                    TonBody::JettonTransfer {
                        forward_comment, ..
                    } => forward_comment.as_ref().map(String::len).unwrap_or(0),
                },
            })
            .collect()
    }

    fn encode(&self, tx: &TonSignedTransfer) -> Result<String, ChainError> {
        let bytes = bincode::serialize(tx)
            .map_err(|e| ChainError::Other(format!("transfer serialization failed: {}", e)))?;
        Ok(BASE64.encode(bytes))
    }

    async fn broadcast(&self, client: &Self::Client, encoded: &str) -> Result<String, ChainError> {
        client.send_boc(encoded).await
    }

    async fn poll_history(
        &self,
        client: &Self::Client,
        scope: &PendingScope,
        limit: usize,
    ) -> Result<Vec<ChainHistoryEntry>, ChainError> {
        let owner = parse_ton_address(&scope.account)?;
        let address = match &scope.token {
            Some(master) => client.get_jetton_wallet(master, &owner).await?,
            None => owner,
        };
        client.get_transactions(&address, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;

    const WALLET: &str = "0:83dfd552e63729b472fcbcc8c45ebcc6691702558b68ec7527e1ba403a0f31a8";
    const RECIPIENT: &str = "0:2cf55953e92efbeadab7ba725c3f93a0b23f842cbba72d7b8e6f510a70e422e3";

    #[test]
    fn test_address_forms() {
        assert!(parse_ton_address(WALLET).is_ok());
        assert!(parse_ton_address("EQCD39VS5jcptHL8vMjEXrzGaRcCVYto7HUn4bpAOg8xqB2N").is_ok());
        assert!(parse_ton_address("0:zz").is_err());
        assert!(parse_ton_address("hello").is_err());
    }

    #[test]
    fn test_comment_attached_to_native_message() {
        let adapter = TonAdapter::new(WALLET);
        let mut msgs = vec![adapter
            .build_native_transfer(WALLET, RECIPIENT, 1_000, &[])
            .unwrap()];
        adapter.attach_memo(&mut msgs, WALLET, "hi").unwrap();

        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].body, TonBody::Comment("hi".to_string()));
    }

    #[test]
    fn test_comment_forwarded_with_jetton_transfer() {
        let adapter = TonAdapter::new(WALLET);
        let mut msgs = vec![adapter
            .build_token_transfer(TokenTransfer {
                source: WALLET,
                destination: RECIPIENT,
                recipient_owner: RECIPIENT,
                owner: WALLET,
                amount: 42,
                reference: &[],
            })
            .unwrap()];
        adapter.attach_memo(&mut msgs, WALLET, "memo").unwrap();

        match &msgs[0].body {
            TonBody::JettonTransfer {
                amount,
                forward_comment,
                ..
            } => {
                assert_eq!(*amount, 42);
                assert_eq!(forward_comment.as_deref(), Some("memo"));
            }
            other => panic!("unexpected body {:?}", other),
        }
        assert_eq!(msgs[0].amount, JETTON_TRANSFER_TON_AMOUNT);
    }

    #[test]
    fn test_signature_verifies() {
        let adapter = TonAdapter::new(WALLET);
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let built = BuiltTransaction::<TonAdapter> {
            instructions: vec![adapter
                .build_native_transfer(WALLET, RECIPIENT, 5, &[])
                .unwrap()],
            fee_payer: WALLET.to_string(),
            checkpoint: TonCheckpoint {
                seqno: 3,
                valid_until: 1_700_000_060,
            },
            is_token_account: false,
            recipient_token_account: None,
        };

        let signed = adapter.sign(&built, &key).unwrap();
        assert!(adapter.is_fully_signed(&signed));

        let sig_bytes: [u8; 64] = signed.signature.clone().unwrap().try_into().unwrap();
        let digest = signed.digest().unwrap();
        assert!(key
            .verifying_key()
            .verify(&digest, &Signature::from_bytes(&sig_bytes))
            .is_ok());
        assert_eq!(adapter.signed_checkpoint(&signed), "seqno:3");
        assert!(adapter.transaction_id(&signed).is_some());
    }
}
