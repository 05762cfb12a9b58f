//! Sign-and-send orchestration
//!
//! `submit` runs one transfer end to end:
//! 1. authenticate against the [`KeyStore`] (failures pass through untouched)
//! 2. build with the signer present, so missing token accounts get created
//! 3. sign locally; any signing problem surfaces as `SigningFailed`
//! 4. broadcast on the primary RPC under backoff; a network-class failure
//!    moves the send to the fallback RPC, after a rebuild when the checkpoint
//!    expired
//! 5. return a `Pending` [`PendingTransaction`]
//!
//! Key material is fetched per call and dropped (zeroized) when the call
//! returns. A broadcast accepted by the network is never rolled back.

use crate::backoff::with_fallback;
use crate::chain::ChainAdapter;
use crate::errors::{classify, ClassifiedError, ErrorReason};
use crate::metrics::{metrics, Timer};
use crate::pending::{PendingPayload, PendingStatus, PendingTransaction};
use crate::tx_builder::{TransferOrder, TxBuilder};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Secret key bytes handed out by a [`KeyStore`], wiped on drop
pub struct KeyMaterial {
    secret_key: Zeroizing<Vec<u8>>,
}

impl KeyMaterial {
    pub fn new(secret_key: Vec<u8>) -> Self {
        Self {
            secret_key: Zeroizing::new(secret_key),
        }
    }

    pub fn secret_key(&self) -> &[u8] {
        &self.secret_key
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// What the user is asked to authenticate for
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub account: String,
    pub purpose: String,
}

impl AuthContext {
    pub fn new(account: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            purpose: purpose.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("authentication cancelled")]
    Cancelled,

    #[error("authentication failed: {0}")]
    Failed(String),
}

/// Credential store that unlocks a signing key after user authentication
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn authenticate(&self, ctx: &AuthContext) -> Result<KeyMaterial, AuthError>;
}

/// Key store reading a keypair file: a JSON byte array (Solana CLI format) or
/// a hex string.
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn authenticate(&self, _ctx: &AuthContext) -> Result<KeyMaterial, AuthError> {
        let raw = Zeroizing::new(
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|e| AuthError::Failed(format!("cannot read keypair file: {}", e)))?,
        );
        let trimmed = raw.trim();

        let bytes = if trimmed.starts_with('[') {
            serde_json::from_str::<Vec<u8>>(trimmed)
                .map_err(|_| AuthError::Failed("malformed keypair file".to_string()))?
        } else {
            hex::decode(trimmed).map_err(|_| AuthError::Failed("malformed keypair file".to_string()))?
        };
        Ok(KeyMaterial::new(bytes))
    }
}

/// Failure of a submission
#[derive(Error, Debug)]
pub enum SubmitError {
    /// Key store refused; passed through as is
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Classified(#[from] ClassifiedError),
}

impl SubmitError {
    /// Classified failure, `None` for authentication failures
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            SubmitError::Classified(err) => Some(err),
            SubmitError::Auth(_) => None,
        }
    }
}

/// Signs and broadcasts transfers for one chain
pub struct Orchestrator<A: ChainAdapter> {
    builder: TxBuilder<A>,
}

impl<A: ChainAdapter> Orchestrator<A> {
    pub fn new(builder: TxBuilder<A>) -> Self {
        Self { builder }
    }

    pub fn builder(&self) -> &TxBuilder<A> {
        &self.builder
    }

    /// Build, sign and broadcast `order` from `sender`.
    pub async fn submit(
        &self,
        order: &TransferOrder,
        sender: &str,
        key_store: &dyn KeyStore,
        ctx: &AuthContext,
    ) -> Result<PendingTransaction, SubmitError> {
        let correlation_id = Uuid::new_v4();
        let span = info_span!(
            "submit",
            %correlation_id,
            chain = %self.builder.adapter().kind(),
            kind = "order"
        );

        let timer = Timer::start();
        let result = self
            .submit_order(order, sender, key_store, ctx)
            .instrument(span)
            .await;
        self.record(&result, &timer);
        result
    }

    /// Sign and broadcast a transaction built elsewhere, possibly already
    /// carrying signatures of other parties.
    pub async fn submit_prebuilt(
        &self,
        transaction: A::Signed,
        key_store: &dyn KeyStore,
        ctx: &AuthContext,
    ) -> Result<PendingTransaction, SubmitError> {
        let correlation_id = Uuid::new_v4();
        let span = info_span!(
            "submit",
            %correlation_id,
            chain = %self.builder.adapter().kind(),
            kind = "prebuilt"
        );

        let timer = Timer::start();
        let result = self
            .submit_signed(transaction, key_store, ctx)
            .instrument(span)
            .await;
        self.record(&result, &timer);
        result
    }

    async fn submit_order(
        &self,
        order: &TransferOrder,
        sender: &str,
        key_store: &dyn KeyStore,
        ctx: &AuthContext,
    ) -> Result<PendingTransaction, SubmitError> {
        let adapter = self.builder.adapter();
        let hint = Some(order.target.as_str());

        let key = key_store.authenticate(ctx).await?;
        let signer = adapter
            .signer_from_key(&key)
            .map_err(|_| ClassifiedError::signing_failed())?;
        drop(key);
        if !adapter.signer_matches(&signer, sender) {
            warn!("Signing key does not control the sender account");
            return Err(ClassifiedError::signing_failed().into());
        }

        let built = self.builder.build(order, sender, Some(&signer)).await?;
        let mut signed = adapter
            .sign(&built, &signer)
            .map_err(|_| ClassifiedError::signing_failed())?;
        let mut encoded = adapter.encode(&signed).map_err(|e| classify(&e, hint))?;

        let rpc = self.builder.rpc();
        let backoff = self.builder.backoff();

        let primary = backoff
            .run_classified("broadcast", hint, || adapter.broadcast(&rpc.primary, &encoded))
            .await;

        let sent = match primary {
            Ok(id) => Ok(id),
            Err(err) if err.is_network() => {
                if err.is_checkpoint_expired() {
                    info!("Checkpoint expired, rebuilding before fallback send");
                    let rebuilt = self.builder.build(order, sender, Some(&signer)).await?;
                    signed = adapter
                        .sign(&rebuilt, &signer)
                        .map_err(|_| ClassifiedError::signing_failed())?;
                    encoded = adapter.encode(&signed).map_err(|e| classify(&e, hint))?;
                }

                warn!(error = %err, "Primary broadcast failed, retrying on fallback RPC");
                metrics().fallback_switches.inc();
                backoff
                    .run_classified("broadcast", hint, || adapter.broadcast(&rpc.fallback, &encoded))
                    .await
            }
            Err(err) => Err(err),
        };
        let id = self.accept_duplicate(sent, &signed)?;

        info!(id = %id, "Transfer submitted");
        Ok(PendingTransaction {
            id,
            time: chrono::Utc::now().timestamp(),
            status: PendingStatus::Pending,
            last_checkpoint: adapter.signed_checkpoint(&signed),
            seqno: adapter.signed_seqno(&signed),
            chain: adapter.kind(),
            payload: PendingPayload::Order {
                sender: built.fee_payer.clone(),
                target: order.target.clone(),
                amount: order.amount,
                token: order.token.clone(),
                comment: order.memo().map(str::to_string),
            },
        })
    }

    async fn submit_signed(
        &self,
        mut transaction: A::Signed,
        key_store: &dyn KeyStore,
        ctx: &AuthContext,
    ) -> Result<PendingTransaction, SubmitError> {
        let adapter = self.builder.adapter();

        let key = key_store.authenticate(ctx).await?;
        let signer = adapter
            .signer_from_key(&key)
            .map_err(|_| ClassifiedError::signing_failed())?;
        drop(key);

        adapter
            .cosign(&mut transaction, &signer)
            .map_err(|_| ClassifiedError::signing_failed())?;
        if !adapter.is_fully_signed(&transaction) {
            warn!("Pre-built transaction still lacks signatures");
            return Err(ClassifiedError::signing_failed().into());
        }
        let encoded = adapter.encode(&transaction).map_err(|e| classify(&e, None))?;

        let sent = with_fallback(
            self.builder.backoff(),
            "broadcast",
            self.builder.rpc(),
            None,
            |client| adapter.broadcast(client, &encoded),
        )
        .await;
        let id = self.accept_duplicate(sent, &transaction)?;

        let instructions = adapter.summarize(&transaction);
        info!(id = %id, instructions = instructions.len(), "Pre-built transaction submitted");
        Ok(PendingTransaction {
            id,
            time: chrono::Utc::now().timestamp(),
            status: PendingStatus::Pending,
            last_checkpoint: adapter.signed_checkpoint(&transaction),
            seqno: adapter.signed_seqno(&transaction),
            chain: adapter.kind(),
            payload: PendingPayload::Prebuilt { instructions },
        })
    }

    /// A resend of bytes the network already accepted reports a duplicate;
    /// the transaction is in flight under its locally computed id.
    fn accept_duplicate(
        &self,
        sent: Result<String, ClassifiedError>,
        signed: &A::Signed,
    ) -> Result<String, ClassifiedError> {
        match sent {
            Err(err) if *err.reason() == ErrorReason::DuplicateTransaction => {
                match self.builder.adapter().transaction_id(signed) {
                    Some(id) => {
                        debug!(id = %id, "Broadcast reported duplicate, treating as submitted");
                        Ok(id)
                    }
                    None => Err(err),
                }
            }
            other => other,
        }
    }

    fn record(&self, result: &Result<PendingTransaction, SubmitError>, timer: &Timer) {
        timer.observe(&metrics().submit_latency);
        match result {
            Ok(_) => metrics().submissions_total.inc(),
            Err(SubmitError::Classified(err)) => {
                warn!(kind = err.kind().label(), error = %err, "Submission failed");
                metrics().record_failure(err.kind().label());
            }
            Err(SubmitError::Auth(err)) => {
                debug!(error = %err, "Submission aborted by key store");
                metrics().record_failure("auth");
            }
        }
    }
}
