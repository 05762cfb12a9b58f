//! Transaction builder
//!
//! Turns a [`TransferOrder`] into a [`BuiltTransaction`]:
//! 1. checkpoint from the primary RPC, fallback on network errors
//! 2. native transfer, or token transfer between resolved token accounts
//! 3. memo when the order carries a comment
//! 4. fee payer = sender
//!
//! Every RPC lookup goes through [`with_fallback`]. Without a signer the build
//! is read-only and can be repeated freely for previews and fee estimates.
//! With a signer, missing token accounts are created on-chain.

use super::order::TransferOrder;
use super::output::BuiltTransaction;
use crate::backoff::{with_fallback, Backoff};
use crate::chain::{ChainAdapter, RpcPair, TokenTransfer};
use crate::errors::{classify, ClassifiedError};
use crate::metrics::{metrics, Timer};
use tracing::debug;

/// Builds transfers for one chain against a primary / fallback endpoint pair
pub struct TxBuilder<A: ChainAdapter> {
    adapter: A,
    rpc: RpcPair<A::Client>,
    backoff: Backoff,
}

impl<A: ChainAdapter> TxBuilder<A> {
    pub fn new(adapter: A, rpc: RpcPair<A::Client>, backoff: Backoff) -> Self {
        Self {
            adapter,
            rpc,
            backoff,
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn rpc(&self) -> &RpcPair<A::Client> {
        &self.rpc
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Build an unsigned transaction for `order` sent by `sender`.
    pub async fn build(
        &self,
        order: &TransferOrder,
        sender: &str,
        signer: Option<&A::Signer>,
    ) -> Result<BuiltTransaction<A>, ClassifiedError> {
        let timer = Timer::start();
        let adapter = &self.adapter;

        let sender = adapter
            .parse_address(sender)
            .map_err(|e| classify(&e, None))?;
        let target = adapter
            .parse_address(&order.target)
            .map_err(|e| classify(&e, Some(order.target.as_str())))?;

        debug!(
            chain = %adapter.kind(),
            native = order.is_native(),
            has_comment = order.memo().is_some(),
            references = order.reference.len(),
            creates_accounts = signer.is_some(),
            "Building transfer"
        );

        let checkpoint = with_fallback(
            &self.backoff,
            "latest_checkpoint",
            &self.rpc,
            None,
            |client| adapter.latest_checkpoint(client),
        )
        .await?;

        let mut instructions = Vec::with_capacity(2);
        let mut is_token_account = false;
        let mut recipient_token_account = None;

        match &order.token {
            None => {
                instructions.push(
                    adapter
                        .build_native_transfer(&sender, &target, order.amount, &order.reference)
                        .map_err(|e| classify(&e, Some(target.as_str())))?,
                );
            }
            Some(token) => {
                let source = with_fallback(
                    &self.backoff,
                    "resolve_sender_token_account",
                    &self.rpc,
                    None,
                    |client| adapter.resolve_token_account(client, token, &sender, signer),
                )
                .await?;

                is_token_account = with_fallback(
                    &self.backoff,
                    "check_recipient_token_account",
                    &self.rpc,
                    Some(target.as_str()),
                    |client| adapter.is_token_account(client, &target, token),
                )
                .await?;

                let destination = if is_token_account {
                    target.clone()
                } else {
                    with_fallback(
                        &self.backoff,
                        "resolve_recipient_token_account",
                        &self.rpc,
                        Some(target.as_str()),
                        |client| adapter.resolve_token_account(client, token, &target, signer),
                    )
                    .await?
                };

                instructions.push(
                    adapter
                        .build_token_transfer(TokenTransfer {
                            source: &source,
                            destination: &destination,
                            recipient_owner: &target,
                            owner: &sender,
                            amount: order.amount,
                            reference: &order.reference,
                        })
                        .map_err(|e| classify(&e, Some(target.as_str())))?,
                );
                recipient_token_account = Some(destination);
            }
        }

        if let Some(comment) = order.memo() {
            adapter
                .attach_memo(&mut instructions, &sender, comment)
                .map_err(|e| classify(&e, None))?;
        }

        timer.observe(&metrics().build_latency);
        debug!(
            chain = %adapter.kind(),
            instructions = instructions.len(),
            checkpoint = %checkpoint,
            elapsed_ms = timer.elapsed_ms(),
            "Transfer built"
        );

        Ok(BuiltTransaction {
            instructions,
            fee_payer: sender,
            checkpoint,
            is_token_account,
            recipient_token_account,
        })
    }
}
