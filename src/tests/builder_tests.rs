//! Transaction builder tests against the recording Solana RPC
//!
//! Covers instruction layout for native and token transfers, the read-only
//! guarantee of signer-less builds, token account creation with a signer and
//! checkpoint failover.

#[cfg(test)]
mod builder_tests {
    use crate::backoff::{Backoff, BackoffConfig};
    use crate::chain::solana::{SolanaRpc, MEMO_PROGRAM_ID};
    use crate::chain::{RpcPair, SolanaAdapter, TokenRef};
    use crate::errors::{ChainError, ErrorKind};
    use crate::test_utils::{token_account, MockSolanaRpc};
    use crate::tx_builder::{TransferOrder, TxBuilder};
    use solana_sdk::{pubkey::Pubkey, signature::Keypair, signer::Signer, system_program};
    use spl_associated_token_account::get_associated_token_address;
    use std::sync::Arc;

    fn builder(primary: &MockSolanaRpc, fallback: &MockSolanaRpc) -> TxBuilder<SolanaAdapter> {
        let rpc: RpcPair<Arc<dyn SolanaRpc>> =
            RpcPair::new(primary.clone().into_client(), fallback.clone().into_client());
        TxBuilder::new(SolanaAdapter::default(), rpc, Backoff::new(BackoffConfig::default()))
    }

    fn usdc() -> (Pubkey, TokenRef) {
        let mint = Pubkey::new_unique();
        let token = TokenRef {
            address: mint.to_string(),
            decimals: 6,
        };
        (mint, token)
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_transfer_with_comment() {
        let primary = MockSolanaRpc::new();
        let fallback = MockSolanaRpc::new();
        let builder = builder(&primary, &fallback);

        let sender = Pubkey::new_unique();
        let recipient = Pubkey::new_unique();
        let order = TransferOrder::native(recipient.to_string(), 1_000_000).with_comment("hi");

        let built = builder.build(&order, &sender.to_string(), None).await.unwrap();

        assert_eq!(built.instruction_count(), 2);
        assert_eq!(built.fee_payer, sender.to_string());
        assert_eq!(built.checkpoint.blockhash, primary.blockhash);
        assert_eq!(built.instructions[0].program_id, system_program::id());
        assert_eq!(built.instructions[1].program_id, MEMO_PROGRAM_ID);
        assert_eq!(built.instructions[1].data, b"hi".to_vec());
        assert!(built.recipient_token_account.is_none());
        assert_eq!(fallback.blockhash_calls().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_comment_adds_no_memo() {
        let primary = MockSolanaRpc::new();
        let builder = builder(&primary, &MockSolanaRpc::new());

        let order = TransferOrder::native(Pubkey::new_unique().to_string(), 5).with_comment("");
        let built = builder
            .build(&order, &Pubkey::new_unique().to_string(), None)
            .await
            .unwrap();

        assert_eq!(built.instruction_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reference_keys_appended() {
        let primary = MockSolanaRpc::new();
        let builder = builder(&primary, &MockSolanaRpc::new());

        let reference = Pubkey::new_unique();
        let order = TransferOrder::native(Pubkey::new_unique().to_string(), 5)
            .with_reference(vec![reference.to_string()]);
        let built = builder
            .build(&order, &Pubkey::new_unique().to_string(), None)
            .await
            .unwrap();

        let accounts = &built.instructions[0].accounts;
        assert_eq!(accounts.last().map(|m| m.pubkey), Some(reference));
        assert!(!accounts.last().unwrap().is_signer);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_build_without_signer_has_no_side_effects() {
        let primary = MockSolanaRpc::new();
        let fallback = MockSolanaRpc::new();
        let builder = builder(&primary, &fallback);

        let (mint, token) = usdc();
        let sender = Pubkey::new_unique();
        let recipient = Pubkey::new_unique();
        let order = TransferOrder::token(recipient.to_string(), 2_500_000, token);

        let first = builder.build(&order, &sender.to_string(), None).await.unwrap();
        let second = builder.build(&order, &sender.to_string(), None).await.unwrap();

        assert_eq!(primary.account_creations().await, 0);
        assert_eq!(primary.send_calls().await, 0);
        assert_eq!(fallback.send_calls().await, 0);

        let expected = get_associated_token_address(&recipient, &mint).to_string();
        assert_eq!(first.recipient_token_account.as_deref(), Some(expected.as_str()));
        assert_eq!(first.recipient_token_account, second.recipient_token_account);
        assert!(!first.is_token_account);

        let ix = &first.instructions[0];
        assert_eq!(ix.program_id, spl_token::id());
        assert_eq!(ix.accounts[0].pubkey, get_associated_token_address(&sender, &mint));
        assert_eq!(ix.accounts[1].pubkey.to_string(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_build_with_signer_creates_missing_accounts() {
        let primary = MockSolanaRpc::new();
        let builder = builder(&primary, &MockSolanaRpc::new());

        let (mint, token) = usdc();
        let payer = Keypair::new();
        let recipient = Pubkey::new_unique();
        let order = TransferOrder::token(recipient.to_string(), 10, token);

        builder
            .build(&order, &payer.pubkey().to_string(), Some(&payer))
            .await
            .unwrap();
        assert_eq!(primary.account_creations().await, 2);

        // Both accounts exist now
        builder
            .build(&order, &payer.pubkey().to_string(), Some(&payer))
            .await
            .unwrap();
        assert_eq!(primary.account_creations().await, 2);

        let sent = primary.sent().await;
        assert_eq!(sent.len(), 2);
        let created: Vec<Pubkey> = sent.iter().map(|tx| tx.message.account_keys[1]).collect();
        assert!(created.contains(&get_associated_token_address(&payer.pubkey(), &mint)));
        assert!(created.contains(&get_associated_token_address(&recipient, &mint)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_account_creation_is_not_rebroadcast() {
        let primary = MockSolanaRpc::new();
        let fallback = MockSolanaRpc::new();
        primary.hide_created_accounts().await;
        fallback.hide_created_accounts().await;
        let builder = builder(&primary, &fallback);

        let (_, token) = usdc();
        let payer = Keypair::new();
        let order = TransferOrder::token(Pubkey::new_unique().to_string(), 10, token);

        let err = builder
            .build(&order, &payer.pubkey().to_string(), Some(&payer))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(err.is_terminal());
        assert_eq!(primary.account_creations().await, 1);
        assert_eq!(fallback.account_creations().await, 0);
        assert_eq!(fallback.send_calls().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recipient_given_as_token_account() {
        let primary = MockSolanaRpc::new();
        let builder = builder(&primary, &MockSolanaRpc::new());

        let (mint, token) = usdc();
        let token_address = Pubkey::new_unique();
        primary
            .add_account(token_address, token_account(&mint, &Pubkey::new_unique()))
            .await;

        let order = TransferOrder::token(token_address.to_string(), 10, token);
        let built = builder
            .build(&order, &Pubkey::new_unique().to_string(), None)
            .await
            .unwrap();

        assert!(built.is_token_account);
        assert_eq!(
            built.recipient_token_account.as_deref(),
            Some(token_address.to_string().as_str())
        );
        assert_eq!(built.instructions[0].accounts[1].pubkey, token_address);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_account_of_other_mint_is_not_used_directly() {
        let primary = MockSolanaRpc::new();
        let builder = builder(&primary, &MockSolanaRpc::new());

        let (_, token) = usdc();
        let other_mint = Pubkey::new_unique();
        let address = Pubkey::new_unique();
        primary
            .add_account(address, token_account(&other_mint, &Pubkey::new_unique()))
            .await;

        let order = TransferOrder::token(address.to_string(), 10, token);
        let built = builder
            .build(&order, &Pubkey::new_unique().to_string(), None)
            .await
            .unwrap();

        assert!(!built.is_token_account);
        assert_ne!(built.instructions[0].accounts[1].pubkey, address);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_falls_back_on_network_error() {
        let primary = MockSolanaRpc::new();
        let fallback = MockSolanaRpc::new();
        for _ in 0..5 {
            primary
                .fail_blockhash_once(ChainError::http(503, "Service Unavailable: connection reset"))
                .await;
        }
        let builder = builder(&primary, &fallback);

        let order = TransferOrder::native(Pubkey::new_unique().to_string(), 1);
        let built = builder
            .build(&order, &Pubkey::new_unique().to_string(), None)
            .await
            .unwrap();

        assert_eq!(primary.blockhash_calls().await, 5);
        assert_eq!(fallback.blockhash_calls().await, 1);
        assert_eq!(built.checkpoint.blockhash, fallback.blockhash);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_recovers_on_primary() {
        let primary = MockSolanaRpc::new();
        let fallback = MockSolanaRpc::new();
        primary
            .fail_blockhash_once(ChainError::rpc("connection refused"))
            .await;
        let builder = builder(&primary, &fallback);

        let order = TransferOrder::native(Pubkey::new_unique().to_string(), 1);
        builder
            .build(&order, &Pubkey::new_unique().to_string(), None)
            .await
            .unwrap();

        assert_eq!(primary.blockhash_calls().await, 2);
        assert_eq!(fallback.blockhash_calls().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_recipient_rejected_before_rpc() {
        let primary = MockSolanaRpc::new();
        let builder = builder(&primary, &MockSolanaRpc::new());

        let order = TransferOrder::native("not-an-address", 1);
        let err = builder
            .build(&order, &Pubkey::new_unique().to_string(), None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(primary.blockhash_calls().await, 0);
    }
}
