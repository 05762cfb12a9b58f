//! Unsigned build result

use crate::chain::ChainAdapter;

/// Unsigned, fully addressed transaction.
///
/// Disposable: once its checkpoint expires it is rebuilt rather than patched.
#[derive(Debug, Clone)]
pub struct BuiltTransaction<A: ChainAdapter> {
    pub instructions: Vec<A::Instruction>,
    pub fee_payer: String,
    pub checkpoint: A::Checkpoint,
    /// Recipient address given in the order already was a token account
    pub is_token_account: bool,
    /// Token account the transfer credits, for token transfers
    pub recipient_token_account: Option<String>,
}

impl<A: ChainAdapter> BuiltTransaction<A> {
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }
}
