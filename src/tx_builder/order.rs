//! Transfer order as entered by the user

use crate::chain::TokenRef;
use serde::{Deserialize, Serialize};

/// Immutable description of a desired transfer.
///
/// `amount` is in the smallest unit of the asset (lamports, nanotons or token
/// base units). No `token` means a native transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOrder {
    pub target: String,
    pub amount: u64,
    #[serde(default)]
    pub token: Option<TokenRef>,
    #[serde(default)]
    pub comment: Option<String>,
    /// Auxiliary keys appended to the transfer instruction
    #[serde(default)]
    pub reference: Vec<String>,
}

impl TransferOrder {
    pub fn native(target: impl Into<String>, amount: u64) -> Self {
        Self {
            target: target.into(),
            amount,
            token: None,
            comment: None,
            reference: Vec::new(),
        }
    }

    pub fn token(target: impl Into<String>, amount: u64, token: TokenRef) -> Self {
        Self {
            token: Some(token),
            ..Self::native(target, amount)
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_reference(mut self, reference: Vec<String>) -> Self {
        self.reference = reference;
        self
    }

    /// Comment to attach, if any. Empty comments are dropped.
    pub fn memo(&self) -> Option<&str> {
        self.comment.as_deref().filter(|c| !c.is_empty())
    }

    pub fn is_native(&self) -> bool {
        self.token.is_none()
    }
}
