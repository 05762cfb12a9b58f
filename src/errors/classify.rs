//! Classification of raw RPC / SDK failures into a closed taxonomy
//!
//! Raw failures arrive as [`ChainError`] values produced by the chain
//! adapters. [`classify`] maps each one onto exactly one [`ErrorKind`]:
//! - `NetworkTransient`: rate limiting, transport faults, expired checkpoint.
//!   The only kind that fallback / backoff paths retry.
//! - `InsufficientFunds` / `InsufficientRent`: balance shortfalls, with the
//!   shortfall in base units when the logs carry it.
//! - `SigningFailed`: local signing step failed. Never explains why.
//! - `Unknown`: everything else, carrying the sanitized original text.
//!
//! Classification is total: unrecognised shapes degrade to `Unknown`.

use super::sanitize::sanitize;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// SPL token program id as it appears in program logs.
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

/// Substring that identifies a rent shortfall in the nested transaction error.
///
/// Tied to the wording of the RPC node / SDK in use; revisit on client upgrades.
pub const INSUFFICIENT_FUNDS_FOR_RENT: &str = "insufficient funds for rent";

/// Number of trailing program log lines appended to a classified message.
const MAX_LOG_LINES: usize = 5;

/// Decimals of the native asset used when rendering shortfalls.
const NATIVE_DECIMALS: u32 = 9;

// Lower-cased match keys
const SOL_TRANSFER_INSUFFICIENT_LAMPORTS: &str = "transfer: insufficient lamports";
const NEED_DELIMITER: &str = ", need";
const INSUFFICIENT_FUNDS: &str = "insufficient funds";
const INSUFFICIENT_FUNDS_FOR_FEE: &str = "insufficient funds for fee";
const INSUFFICIENT_LAMPORTS: &str = "insufficient lamports";
const ACCOUNT_NOT_INITIALIZED: &str = "account not initialized";
const BLOCKHASH_KEYS: &[&str] = &["blockhash not found", "block height exceeded", "blockhash expired"];
const ACCOUNT_NOT_FOUND_KEYS: &[&str] = &["account not found", "accountnotfound", "account does not exist"];
const TOO_LARGE_KEYS: &[&str] = &["transaction too large", "too large"];
const DUPLICATE_KEYS: &[&str] = &["already processed", "alreadyprocessed", "duplicate signature"];
const CUSTOM_PROGRAM_ERROR: &str = "custom program error";
const ERROR_PROCESSING_INSTRUCTION: &str = "error processing instruction";
const NETWORK_REQUEST_FAILED_KEYS: &[&str] = &[
    "network request failed",
    "request failed",
    "failed to fetch",
    "error sending request",
];
const CONNECTION_TIMEOUT_KEYS: &[&str] = &["connection timed out", "timed out", "etimedout"];
const CONNECTION_REFUSED_KEYS: &[&str] = &["connection refused", "econnrefused"];
const CONNECTION_RESET_KEYS: &[&str] = &["connection reset", "econnreset"];

static CUSTOM_CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)custom program error:\s*(0x[0-9a-f]+|\d+)").expect("custom code pattern is valid")
});

static INTEGER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+").expect("integer pattern is valid"));

static DECIMAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("decimal pattern is valid"));

/// Raw failure shape produced by chain adapters before classification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Transport or RPC level failure
    #[error("{message}")]
    Rpc {
        message: String,
        /// HTTP status when the transport reported one
        status_code: Option<u16>,
    },

    /// Simulation or send failure of a transaction, with program logs
    #[error("{message}")]
    Transaction {
        message: String,
        logs: Vec<String>,
        /// Text of the nested transaction error, when the node returned one
        transaction_error: Option<String>,
    },

    /// Local signing failed
    #[error("signing failed: {0}")]
    Signing(String),

    /// Anything else (address parsing, malformed responses, ...)
    #[error("{0}")]
    Other(String),
}

impl ChainError {
    pub fn rpc(message: impl Into<String>) -> Self {
        Self::Rpc {
            message: message.into(),
            status_code: None,
        }
    }

    pub fn http(status_code: u16, message: impl Into<String>) -> Self {
        Self::Rpc {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    pub fn transaction(message: impl Into<String>, logs: Vec<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            logs,
            transaction_error: None,
        }
    }
}

/// Closed error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NetworkTransient,
    /// Shortfall in base units, when known
    InsufficientFunds(Option<u64>),
    /// Missing rent in base units, when known
    InsufficientRent(Option<u64>),
    SigningFailed,
    Unknown,
}

impl ErrorKind {
    /// Label used for metrics and structured logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::NetworkTransient => "network_transient",
            Self::InsufficientFunds(_) => "insufficient_funds",
            Self::InsufficientRent(_) => "insufficient_rent",
            Self::SigningFailed => "signing_failed",
            Self::Unknown => "unknown",
        }
    }
}

/// Finer-grained cause. Refines, never contradicts, the [`ErrorKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorReason {
    RateLimited,
    NetworkRequestFailed,
    ConnectionTimeout,
    ConnectionRefused,
    ConnectionReset,
    CheckpointExpired,
    AccountNotFound,
    InsufficientFundsForFee,
    InsufficientLamports,
    InsufficientTokenFunds,
    InsufficientFundsForRent,
    TransactionTooLarge,
    DuplicateTransaction,
    CustomProgramError(Option<String>),
    ProgramLogs,
    Signing,
    Other,
}

/// Classified, sanitized error value surfaced to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ClassifiedError {
    kind: ErrorKind,
    reason: ErrorReason,
    message: String,
    logs: Vec<String>,
}

impl ClassifiedError {
    /// Build a classified error; message and logs are sanitized here.
    pub fn new(kind: ErrorKind, reason: ErrorReason, message: impl AsRef<str>) -> Self {
        Self {
            kind,
            reason,
            message: sanitize(message.as_ref()),
            logs: Vec::new(),
        }
    }

    fn with_logs(mut self, logs: &[String]) -> Self {
        self.logs = logs.iter().map(|l| sanitize(l)).collect();
        self
    }

    pub fn network(reason: ErrorReason, message: impl AsRef<str>) -> Self {
        Self::new(ErrorKind::NetworkTransient, reason, message)
    }

    pub fn unknown(message: impl AsRef<str>) -> Self {
        Self::new(ErrorKind::Unknown, ErrorReason::Other, message)
    }

    pub fn signing_failed() -> Self {
        Self::new(ErrorKind::SigningFailed, ErrorReason::Signing, "signing failed")
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn reason(&self) -> &ErrorReason {
        &self.reason
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    /// Shortfall amount for funds / rent errors
    pub fn amount(&self) -> Option<u64> {
        match self.kind {
            ErrorKind::InsufficientFunds(amount) | ErrorKind::InsufficientRent(amount) => amount,
            _ => None,
        }
    }

    /// Only network-class failures are recoverable locally.
    pub fn is_network(&self) -> bool {
        self.kind == ErrorKind::NetworkTransient
    }

    /// Terminal errors must not be retried.
    pub fn is_terminal(&self) -> bool {
        !self.is_network()
    }

    pub fn is_checkpoint_expired(&self) -> bool {
        self.reason == ErrorReason::CheckpointExpired
    }
}

/// Classify a raw failure.
///
/// `recipient_hint` marks that the operation targeted a recipient account, so
/// that account related messages can say whose account is affected without
/// ever echoing the address.
pub fn classify(error: &ChainError, recipient_hint: Option<&str>) -> ClassifiedError {
    match error {
        ChainError::Signing(_) => ClassifiedError::signing_failed(),
        ChainError::Rpc {
            message,
            status_code,
        } => classify_parts(message, &[], None, *status_code, recipient_hint),
        ChainError::Transaction {
            message,
            logs,
            transaction_error,
        } => classify_parts(
            message,
            logs,
            transaction_error.as_deref(),
            None,
            recipient_hint,
        ),
        ChainError::Other(message) => classify_parts(message, &[], None, None, recipient_hint),
    }
}

fn classify_parts(
    message: &str,
    logs: &[String],
    transaction_error: Option<&str>,
    status_code: Option<u16>,
    recipient_hint: Option<&str>,
) -> ClassifiedError {
    let msg = message.to_lowercase();
    let logs_joined = logs.join(" ").to_lowercase();
    let tx_err = transaction_error.map(str::to_lowercase).unwrap_or_default();
    let whose = if recipient_hint.is_some() {
        "recipient account"
    } else {
        "account"
    };

    if status_code == Some(429) {
        return ClassifiedError::network(ErrorReason::RateLimited, "rate limited");
    }

    if contains_any(&msg, BLOCKHASH_KEYS) || contains_any(&tx_err, BLOCKHASH_KEYS) {
        return ClassifiedError::network(
            ErrorReason::CheckpointExpired,
            append_logs("blockhash expired", logs),
        )
        .with_logs(logs);
    }

    if contains_any(&msg, ACCOUNT_NOT_FOUND_KEYS) {
        return ClassifiedError::new(
            ErrorKind::Unknown,
            ErrorReason::AccountNotFound,
            append_logs(&format!("{whose} not found"), logs),
        )
        .with_logs(logs);
    }

    if msg.contains(INSUFFICIENT_FUNDS_FOR_FEE) || logs_joined.contains(INSUFFICIENT_FUNDS_FOR_FEE) {
        return ClassifiedError::new(
            ErrorKind::InsufficientFunds(None),
            ErrorReason::InsufficientFundsForFee,
            append_logs("insufficient funds for fee", logs),
        )
        .with_logs(logs);
    }

    if contains_any(&msg, TOO_LARGE_KEYS) {
        return ClassifiedError::new(
            ErrorKind::Unknown,
            ErrorReason::TransactionTooLarge,
            append_logs("transaction too large", logs),
        )
        .with_logs(logs);
    }

    if contains_any(&msg, DUPLICATE_KEYS) {
        return ClassifiedError::new(
            ErrorKind::Unknown,
            ErrorReason::DuplicateTransaction,
            append_logs("transaction already processed", logs),
        )
        .with_logs(logs);
    }

    if let Some(shortfall) = lamports_shortfall(logs) {
        return ClassifiedError::new(
            ErrorKind::InsufficientFunds(Some(shortfall)),
            ErrorReason::InsufficientLamports,
            append_logs(
                &format!(
                    "insufficient balance, {} SOL more needed",
                    format_units(shortfall, NATIVE_DECIMALS)
                ),
                logs,
            ),
        )
        .with_logs(logs);
    }

    let token_log = logs.iter().any(|l| l.contains(TOKEN_PROGRAM_ID));
    if token_log && logs.iter().any(|l| l.to_lowercase().contains(INSUFFICIENT_FUNDS)) {
        return ClassifiedError::new(
            ErrorKind::InsufficientFunds(None),
            ErrorReason::InsufficientTokenFunds,
            append_logs("insufficient token balance", logs),
        )
        .with_logs(logs);
    }

    if tx_err.contains(INSUFFICIENT_FUNDS_FOR_RENT) || msg.contains(INSUFFICIENT_FUNDS_FOR_RENT) {
        let source = if tx_err.contains(INSUFFICIENT_FUNDS_FOR_RENT) {
            &tx_err
        } else {
            &msg
        };
        let rent = rent_amount(source);
        return ClassifiedError::new(
            ErrorKind::InsufficientRent(rent),
            ErrorReason::InsufficientFundsForRent,
            append_logs(
                &format!("{whose} would be left below the rent-exempt minimum"),
                logs,
            ),
        )
        .with_logs(logs);
    }

    if msg.contains(CUSTOM_PROGRAM_ERROR) || logs_joined.contains(CUSTOM_PROGRAM_ERROR) {
        let code = custom_program_error_code(message)
            .or_else(|| logs.iter().find_map(|l| custom_program_error_code(l)));
        let text = format!(
            "custom program error: {}",
            code.as_deref().unwrap_or("unknown")
        );
        return ClassifiedError::new(
            ErrorKind::Unknown,
            ErrorReason::CustomProgramError(code),
            append_logs(&text, logs),
        )
        .with_logs(logs);
    }

    if msg.contains(ERROR_PROCESSING_INSTRUCTION) && !logs.is_empty() {
        return ClassifiedError::new(ErrorKind::Unknown, ErrorReason::ProgramLogs, logs.join("\n"))
            .with_logs(logs);
    }

    if msg.contains(INSUFFICIENT_LAMPORTS)
        || logs_joined.contains(INSUFFICIENT_LAMPORTS)
        || msg.contains(ACCOUNT_NOT_INITIALIZED)
    {
        return ClassifiedError::new(
            ErrorKind::InsufficientFunds(None),
            ErrorReason::InsufficientLamports,
            append_logs("insufficient balance", logs),
        )
        .with_logs(logs);
    }

    if let Some(reason) = network_reason(&msg) {
        let text = match reason {
            ErrorReason::ConnectionTimeout => "connection timed out",
            ErrorReason::ConnectionRefused => "connection refused",
            ErrorReason::ConnectionReset => "connection reset",
            _ => "network request failed",
        };
        return ClassifiedError::network(reason, text).with_logs(logs);
    }

    ClassifiedError::unknown(append_logs(message, logs)).with_logs(logs)
}

fn network_reason(msg: &str) -> Option<ErrorReason> {
    if contains_any(msg, CONNECTION_REFUSED_KEYS) {
        Some(ErrorReason::ConnectionRefused)
    } else if contains_any(msg, CONNECTION_RESET_KEYS) {
        Some(ErrorReason::ConnectionReset)
    } else if contains_any(msg, CONNECTION_TIMEOUT_KEYS) {
        Some(ErrorReason::ConnectionTimeout)
    } else if contains_any(msg, NETWORK_REQUEST_FAILED_KEYS) {
        Some(ErrorReason::NetworkRequestFailed)
    } else {
        None
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Append the last few non-empty log lines to a message.
fn append_logs(message: &str, logs: &[String]) -> String {
    let relevant: Vec<&str> = logs
        .iter()
        .map(|l| l.as_str())
        .filter(|l| !l.trim().is_empty())
        .collect();
    if relevant.is_empty() {
        return message.to_string();
    }
    let tail = &relevant[relevant.len().saturating_sub(MAX_LOG_LINES)..];
    format!("{message}\n\n{}", tail.join("\n"))
}

/// Parse `need - have` out of a `Transfer: insufficient lamports <have>, need <need>` log.
fn lamports_shortfall(logs: &[String]) -> Option<u64> {
    logs.iter().find_map(|log| {
        let lower = log.to_lowercase();
        let idx = lower.find(SOL_TRANSFER_INSUFFICIENT_LAMPORTS)?;
        let rest = &lower[idx + SOL_TRANSFER_INSUFFICIENT_LAMPORTS.len()..];
        let (have_part, need_part) = rest.split_once(NEED_DELIMITER)?;
        let have: u64 = INTEGER_RE.find_iter(have_part).last()?.as_str().parse().ok()?;
        let need: u64 = INTEGER_RE.find(need_part)?.as_str().parse().ok()?;
        Some(need.saturating_sub(have))
    })
}

/// Rent amount following the rent key, given in whole units with decimals.
fn rent_amount(text: &str) -> Option<u64> {
    let idx = text.find(INSUFFICIENT_FUNDS_FOR_RENT)?;
    let rest = &text[idx + INSUFFICIENT_FUNDS_FOR_RENT.len()..];
    let value = DECIMAL_RE.find(rest)?;
    parse_units(value.as_str(), NATIVE_DECIMALS)
}

fn custom_program_error_code(text: &str) -> Option<String> {
    CUSTOM_CODE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Render `amount` base units with `decimals` fractional digits, trimming zeros.
pub fn format_units(amount: u64, decimals: u32) -> String {
    let scale = 10u64.pow(decimals);
    let whole = amount / scale;
    let frac = amount % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:0width$}", frac, width = decimals as usize);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

/// Parse a decimal string into base units. Extra precision is truncated.
pub fn parse_units(value: &str, decimals: u32) -> Option<u64> {
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut frac: String = frac.chars().take(decimals as usize).collect();
    while frac.len() < decimals as usize {
        frac.push('0');
    }
    let frac: u64 = if frac.is_empty() { 0 } else { frac.parse().ok()? };
    whole
        .checked_mul(10u64.pow(decimals))
        .and_then(|w| w.checked_add(frac))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program_failure(logs: &[&str]) -> ChainError {
        ChainError::transaction(
            "Transaction simulation failed: Error processing Instruction 0: custom program error: 0x1",
            logs.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn rate_limit_is_network() {
        let err = classify(&ChainError::http(429, "Too Many Requests"), None);
        assert_eq!(err.kind(), ErrorKind::NetworkTransient);
        assert_eq!(err.reason(), &ErrorReason::RateLimited);
        assert_eq!(err.message(), "rate limited");
    }

    #[test]
    fn transport_faults_are_network() {
        for (raw, reason) in [
            ("Network request failed", ErrorReason::NetworkRequestFailed),
            ("connect ECONNREFUSED 127.0.0.1:8899", ErrorReason::ConnectionRefused),
            ("Connection reset by peer", ErrorReason::ConnectionReset),
            ("operation timed out", ErrorReason::ConnectionTimeout),
        ] {
            let err = classify(&ChainError::rpc(raw), None);
            assert!(err.is_network(), "{raw}");
            assert_eq!(err.reason(), &reason, "{raw}");
        }
    }

    #[test]
    fn lamports_shortfall_from_logs() {
        let err = classify(
            &program_failure(&[
                "Program 11111111111111111111111111111111 invoke [1]",
                "Transfer: insufficient lamports: balance 100, need 500",
                "Program 11111111111111111111111111111111 failed: custom program error: 0x1",
            ]),
            None,
        );
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds(Some(400)));
        assert_eq!(err.amount(), Some(400));
        assert!(err.is_terminal());
    }

    #[test]
    fn lamports_shortfall_node_wording() {
        let logs = vec!["Transfer: insufficient lamports 19492200, need 20000000".to_string()];
        assert_eq!(lamports_shortfall(&logs), Some(507_800));
    }

    #[test]
    fn token_insufficient_funds() {
        let err = classify(
            &program_failure(&[
                "Program TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA invoke [1]",
                "Program log: Instruction: Transfer",
                "Program log: Error: insufficient funds",
            ]),
            None,
        );
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds(None));
        assert_eq!(err.reason(), &ErrorReason::InsufficientTokenFunds);
        // program id is scrubbed from the attached logs
        assert!(err.logs().iter().all(|l| !l.contains(TOKEN_PROGRAM_ID)));
    }

    #[test]
    fn rent_from_transaction_error() {
        let err = classify(
            &ChainError::Transaction {
                message: "Transaction simulation failed".to_string(),
                logs: Vec::new(),
                transaction_error: Some(
                    "Transaction results in an account (1) with insufficient funds for rent: 0.00089088"
                        .to_string(),
                ),
            },
            Some("recipient"),
        );
        assert_eq!(err.kind(), ErrorKind::InsufficientRent(Some(890_880)));
        assert!(err.message().starts_with("recipient account"));
    }

    #[test]
    fn rent_without_amount() {
        let err = classify(
            &ChainError::Transaction {
                message: "Transaction simulation failed".to_string(),
                logs: Vec::new(),
                transaction_error: Some(
                    "Transaction results in an account (1) with insufficient funds for rent"
                        .to_string(),
                ),
            },
            None,
        );
        assert_eq!(err.kind(), ErrorKind::InsufficientRent(None));
    }

    #[test]
    fn custom_program_error_code_extracted() {
        let err = classify(&program_failure(&["Program log: something odd"]), None);
        assert_eq!(
            err.reason(),
            &ErrorReason::CustomProgramError(Some("0x1".to_string()))
        );
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn unmatched_instruction_logs_become_message() {
        let err = classify(
            &ChainError::transaction(
                "Transaction simulation failed: Error processing Instruction 0",
                vec!["Program log: first".to_string(), "Program log: second".to_string()],
            ),
            None,
        );
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.reason(), &ErrorReason::ProgramLogs);
        assert_eq!(err.message(), "Program log: first\nProgram log: second");
    }

    #[test]
    fn logs_without_instruction_failure_keep_message() {
        let err = classify(
            &ChainError::transaction(
                "Transaction simulation failed",
                vec!["Program log: first".to_string()],
            ),
            None,
        );
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.reason(), &ErrorReason::Other);
        assert_eq!(err.message(), "Transaction simulation failed\n\nProgram log: first");
        assert_eq!(err.logs().len(), 1);
    }

    #[test]
    fn insufficient_lamports_in_message_with_logs() {
        let err = classify(
            &ChainError::transaction(
                "Transaction simulation failed: insufficient lamports",
                vec!["Program 11111111111111111111111111111111 invoke [1]".to_string()],
            ),
            None,
        );
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds(None));
        assert_eq!(err.reason(), &ErrorReason::InsufficientLamports);
    }

    #[test]
    fn insufficient_lamports_in_logs_only() {
        let err = classify(
            &ChainError::transaction(
                "Transaction simulation failed",
                vec![
                    "Program 11111111111111111111111111111111 invoke [1]".to_string(),
                    "Program log: insufficient lamports for account".to_string(),
                ],
            ),
            None,
        );
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds(None));
        assert!(err.message().starts_with("insufficient balance"));
    }

    #[test]
    fn account_not_initialized_with_logs() {
        let err = classify(
            &ChainError::transaction(
                "Attempt to debit an account but found no record of a prior credit: account not initialized",
                vec!["Program log: transfer".to_string()],
            ),
            None,
        );
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds(None));
        assert_eq!(err.reason(), &ErrorReason::InsufficientLamports);
    }

    #[test]
    fn expired_blockhash_is_network() {
        let err = classify(&ChainError::rpc("Blockhash not found"), None);
        assert!(err.is_network());
        assert!(err.is_checkpoint_expired());
    }

    #[test]
    fn signing_never_leaks_details() {
        let err = classify(
            &ChainError::Signing("secret key 0xdeadbeefdeadbeefdeadbeefdeadbeef invalid".into()),
            None,
        );
        assert_eq!(err.kind(), ErrorKind::SigningFailed);
        assert_eq!(err.message(), "signing failed");
    }

    #[test]
    fn unknown_is_sanitized() {
        let err = classify(
            &ChainError::Other("bad account 4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T".into()),
            None,
        );
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.message(), "bad account [base58_string_data]");
    }

    #[test]
    fn fee_shortfall() {
        let err = classify(
            &ChainError::rpc("Transaction simulation failed: insufficient funds for fee"),
            None,
        );
        assert_eq!(err.reason(), &ErrorReason::InsufficientFundsForFee);
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds(None));
    }

    #[test]
    fn only_last_logs_attached_to_message() {
        let logs: Vec<String> = (0..8).map(|i| format!("Program log: line {i}")).collect();
        let text = append_logs("blockhash expired", &logs);
        assert!(!text.contains("line 2"));
        assert!(text.contains("line 3"));
        assert!(text.ends_with("line 7"));
    }

    #[test]
    fn units_round_trip_display() {
        assert_eq!(format_units(400, 9), "0.0000004");
        assert_eq!(format_units(1_500_000_000, 9), "1.5");
        assert_eq!(format_units(2_000_000_000, 9), "2");
        assert_eq!(parse_units("0.00089088", 9), Some(890_880));
        assert_eq!(parse_units("3", 9), Some(3_000_000_000));
    }
}
