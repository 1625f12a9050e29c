use kestrel_primitives::Transaction;
use kestrel_txpool::{TxVerifyStatus, VerifyKind};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendTransactionRequest {
    /// Hex-encoded borsh-serialized transaction, with or without a `0x`
    /// prefix.
    pub tx: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendTransactionResponse {
    pub hash: String,
    pub accepted: bool,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionView {
    pub hash: String,
    pub kind: String,
    pub payer: String,
    pub nonce: u64,
    pub gas_price: u64,
    pub gas_limit: u64,
}

impl From<&Transaction> for TransactionView {
    fn from(tx: &Transaction) -> Self {
        Self {
            hash: tx.hash().to_string(),
            kind: format!("{:?}", tx.kind),
            payer: tx.payer.to_string(),
            nonce: tx.nonce,
            gas_price: tx.gas_price,
            gas_limit: tx.gas_limit,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxStatusView {
    pub hash: String,
    pub checks: Vec<CheckView>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckView {
    pub kind: String,
    pub height: u64,
    pub ok: bool,
}

impl From<TxVerifyStatus> for TxStatusView {
    fn from(status: TxVerifyStatus) -> Self {
        Self {
            hash: status.hash.to_string(),
            checks: status
                .results
                .iter()
                .map(|result| CheckView {
                    kind: match result.kind {
                        VerifyKind::Stateless => "stateless".to_string(),
                        VerifyKind::Stateful => "stateful".to_string(),
                    },
                    height: result.height,
                    ok: result.result.is_ok(),
                })
                .collect(),
        }
    }
}
