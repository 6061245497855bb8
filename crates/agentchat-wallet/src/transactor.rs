use agentchat_core::collab::{SubmitError, TransactionReceipt, TransactionSubmitter};
use agentchat_core::normalize::{TransactionCall, TransactionPayload};
use alloy::{
    network::{Ethereum, EthereumWallet, TransactionBuilder},
    primitives::{Address, B256, Bytes, U256},
    providers::{
        Identity, Provider, ProviderBuilder, RootProvider,
        fillers::{
            BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller,
            WalletFiller,
        },
    },
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::str::FromStr;

use crate::{BASE_CHAIN_ID, BASESCAN_TX_URL};

/// The concrete provider type returned by `ProviderBuilder::new().wallet(..).connect_http(..)`.
type WalletProvider = FillProvider<
    JoinFill<
        JoinFill<
            Identity,
            JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
        >,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider,
    Ethereum,
>;

/// Executes `walletSendCalls` requests on Base, one transaction per call.
pub struct BaseTransactor {
    provider: WalletProvider,
    address: Address,
}

impl BaseTransactor {
    pub fn new(signer: PrivateKeySigner, rpc_url: &str) -> Result<Self> {
        let address = signer.address();
        let provider = ProviderBuilder::new()
            .wallet(signer)
            .connect_http(rpc_url.parse().context("invalid RPC URL")?);
        Ok(Self { provider, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

fn parse_hex_u256(raw: &str) -> Result<U256, SubmitError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| SubmitError::Invalid(format!("bad value {raw}: {e}")))
}

/// Convert one call into an alloy request for `chain_id`.
pub fn to_alloy_request(call: &TransactionCall, chain_id: u64) -> Result<TransactionRequest, SubmitError> {
    let to = call
        .to
        .as_deref()
        .ok_or_else(|| SubmitError::Invalid("call has no recipient".into()))?;
    let to = Address::from_str(to).map_err(|e| SubmitError::Invalid(format!("bad recipient {to}: {e}")))?;

    let mut tx = TransactionRequest::default()
        .with_to(to)
        .with_chain_id(chain_id);
    if let Some(value) = call.value.as_deref() {
        tx = tx.with_value(parse_hex_u256(value)?);
    }
    if let Some(data) = call.data.as_deref() {
        let data = Bytes::from_str(data).map_err(|e| SubmitError::Invalid(format!("bad calldata: {e}")))?;
        tx = tx.with_input(data);
    }
    Ok(tx)
}

fn chain_of(payload: &TransactionPayload) -> Result<u64, SubmitError> {
    if payload.chain_id.is_empty() {
        return Ok(BASE_CHAIN_ID);
    }
    payload
        .chain_id_u64()
        .ok_or_else(|| SubmitError::Invalid(format!("bad chain id {}", payload.chain_id)))
}

#[async_trait]
impl TransactionSubmitter for BaseTransactor {
    async fn submit(&self, payload: &TransactionPayload) -> Result<TransactionReceipt, SubmitError> {
        let chain_id = chain_of(payload)?;
        if chain_id != BASE_CHAIN_ID {
            return Err(SubmitError::Invalid(format!("unsupported chain {chain_id}")));
        }
        if payload.calls.is_empty() {
            return Err(SubmitError::Invalid("no calls".into()));
        }
        let requests = payload
            .calls
            .iter()
            .map(|call| to_alloy_request(call, chain_id))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tx_hashes = Vec::with_capacity(requests.len());
        for tx in requests {
            let pending = self
                .provider
                .send_transaction(tx)
                .await
                .map_err(|e| SubmitError::Failed(e.to_string()))?;
            let tx_hash = *pending.tx_hash();
            tracing::info!(%tx_hash, "transaction sent, waiting for confirmation");
            pending
                .get_receipt()
                .await
                .map_err(|e| SubmitError::Failed(e.to_string()))?;
            tx_hashes.push(format!("{tx_hash:#x}"));
        }
        Ok(TransactionReceipt { tx_hashes })
    }
}

/// Build a basescan explorer URL for a transaction hash.
pub fn explorer_url(tx_hash: &B256) -> String {
    format!("{BASESCAN_TX_URL}{tx_hash:#x}")
}
