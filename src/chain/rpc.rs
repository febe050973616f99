//! Concrete [`ChainClient`] speaking the Substrate JSON-RPC surface over a
//! websocket connection.

use crate::chain::client::{ChainClient, HeaderStream};
use crate::chain::types::{BlockHash, Header, SignedBlockParts, StorageKey, StorageProof};
use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use futures::StreamExt;
use jsonrpsee::core::client::{ClientT, SubscriptionClientT};
use jsonrpsee::rpc_params;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// twox128("System") ++ twox128("Events"); the event log lives here on every
/// chain built from the standard frame-system pallet.
const SYSTEM_EVENTS_STORAGE_KEY: &str =
    "0x26aa394eea5630e07c48ae0c9558cef780d41e5e16056765bc8461851072c9d7";

#[derive(Debug, Deserialize)]
struct RawHeader {
    number: String,
}

#[derive(Debug, Deserialize)]
struct RawSignedBlock {
    block: RawBlock,
    justifications: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    header: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawReadProof {
    at: String,
    proof: Vec<String>,
}

/// jsonrpsee websocket client for a Substrate node.
#[derive(Clone)]
pub struct SubstrateRpcClient {
    client: Arc<WsClient>,
    url: String,
}

impl SubstrateRpcClient {
    /// Connects to the node at `url` (a `ws://` or `wss://` endpoint).
    pub async fn connect(url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let url = url.into();
        let client = WsClientBuilder::default()
            .request_timeout(request_timeout)
            .build(&url)
            .await
            .with_context(|| format!("failed to connect chain RPC endpoint {url}"))?;

        Ok(Self {
            client: Arc::new(client),
            url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn parse_header(raw: RawHeader) -> Result<Header> {
        let digits = raw.number.strip_prefix("0x").unwrap_or(&raw.number);
        let number = u64::from_str_radix(digits, 16)
            .with_context(|| format!("invalid header number {:?}", raw.number))?;
        Ok(Header { number })
    }

    fn decode_hex_blob(value: &str) -> Result<Vec<u8>> {
        let stripped = value.strip_prefix("0x").unwrap_or(value);
        hex::decode(stripped).context("invalid hex blob in RPC response")
    }
}

impl ChainClient for SubstrateRpcClient {
    fn block_hash(&self, number: u64) -> BoxFuture<'_, Result<BlockHash>> {
        Box::pin(async move {
            let hash: Option<String> = self
                .client
                .request("chain_getBlockHash", rpc_params![number])
                .await
                .with_context(|| format!("chain_getBlockHash({number}) failed"))?;
            let hash = hash.ok_or_else(|| anyhow!("no canonical hash for block #{number}"))?;
            BlockHash::from_hex(&hash)
        })
    }

    fn block_parts(&self, hash: BlockHash) -> BoxFuture<'_, Result<SignedBlockParts>> {
        Box::pin(async move {
            let signed: Option<RawSignedBlock> = self
                .client
                .request("chain_getBlock", rpc_params![hash.to_hex()])
                .await
                .with_context(|| format!("chain_getBlock({hash}) failed"))?;
            let signed = signed.ok_or_else(|| anyhow!("block {hash} not found"))?;

            let header = serde_json::to_vec(&signed.block.header)
                .context("failed to encode block header")?;
            let justification = match signed.justifications {
                Some(value) if !value.is_null() => {
                    serde_json::to_vec(&value).context("failed to encode justifications")?
                }
                _ => Vec::new(),
            };

            Ok(SignedBlockParts {
                header,
                justification,
            })
        })
    }

    fn storage<'a>(
        &'a self,
        key: &'a StorageKey,
        at: BlockHash,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let value: Option<String> = self
                .client
                .request("state_getStorage", rpc_params![key.to_hex(), at.to_hex()])
                .await
                .with_context(|| format!("state_getStorage({key}, {at}) failed"))?;
            match value {
                Some(value) => Self::decode_hex_blob(&value),
                None => Ok(Vec::new()),
            }
        })
    }

    fn read_proof<'a>(
        &'a self,
        key: &'a StorageKey,
        at: BlockHash,
    ) -> BoxFuture<'a, Result<StorageProof>> {
        Box::pin(async move {
            let response: RawReadProof = self
                .client
                .request(
                    "state_getReadProof",
                    rpc_params![vec![key.to_hex()], at.to_hex()],
                )
                .await
                .with_context(|| format!("state_getReadProof({key}, {at}) failed"))?;

            let at = BlockHash::from_hex(&response.at)?;
            let proof = response
                .proof
                .iter()
                .map(|node| Self::decode_hex_blob(node))
                .collect::<Result<Vec<_>>>()?;

            Ok(StorageProof { at, proof })
        })
    }

    fn events_storage_key(&self) -> BoxFuture<'_, Result<StorageKey>> {
        Box::pin(async move { StorageKey::from_hex(SYSTEM_EVENTS_STORAGE_KEY) })
    }

    fn subscribe_finalized_heads(&self) -> BoxFuture<'_, Result<HeaderStream>> {
        Box::pin(async move {
            let subscription = self
                .client
                .subscribe::<RawHeader, _>(
                    "chain_subscribeFinalizedHeads",
                    rpc_params![],
                    "chain_unsubscribeFinalizedHeads",
                )
                .await
                .context("chain_subscribeFinalizedHeads failed")?;

            let stream: HeaderStream = Box::pin(subscription.map(|item| {
                let raw = item.context("finalized-heads subscription yielded invalid header")?;
                Self::parse_header(raw)
            }));

            Ok(stream)
        })
    }
}
