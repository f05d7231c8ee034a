//! Token metadata, fetched once per token
//!
//! Touching a token writes its metadata row only when none exists yet; a
//! stored row is never refreshed unless [`TokenToucher::update`] is called.

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{address, Address, Bytes};
use archive_common::{
    ArchiveError, ReadQuery, Result, TokenEntity, WriteMode, TOKEN_INFO_TABLE, TOKEN_KEY_COLUMN,
    UNKNOWN,
};
use archive_store::ArchiveStore;
use async_trait::async_trait;
use chain_rpc::{ChainClient, ChecksumCache, ExplorerClient};
use chrono::SecondsFormat;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
pub const UNISWAP_V2_FACTORY: Address = address!("5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f");

const NAME: [u8; 4] = [0x06, 0xfd, 0xde, 0x03];
const SYMBOL: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];
const DECIMALS: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];
const TOTAL_SUPPLY: [u8; 4] = [0x18, 0x16, 0x0d, 0xdd];
const GET_PAIR: [u8; 4] = [0xe6, 0xa4, 0x39, 0x05];

/// Where token metadata comes from
#[async_trait]
pub trait TokenMetadataSource: Send + Sync {
    /// Full metadata for a checksum address
    async fn fetch(&self, address: &str) -> Result<TokenEntity>;
}

pub struct TokenToucher {
    store: Arc<dyn ArchiveStore>,
    source: Arc<dyn TokenMetadataSource>,
    addresses: ChecksumCache,
    table: String,
}

impl TokenToucher {
    pub fn new(
        store: Arc<dyn ArchiveStore>,
        source: Arc<dyn TokenMetadataSource>,
        address_cache_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            store,
            source,
            addresses: ChecksumCache::new(address_cache_size)?,
            table: TOKEN_INFO_TABLE.to_string(),
        })
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether a row exists for the token. More than one row is corrupt state.
    pub async fn exists(&self, address: &str) -> Result<bool> {
        let address = self.addresses.checksum(address)?;
        if !self.store.table_exists(&self.table).await? {
            return Ok(false);
        }
        let count = self
            .store
            .count_where(&self.table, TOKEN_KEY_COLUMN, &address)
            .await?;
        if count > 1 {
            return Err(ArchiveError::DuplicateEntity {
                table: self.table.clone(),
                id: address,
                count,
            });
        }
        Ok(count == 1)
    }

    /// Fetches and stores metadata if the token is not stored yet. Returns
    /// whether a fetch happened.
    #[instrument(skip(self))]
    pub async fn touch(&self, address: &str) -> Result<bool> {
        if self.exists(address).await? {
            debug!("Token already known");
            return Ok(false);
        }
        self.update(address).await?;
        Ok(true)
    }

    /// Fetches metadata and overwrites whatever is stored.
    pub async fn update(&self, address: &str) -> Result<TokenEntity> {
        let address = self.addresses.checksum(address)?;
        let token = self.source.fetch(&address).await?;
        self.store
            .write(
                &[token.to_record()],
                &self.table,
                &[TOKEN_KEY_COLUMN.to_string()],
                WriteMode::InsertOrUpdate,
            )
            .await?;
        info!("🪙 Added {} ({}) to {}", address, token.symbol, self.table);
        Ok(token)
    }

    pub async fn get(&self, address: &str, touch: bool) -> Result<Option<TokenEntity>> {
        if touch {
            self.touch(address).await?;
        }
        let address = self.addresses.checksum(address)?;
        if !self.store.table_exists(&self.table).await? {
            return Ok(None);
        }
        let batch = self
            .store
            .read(&ReadQuery::filter(&self.table, TOKEN_KEY_COLUMN, &address))
            .await?;
        Ok(batch.to_records().first().and_then(TokenEntity::from_record))
    }

    /// Removes the token's row; returns whether anything was removed.
    pub async fn delete(&self, address: &str) -> Result<bool> {
        let address = self.addresses.checksum(address)?;
        if !self.store.table_exists(&self.table).await? {
            return Ok(false);
        }
        let deleted = self
            .store
            .delete_where(&self.table, TOKEN_KEY_COLUMN, &address)
            .await?;
        if deleted > 0 {
            info!("Deleted {} from {}", address, self.table);
        }
        Ok(deleted > 0)
    }
}

/// ERC-20 metadata read from the chain, with explorer and Uniswap V2 extras
pub struct Erc20MetadataSource {
    chain: Arc<dyn ChainClient>,
    explorer: Arc<dyn ExplorerClient>,
    factory: Address,
    quote: Address,
}

impl Erc20MetadataSource {
    pub fn new(chain: Arc<dyn ChainClient>, explorer: Arc<dyn ExplorerClient>) -> Self {
        Self {
            chain,
            explorer,
            factory: UNISWAP_V2_FACTORY,
            quote: WETH,
        }
    }

    /// Pair lookups against another factory and quote token
    pub fn with_pair_factory(mut self, factory: Address, quote: Address) -> Self {
        self.factory = factory;
        self.quote = quote;
        self
    }

    async fn call(&self, to: Address, selector: [u8; 4], args: &[Address]) -> Result<Bytes> {
        let mut data = selector.to_vec();
        for arg in args {
            data.extend_from_slice(arg.into_word().as_slice());
        }
        self.chain.call(to, Bytes::from(data)).await
    }

    async fn call_text(&self, token: Address, selector: [u8; 4]) -> Result<String> {
        let out = self.call(token, selector, &[]).await?;
        decode_text(&out)
    }

    async fn call_uint(&self, token: Address, selector: [u8; 4]) -> Result<String> {
        let out = self.call(token, selector, &[]).await?;
        match DynSolType::Uint(256).abi_decode(&out) {
            Ok(DynSolValue::Uint(value, _)) => Ok(value.to_string()),
            _ => Err(ArchiveError::Decode(format!("{} returned no integer", token))),
        }
    }

    async fn pair_address(&self, token: Address) -> Result<Address> {
        let out = self.call(self.factory, GET_PAIR, &[self.quote, token]).await?;
        match DynSolType::Address.abi_decode(&out) {
            Ok(DynSolValue::Address(pair)) if pair != Address::ZERO => Ok(pair),
            Ok(_) => Err(ArchiveError::Decode(format!("no pair for {}", token))),
            Err(e) => Err(ArchiveError::Decode(format!("getPair: {}", e))),
        }
    }

    /// Deployer, creation block and creation time, each `unknown` on failure
    async fn creation(&self, token: Address) -> (String, String, String) {
        let creation = match self.explorer.get_contract_creation(&token).await {
            Ok(creation) => creation,
            Err(e) => {
                debug!("No creation record for {}: {}", token, e);
                return (UNKNOWN.to_string(), UNKNOWN.to_string(), UNKNOWN.to_string());
            }
        };
        let Some(block) = creation.block_number else {
            return (creation.deployer, UNKNOWN.to_string(), UNKNOWN.to_string());
        };
        let time = match self.chain.get_block_timestamp(block).await {
            Ok(ts) => ts.to_rfc3339_opts(SecondsFormat::Secs, true),
            Err(e) => {
                debug!("No timestamp for creation block {}: {}", block, e);
                UNKNOWN.to_string()
            }
        };
        (creation.deployer, block.to_string(), time)
    }
}

#[async_trait]
impl TokenMetadataSource for Erc20MetadataSource {
    async fn fetch(&self, address: &str) -> Result<TokenEntity> {
        let token = Address::from_str(address)
            .map_err(|e| ArchiveError::Decode(format!("invalid address {}: {}", address, e)))?;

        let mut entity = TokenEntity::new(
            address,
            self.call_text(token, NAME).await?,
            self.call_text(token, SYMBOL).await?,
            self.call_uint(token, DECIMALS).await?,
            self.call_uint(token, TOTAL_SUPPLY).await?,
        );

        let (deployer, block, time) = self.creation(token).await;
        entity.deployer = deployer;
        entity.creation_block = block;
        entity.creation_time = time;

        match self.pair_address(token).await {
            Ok(pair) => entity.pair_address = pair.to_checksum(None),
            Err(e) => debug!("No Uniswap V2 pair for {}: {}", address, e),
        }
        Ok(entity)
    }
}

/// `string` return data, or a zero-padded `bytes32` as some early tokens use
fn decode_text(out: &[u8]) -> Result<String> {
    if let Ok(DynSolValue::String(s)) = DynSolType::String.abi_decode(out) {
        return Ok(s);
    }
    if out.len() == 32 {
        let end = out.iter().position(|b| *b == 0).unwrap_or(32);
        return Ok(String::from_utf8_lossy(&out[..end]).into_owned());
    }
    Err(ArchiveError::Decode(format!(
        "return data is neither string nor bytes32 ({} bytes)",
        out.len()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_string() {
        let encoded = DynSolValue::String("Wrapped Ether".to_string()).abi_encode();
        assert_eq!(decode_text(&encoded).unwrap(), "Wrapped Ether");
    }

    #[test]
    fn test_decode_text_bytes32() {
        let mut word = [0u8; 32];
        word[..3].copy_from_slice(b"MKR");
        assert_eq!(decode_text(&word).unwrap(), "MKR");
        assert!(decode_text(&[0u8; 5]).is_err());
    }
}
