//! Known event streams and how each one is archived

use alloy_primitives::Address;
use archive_common::{ArchiveError, Result};
use archive_store::ArchiveStore;
use chain_rpc::{ChainClient, LogFilter};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::archive::EventArchive;
use crate::post::{DropColumns, Pipeline, SwapNetAmounts};
use crate::processor::{AbiEventProcessor, LenientProcessor, LogProcessor};
use crate::toucher::{TokenToucher, UNISWAP_V2_FACTORY, WETH};

const WETH_DEPOSIT: &str = "event Deposit(address indexed dst, uint256 wad)";
const WETH_WITHDRAWAL: &str = "event Withdrawal(address indexed src, uint256 wad)";
const WETH_TRANSFER: &str = "event Transfer(address indexed src, address indexed dst, uint256 wad)";
const ERC20_TRANSFER: &str = "event Transfer(address indexed from, address indexed to, uint256 value)";
const UNISWAP_V2_SWAP: &str = "event Swap(address indexed sender, uint256 amount0In, uint256 amount1In, uint256 amount0Out, uint256 amount1Out, address indexed to)";
const UNISWAP_V2_PAIR_CREATED: &str =
    "event PairCreated(address indexed token0, address indexed token1, address pair, uint256)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    WethDeposit,
    WethWithdrawal,
    WethTransfer,
    TokenTransfer,
    UniswapV2Swap,
    UniswapV2PairCreated,
}

impl StreamKind {
    pub const ALL: [StreamKind; 6] = [
        StreamKind::WethDeposit,
        StreamKind::WethWithdrawal,
        StreamKind::WethTransfer,
        StreamKind::TokenTransfer,
        StreamKind::UniswapV2Swap,
        StreamKind::UniswapV2PairCreated,
    ];

    /// Table name of the stream
    pub fn name(&self) -> &'static str {
        match self {
            StreamKind::WethDeposit => "weth_deposit",
            StreamKind::WethWithdrawal => "weth_withdrawal",
            StreamKind::WethTransfer => "weth_transfer",
            StreamKind::TokenTransfer => "token_transfer",
            StreamKind::UniswapV2Swap => "uniswap_v2_swap",
            StreamKind::UniswapV2PairCreated => "uniswap_v2_pair_created",
        }
    }

    fn signature(&self) -> &'static str {
        match self {
            StreamKind::WethDeposit => WETH_DEPOSIT,
            StreamKind::WethWithdrawal => WETH_WITHDRAWAL,
            StreamKind::WethTransfer => WETH_TRANSFER,
            StreamKind::TokenTransfer => ERC20_TRANSFER,
            StreamKind::UniswapV2Swap => UNISWAP_V2_SWAP,
            StreamKind::UniswapV2PairCreated => UNISWAP_V2_PAIR_CREATED,
        }
    }

    /// Contract the stream is pinned to; `None` matches every emitter.
    fn emitter(&self) -> Option<Address> {
        match self {
            StreamKind::WethDeposit | StreamKind::WethWithdrawal | StreamKind::WethTransfer => Some(WETH),
            StreamKind::UniswapV2PairCreated => Some(UNISWAP_V2_FACTORY),
            StreamKind::TokenTransfer | StreamKind::UniswapV2Swap => None,
        }
    }

    /// Builds the archive for this stream. `toucher` is only used by the
    /// pair-creation stream, which touches both tokens of every new pair.
    pub fn build(
        &self,
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn ArchiveStore>,
        toucher: Option<Arc<TokenToucher>>,
    ) -> Result<EventArchive> {
        let decoder = AbiEventProcessor::from_signature(self.signature())?;
        let mut filter = LogFilter::new().topics(&[Some(decoder.event().selector())]);
        if let Some(emitter) = self.emitter() {
            filter = filter.address(emitter);
        }

        // Topic-only filters also catch other contracts' events sharing the
        // selector; those are skipped rather than failing.
        let processor: Arc<dyn LogProcessor> = match self.emitter() {
            Some(_) => Arc::new(decoder),
            None => Arc::new(LenientProcessor(decoder)),
        };

        let archive = EventArchive::new(chain, store, self.name(), filter, processor);
        let archive = match self {
            StreamKind::WethDeposit | StreamKind::WethWithdrawal | StreamKind::WethTransfer => {
                archive.with_post_processor(DropColumns::new(["blockHash", "address"]))
            }
            StreamKind::TokenTransfer => archive.with_post_processor(DropColumns::new(["blockHash"])),
            StreamKind::UniswapV2Swap => archive.with_post_processor(
                Pipeline::new()
                    .then(SwapNetAmounts)
                    .then(DropColumns::new(["blockHash"])),
            ),
            StreamKind::UniswapV2PairCreated => {
                let archive = archive.with_post_processor(DropColumns::new(["blockHash", "address"]));
                match toucher {
                    Some(toucher) => archive.with_token_touch(toucher, ["args_token0", "args_token1"]),
                    None => archive,
                }
            }
        };
        Ok(archive)
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StreamKind {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        StreamKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| ArchiveError::ConfigError(format!("unknown stream: {}", s)))
    }
}
