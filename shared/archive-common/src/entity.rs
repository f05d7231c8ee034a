//! Token metadata entity

use serde::{Deserialize, Serialize};

use crate::record::ArchiveRecord;

/// Marker stored for optional metadata that could not be determined
pub const UNKNOWN: &str = "unknown";

/// Table holding one row per touched token
pub const TOKEN_INFO_TABLE: &str = "token_info";

/// Key column of the token table
pub const TOKEN_KEY_COLUMN: &str = "address";

/// Metadata of an ERC-20 token, keyed by checksum address.
///
/// `name`, `symbol`, `decimals` and `total_supply` come from the token
/// contract itself; the remaining fields are best effort and default to
/// [`UNKNOWN`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntity {
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub decimals: String,
    pub total_supply: String,
    pub creation_block: String,
    pub creation_time: String,
    pub deployer: String,
    pub pair_address: String,
}

impl TokenEntity {
    pub fn new(
        address: impl Into<String>,
        name: impl Into<String>,
        symbol: impl Into<String>,
        decimals: impl Into<String>,
        total_supply: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            symbol: symbol.into(),
            decimals: decimals.into(),
            total_supply: total_supply.into(),
            creation_block: UNKNOWN.to_string(),
            creation_time: UNKNOWN.to_string(),
            deployer: UNKNOWN.to_string(),
            pair_address: UNKNOWN.to_string(),
        }
    }

    pub fn to_record(&self) -> ArchiveRecord {
        ArchiveRecord::from([
            (TOKEN_KEY_COLUMN, self.address.as_str()),
            ("name", self.name.as_str()),
            ("symbol", self.symbol.as_str()),
            ("decimals", self.decimals.as_str()),
            ("totalSupply", self.total_supply.as_str()),
            ("creationBlock", self.creation_block.as_str()),
            ("creationTime", self.creation_time.as_str()),
            ("deployer", self.deployer.as_str()),
            ("pairAddress", self.pair_address.as_str()),
        ])
    }

    pub fn from_record(record: &ArchiveRecord) -> Option<Self> {
        let field = |name: &str| record.get(name).unwrap_or(UNKNOWN).to_string();
        Some(Self {
            address: record.get(TOKEN_KEY_COLUMN)?.to_string(),
            name: field("name"),
            symbol: field("symbol"),
            decimals: field("decimals"),
            total_supply: field("totalSupply"),
            creation_block: field("creationBlock"),
            creation_time: field("creationTime"),
            deployer: field("deployer"),
            pair_address: field("pairAddress"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_fields_default_to_unknown() {
        let token = TokenEntity::new("0xC02a", "Wrapped Ether", "WETH", "18", "1000");
        assert_eq!(token.deployer, UNKNOWN);
        assert_eq!(token.pair_address, UNKNOWN);
        let record = token.to_record();
        assert_eq!(record.get("creationBlock"), Some(UNKNOWN));
        assert_eq!(TokenEntity::from_record(&record), Some(token));
    }
}
