//! Chain identifiers accepted by iWan's `chainType` parameter.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainType {
    #[serde(rename = "WAN")]
    Wan,
    #[serde(rename = "ETH")]
    Eth,
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "LTC")]
    Ltc,
    #[serde(rename = "DOGE")]
    Doge,
    #[serde(rename = "XRP")]
    Xrp,
    #[serde(rename = "EOS")]
    Eos,
    #[serde(rename = "BNB")]
    Bnb,
    #[serde(rename = "AVAX")]
    Avax,
    #[serde(rename = "MATIC")]
    Matic,
    #[serde(rename = "DOT")]
    Dot,
}

impl ChainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wan => "WAN",
            Self::Eth => "ETH",
            Self::Btc => "BTC",
            Self::Ltc => "LTC",
            Self::Doge => "DOGE",
            Self::Xrp => "XRP",
            Self::Eos => "EOS",
            Self::Bnb => "BNB",
            Self::Avax => "AVAX",
            Self::Matic => "MATIC",
            Self::Dot => "DOT",
        }
    }
}

impl std::fmt::Display for ChainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChainType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WAN" => Ok(Self::Wan),
            "ETH" => Ok(Self::Eth),
            "BTC" => Ok(Self::Btc),
            "LTC" => Ok(Self::Ltc),
            "DOGE" => Ok(Self::Doge),
            "XRP" => Ok(Self::Xrp),
            "EOS" => Ok(Self::Eos),
            "BNB" => Ok(Self::Bnb),
            "AVAX" => Ok(Self::Avax),
            "MATIC" => Ok(Self::Matic),
            "DOT" => Ok(Self::Dot),
            other => Err(format!("unsupported chain type: {other}")),
        }
    }
}
