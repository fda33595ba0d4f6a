//! Static mapping between the snapshot provider's asset identifiers and
//! exchange ticker symbols used by the streaming feeds.

/// (canonical id, exchange ticker)
const SYMBOL_TABLE: &[(&str, &str)] = &[
    ("bitcoin", "BTC"),
    ("ethereum", "ETH"),
    ("tether", "USDT"),
    ("binancecoin", "BNB"),
    ("solana", "SOL"),
    ("ripple", "XRP"),
    ("usd-coin", "USDC"),
    ("staked-ether", "STETH"),
    ("cardano", "ADA"),
    ("dogecoin", "DOGE"),
    ("avalanche-2", "AVAX"),
    ("tron", "TRX"),
    ("polkadot", "DOT"),
    ("chainlink", "LINK"),
    ("matic-network", "MATIC"),
    ("wrapped-bitcoin", "WBTC"),
    ("shiba-inu", "SHIB"),
    ("litecoin", "LTC"),
    ("bitcoin-cash", "BCH"),
    ("uniswap", "UNI"),
    ("cosmos", "ATOM"),
    ("stellar", "XLM"),
    ("ethereum-classic", "ETC"),
    ("monero", "XMR"),
    ("filecoin", "FIL"),
    ("internet-computer", "ICP"),
    ("aptos", "APT"),
    ("near", "NEAR"),
    ("arbitrum", "ARB"),
    ("optimism", "OP"),
    ("vechain", "VET"),
    ("algorand", "ALGO"),
    ("the-graph", "GRT"),
    ("aave", "AAVE"),
    ("maker", "MKR"),
    ("sui", "SUI"),
    ("pepe", "PEPE"),
    ("toncoin", "TON"),
    ("hedera-hashgraph", "HBAR"),
    ("injective-protocol", "INJ"),
];

/// Read-only, process-wide translation between identifier spaces
pub struct SymbolMap;

impl SymbolMap {
    /// Exchange ticker for a canonical asset id (e.g. "bitcoin" -> "BTC")
    pub fn ticker_for(id: &str) -> Option<&'static str> {
        SYMBOL_TABLE
            .iter()
            .find(|(known_id, _)| known_id.eq_ignore_ascii_case(id))
            .map(|(_, ticker)| *ticker)
    }

    /// Canonical asset id for an exchange ticker (e.g. "btc" -> "bitcoin")
    pub fn id_for(ticker: &str) -> Option<&'static str> {
        SYMBOL_TABLE
            .iter()
            .find(|(_, known)| known.eq_ignore_ascii_case(ticker))
            .map(|(id, _)| *id)
    }

    /// Ticker to subscribe to for a coin, falling back to its own symbol
    pub fn stream_symbol(id: &str, symbol: &str) -> String {
        Self::ticker_for(id)
            .map(str::to_string)
            .unwrap_or_else(|| symbol.to_uppercase())
    }
}
