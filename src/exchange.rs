pub mod rest;
pub mod stream;

/// Binance USDT-M futures public endpoints. No API key is required for
/// anything this application does.
pub const FUTURES_REST_BASE: &str = "https://fapi.binance.com";
pub const FUTURES_WS_BASE: &str = "wss://fstream.binance.com";

/// Binance caps combined streams at 200 per connection; larger symbol
/// sets are sharded across several sockets.
pub const MAX_STREAMS_PER_SOCKET: usize = 200;
