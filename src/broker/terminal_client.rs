// =============================================================================
// Terminal Client — HMAC-signed REST adapter for the broker terminal's
// HTTP bridge
// =============================================================================
//
// SECURITY: the API secret is never logged or serialized. Every signed
// request carries a timestamp + recvWindow + HMAC-SHA256 signature, the same
// shape as the venue's original REST contract, so clock drift between this
// process and the terminal is tolerated up to `RECV_WINDOW` milliseconds.

use anyhow::Context;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use crate::broker::{AccountSnapshot, BrokerGateway, BrokerPosition, OrderTicket};
use crate::domain::{Bar, SymbolInfo};
use crate::error::{BrokerErrorKind, EngineError};
use crate::types::{AccountMode, BalanceInfo, Side, Timeframe};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: u64 = 5000;

/// REST client for the broker terminal's HTTP bridge, signing every
/// account-mutating request with HMAC-SHA256.
#[derive(Clone)]
pub struct TerminalClient {
    api_key: String,
    secret: String,
    base_url: String,
    account_mode: AccountMode,
    client: reqwest::Client,
}

impl TerminalClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, base_url: impl Into<String>, account_mode: AccountMode) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();
        let base_url = base_url.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-TERMINAL-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!(%base_url, "TerminalClient initialised");

        Self {
            api_key,
            secret,
            base_url,
            account_mode,
            client,
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    fn map_err(context: &'static str, err: anyhow::Error) -> EngineError {
        EngineError::broker(BrokerErrorKind::Retryable, format!("{context}: {err}"))
    }

    fn parse_str_f64(val: &serde_json::Value) -> anyhow::Result<f64> {
        if let Some(s) = val.as_str() {
            s.parse::<f64>().with_context(|| format!("failed to parse '{s}' as f64"))
        } else if let Some(n) = val.as_f64() {
            Ok(n)
        } else {
            anyhow::bail!("expected string or number, got: {val}")
        }
    }
}

#[async_trait]
impl BrokerGateway for TerminalClient {
    #[instrument(skip(self), name = "terminal::rates")]
    async fn rates(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, EngineError> {
        let url = format!(
            "{}/api/v1/rates?symbol={}&timeframe={}&count={}",
            self.base_url, symbol, timeframe, count
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::map_err("rates request failed", e.into()))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Self::map_err("rates response parse failed", e.into()))?;

        if !status.is_success() {
            return Err(EngineError::broker(
                BrokerErrorKind::Retryable,
                format!("rates returned {status}: {body}"),
            ));
        }

        let raw = body
            .as_array()
            .ok_or_else(|| EngineError::broker(BrokerErrorKind::Retryable, "rates response is not an array"))?;

        let mut bars = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = match entry.as_array() {
                Some(a) if a.len() >= 6 => a,
                _ => {
                    warn!("skipping malformed rate entry");
                    continue;
                }
            };
            let time_ms = arr[0].as_i64().unwrap_or(0);
            let time = chrono::DateTime::from_timestamp_millis(time_ms).unwrap_or_else(chrono::Utc::now);
            let open = Self::parse_str_f64(&arr[1]).map_err(|e| Self::map_err("bad open", e))?;
            let high = Self::parse_str_f64(&arr[2]).map_err(|e| Self::map_err("bad high", e))?;
            let low = Self::parse_str_f64(&arr[3]).map_err(|e| Self::map_err("bad low", e))?;
            let close = Self::parse_str_f64(&arr[4]).map_err(|e| Self::map_err("bad close", e))?;
            let volume = Self::parse_str_f64(&arr[5]).map_err(|e| Self::map_err("bad volume", e))?;
            bars.push(Bar { time, open, high, low, close, volume });
        }

        debug!(symbol, %timeframe, count = bars.len(), "rates fetched");
        Ok(bars)
    }

    #[instrument(skip(self), name = "terminal::current_price")]
    async fn current_price(&self, symbol: &str) -> Result<f64, EngineError> {
        let url = format!("{}/api/v1/price?symbol={}", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::map_err("price request failed", e.into()))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Self::map_err("price response parse failed", e.into()))?;

        if !status.is_success() {
            return Err(EngineError::broker(BrokerErrorKind::Retryable, format!("price returned {status}")));
        }

        Self::parse_str_f64(&body["price"]).map_err(|e| Self::map_err("bad price field", e))
    }

    #[instrument(skip(self), name = "terminal::spread")]
    async fn spread(&self, symbol: &str) -> Result<f64, EngineError> {
        let url = format!("{}/api/v1/spread?symbol={}", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::map_err("spread request failed", e.into()))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Self::map_err("spread response parse failed", e.into()))?;

        if !status.is_success() {
            return Err(EngineError::broker(BrokerErrorKind::Retryable, format!("spread returned {status}")));
        }

        Self::parse_str_f64(&body["spread"]).map_err(|e| Self::map_err("bad spread field", e))
    }

    #[instrument(skip(self), name = "terminal::symbol_info")]
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, EngineError> {
        let url = format!("{}/api/v1/symbols/{}", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::map_err("symbol info request failed", e.into()))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Self::map_err("symbol info response parse failed", e.into()))?;

        if status.as_u16() == 422 {
            return Err(EngineError::broker(BrokerErrorKind::SymbolInvalid, format!("{body}")));
        }
        if !status.is_success() {
            return Err(EngineError::broker(BrokerErrorKind::Retryable, format!("symbol info returned {status}")));
        }

        let point = Self::parse_str_f64(&body["point"]).unwrap_or(0.0001);
        let pip_size = body["pipSize"]
            .as_f64()
            .or_else(|| body["pipSize"].as_str().and_then(|s| s.parse().ok()))
            .unwrap_or_else(|| derive_pip_size(symbol, point));

        Ok(SymbolInfo {
            symbol: symbol.to_string(),
            pip_size,
            lot_step: Self::parse_str_f64(&body["volStep"]).unwrap_or(0.01),
            min_lot: Self::parse_str_f64(&body["minVol"]).unwrap_or(0.01),
            max_lot: Self::parse_str_f64(&body["maxVol"]).unwrap_or(100.0),
            contract_size: Self::parse_str_f64(&body["contractSize"]).unwrap_or(100_000.0),
        })
    }

    #[instrument(skip(self), name = "terminal::account")]
    async fn account(&self) -> Result<AccountSnapshot, EngineError> {
        let qs = self.signed_query("");
        let url = format!("{}/api/v1/account?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::map_err("account request failed", e.into()))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Self::map_err("account response parse failed", e.into()))?;

        if !status.is_success() {
            return Err(EngineError::broker(BrokerErrorKind::Retryable, format!("account returned {status}: {body}")));
        }

        let balances: Vec<BalanceInfo> = body["balances"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|b| {
                        Some(BalanceInfo {
                            asset: b["asset"].as_str()?.to_string(),
                            free: Self::parse_str_f64(&b["free"]).unwrap_or(0.0),
                            locked: Self::parse_str_f64(&b["locked"]).unwrap_or(0.0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let equity = Self::parse_str_f64(&body["equity"]).unwrap_or(0.0);
        let balance = Self::parse_str_f64(&body["balance"]).unwrap_or(equity);
        let margin_used = Self::parse_str_f64(&body["marginUsed"]).unwrap_or(0.0);

        debug!(equity, balance, "account snapshot retrieved");
        Ok(AccountSnapshot {
            mode: self.account_mode,
            equity,
            balance,
            margin_used,
            balances,
        })
    }

    #[instrument(skip(self), name = "terminal::open_positions")]
    async fn open_positions(&self) -> Result<Vec<BrokerPosition>, EngineError> {
        let qs = self.signed_query("");
        let url = format!("{}/api/v1/positions?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::map_err("positions request failed", e.into()))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Self::map_err("positions response parse failed", e.into()))?;

        if !status.is_success() {
            return Err(EngineError::broker(BrokerErrorKind::Retryable, format!("positions returned {status}")));
        }

        let raw = body.as_array().cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(raw.len());
        for p in raw {
            let side = match p["side"].as_str() {
                Some("BUY") => Side::Buy,
                Some("SELL") => Side::Sell,
                _ => continue,
            };
            out.push(BrokerPosition {
                ticket: p["ticket"].as_str().unwrap_or_default().to_string(),
                symbol: p["symbol"].as_str().unwrap_or_default().to_string(),
                side,
                volume: Self::parse_str_f64(&p["volume"]).unwrap_or(0.0),
                entry_price: Self::parse_str_f64(&p["entryPrice"]).unwrap_or(0.0),
            });
        }
        Ok(out)
    }

    #[instrument(skip(self), name = "terminal::open_position")]
    async fn open_position(
        &self,
        symbol: &str,
        side: Side,
        volume: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> Result<OrderTicket, EngineError> {
        let side_str = match side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let params = format!(
            "symbol={symbol}&side={side_str}&volume={volume}&stopLoss={stop_loss}&takeProfit={take_profit}"
        );
        let qs = self.signed_query(&params);
        let url = format!("{}/api/v1/orders?{}", self.base_url, qs);

        debug!(symbol, side = side_str, volume, "opening position");

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| Self::map_err("open position request failed", e.into()))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Self::map_err("open position response parse failed", e.into()))?;

        if status.as_u16() == 409 {
            return Err(EngineError::broker(BrokerErrorKind::InsufficientMargin, format!("{body}")));
        }
        if status.as_u16() == 422 {
            return Err(EngineError::broker(BrokerErrorKind::SymbolInvalid, format!("{body}")));
        }
        if !status.is_success() {
            return Err(EngineError::broker(BrokerErrorKind::Rejected, format!("order rejected {status}: {body}")));
        }

        let ticket = body["ticket"].as_str().unwrap_or_default().to_string();
        let fill_price = Self::parse_str_f64(&body["fillPrice"]).unwrap_or(0.0);

        debug!(symbol, ticket, "position opened");
        Ok(OrderTicket { ticket, symbol: symbol.to_string(), side, volume, fill_price })
    }

    #[instrument(skip(self), name = "terminal::modify_stop")]
    async fn modify_stop(&self, ticket: &str, stop_loss: f64) -> Result<(), EngineError> {
        let params = format!("ticket={ticket}&stopLoss={stop_loss}");
        let qs = self.signed_query(&params);
        let url = format!("{}/api/v1/orders/modify?{}", self.base_url, qs);

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| Self::map_err("modify stop request failed", e.into()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::broker(BrokerErrorKind::Rejected, format!("modify stop returned {status}")));
        }
        Ok(())
    }

    #[instrument(skip(self), name = "terminal::close_position")]
    async fn close_position(&self, ticket: &str) -> Result<f64, EngineError> {
        let params = format!("ticket={ticket}");
        let qs = self.signed_query(&params);
        let url = format!("{}/api/v1/orders/close?{}", self.base_url, qs);

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| Self::map_err("close position request failed", e.into()))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Self::map_err("close position response parse failed", e.into()))?;

        if !status.is_success() {
            return Err(EngineError::broker(BrokerErrorKind::Rejected, format!("close returned {status}: {body}")));
        }

        Self::parse_str_f64(&body["closePrice"]).map_err(|e| Self::map_err("bad closePrice field", e))
    }
}

/// `pipSize = point×10`, except JPY-quoted pairs (`point×100`) and `XAUUSD`
/// (fixed `0.1`), used when the terminal doesn't report `pipSize` directly.
fn derive_pip_size(symbol: &str, point: f64) -> f64 {
    if symbol.eq_ignore_ascii_case("XAUUSD") {
        0.1
    } else if symbol.to_ascii_uppercase().ends_with("JPY") {
        point * 100.0
    } else {
        point * 10.0
    }
}

impl std::fmt::Debug for TerminalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("account_mode", &self.account_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pip_size_follows_the_jpy_and_gold_exceptions() {
        assert!((derive_pip_size("EURUSD", 0.00001) - 0.0001).abs() < 1e-12);
        assert!((derive_pip_size("USDJPY", 0.001) - 0.1).abs() < 1e-12);
        assert!((derive_pip_size("XAUUSD", 0.01) - 0.1).abs() < 1e-12);
        assert!((derive_pip_size("xauusd", 0.01) - 0.1).abs() < 1e-12);
    }
}
