//! LNURL client.
//!
//! [`LnUrlClient::resolve`] turns a scanned string into one of the
//! [`LnUrlResponse`] variants. Withdraw and pay resolutions leave a pending
//! slot behind that the matching `finish_*` call consumes.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bech32::{FromBase32, ToBase32, Variant};
use bitcoin::Network;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

pub use auth::{LinkKey, LinkKeyDeriver};
pub use error::Error;
pub use pay::{PayInfo, SuccessAction};

pub mod auth;
pub mod error;
pub mod pay;
pub mod withdraw;

pub const DEFAULT_MAX_DERIVATION_ATTEMPTS: u32 = 16;

const LIGHTNING_PREFIX: &str = "lightning:";

/// LUD-17 schemes, each standing in for `https://` (or `http://` on onion hosts)
const LUD17_SCHEMES: [&str; 4] = ["lnurlp://", "lnurlw://", "lnurlc://", "keyauth://"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LnUrl {
    url: String,
}

impl LnUrl {
    pub fn new(url: Url) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn encode(&self) -> Result<String, Error> {
        let base32 = self.url.as_bytes().to_base32();
        bech32::encode("lnurl", base32, Variant::Bech32).map_err(|_| Error::InvalidLnUrl)
    }
}

impl Display for LnUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

impl FromStr for LnUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.to_lowercase().starts_with("lnurl") {
            let (_, data, _) = bech32::decode(s).map_err(|_| Error::InvalidLnUrl)?;
            let bytes = Vec::<u8>::from_base32(&data).map_err(|_| Error::InvalidLnUrl)?;
            let url = String::from_utf8(bytes).map_err(|_| Error::InvalidLnUrl)?;
            Ok(LnUrl { url })
        } else {
            Err(Error::InvalidLnUrl)
        }
    }
}

fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| c.is_whitespace() || c == ',' || c == '"')
        .map(|token| token.trim_matches(|c: char| matches!(c, '<' | '>' | '(' | ')' | '\'')))
        .filter(|token| !token.is_empty())
        .map(|token| match token.get(..LIGHTNING_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(LIGHTNING_PREFIX) => {
                &token[LIGHTNING_PREFIX.len()..]
            }
            _ => token,
        })
}

/// Finds the first LNURL or LUD-17 url in `text`, or failing that the first
/// lightning address.
pub fn extract(text: &str) -> Result<String, Error> {
    for token in tokens(text) {
        let lower = token.to_lowercase();

        // fallback scheme, https://service.com/?lightning=LNURL1...
        if let Some(pos) = lower.find("lightning=lnurl1") {
            let start = pos + "lightning=".len();
            let end = lower[start..]
                .find('&')
                .map_or(lower.len(), |offset| start + offset);
            return Ok(lower[start..end].to_string());
        }

        if lower.starts_with("lnurl1")
            || LUD17_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
        {
            return Ok(token.to_string());
        }
    }

    tokens(text)
        .find(|token| is_lightning_address(token))
        .map(str::to_string)
        .ok_or_else(|| Error::NotFound(text.to_string()))
}

fn is_lightning_address(s: &str) -> bool {
    let Some((user, domain)) = s.split_once('@') else {
        return false;
    };

    !user.is_empty()
        && user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'))
        && domain.contains('.')
        && !domain.contains('@')
        && !domain.contains('/')
}

fn scheme_for(host: &str) -> &'static str {
    if host.ends_with(".onion") {
        "http"
    } else {
        "https"
    }
}

/// Turns an identifier returned by [`extract`] into the url to query.
pub fn decode_url(identifier: &str) -> Result<Url, Error> {
    let lower = identifier.to_lowercase();

    if lower.starts_with("lnurl1") {
        let lnurl = LnUrl::from_str(identifier)?;
        return Ok(Url::parse(lnurl.url())?);
    }

    if let Some(scheme) = LUD17_SCHEMES.iter().find(|s| lower.starts_with(*s)) {
        let rest = &identifier[scheme.len()..];
        let host = rest
            .split(|c: char| matches!(c, '/' | '?' | ':'))
            .next()
            .unwrap_or_default();
        return Ok(Url::parse(&format!("{}://{}", scheme_for(host), rest))?);
    }

    if is_lightning_address(identifier) {
        let (user, domain) = identifier
            .split_once('@')
            .ok_or(Error::InvalidLnUrl)?;
        return Ok(Url::parse(&format!(
            "{}://{}/.well-known/lnurlp/{}",
            scheme_for(domain),
            domain,
            user.to_lowercase()
        ))?);
    }

    Err(Error::InvalidLnUrl)
}

/// LUD-04 login request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthParams {
    pub tag: String,
    pub callback: String,
    pub k1: String,
    pub host: String,
    pub action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawParams {
    pub min_amount_sat: u64,
    pub max_amount_sat: u64,
    pub default_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParams {
    pub k1: String,
    pub callback: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayRequestParams {
    pub host: String,
    pub callback: String,
    pub min_amount_sat: u64,
    pub max_amount_sat: u64,
    pub metadata: Vec<Vec<String>>,
    pub comment_allowed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LnUrlResponse {
    Auth(AuthParams),
    Withdraw(WithdrawParams),
    Channel(ChannelParams),
    Pay(PayRequestParams),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawResponse {
    callback: String,
    k1: String,
    min_withdrawable: u64,
    max_withdrawable: u64,
    #[serde(default)]
    default_description: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChannelResponse {
    uri: String,
    callback: String,
    k1: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayResponse {
    callback: String,
    min_sendable: u64,
    max_sendable: u64,
    metadata: String,
    #[serde(default)]
    comment_allowed: u32,
}

/// `{"status": ..., "reason": ...}` envelope every LNURL endpoint may answer with
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct StatusResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub reason: String,
}

impl StatusResponse {
    pub(crate) fn check(value: &Value) -> Result<(), Error> {
        let envelope: StatusResponse =
            serde_json::from_value(value.clone()).unwrap_or_default();
        if envelope.status.eq_ignore_ascii_case("ERROR") {
            return Err(Error::Protocol {
                reason: envelope.reason,
            });
        }
        Ok(())
    }
}

/// Withdraw callback, `k1` already added to the query
#[derive(Debug, Clone)]
struct PendingWithdraw {
    callback: String,
}

/// Metadata string exactly as served at resolution time
#[derive(Debug, Clone)]
struct PendingPayMetadata {
    encoded: String,
    entries: Vec<Vec<String>>,
}

/// Storage for the link key seed
#[async_trait]
pub trait SeedStore: Send + Sync {
    async fn link_seed(&self) -> Result<Option<Vec<u8>>, Error>;
    async fn save_link_seed(&self, seed: &[u8]) -> Result<(), Error>;
}

/// Storage for pay results, keyed by hex payment hash
#[async_trait]
pub trait PayInfoStore: Send + Sync {
    async fn save_pay_info(&self, info: &PayInfo) -> Result<(), Error>;
    async fn fetch_pay_info(&self, payment_hash: &str) -> Result<Option<PayInfo>, Error>;
}

/// Notified whenever new secret material needs backing up
pub trait BackupRequester: Send + Sync {
    fn request_backup(&self);
}

pub struct LnUrlClient {
    http: Client,
    network: Network,
    deriver: LinkKeyDeriver,
    seed_store: Arc<dyn SeedStore>,
    pay_info_store: Arc<dyn PayInfoStore>,
    backup_requester: Arc<dyn BackupRequester>,
    pending_withdraw: Option<PendingWithdraw>,
    pending_pay: Option<PendingPayMetadata>,
}

impl LnUrlClient {
    pub fn new(
        network: Network,
        request_timeout: Duration,
        max_derivation_attempts: u32,
        seed_store: Arc<dyn SeedStore>,
        pay_info_store: Arc<dyn PayInfoStore>,
        backup_requester: Arc<dyn BackupRequester>,
    ) -> Result<Self, Error> {
        let http = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            http,
            network,
            deriver: LinkKeyDeriver::new(max_derivation_attempts),
            seed_store,
            pay_info_store,
            backup_requester,
            pending_withdraw: None,
            pending_pay: None,
        })
    }

    /// Loads the link key seed, creating and backing it up on first use.
    async fn link_seed(&self) -> Result<Vec<u8>, Error> {
        if let Some(seed) = self.seed_store.link_seed().await? {
            return Ok(seed);
        }

        let seed: [u8; 32] = rand::thread_rng().gen();
        self.seed_store.save_link_seed(&seed).await?;
        info!("Created new link key seed, requesting backup");
        self.backup_requester.request_backup();

        Ok(seed.to_vec())
    }

    /// Sends a GET and parses the body as JSON, surfacing error envelopes.
    pub(crate) async fn get_json(&self, url: &str) -> Result<Value, Error> {
        debug!("GET {}", url);
        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let value = serde_json::from_str::<Value>(&body);
        if let Ok(value) = &value {
            StatusResponse::check(value)?;
        }
        if !status.is_success() {
            return Err(Error::HttpStatus(status));
        }

        Ok(value?)
    }

    pub async fn resolve(&mut self, text: &str) -> Result<LnUrlResponse, Error> {
        let identifier = extract(text)?;
        info!("Resolving LNURL {}", identifier);
        let url = decode_url(&identifier)?;

        if let Some(params) = auth_params(&url)? {
            return Ok(LnUrlResponse::Auth(params));
        }

        let value = self.get_json(url.as_str()).await?;
        let tag = value
            .get("tag")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match tag.as_str() {
            "withdrawRequest" => {
                let response: WithdrawResponse = serde_json::from_value(value)?;
                let mut callback = Url::parse(&response.callback)?;
                set_query_param(&mut callback, "k1", &response.k1);

                debug!("Pending withdraw callback {}", callback);
                self.pending_withdraw = Some(PendingWithdraw {
                    callback: callback.into(),
                });

                Ok(LnUrlResponse::Withdraw(WithdrawParams {
                    min_amount_sat: response.min_withdrawable.div_ceil(1000),
                    max_amount_sat: response.max_withdrawable / 1000,
                    default_description: response.default_description,
                }))
            }
            "channelRequest" => {
                let response: ChannelResponse = serde_json::from_value(value)?;
                Ok(LnUrlResponse::Channel(ChannelParams {
                    k1: response.k1,
                    callback: response.callback,
                    uri: response.uri,
                }))
            }
            "payRequest" => {
                let response: PayResponse = serde_json::from_value(value)?;
                let entries: Vec<Vec<String>> = serde_json::from_str(&response.metadata)?;

                self.pending_pay = Some(PendingPayMetadata {
                    encoded: response.metadata,
                    entries: entries.clone(),
                });

                Ok(LnUrlResponse::Pay(PayRequestParams {
                    host: url.host_str().unwrap_or_default().to_string(),
                    callback: response.callback,
                    min_amount_sat: response.min_sendable / 1000,
                    max_amount_sat: response.max_sendable / 1000,
                    metadata: entries,
                    comment_allowed: response.comment_allowed,
                }))
            }
            other => Err(Error::UnsupportedResponse(other.to_string())),
        }
    }
}

/// Login links are answered from the query alone, without contacting the service.
fn auth_params(url: &Url) -> Result<Option<AuthParams>, Error> {
    let query_value = |key: &str| {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    };

    if query_value("tag").as_deref() != Some("login") {
        return Ok(None);
    }

    let k1 = query_value("k1").ok_or_else(|| Error::InvalidChallenge("missing k1".to_string()))?;
    let host = url.host_str().ok_or(Error::InvalidLnUrl)?.to_string();

    Ok(Some(AuthParams {
        tag: "login".to_string(),
        callback: url.to_string(),
        k1,
        host,
        action: query_value("action"),
    }))
}

/// Replaces `key` in the query of `url`, keeping every other pair.
pub(crate) fn set_query_param(url: &mut Url, key: &str, value: &str) {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair(key, value);
}


/*
LNURL bech32 codec modified from lnurl-rs
https://github.com/benthecarman/lnurl-rs

MIT License

Copyright (c) 2023 benthecarman

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.

*/
