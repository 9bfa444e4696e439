//! LUD-06 pay requests and LUD-10 success actions.

use std::str::FromStr;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bitcoin::Network;
use bitcoin_hashes::{sha256, Hash};
use lightning_invoice::{Bolt11Invoice, Bolt11InvoiceDescription, Currency};
use rand::Rng;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::{Error, LnUrlClient, PayRequestParams, StatusResponse};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// LNURL-pay servers may answer with this in place of 200
const STATUS_320: u16 = 320;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessAction {
    pub tag: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub ciphertext: String,
    #[serde(default)]
    pub iv: String,
}

impl SuccessAction {
    fn is_supported(&self) -> bool {
        matches!(self.tag.as_str(), "message" | "url" | "aes")
    }

    /// AES-256-CBC with the payment preimage as key
    fn decrypt(&self, preimage: &[u8]) -> Result<String, Error> {
        let iv = STANDARD
            .decode(&self.iv)
            .map_err(|e| Error::NotDecryptable(format!("iv: {}", e)))?;
        let ciphertext = STANDARD
            .decode(&self.ciphertext)
            .map_err(|e| Error::NotDecryptable(format!("ciphertext: {}", e)))?;

        let plaintext = Aes256CbcDec::new_from_slices(preimage, &iv)
            .map_err(|e| Error::NotDecryptable(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|e| Error::NotDecryptable(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| Error::NotDecryptable(e.to_string()))
    }
}

/// Invoice currency for a wallet network
fn currency_for(network: Network) -> Option<Currency> {
    match network {
        Network::Bitcoin => Some(Currency::Bitcoin),
        Network::Testnet => Some(Currency::BitcoinTestnet),
        Network::Signet => Some(Currency::Signet),
        Network::Regtest => Some(Currency::Regtest),
        _ => None,
    }
}

/// What is remembered about a verified pay request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayInfo {
    pub payment_hash: String,
    pub invoice: String,
    pub host: String,
    pub comment: String,
    pub invoice_description: String,
    pub metadata: Vec<Vec<String>>,
    pub success_action: Option<SuccessAction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayCallbackResponse {
    pr: String,
    #[serde(default)]
    success_action: Option<SuccessAction>,
    #[serde(default)]
    routes: Vec<Value>,
    #[serde(default)]
    disposable: Option<bool>,
}

impl LnUrlClient {
    /// Requests an invoice for `amount_msat` and checks it against the
    /// resolved pay request.
    ///
    /// The returned [`PayInfo`] is already persisted. Paying the invoice is up
    /// to the caller.
    pub async fn finish_pay(
        &mut self,
        params: &PayRequestParams,
        amount_msat: u64,
        comment: Option<&str>,
    ) -> Result<PayInfo, Error> {
        let pending = self.pending_pay.as_ref().ok_or(Error::NoPendingPay)?;

        let nonce: [u8; 12] = rand::thread_rng().gen();
        let mut callback = Url::parse(&params.callback)?;
        {
            let mut query = callback.query_pairs_mut();
            query
                .append_pair("amount", &amount_msat.to_string())
                .append_pair("nonce", &hex::encode(nonce));
            if let Some(comment) = comment.filter(|c| !c.is_empty()) {
                query.append_pair("comment", comment);
            }
        }

        debug!("GET {}", callback);
        let response = self.http.get(callback.as_str()).send().await?;
        let status = response.status();
        if status != StatusCode::OK && status.as_u16() != STATUS_320 {
            return Err(Error::HttpStatus(status));
        }

        let value: Value = serde_json::from_str(&response.text().await?)?;
        StatusResponse::check(&value)?;
        let pay_response: PayCallbackResponse = serde_json::from_value(value)?;

        let invoice = Bolt11Invoice::from_str(&pay_response.pr)
            .map_err(|e| Error::InvalidInvoice(e.to_string()))?;
        if currency_for(self.network) != Some(invoice.currency()) {
            return Err(Error::InvalidInvoice(format!(
                "invoice is not for {}",
                self.network
            )));
        }

        let description_hash: &[u8] = match invoice.description() {
            Bolt11InvoiceDescription::Hash(hash) => &hash.0[..],
            Bolt11InvoiceDescription::Direct(_) => {
                return Err(Error::InvalidInvoice(
                    "description hash not found in invoice".to_string(),
                ))
            }
        };

        let metadata_hash = sha256::Hash::hash(pending.encoded.as_bytes());
        if metadata_hash.as_byte_array()[..] != *description_hash {
            warn!("Invoice from {} does not commit to the metadata", params.host);
            return Err(Error::HashMismatch {
                expected: metadata_hash.to_string(),
                actual: hex::encode(description_hash),
            });
        }

        if invoice.amount_milli_satoshis() != Some(amount_msat) {
            return Err(Error::AmountMismatch {
                requested_msat: amount_msat,
                invoice_msat: invoice.amount_milli_satoshis(),
            });
        }

        if !pay_response.routes.is_empty() {
            // Channel update signatures in the hints are not checked
            warn!(
                "Accepting {} unverified route hints from {}",
                pay_response.routes.len(),
                params.host
            );
        }

        let mut success_action = pay_response.success_action;
        if let Some(action) = success_action.as_mut() {
            if !action.is_supported() {
                return Err(Error::UnsupportedSuccessAction(action.tag.clone()));
            }
            // The plaintext only ever comes from decrypting the ciphertext
            if action.tag == "aes" {
                action.message.clear();
            }
            debug!("Success action {}", action.tag);
        }

        let invoice_description = pending
            .entries
            .iter()
            .find(|entry| entry.first().map(String::as_str) == Some("text/plain"))
            .and_then(|entry| entry.get(1))
            .cloned()
            .unwrap_or_default();

        let info = PayInfo {
            payment_hash: hex::encode(&invoice.payment_hash()[..]),
            invoice: pay_response.pr,
            host: params.host.clone(),
            comment: comment.unwrap_or_default().to_string(),
            invoice_description,
            metadata: pending.entries.clone(),
            success_action,
        };

        self.pay_info_store.save_pay_info(&info).await?;
        info!(
            "Verified invoice {} from {} (disposable: {:?})",
            info.payment_hash, info.host, pay_response.disposable
        );
        self.pending_pay = None;

        Ok(info)
    }

    /// Decrypts the aes success action of a settled payment and stores the
    /// plaintext in place of the message.
    ///
    /// Calling this again on a record already decrypted returns the stored
    /// plaintext without touching the record.
    pub async fn decrypt_success_action(
        &self,
        payment_hash: &str,
        preimage: &[u8],
    ) -> Result<String, Error> {
        let mut info = self
            .pay_info_store
            .fetch_pay_info(payment_hash)
            .await?
            .ok_or_else(|| Error::PayInfoNotFound(payment_hash.to_string()))?;

        let action = match info.success_action.as_mut() {
            Some(action) if action.tag == "aes" && !action.ciphertext.is_empty() => action,
            _ => {
                return Err(Error::NotDecryptable(
                    "no aes success action".to_string(),
                ))
            }
        };

        let preimage_hash = sha256::Hash::hash(preimage);
        if !hex::encode(preimage_hash.to_byte_array()).eq_ignore_ascii_case(payment_hash) {
            return Err(Error::PreimageMismatch);
        }

        if !action.message.is_empty() {
            debug!("Success action for {} already decrypted", payment_hash);
            return Ok(action.message.clone());
        }

        let message = action.decrypt(preimage)?;
        action.message = message.clone();
        self.pay_info_store.save_pay_info(&info).await?;

        Ok(message)
    }
}
