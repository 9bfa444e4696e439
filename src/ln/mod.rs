//! Remote wallet node RPC surface.
//!
//! The sweep planner only ever talks to the node through these traits. The
//! message shapes mirror the node's `lnrpc`, `signrpc` and `walletrpc`
//! services as exposed by its REST gateway.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::Error;

pub mod error;
pub mod lnd;
pub mod serde_utils;

use serde_utils::{base64_bytes, base64_bytes_vec, i64_string};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetInfoResponse {
    #[serde(default)]
    pub identity_pubkey: String,
    #[serde(default)]
    pub block_height: u32,
    #[serde(default)]
    pub synced_to_chain: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddressType {
    WitnessPubkeyHash,
    NestedPubkeyHash,
    UnusedWitnessPubkeyHash,
    UnusedNestedPubkeyHash,
    TaprootPubkey,
    UnusedTaprootPubkey,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutPoint {
    #[serde(default, with = "base64_bytes")]
    pub txid_bytes: Vec<u8>,
    #[serde(default)]
    pub txid_str: String,
    #[serde(default)]
    pub output_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utxo {
    pub address_type: AddressType,
    #[serde(default)]
    pub address: String,
    #[serde(default, with = "i64_string")]
    pub amount_sat: i64,
    /// Hex encoded output script
    #[serde(default)]
    pub pk_script: String,
    pub outpoint: Option<OutPoint>,
    #[serde(default, with = "i64_string")]
    pub confirmations: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ListUnspentRequest {
    pub min_confs: i32,
    pub max_confs: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListUnspentResponse {
    #[serde(default)]
    pub utxos: Vec<Utxo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimateFeeResponse {
    #[serde(default, with = "i64_string")]
    pub sat_per_kw: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishResponse {
    #[serde(default)]
    pub publish_error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    #[serde(with = "i64_string")]
    pub value: i64,
    #[serde(with = "base64_bytes")]
    pub pk_script: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignDescriptor {
    pub output: TxOut,
    pub sighash: u32,
    #[serde(default, with = "base64_bytes")]
    pub witness_script: Vec<u8>,
    pub input_index: i32,
}

/// BIP143 sighash midstate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSigHashes {
    #[serde(with = "base64_bytes")]
    pub hash_prev_outs: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub hash_sequence: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub hash_outputs: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignReq {
    #[serde(with = "base64_bytes")]
    pub raw_tx_bytes: Vec<u8>,
    pub sign_descs: Vec<SignDescriptor>,
    pub sig_hashes: Option<TxSigHashes>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignResp {
    #[serde(default, with = "base64_bytes_vec")]
    pub raw_sigs: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputScript {
    #[serde(default, with = "base64_bytes_vec")]
    pub witness: Vec<Vec<u8>>,
    #[serde(default, with = "base64_bytes")]
    pub sig_script: Vec<u8>,
}

/// `inputscript` response. The signer recomputes the midstate over the full
/// transaction and hands it back next to the scripts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputScriptResp {
    #[serde(default)]
    pub input_scripts: Vec<InputScript>,
    pub sig_hashes: Option<TxSigHashes>,
}

#[async_trait]
pub trait LightningClient: Send + Sync {
    async fn get_info(&self) -> Result<GetInfoResponse, Error>;

    async fn list_unspent(&self, request: ListUnspentRequest)
        -> Result<ListUnspentResponse, Error>;
}

#[async_trait]
pub trait SignerClient: Send + Sync {
    async fn sign_output_raw(&self, request: SignReq) -> Result<SignResp, Error>;

    async fn compute_input_script(&self, request: SignReq) -> Result<InputScriptResp, Error>;
}

#[async_trait]
pub trait WalletKitClient: Send + Sync {
    async fn estimate_fee(&self, conf_target: u32) -> Result<EstimateFeeResponse, Error>;

    async fn publish_transaction(&self, tx: &[u8]) -> Result<PublishResponse, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rest_utxo_listing() {
        let body = r#"{
            "utxos": [
                {
                    "address_type": "WITNESS_PUBKEY_HASH",
                    "address": "bcrt1qexample",
                    "amount_sat": "150000",
                    "pk_script": "0014751e76e8199196d454941c45d1b3a323f1433bd6",
                    "outpoint": {
                        "txid_bytes": "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=",
                        "txid_str": "1f1e1d1c1b1a191817161514131211100f0e0d0c0b0a09080706050403020100",
                        "output_index": 1
                    },
                    "confirmations": "12"
                },
                {
                    "address_type": "SOMETHING_NEW",
                    "amount_sat": 5
                }
            ]
        }"#;

        let resp: ListUnspentResponse = serde_json::from_str(body).unwrap();

        assert_eq!(resp.utxos.len(), 2);
        let first = &resp.utxos[0];
        assert_eq!(first.address_type, AddressType::WitnessPubkeyHash);
        assert_eq!(first.amount_sat, 150_000);
        assert_eq!(first.confirmations, 12);
        let outpoint = first.outpoint.as_ref().unwrap();
        assert_eq!(outpoint.txid_bytes, (0u8..32).collect::<Vec<u8>>());
        assert_eq!(outpoint.output_index, 1);

        assert_eq!(resp.utxos[1].address_type, AddressType::Unknown);
        assert_eq!(resp.utxos[1].amount_sat, 5);
        assert!(resp.utxos[1].outpoint.is_none());
    }

    #[test]
    fn sign_request_encodes_bytes_as_base64() {
        let req = SignReq {
            raw_tx_bytes: vec![0x02, 0x00],
            sign_descs: vec![SignDescriptor {
                output: TxOut {
                    value: 1000,
                    pk_script: vec![0x00, 0x14],
                },
                sighash: 1,
                witness_script: vec![],
                input_index: 0,
            }],
            sig_hashes: None,
        };

        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["raw_tx_bytes"], "AgA=");
        assert_eq!(json["sign_descs"][0]["output"]["value"], "1000");
        assert_eq!(json["sign_descs"][0]["output"]["pk_script"], "ABQ=");
    }
}
