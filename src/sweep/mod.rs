//! Full balance sweeps.
//!
//! [`SweepPlanner::plan`] builds one signed transaction per confirmation
//! target, each spending every confirmed coin of the wallet to a single
//! destination. Nothing is broadcast until the caller hands one of them to
//! [`SweepPlanner::publish_transaction`].

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use bitcoin::consensus::encode::serialize;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Address, Network};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use error::{Error, PolicyViolation};

pub mod builder;
pub mod error;
pub mod rpc;

use builder::{craft_sweep_all_tx, SatPerKWeight, DEFAULT_DUST_LIMIT, FEE_PER_KW_FLOOR};
use rpc::{RemoteSigner, RemoteUtxoSource};

use crate::ln::{LightningClient, SignerClient, WalletKitClient};

pub const DEFAULT_CONF_TARGETS: [u32; 3] = [2, 6, 25];

/// A signed sweep for one confirmation target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetails {
    #[serde(with = "hex_bytes")]
    pub tx: Vec<u8>,
    pub tx_hash: String,
    pub fees: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepAllCoinsTransactions {
    /// Value of all coins being swept, before fees
    pub amount: u64,
    /// Keyed by confirmation target in blocks
    pub transactions: BTreeMap<u32, TransactionDetails>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone)]
pub struct SweepPlanner {
    lightning_client: Arc<dyn LightningClient>,
    signer_client: Arc<dyn SignerClient>,
    wallet_kit_client: Arc<dyn WalletKitClient>,
    network: Network,
    conf_targets: Vec<u32>,
    dust_limit: u64,
}

impl SweepPlanner {
    pub fn new(
        lightning_client: Arc<dyn LightningClient>,
        signer_client: Arc<dyn SignerClient>,
        wallet_kit_client: Arc<dyn WalletKitClient>,
        network: Network,
    ) -> Self {
        Self {
            lightning_client,
            signer_client,
            wallet_kit_client,
            network,
            conf_targets: DEFAULT_CONF_TARGETS.to_vec(),
            dust_limit: DEFAULT_DUST_LIMIT,
        }
    }

    pub fn with_conf_targets(mut self, conf_targets: Vec<u32>) -> Self {
        self.conf_targets = conf_targets;
        self
    }

    pub fn with_dust_limit(mut self, dust_limit: u64) -> Self {
        self.dust_limit = dust_limit;
        self
    }

    async fn determine_fee_per_kw(&self, conf_target: u32) -> Result<SatPerKWeight, Error> {
        let response = self
            .wallet_kit_client
            .estimate_fee(conf_target)
            .await
            .map_err(Error::rpc(format!(
                "wallet_kit_client.estimate_fee({})",
                conf_target
            )))?;

        if response.sat_per_kw <= 0 {
            return Err(Error::FeeEstimationUnavailable(conf_target));
        }

        Ok(SatPerKWeight(
            (response.sat_per_kw as u64).max(FEE_PER_KW_FLOOR),
        ))
    }

    fn decode_destination(&self, address: &str) -> Result<Address, Error> {
        // A bare public key is almost certainly a user error, refuse it
        // before looking at the address itself.
        if let Ok(bytes) = hex::decode(address) {
            if PublicKey::from_slice(&bytes).is_ok() {
                return Err(Error::PubkeyDestinationRejected);
            }
        }

        let invalid = |reason: String| Error::InvalidAddress {
            address: address.to_string(),
            reason,
        };

        Address::from_str(address)
            .map_err(|e| invalid(e.to_string()))?
            .require_network(self.network)
            .map_err(|_| invalid(format!("not valid for network {}", self.network)))
    }

    /// Crafts, for every configured confirmation target, a transaction
    /// sending all confirmed coins to `address`.
    ///
    /// Targets whose transaction would violate relay policy, for example
    /// because the fee eats the output down to dust, are left out of the
    /// result.
    pub async fn plan(&self, address: &str) -> Result<SweepAllCoinsTransactions, Error> {
        let destination = self.decode_destination(address)?;

        let info = self
            .lightning_client
            .get_info()
            .await
            .map_err(Error::rpc("lightning_client.get_info"))?;

        let signer = RemoteSigner::new(self.signer_client.clone());
        let mut transactions = BTreeMap::new();
        let mut amount = 0;

        for &conf_target in &self.conf_targets {
            let fee_rate = self.determine_fee_per_kw(conf_target).await?;

            let mut utxo_source = RemoteUtxoSource::new(self.lightning_client.clone());
            let package = match craft_sweep_all_tx(
                fee_rate,
                self.dust_limit,
                info.block_height,
                &destination,
                &mut utxo_source,
                &signer,
            )
            .await
            {
                Ok(package) => package,
                Err(Error::Policy(violation)) => {
                    warn!(
                        "Skipping sweep for {} block target: {}",
                        conf_target, violation
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };

            let sweep_tx = package.sweep_tx;
            let amount_out: u64 = sweep_tx.output.iter().map(|o| o.value).sum();
            let inputs = utxo_source.total_amount();
            let fees = match inputs.checked_sub(amount_out) {
                Some(fees) if fees > 0 => fees,
                _ => {
                    return Err(Error::FeeAccounting {
                        inputs,
                        outputs: amount_out,
                    })
                }
            };

            debug!(
                "Sweep for {} block target: {} at {} sat/kw pays {} sat in fees",
                conf_target,
                sweep_tx.txid(),
                fee_rate.0,
                fees
            );

            transactions.insert(
                conf_target,
                TransactionDetails {
                    tx: serialize(&sweep_tx),
                    tx_hash: sweep_tx.txid().to_string(),
                    fees,
                },
            );
            amount = inputs;
        }

        Ok(SweepAllCoinsTransactions {
            amount,
            transactions,
        })
    }

    pub async fn publish_transaction(&self, tx: &[u8]) -> Result<(), Error> {
        let response = self
            .wallet_kit_client
            .publish_transaction(tx)
            .await
            .map_err(Error::rpc(format!(
                "wallet_kit_client.publish_transaction({})",
                hex::encode(tx)
            )))?;

        if !response.publish_error.is_empty() {
            warn!(
                "Publishing {} failed: {}",
                hex::encode(tx),
                response.publish_error
            );
            return Err(Error::BroadcastRejected {
                reason: response.publish_error,
            });
        }

        info!("Published sweep transaction");

        Ok(())
    }
}
