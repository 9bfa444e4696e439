//! Adapters exposing the node's RPC services as the capabilities
//! [`craft_sweep_all_tx`](super::builder::craft_sweep_all_tx) consumes.

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::ecdsa;
use bitcoin::{OutPoint, ScriptBuf, Transaction, Txid};
use tracing::debug;

use super::builder::{
    InputScript, SignDescriptor, Signer, TxSigHashes, Utxo, UtxoSource, WitnessType,
};
use super::error::Error;
use crate::ln::{self, AddressType, LightningClient, ListUnspentRequest, SignReq, SignerClient};

/// Lists wallet outputs through the node.
///
/// Remembers the value of everything returned by the most recent listing so
/// the caller can account for the fee afterwards. Use one instance per
/// transaction being built.
pub struct RemoteUtxoSource {
    lightning_client: Arc<dyn LightningClient>,
    total_amount: u64,
}

impl RemoteUtxoSource {
    pub fn new(lightning_client: Arc<dyn LightningClient>) -> Self {
        Self {
            lightning_client,
            total_amount: 0,
        }
    }

    /// Sum of the values returned by the last listing
    pub fn total_amount(&self) -> u64 {
        self.total_amount
    }
}

fn convert_utxo(utxo: ln::Utxo) -> Result<Utxo, Error> {
    let witness_type = match utxo.address_type {
        AddressType::WitnessPubkeyHash => WitnessType::WitnessPubKey,
        AddressType::NestedPubkeyHash => WitnessType::NestedWitnessPubKey,
        other => return Err(Error::UnsupportedAddressType(format!("{:?}", other))),
    };

    let pk_script = hex::decode(&utxo.pk_script)
        .map_err(|e| Error::MalformedUtxo(format!("pk_script {}: {}", utxo.pk_script, e)))?;

    let outpoint = utxo
        .outpoint
        .ok_or_else(|| Error::MalformedUtxo("missing outpoint".to_string()))?;
    let txid = Txid::from_slice(&outpoint.txid_bytes).map_err(|e| {
        Error::MalformedUtxo(format!("txid {}: {}", hex::encode(&outpoint.txid_bytes), e))
    })?;

    let value = u64::try_from(utxo.amount_sat)
        .map_err(|_| Error::MalformedUtxo(format!("negative amount {}", utxo.amount_sat)))?;

    Ok(Utxo {
        witness_type,
        value,
        confirmations: utxo.confirmations,
        pk_script: ScriptBuf::from_bytes(pk_script),
        outpoint: OutPoint {
            txid,
            vout: outpoint.output_index,
        },
    })
}

#[async_trait]
impl UtxoSource for RemoteUtxoSource {
    async fn list_unspent_witness(
        &mut self,
        min_confs: i32,
        max_confs: i32,
    ) -> Result<Vec<Utxo>, Error> {
        let response = self
            .lightning_client
            .list_unspent(ListUnspentRequest {
                min_confs,
                max_confs,
            })
            .await
            .map_err(Error::rpc("lightning_client.list_unspent"))?;

        self.total_amount = 0;
        let mut utxos = Vec::with_capacity(response.utxos.len());
        for utxo in response.utxos {
            let utxo = convert_utxo(utxo)?;
            self.total_amount += utxo.value;
            utxos.push(utxo);
        }

        debug!("Listed {} utxos worth {} sat", utxos.len(), self.total_amount);

        Ok(utxos)
    }
}

/// Signs through the node's signer service
pub struct RemoteSigner {
    signer_client: Arc<dyn SignerClient>,
}

impl RemoteSigner {
    pub fn new(signer_client: Arc<dyn SignerClient>) -> Self {
        Self { signer_client }
    }
}

fn sign_request(tx: &Transaction, sign_desc: &SignDescriptor) -> SignReq {
    SignReq {
        raw_tx_bytes: serialize(tx),
        sign_descs: vec![ln::SignDescriptor {
            output: ln::TxOut {
                value: sign_desc.output.value as i64,
                pk_script: sign_desc.output.script_pubkey.to_bytes(),
            },
            sighash: sign_desc.hash_type,
            witness_script: sign_desc.witness_script.clone(),
            input_index: sign_desc.input_index as i32,
        }],
        sig_hashes: Some(ln::TxSigHashes {
            hash_prev_outs: sign_desc.sig_hashes.hash_prev_outs.to_vec(),
            hash_sequence: sign_desc.sig_hashes.hash_sequence.to_vec(),
            hash_outputs: sign_desc.sig_hashes.hash_outputs.to_vec(),
        }),
    }
}

fn parse_sig_hashes(sig_hashes: &ln::TxSigHashes) -> Result<TxSigHashes, Error> {
    let hash = |bytes: &[u8]| -> Result<[u8; 32], Error> {
        bytes.try_into().map_err(|_| Error::InvalidSigHashes)
    };

    Ok(TxSigHashes {
        hash_prev_outs: hash(&sig_hashes.hash_prev_outs)?,
        hash_sequence: hash(&sig_hashes.hash_sequence)?,
        hash_outputs: hash(&sig_hashes.hash_outputs)?,
    })
}

#[async_trait]
impl Signer for RemoteSigner {
    async fn sign_output_raw(
        &self,
        tx: &Transaction,
        sign_desc: &SignDescriptor,
    ) -> Result<ecdsa::Signature, Error> {
        let response = self
            .signer_client
            .sign_output_raw(sign_request(tx, sign_desc))
            .await
            .map_err(Error::rpc(format!("signer_client.sign_output_raw {}", tx.txid())))?;

        let raw_sig = response
            .raw_sigs
            .first()
            .ok_or(Error::EmptySignerResponse("sign_output_raw"))?;

        Ok(ecdsa::Signature::from_der(raw_sig)?)
    }

    async fn compute_input_script(
        &self,
        tx: &Transaction,
        sign_desc: &mut SignDescriptor,
    ) -> Result<InputScript, Error> {
        let response = self
            .signer_client
            .compute_input_script(sign_request(tx, sign_desc))
            .await
            .map_err(Error::rpc("signer_client.compute_input_script"))?;

        let sig_hashes = response
            .sig_hashes
            .as_ref()
            .ok_or(Error::EmptySignerResponse("compute_input_script sig_hashes"))?;
        sign_desc.sig_hashes = parse_sig_hashes(sig_hashes)?;

        let script = response
            .input_scripts
            .into_iter()
            .next()
            .ok_or(Error::EmptySignerResponse("compute_input_script"))?;

        Ok(InputScript {
            witness: script.witness,
            sig_script: script.sig_script,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use bitcoin::absolute::LockTime;
    use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
    use bitcoin::{Network, TxIn, TxOut};

    use super::*;
    use crate::ln::{GetInfoResponse, InputScriptResp, ListUnspentResponse, SignResp};
    use crate::sweep::builder::tests::p2wpkh_address;

    pub(crate) fn rpc_utxo(n: u8, amount_sat: i64, address_type: AddressType) -> ln::Utxo {
        ln::Utxo {
            address_type,
            address: String::new(),
            amount_sat,
            pk_script: hex::encode(p2wpkh_address(n, Network::Regtest).script_pubkey().as_bytes()),
            outpoint: Some(ln::OutPoint {
                txid_bytes: vec![n; 32],
                txid_str: String::new(),
                output_index: n as u32,
            }),
            confirmations: 3,
        }
    }

    pub(crate) struct MockLightning {
        pub utxos: Mutex<Vec<ln::Utxo>>,
        pub block_height: u32,
        pub list_calls: Mutex<Vec<ListUnspentRequest>>,
    }

    impl MockLightning {
        pub(crate) fn new(utxos: Vec<ln::Utxo>) -> Self {
            Self {
                utxos: Mutex::new(utxos),
                block_height: 800_000,
                list_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LightningClient for MockLightning {
        async fn get_info(&self) -> Result<GetInfoResponse, ln::Error> {
            Ok(GetInfoResponse {
                block_height: self.block_height,
                ..Default::default()
            })
        }

        async fn list_unspent(
            &self,
            request: ListUnspentRequest,
        ) -> Result<ListUnspentResponse, ln::Error> {
            self.list_calls.lock().unwrap().push(request);
            Ok(ListUnspentResponse {
                utxos: self.utxos.lock().unwrap().clone(),
            })
        }
    }

    pub(crate) struct MockSigner {
        pub requests: Mutex<Vec<SignReq>>,
        pub refreshed: ln::TxSigHashes,
    }

    impl MockSigner {
        pub(crate) fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                refreshed: ln::TxSigHashes {
                    hash_prev_outs: vec![1; 32],
                    hash_sequence: vec![2; 32],
                    hash_outputs: vec![3; 32],
                },
            }
        }
    }

    #[async_trait]
    impl SignerClient for MockSigner {
        async fn sign_output_raw(&self, request: SignReq) -> Result<SignResp, ln::Error> {
            self.requests.lock().unwrap().push(request);
            let secp = Secp256k1::new();
            let sk = SecretKey::from_slice(&[0x11; 32]).unwrap();
            let sig = secp.sign_ecdsa(&Message::from_slice(&[0x22; 32]).unwrap(), &sk);
            Ok(SignResp {
                raw_sigs: vec![sig.serialize_der().to_vec()],
            })
        }

        async fn compute_input_script(
            &self,
            request: SignReq,
        ) -> Result<InputScriptResp, ln::Error> {
            self.requests.lock().unwrap().push(request);
            Ok(InputScriptResp {
                input_scripts: vec![ln::InputScript {
                    witness: vec![vec![0x30; 71], vec![0x03; 33]],
                    sig_script: vec![],
                }],
                sig_hashes: Some(self.refreshed.clone()),
            })
        }
    }

    fn sample_tx() -> Transaction {
        Transaction {
            version: 2,
            lock_time: LockTime::ZERO,
            input: vec![TxIn::default()],
            output: vec![TxOut {
                value: 5000,
                script_pubkey: p2wpkh_address(4, Network::Regtest).script_pubkey(),
            }],
        }
    }

    fn sample_desc(tx: &Transaction) -> SignDescriptor {
        SignDescriptor {
            output: TxOut {
                value: 6000,
                script_pubkey: p2wpkh_address(5, Network::Regtest).script_pubkey(),
            },
            hash_type: crate::sweep::builder::SIGHASH_ALL,
            witness_script: vec![0xaa],
            input_index: 0,
            sig_hashes: TxSigHashes::new(tx),
        }
    }

    #[tokio::test]
    async fn listing_maps_records_and_accumulates_total() {
        let lightning = Arc::new(MockLightning::new(vec![
            rpc_utxo(1, 10_000, AddressType::WitnessPubkeyHash),
            rpc_utxo(2, 2_500, AddressType::NestedPubkeyHash),
        ]));
        let mut source = RemoteUtxoSource::new(lightning.clone());

        let utxos = source.list_unspent_witness(1, i32::MAX).await.unwrap();

        assert_eq!(utxos.len(), 2);
        assert_eq!(utxos[0].witness_type, WitnessType::WitnessPubKey);
        assert_eq!(utxos[1].witness_type, WitnessType::NestedWitnessPubKey);
        assert_eq!(utxos[1].outpoint.vout, 2);
        assert_eq!(utxos[1].outpoint.txid, Txid::from_byte_array([2; 32]));
        assert_eq!(source.total_amount(), 12_500);

        let calls = lightning.list_calls.lock().unwrap();
        assert_eq!(calls[0].min_confs, 1);
        assert_eq!(calls[0].max_confs, i32::MAX);
    }

    #[tokio::test]
    async fn total_reflects_only_the_latest_listing() {
        let lightning = Arc::new(MockLightning::new(vec![rpc_utxo(
            1,
            10_000,
            AddressType::WitnessPubkeyHash,
        )]));
        let mut source = RemoteUtxoSource::new(lightning.clone());

        source.list_unspent_witness(1, i32::MAX).await.unwrap();
        source.list_unspent_witness(1, i32::MAX).await.unwrap();

        assert_eq!(source.total_amount(), 10_000);
    }

    #[tokio::test]
    async fn unsupported_address_type_is_rejected() {
        let lightning = Arc::new(MockLightning::new(vec![rpc_utxo(
            1,
            10_000,
            AddressType::TaprootPubkey,
        )]));
        let mut source = RemoteUtxoSource::new(lightning);

        let err = source.list_unspent_witness(1, i32::MAX).await.unwrap_err();

        assert!(matches!(err, Error::UnsupportedAddressType(_)));
    }

    #[tokio::test]
    async fn sign_output_raw_forwards_single_descriptor() {
        let client = Arc::new(MockSigner::new());
        let signer = RemoteSigner::new(client.clone());
        let tx = sample_tx();
        let desc = sample_desc(&tx);

        signer.sign_output_raw(&tx, &desc).await.unwrap();

        let requests = client.requests.lock().unwrap();
        let req = &requests[0];
        assert_eq!(req.raw_tx_bytes, serialize(&tx));
        assert_eq!(req.sign_descs.len(), 1);
        assert_eq!(req.sign_descs[0].output.value, 6000);
        assert_eq!(req.sign_descs[0].sighash, 1);
        assert_eq!(req.sign_descs[0].witness_script, vec![0xaa]);
        let sig_hashes = req.sig_hashes.as_ref().unwrap();
        assert_eq!(sig_hashes.hash_outputs, desc.sig_hashes.hash_outputs.to_vec());
    }

    #[tokio::test]
    async fn compute_input_script_writes_back_midstate() {
        let client = Arc::new(MockSigner::new());
        let signer = RemoteSigner::new(client.clone());
        let tx = sample_tx();
        let mut desc = sample_desc(&tx);

        let script = signer.compute_input_script(&tx, &mut desc).await.unwrap();

        assert_eq!(script.witness.len(), 2);
        assert_eq!(desc.sig_hashes.hash_prev_outs, [1; 32]);
        assert_eq!(desc.sig_hashes.hash_sequence, [2; 32]);
        assert_eq!(desc.sig_hashes.hash_outputs, [3; 32]);
    }

    #[tokio::test]
    async fn short_midstate_is_rejected() {
        let mut client = MockSigner::new();
        client.refreshed.hash_outputs = vec![3; 31];
        let signer = RemoteSigner::new(Arc::new(client));
        let tx = sample_tx();
        let mut desc = sample_desc(&tx);
        let original = desc.sig_hashes;

        let err = signer.compute_input_script(&tx, &mut desc).await.unwrap_err();

        assert!(matches!(err, Error::InvalidSigHashes));
        assert_eq!(desc.sig_hashes, original);
    }
}
