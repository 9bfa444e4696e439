//! Sweep-all transaction construction.
//!
//! Spends every confirmed witness output reported by a [`UtxoSource`] into a
//! single destination output and has a [`Signer`] produce the input scripts.

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::ecdsa;
use bitcoin::{Address, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use tracing::debug;

use super::error::{Error, PolicyViolation};

/// Dust threshold of a P2WSH output at the default relay fee
pub const DEFAULT_DUST_LIMIT: u64 = 573;

/// Minimum relay fee expressed per kilo weight unit
pub const FEE_PER_KW_FLOOR: u64 = 253;

pub const SIGHASH_ALL: u32 = 0x01;

const MAX_MONEY: u64 = 21_000_000 * 100_000_000;

// Serialized sizes in bytes
const BASE_TX_SIZE: u64 = 4 + 4;
const INPUT_SIZE: u64 = 32 + 4 + 1 + 4;
const NESTED_P2WKH_SIG_SCRIPT_SIZE: u64 = 1 + 22;
const P2WKH_WITNESS_SIZE: u64 = 1 + 1 + 73 + 1 + 33;
const WITNESS_HEADER_SIZE: u64 = 2;
const WITNESS_SCALE_FACTOR: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SatPerKWeight(pub u64);

impl SatPerKWeight {
    /// `None` when the rate is too large to price `weight`
    pub fn fee_for_weight(&self, weight: u64) -> Option<u64> {
        self.0.checked_mul(weight).map(|fee| fee / 1000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WitnessType {
    WitnessPubKey,
    NestedWitnessPubKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub witness_type: WitnessType,
    pub value: u64,
    pub confirmations: i64,
    pub pk_script: ScriptBuf,
    pub outpoint: OutPoint,
}

/// BIP143 sighash midstate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxSigHashes {
    pub hash_prev_outs: [u8; 32],
    pub hash_sequence: [u8; 32],
    pub hash_outputs: [u8; 32],
}

impl TxSigHashes {
    pub fn new(tx: &Transaction) -> Self {
        let mut prev_outs = Vec::with_capacity(tx.input.len() * 36);
        let mut sequences = Vec::with_capacity(tx.input.len() * 4);
        for input in &tx.input {
            prev_outs.extend(serialize(&input.previous_output));
            sequences.extend(serialize(&input.sequence));
        }

        let mut outputs = Vec::new();
        for output in &tx.output {
            outputs.extend(serialize(output));
        }

        Self {
            hash_prev_outs: sha256d::Hash::hash(&prev_outs).to_byte_array(),
            hash_sequence: sha256d::Hash::hash(&sequences).to_byte_array(),
            hash_outputs: sha256d::Hash::hash(&outputs).to_byte_array(),
        }
    }
}

/// Everything a signer needs to produce a signature for one input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignDescriptor {
    /// The output being spent
    pub output: TxOut,
    pub hash_type: u32,
    pub witness_script: Vec<u8>,
    pub input_index: usize,
    pub sig_hashes: TxSigHashes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputScript {
    pub witness: Vec<Vec<u8>>,
    pub sig_script: Vec<u8>,
}

/// Source of spendable witness outputs.
///
/// Takes `&mut self` so an implementation can keep per-listing state.
#[async_trait]
pub trait UtxoSource: Send {
    async fn list_unspent_witness(
        &mut self,
        min_confs: i32,
        max_confs: i32,
    ) -> Result<Vec<Utxo>, Error>;
}

#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign_output_raw(
        &self,
        tx: &Transaction,
        sign_desc: &SignDescriptor,
    ) -> Result<ecdsa::Signature, Error>;

    /// Produces the witness and script sig for an input. Implementations may
    /// refresh `sign_desc.sig_hashes`.
    async fn compute_input_script(
        &self,
        tx: &Transaction,
        sign_desc: &mut SignDescriptor,
    ) -> Result<InputScript, Error>;
}

#[derive(Debug, Clone)]
pub struct SweepTxPackage {
    pub sweep_tx: Transaction,
    pub fee_rate: SatPerKWeight,
    pub weight: u64,
    pub fee: u64,
}

fn var_int_len(n: u64) -> u64 {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x10000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Upper bound on the weight of a sweep spending `inputs` into a single
/// output paying to `destination`.
pub fn estimate_sweep_weight(inputs: &[WitnessType], destination: &ScriptBuf) -> u64 {
    let script_len = destination.len() as u64;
    let output_size = 8 + var_int_len(script_len) + script_len;

    let mut input_size = 0;
    let mut witness_size = 0;
    for witness_type in inputs {
        input_size += INPUT_SIZE;
        if *witness_type == WitnessType::NestedWitnessPubKey {
            input_size += NESTED_P2WKH_SIG_SCRIPT_SIZE;
        }
        witness_size += P2WKH_WITNESS_SIZE;
    }

    let base_size = BASE_TX_SIZE
        + var_int_len(inputs.len() as u64)
        + input_size
        + var_int_len(1)
        + output_size;

    base_size * WITNESS_SCALE_FACTOR + WITNESS_HEADER_SIZE + witness_size
}

/// Crafts a signed transaction sweeping every confirmed coin to `destination`.
pub async fn craft_sweep_all_tx(
    fee_rate: SatPerKWeight,
    dust_limit: u64,
    block_height: u32,
    destination: &Address,
    utxo_source: &mut dyn UtxoSource,
    signer: &dyn Signer,
) -> Result<SweepTxPackage, Error> {
    let utxos = utxo_source.list_unspent_witness(1, i32::MAX).await?;
    if utxos.is_empty() {
        return Err(Error::NoInputs);
    }

    let total = utxos
        .iter()
        .try_fold(0u64, |acc, u| acc.checked_add(u.value))
        .ok_or(PolicyViolation::ValueOutOfRange(u64::MAX))?;
    let destination_script = destination.script_pubkey();

    let witness_types: Vec<WitnessType> = utxos.iter().map(|u| u.witness_type).collect();
    let weight = estimate_sweep_weight(&witness_types, &destination_script);
    let fee = fee_rate
        .fee_for_weight(weight)
        .ok_or(PolicyViolation::FeeExceedsValue {
            fee: u64::MAX,
            total,
        })?;

    let value = total
        .checked_sub(fee)
        .ok_or(PolicyViolation::FeeExceedsValue { fee, total })?;
    if value < dust_limit {
        return Err(PolicyViolation::OutputBelowDust { value, dust_limit }.into());
    }
    if value > MAX_MONEY {
        return Err(PolicyViolation::ValueOutOfRange(value).into());
    }

    debug!(
        "Sweeping {} inputs worth {} sat at {} sat/kw, weight {}, fee {}",
        utxos.len(),
        total,
        fee_rate.0,
        weight,
        fee
    );

    let lock_time =
        LockTime::from_height(block_height).map_err(|e| Error::LockTime(e.to_string()))?;

    let mut sweep_tx = Transaction {
        version: 2,
        lock_time,
        input: utxos
            .iter()
            .map(|u| TxIn {
                previous_output: u.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ZERO,
                witness: Witness::new(),
            })
            .collect(),
        output: vec![TxOut {
            value,
            script_pubkey: destination_script,
        }],
    };

    let mut sig_hashes = TxSigHashes::new(&sweep_tx);

    for (input_index, utxo) in utxos.iter().enumerate() {
        let mut sign_desc = SignDescriptor {
            output: TxOut {
                value: utxo.value,
                script_pubkey: utxo.pk_script.clone(),
            },
            hash_type: SIGHASH_ALL,
            witness_script: Vec::new(),
            input_index,
            sig_hashes,
        };

        let script = signer
            .compute_input_script(&sweep_tx, &mut sign_desc)
            .await?;
        sig_hashes = sign_desc.sig_hashes;

        let input = &mut sweep_tx.input[input_index];
        input.witness = Witness::from_slice(&script.witness);
        input.script_sig = ScriptBuf::from_bytes(script.sig_script);
    }

    Ok(SweepTxPackage {
        sweep_tx,
        fee_rate,
        weight,
        fee,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use bitcoin::secp256k1::{Secp256k1, SecretKey};
    use bitcoin::{Network, PublicKey, Txid};

    use super::*;

    pub(crate) fn p2wpkh_address(secret: u8, network: Network) -> Address {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[secret; 32]).unwrap();
        let pk = PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk));
        Address::p2wpkh(&pk, network).unwrap()
    }

    pub(crate) fn outpoint(n: u8) -> OutPoint {
        OutPoint {
            txid: Txid::from_byte_array([n; 32]),
            vout: n as u32,
        }
    }

    struct VecSource(Vec<Utxo>);

    #[async_trait]
    impl UtxoSource for VecSource {
        async fn list_unspent_witness(
            &mut self,
            _min_confs: i32,
            _max_confs: i32,
        ) -> Result<Vec<Utxo>, Error> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct RecordingSigner {
        seen: Mutex<Vec<SignDescriptor>>,
        refreshed: Option<TxSigHashes>,
    }

    #[async_trait]
    impl Signer for RecordingSigner {
        async fn sign_output_raw(
            &self,
            _tx: &Transaction,
            _sign_desc: &SignDescriptor,
        ) -> Result<ecdsa::Signature, Error> {
            unreachable!()
        }

        async fn compute_input_script(
            &self,
            _tx: &Transaction,
            sign_desc: &mut SignDescriptor,
        ) -> Result<InputScript, Error> {
            self.seen.lock().unwrap().push(sign_desc.clone());
            if let Some(refreshed) = self.refreshed {
                sign_desc.sig_hashes = refreshed;
            }
            Ok(InputScript {
                witness: vec![vec![0x30; 72], vec![0x02; 33]],
                sig_script: vec![],
            })
        }
    }

    fn utxo(n: u8, value: u64, witness_type: WitnessType) -> Utxo {
        Utxo {
            witness_type,
            value,
            confirmations: 6,
            pk_script: p2wpkh_address(n, Network::Regtest).script_pubkey(),
            outpoint: outpoint(n),
        }
    }

    #[test]
    fn weight_of_single_p2wkh_sweep() {
        let dest = p2wpkh_address(9, Network::Regtest).script_pubkey();

        assert_eq!(estimate_sweep_weight(&[WitnessType::WitnessPubKey], &dest), 439);
        assert_eq!(
            estimate_sweep_weight(&[WitnessType::NestedWitnessPubKey], &dest),
            439 + 23 * 4
        );
    }

    #[test]
    fn fee_for_weight_rounds_down() {
        assert_eq!(SatPerKWeight(253).fee_for_weight(439), Some(111));
        assert_eq!(SatPerKWeight(1000).fee_for_weight(439), Some(439));
        assert_eq!(SatPerKWeight(i64::MAX as u64).fee_for_weight(439), None);
    }

    #[test]
    fn midstate_tracks_outputs() {
        let mut tx = Transaction {
            version: 2,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: outpoint(1),
                ..Default::default()
            }],
            output: vec![TxOut {
                value: 1000,
                script_pubkey: ScriptBuf::new(),
            }],
        };
        let before = TxSigHashes::new(&tx);
        assert_eq!(before, TxSigHashes::new(&tx));

        tx.output[0].value = 999;
        let after = TxSigHashes::new(&tx);

        assert_eq!(before.hash_prev_outs, after.hash_prev_outs);
        assert_eq!(before.hash_sequence, after.hash_sequence);
        assert_ne!(before.hash_outputs, after.hash_outputs);
    }

    #[tokio::test]
    async fn sweeps_all_inputs_into_one_output() {
        let dest = p2wpkh_address(9, Network::Regtest);
        let mut source = VecSource(vec![
            utxo(1, 60_000, WitnessType::WitnessPubKey),
            utxo(2, 40_000, WitnessType::NestedWitnessPubKey),
        ]);
        let signer = RecordingSigner::default();

        let pkg = craft_sweep_all_tx(
            SatPerKWeight(1000),
            DEFAULT_DUST_LIMIT,
            800_000,
            &dest,
            &mut source,
            &signer,
        )
        .await
        .unwrap();

        let tx = &pkg.sweep_tx;
        assert_eq!(tx.input.len(), 2);
        assert_eq!(tx.output.len(), 1);
        assert_eq!(tx.output[0].script_pubkey, dest.script_pubkey());
        assert_eq!(tx.output[0].value + pkg.fee, 100_000);
        assert_eq!(pkg.fee, SatPerKWeight(1000).fee_for_weight(pkg.weight).unwrap());
        assert_eq!(tx.lock_time, LockTime::from_height(800_000).unwrap());
        assert!(tx.input.iter().all(|i| i.sequence == Sequence::ZERO));
        assert!(tx.input.iter().all(|i| i.witness.len() == 2));

        let seen = signer.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].input_index, 0);
        assert_eq!(seen[1].input_index, 1);
        assert_eq!(seen[1].output.value, 40_000);
        assert_eq!(seen[0].hash_type, SIGHASH_ALL);
    }

    #[tokio::test]
    async fn refreshed_midstate_is_carried_to_later_inputs() {
        let refreshed = TxSigHashes {
            hash_prev_outs: [7; 32],
            hash_sequence: [8; 32],
            hash_outputs: [9; 32],
        };
        let dest = p2wpkh_address(9, Network::Regtest);
        let mut source = VecSource(vec![
            utxo(1, 60_000, WitnessType::WitnessPubKey),
            utxo(2, 40_000, WitnessType::WitnessPubKey),
        ]);
        let signer = RecordingSigner {
            refreshed: Some(refreshed),
            ..Default::default()
        };

        craft_sweep_all_tx(
            SatPerKWeight(253),
            DEFAULT_DUST_LIMIT,
            100,
            &dest,
            &mut source,
            &signer,
        )
        .await
        .unwrap();

        let seen = signer.seen.lock().unwrap();
        assert_ne!(seen[0].sig_hashes, refreshed);
        assert_eq!(seen[1].sig_hashes, refreshed);
    }

    #[tokio::test]
    async fn dust_output_is_a_policy_violation() {
        let dest = p2wpkh_address(9, Network::Regtest);
        let mut source = VecSource(vec![utxo(1, 1_000, WitnessType::WitnessPubKey)]);

        let err = craft_sweep_all_tx(
            SatPerKWeight(1000),
            DEFAULT_DUST_LIMIT,
            100,
            &dest,
            &mut source,
            &RecordingSigner::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            Error::Policy(PolicyViolation::OutputBelowDust { value: 561, .. })
        ));
    }

    #[tokio::test]
    async fn fee_above_value_is_a_policy_violation() {
        let dest = p2wpkh_address(9, Network::Regtest);
        let mut source = VecSource(vec![utxo(1, 300, WitnessType::WitnessPubKey)]);

        let err = craft_sweep_all_tx(
            SatPerKWeight(1000),
            DEFAULT_DUST_LIMIT,
            100,
            &dest,
            &mut source,
            &RecordingSigner::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            Error::Policy(PolicyViolation::FeeExceedsValue { fee: 439, total: 300 })
        ));
    }

    #[tokio::test]
    async fn unpriceable_fee_rate_is_a_policy_violation() {
        let dest = p2wpkh_address(9, Network::Regtest);
        let mut source = VecSource(vec![utxo(1, 50_000, WitnessType::WitnessPubKey)]);

        let err = craft_sweep_all_tx(
            SatPerKWeight(i64::MAX as u64),
            DEFAULT_DUST_LIMIT,
            100,
            &dest,
            &mut source,
            &RecordingSigner::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            Error::Policy(PolicyViolation::FeeExceedsValue { fee: u64::MAX, total: 50_000 })
        ));
    }

    #[tokio::test]
    async fn empty_wallet_has_nothing_to_sweep() {
        let dest = p2wpkh_address(9, Network::Regtest);
        let mut source = VecSource(vec![]);

        let err = craft_sweep_all_tx(
            SatPerKWeight(253),
            DEFAULT_DUST_LIMIT,
            100,
            &dest,
            &mut source,
            &RecordingSigner::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::NoInputs));
    }
}
