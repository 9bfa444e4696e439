//! LUD-04 login with keys bound to the service host.

use bitcoin::bip32::{ChildNumber, ExtendedPrivKey};
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::Network;
use bitcoin_hashes::hmac::{Hmac, HmacEngine};
use bitcoin_hashes::{sha256, Hash, HashEngine};
use tracing::{debug, info};
use url::Url;

use super::{AuthParams, Error, LnUrlClient};

/// Keypair presented to a single service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkKey {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl LinkKey {
    pub fn sign_challenge(&self, secp: &Secp256k1<All>, k1: &[u8]) -> Result<Signature, Error> {
        let message =
            Message::from_slice(k1).map_err(|e| Error::InvalidChallenge(e.to_string()))?;
        Ok(secp.sign_ecdsa(&message, &self.secret_key))
    }
}

/// Derives the link key for a host.
///
/// The host is hashed with HMAC-SHA256 keyed by the master private key. The
/// first 16 bytes of the digest give four big-endian indices which are
/// derived in sequence from the master key. Should an index produce an
/// invalid child, the same step is retried with the next index, at most
/// `max_attempts` times.
#[derive(Debug, Clone)]
pub struct LinkKeyDeriver {
    secp: Secp256k1<All>,
    max_attempts: u32,
}

impl LinkKeyDeriver {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            secp: Secp256k1::new(),
            max_attempts,
        }
    }

    pub fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }

    pub fn derive(&self, seed: &[u8], host: &str) -> Result<LinkKey, Error> {
        // The network only affects serialization of the extended key
        let master = ExtendedPrivKey::new_master(Network::Bitcoin, seed)?;

        let mut engine = HmacEngine::<sha256::Hash>::new(&master.private_key.secret_bytes());
        engine.input(host.as_bytes());
        let digest = Hmac::<sha256::Hash>::from_engine(engine).to_byte_array();

        let mut key = master;
        for chunk in digest[..16].chunks_exact(4) {
            let index = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            key = self.derive_child(&key, index)?;
        }

        Ok(LinkKey {
            secret_key: key.private_key,
            public_key: PublicKey::from_secret_key(&self.secp, &key.private_key),
        })
    }

    fn derive_child(&self, parent: &ExtendedPrivKey, index: u32) -> Result<ExtendedPrivKey, Error> {
        let mut index = index;
        for _ in 0..self.max_attempts {
            match parent.ckd_priv(&self.secp, ChildNumber::from(index)) {
                Ok(child) => return Ok(child),
                Err(err) => {
                    debug!("Child {} is invalid ({}), trying the next index", index, err);
                    index = index.checked_add(1).ok_or(Error::KeyDerivationExhausted)?;
                }
            }
        }

        Err(Error::KeyDerivationExhausted)
    }
}

impl LnUrlClient {
    pub async fn link_key(&self, host: &str) -> Result<LinkKey, Error> {
        let seed = self.link_seed().await?;
        self.deriver.derive(&seed, host)
    }

    /// Signs the login challenge and presents it to the service.
    ///
    /// Returns the session token handed out by the service, empty when it
    /// doesn't issue one.
    pub async fn finish_auth(&self, params: &AuthParams, jwt: bool) -> Result<String, Error> {
        let link_key = self.link_key(&params.host).await?;

        let k1 = hex::decode(&params.k1).map_err(|e| Error::InvalidChallenge(e.to_string()))?;
        if k1.len() != 32 {
            return Err(Error::InvalidChallenge(format!(
                "expected 32 bytes, got {}",
                k1.len()
            )));
        }
        let sig = link_key.sign_challenge(self.deriver.secp(), &k1)?;

        let mut callback = Url::parse(&params.callback)?;
        {
            let mut query = callback.query_pairs_mut();
            query
                .append_pair("key", &link_key.public_key.to_string())
                .append_pair("sig", &hex::encode(&sig.serialize_der()[..]));
            if jwt {
                query.append_pair("jwt", "true");
            }
        }

        let response = self.get_json(callback.as_str()).await?;
        info!("Logged in to {}", params.host);

        Ok(response
            .get("token")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string())
    }
}
