use std::fs;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Certificate, Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use super::error::ErrorResponse;
use super::{
    Error, EstimateFeeResponse, GetInfoResponse, InputScriptResp, LightningClient,
    ListUnspentRequest, ListUnspentResponse, PublishResponse, SignReq, SignResp, SignerClient,
    WalletKitClient,
};

const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";

/// Node connection over its REST gateway
#[derive(Debug, Clone)]
pub struct LndRest {
    client: Client,
    base_url: Url,
    macaroon: String,
}

impl LndRest {
    pub fn new(
        rest_url: &str,
        macaroon_path: &Path,
        tls_cert_path: Option<&Path>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let macaroon = hex::encode(fs::read(macaroon_path)?);

        let mut builder = Client::builder().timeout(timeout);
        if let Some(cert_path) = tls_cert_path {
            let cert = Certificate::from_pem(&fs::read(cert_path)?)?;
            builder = builder.add_root_certificate(cert);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: Url::parse(rest_url)?,
            macaroon,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.base_url.join(path)?;
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header(MACAROON_HEADER, &self.macaroon)
            .send()
            .await?;

        decode_response(response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let url = self.base_url.join(path)?;
        debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .header(MACAROON_HEADER, &self.macaroon)
            .json(body)
            .send()
            .await?;

        decode_response(response).await
    }
}

async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T, Error> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let err: ErrorResponse = serde_json::from_str(&body).unwrap_or(ErrorResponse {
            code: 0,
            message: body,
        });
        return Err(err.into_error(status));
    }

    Ok(serde_json::from_str(&body)?)
}

#[async_trait]
impl LightningClient for LndRest {
    async fn get_info(&self) -> Result<GetInfoResponse, Error> {
        self.get("/v1/getinfo").await
    }

    async fn list_unspent(
        &self,
        request: ListUnspentRequest,
    ) -> Result<ListUnspentResponse, Error> {
        let path = format!(
            "/v1/utxos?min_confs={}&max_confs={}",
            request.min_confs, request.max_confs
        );
        self.get(&path).await
    }
}

#[async_trait]
impl SignerClient for LndRest {
    async fn sign_output_raw(&self, request: SignReq) -> Result<SignResp, Error> {
        self.post("/v2/signer/signraw", &request).await
    }

    async fn compute_input_script(&self, request: SignReq) -> Result<InputScriptResp, Error> {
        self.post("/v2/signer/inputscript", &request).await
    }
}

#[async_trait]
impl WalletKitClient for LndRest {
    async fn estimate_fee(&self, conf_target: u32) -> Result<EstimateFeeResponse, Error> {
        self.get(&format!("/v2/wallet/estimatefee/{}", conf_target))
            .await
    }

    async fn publish_transaction(&self, tx: &[u8]) -> Result<PublishResponse, Error> {
        self.post("/v2/wallet/tx", &json!({ "tx_hex": STANDARD.encode(tx) }))
            .await
    }
}
