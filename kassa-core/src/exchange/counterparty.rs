//! Liquidity counterparties and the client that talks to them.

use crate::config::CounterpartyConfig;
use async_trait::async_trait;
use kassa_sdk::objects::{ExchangeThread, Message, PublishedOffering, RfqAccepted};
use kassa_sdk::signature::{
    ProtocolSigner, SIGNATURE_HEADER, SIGNER_HEADER, SignatureError, decode_base64,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum CounterpartyError {
    #[error("unknown counterparty: {0}")]
    Unknown(String),

    #[error("counterparty rejected the request with {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("signature error: {0}")]
    Signature(#[from] SignatureError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counterparty {
    pub id: String,
    pub name: String,
    pub endpoint: Url,
    /// Raw Ed25519 public key.
    pub public_key: Vec<u8>,
}

impl TryFrom<&CounterpartyConfig> for Counterparty {
    type Error = CounterpartyError;

    fn try_from(config: &CounterpartyConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            id: config.id.clone(),
            name: config.name.clone(),
            endpoint: config.endpoint.clone(),
            public_key: decode_base64(&config.public_key)?,
        })
    }
}

/// Every counterparty the platform may route through.
#[derive(Debug, Clone, Default)]
pub struct CounterpartyDirectory {
    by_id: HashMap<String, Arc<Counterparty>>,
}

impl CounterpartyDirectory {
    pub fn new(counterparties: impl IntoIterator<Item = Counterparty>) -> Self {
        Self {
            by_id: counterparties
                .into_iter()
                .map(|c| (c.id.clone(), Arc::new(c)))
                .collect(),
        }
    }

    pub fn from_config(configs: &[CounterpartyConfig]) -> Result<Self, CounterpartyError> {
        let counterparties = configs
            .iter()
            .map(Counterparty::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(counterparties))
    }

    pub fn get(&self, id: &str) -> Result<Arc<Counterparty>, CounterpartyError> {
        self.by_id
            .get(id)
            .cloned()
            .ok_or_else(|| CounterpartyError::Unknown(id.to_owned()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Counterparty>> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Transport for the counterparty exchange protocol.
#[async_trait]
pub trait CounterpartyClient: Send + Sync {
    /// Offerings currently published by `counterparty`.
    async fn offerings(
        &self,
        counterparty: &Counterparty,
    ) -> Result<Vec<PublishedOffering>, CounterpartyError>;

    /// Submit a signed RFQ. Returns the exchange id the counterparty assigned.
    async fn send_rfq(
        &self,
        counterparty: &Counterparty,
        rfq: Message,
    ) -> Result<String, CounterpartyError>;

    /// Append a signed order or close to an existing thread.
    async fn send_message(
        &self,
        counterparty: &Counterparty,
        exchange_id: &str,
        message: Message,
    ) -> Result<(), CounterpartyError>;

    /// Threads for the given counterparty exchange ids.
    async fn threads(
        &self,
        counterparty: &Counterparty,
        exchange_ids: &[String],
    ) -> Result<Vec<ExchangeThread>, CounterpartyError>;
}

pub struct HttpCounterpartyClient {
    http: reqwest::Client,
    signer: Arc<ProtocolSigner>,
}

impl HttpCounterpartyClient {
    pub fn new(signer: Arc<ProtocolSigner>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, signer }
    }

    /// Signed GET of `path_and_query`, relative to the counterparty endpoint.
    async fn signed_get(
        &self,
        counterparty: &Counterparty,
        path_and_query: &str,
    ) -> Result<reqwest::Response, CounterpartyError> {
        let url = counterparty.endpoint.join(path_and_query)?;
        let target = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_owned(),
        };
        let response = self
            .http
            .get(url)
            .header(SIGNATURE_HEADER, self.signer.sign_request(&target))
            .header(SIGNER_HEADER, self.signer.id())
            .send()
            .await?;
        check(response).await
    }
}

/// Turn a non-success status into [`CounterpartyError::Rejected`].
async fn check(response: reqwest::Response) -> Result<reqwest::Response, CounterpartyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CounterpartyError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl CounterpartyClient for HttpCounterpartyClient {
    #[tracing::instrument(skip_all, err, fields(counterparty = %counterparty.id))]
    async fn offerings(
        &self,
        counterparty: &Counterparty,
    ) -> Result<Vec<PublishedOffering>, CounterpartyError> {
        let response = self.signed_get(counterparty, "offerings").await?;
        Ok(response.json().await?)
    }

    #[tracing::instrument(skip_all, err, fields(counterparty = %counterparty.id))]
    async fn send_rfq(
        &self,
        counterparty: &Counterparty,
        rfq: Message,
    ) -> Result<String, CounterpartyError> {
        let url = counterparty.endpoint.join("exchanges")?;
        let response = self.http.post(url).json(&rfq).send().await?;
        let accepted: RfqAccepted = check(response).await?.json().await?;
        Ok(accepted.exchange_id)
    }

    #[tracing::instrument(skip_all, err, fields(counterparty = %counterparty.id, %exchange_id))]
    async fn send_message(
        &self,
        counterparty: &Counterparty,
        exchange_id: &str,
        message: Message,
    ) -> Result<(), CounterpartyError> {
        let mut url = counterparty.endpoint.join("exchanges/")?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend([exchange_id, "messages"]);
        let response = self.http.post(url).json(&message).send().await?;
        check(response).await?;
        Ok(())
    }

    #[tracing::instrument(skip_all, err, fields(counterparty = %counterparty.id, count = exchange_ids.len()))]
    async fn threads(
        &self,
        counterparty: &Counterparty,
        exchange_ids: &[String],
    ) -> Result<Vec<ExchangeThread>, CounterpartyError> {
        if exchange_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut url = counterparty.endpoint.join("exchanges")?;
        url.query_pairs_mut()
            .extend_pairs(exchange_ids.iter().map(|id| ("id", id)));
        let path_and_query = match url.query() {
            Some(query) => format!("exchanges?{query}"),
            None => "exchanges".to_owned(),
        };
        let response = self.signed_get(counterparty, &path_and_query).await?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_decodes_configured_keys() {
        let pkcs8 = ProtocolSigner::generate_pkcs8().unwrap();
        let signer = ProtocolSigner::from_pkcs8("cp-1", &pkcs8).unwrap();
        let config = CounterpartyConfig {
            id: "cp-1".into(),
            name: "First".into(),
            endpoint: Url::parse("https://cp.example/api/").unwrap(),
            public_key: fast32::base64::RFC4648_NOPAD.encode(signer.public_key()),
        };
        let directory = CounterpartyDirectory::from_config(&[config]).unwrap();
        let counterparty = directory.get("cp-1").unwrap();
        assert_eq!(counterparty.public_key, signer.public_key());
        assert!(matches!(
            directory.get("cp-2"),
            Err(CounterpartyError::Unknown(_))
        ));
    }

    #[test]
    fn bad_key_is_rejected() {
        let config = CounterpartyConfig {
            id: "cp-1".into(),
            name: "First".into(),
            endpoint: Url::parse("https://cp.example/").unwrap(),
            public_key: "not base64!".into(),
        };
        assert!(CounterpartyDirectory::from_config(&[config]).is_err());
    }
}
