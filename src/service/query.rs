//! Query-protocol client: `GET ?Action=...&Version=...` with a signed query.

use std::collections::BTreeMap;
use std::sync::Arc;

use http::Method;
use tracing::instrument;

use crate::decoder::StructuredValue;
use crate::engine::{Request, RequestEngine, RequestError, RequestOptions};
use crate::signer::SigningScheme;

/// Validity window of a V4 query signature on an ordinary call.
const QUERY_V4_EXPIRES_SECS: u64 = 300;

/// How query calls are signed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QuerySignature {
    /// Signature version 2 with a `Timestamp`.
    #[default]
    V2,
    /// Signature version 4 in the query string.
    V4 {
        /// Region in the credential scope.
        region: String,
        /// Service in the credential scope.
        service: String,
    },
}

/// Issues query-protocol actions against one service endpoint.
#[derive(Debug, Clone)]
pub struct QueryClient {
    engine: Arc<RequestEngine>,
    version: String,
    path: String,
    signature: QuerySignature,
}

impl QueryClient {
    /// Client for API `version` at the engine's endpoint root.
    pub fn new(engine: Arc<RequestEngine>, version: impl Into<String>) -> Self {
        Self {
            engine,
            version: version.into(),
            path: "/".to_string(),
            signature: QuerySignature::V2,
        }
    }

    /// Sends actions to `path`, such as a queue URL path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Signs with `signature`.
    #[must_use]
    pub fn with_signature(mut self, signature: QuerySignature) -> Self {
        self.signature = signature;
        self
    }

    fn scheme(&self) -> SigningScheme {
        match &self.signature {
            QuerySignature::V2 => SigningScheme::QueryV2 { expires: None },
            QuerySignature::V4 { region, service } => SigningScheme::QueryV4 {
                region: region.clone(),
                service: service.clone(),
                expires_in: QUERY_V4_EXPIRES_SECS,
            },
        }
    }

    /// Calls `action` with `params` and returns the decoded body.
    ///
    /// An empty body decodes to an empty mapping.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] on transport failure, a service error, or an
    /// unexpected status.
    #[instrument(skip(self, params), fields(version = %self.version))]
    pub async fn call<K, V>(
        &self,
        action: &str,
        params: impl IntoIterator<Item = (K, V)>,
    ) -> Result<StructuredValue, RequestError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut request = Request::new(Method::GET, self.path.clone())
            .query("Action", action)
            .query("Version", self.version.clone())
            .signed(self.scheme());
        for (key, value) in params {
            request = request.query(key, value);
        }
        let response = self
            .engine
            .execute(request, RequestOptions::default().structured())
            .await?;
        Ok(response
            .into_structured()
            .unwrap_or_else(|| StructuredValue::Mapping(BTreeMap::new())))
    }
}
