use crate::codec::Decodes;
use crate::error::{ApiError, DecodeStage, ErrorDetail, ErrorKind, FxError};
use crate::transport::{BuiltRequest, Exchange, ResponseHead};

fn stage_error(e: ApiError, stage: DecodeStage) -> ApiError {
    e.with_detail(ErrorDetail::Decode { stage })
}

impl<V> Exchange<V> {
    /// Decodes the body with a decoder configured from the exchange.
    ///
    /// `factory` sees the request, the response head and the forwarded
    /// values, so it can pick up e.g. the server `Date` header.
    pub fn decode<T, D, F, E>(&self, factory: F) -> Result<T, ApiError>
    where
        D: Decodes<T>,
        F: FnOnce(&BuiltRequest, &ResponseHead, &V) -> Result<D, E>,
        E: Into<FxError>,
    {
        let decoder = factory(&self.request, &self.response, &self.values).map_err(|e| {
            let e = ApiError::wrap(
                ErrorKind::InvalidResponse,
                "could not configure the response decoder",
                e.into(),
            );
            self.enrich(stage_error(e, DecodeStage::Decoder))
        })?;

        decoder.decode(&self.body).map_err(|e| {
            let e = ApiError::invalid_response("response body does not have the expected structure")
                .with_underlying(e);
            self.enrich(stage_error(e, DecodeStage::Structure))
        })
    }

    /// [`Exchange::decode`] followed by a pure transform of the decoded value.
    /// Transform failures carry [`DecodeStage::Transform`] and their own
    /// message, so a well-formed but semantically invalid payload can be told
    /// apart from a malformed one.
    pub fn decode_map<T, W, D, F, E, X, XE>(&self, factory: F, transform: X) -> Result<W, ApiError>
    where
        D: Decodes<T>,
        F: FnOnce(&BuiltRequest, &ResponseHead, &V) -> Result<D, E>,
        E: Into<FxError>,
        X: FnOnce(T, &BuiltRequest, &ResponseHead) -> Result<W, XE>,
        XE: Into<FxError>,
    {
        let decoded = self.decode(factory)?;
        transform(decoded, &self.request, &self.response).map_err(|e| {
            let e = ApiError::wrap(
                ErrorKind::InvalidResponse,
                "decoded response failed validation",
                e.into(),
            );
            self.enrich(stage_error(e, DecodeStage::Transform))
        })
    }

    #[cfg(feature = "json")]
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ApiError> {
        self.decode(|_, _, _| Ok::<_, FxError>(crate::codec::json::Json))
    }

    /// JSON decode resolved against the response `Date` header and the
    /// given account time zone.
    #[cfg(feature = "json")]
    pub fn contextual_json<T: crate::codec::json::DecodeInContext>(
        &self,
        timezone: Option<chrono::FixedOffset>,
    ) -> Result<T, ApiError> {
        use crate::codec::json::{ContextualJson, DecodeContext};
        self.decode(|_, resp, _| {
            Ok::<_, FxError>(ContextualJson::new(DecodeContext::from_headers(
                &resp.headers,
                timezone,
            )))
        })
    }
}
