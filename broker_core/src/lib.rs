mod client;
pub mod codec;
pub mod credentials;
pub mod debug;
mod decode;
pub mod error;
pub mod pagination;
pub mod policy;
pub mod request;
mod secret;
mod timeout;
pub mod transport;

pub use client::{
    ApiClient, ClientBuilder, CredentialRefresher, DEFAULT_MAX_IN_FLIGHT, PendingCall, WeakClient,
};
pub use secret::SecretString;
pub use timeout::TimeoutOverride;

pub mod prelude {
    pub use crate::client::{ApiClient, ClientBuilder, CredentialRefresher, PendingCall, WeakClient};
    #[cfg(feature = "json")]
    pub use crate::codec::json::{ContextualJson, DecodeContext, DecodeInContext, Json};
    pub use crate::codec::{Body, ContentType, Decodes, Encodes, NoContent};
    pub use crate::credentials::{CredentialHolder, Credentials, Token};
    pub use crate::debug::{DebugLevel, DebugSink, NoopDebugSink, TracingDebugSink};
    pub use crate::error::{ApiError, DecodeStage, ErrorContext, ErrorDetail, ErrorKind, FxError};
    pub use crate::pagination::{Caps, PreviousPage};
    pub use crate::request::{BuildContext, RequestTemplate};
    pub use crate::secret::SecretString;
    pub use crate::timeout::TimeoutOverride;
    pub use crate::transport::{
        BuiltRequest, Exchange, Expectations, ReqwestTransport, ResponseHead, Transport,
    };
}
