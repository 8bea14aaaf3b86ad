use libxml::parser::XmlParseError;
use thiserror::Error;

mod authn_request;
mod factory;
mod http;
mod redirect_binding;
mod redirect_query;
mod service_provider;
mod signature;
mod utils;

pub use authn_request::{AuthnRequest, AuthnRequestBuilder, ProtocolBinding};
pub use factory::{AuthnRequestFactory, XmlAuthnRequestFactory};
pub use http::{HttpRequest, RedirectResponse};
pub use redirect_binding::{RedirectBinding, RedirectBindingBuilder};
pub use redirect_query::RedirectQuery;
pub use service_provider::{
    InMemoryServiceProviderRepository, ServiceProvider, ServiceProviderRepository,
};
pub use signature::{
    sign_redirect_query, RsaSignatureVerifier, SignatureAlgorithm, SignatureVerifier,
};
use time::format_description::well_known::iso8601::{self, TimePrecision};

pub const NAME_ID_FORMAT_EMAIL_ADDRESS: &str =
    "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";

/// Query parameter carrying the deflated, base64 encoded AuthnRequest.
pub const PARAMETER_REQUEST: &str = "SAMLRequest";
pub const PARAMETER_RELAY_STATE: &str = "RelayState";
pub const PARAMETER_SIGNATURE: &str = "Signature";
pub const PARAMETER_SIGNATURE_ALGORITHM: &str = "SigAlg";

pub const RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
pub const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";

// xs:dateTime isn't actually ISO8601, because implementors often don't support higher precisions.
pub const DATE_TIME_FORMAT: iso8601::Iso8601<
    {
        iso8601::Config::DEFAULT
            .set_time_precision(TimePrecision::Second {
                decimal_digits: None,
            })
            .encode()
    },
> = iso8601::Iso8601;

pub type SamlResult<T> = Result<T, SamlError>;

#[derive(Debug, Error)]
pub enum SamlError {
    /// The binding was wired up without a collaborator it cannot work without.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The inbound message failed a protocol or policy check.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// The issuer of the request is not a registered service provider.
    #[error("unknown service provider: {0}")]
    UnknownServiceProvider(String),
    /// A transport encoding layer (url, base64, deflate, utf-8) could not be undone.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),
    #[error("invalid XML: {0:?}")]
    InvalidXml(XmlParseError),
    /// Well-formed XML that is not a usable AuthnRequest.
    #[error("invalid AuthnRequest: {0}")]
    InvalidAuthnRequest(String),
    #[error("crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
}

impl SamlError {
    /// Whether the error is attributable to the client that sent the message.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Self::BadRequest(_)
                | Self::UnknownServiceProvider(_)
                | Self::InvalidEncoding(_)
                | Self::InvalidXml(_)
                | Self::InvalidAuthnRequest(_)
        )
    }

    pub fn http_status(&self) -> u16 {
        if self.is_bad_request() {
            400
        } else {
            500
        }
    }
}
