use std::{fmt::Display, str::FromStr};

use base64::{prelude::BASE64_STANDARD, Engine};
use deflate::deflate_bytes;
use openssl::pkey::{PKeyRef, Private};
use time::{format_description::well_known::Iso8601, OffsetDateTime};
use yaserde::YaSerialize;

use crate::{
    signature::sign_redirect_query,
    utils::{decode_xml_base64, random_string},
    RedirectQuery, SamlError, SamlResult, SignatureAlgorithm, DATE_TIME_FORMAT,
};

#[derive(YaSerialize)]
#[yaserde(
  namespaces = {
    "samlp" = "urn:oasis:names:tc:SAML:2.0:protocol",
    "saml" = "urn:oasis:names:tc:SAML:2.0:assertion",
  },
  prefix = "samlp",
  rename = "AuthnRequest"
)]
struct AuthnRequestDocument {
    #[yaserde(attribute = true, rename = "ID")]
    id: String,
    #[yaserde(attribute = true, rename = "Version")]
    version: String,
    #[yaserde(attribute = true, rename = "IssueInstant")]
    issue_instant: String,
    #[yaserde(attribute = true, rename = "Destination")]
    destination: String,
    #[yaserde(attribute = true, rename = "ProtocolBinding")]
    protocol_binding: String,
    #[yaserde(attribute = true, rename = "AssertionConsumerServiceURL")]
    assertion_consumer_service_url: String,
    #[yaserde(attribute = true, rename = "ForceAuthn")]
    force_authn: bool,
    #[yaserde(attribute = true, rename = "IsPassive")]
    is_passive: bool,
    #[yaserde(rename = "Issuer", prefix = "saml")]
    issuer: Issuer,
    #[yaserde(rename = "Subject", prefix = "saml")]
    subject: Option<Subject>,
    #[yaserde(rename = "NameIDPolicy", prefix = "samlp")]
    name_id_policy: NameIdPolicy,
}

#[derive(YaSerialize)]
struct Issuer {
    #[yaserde(attribute = true, rename = "Format")]
    format: String,
    #[yaserde(text = true)]
    content: String,
}

#[derive(YaSerialize)]
struct NameIdPolicy {
    #[yaserde(attribute = true, rename = "Format")]
    format: String,
    #[yaserde(attribute = true, rename = "AllowCreate")]
    allow_create: bool,
}

#[derive(YaSerialize)]
struct Subject {
    #[yaserde(rename = "NameID", prefix = "saml")]
    name_id: NameId,
}

#[derive(YaSerialize)]
struct NameId {
    #[yaserde(attribute = true, rename = "Format")]
    format: String,
    #[yaserde(text = true)]
    content: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolBinding {
    Post,
    #[default]
    Redirect,
}

impl Display for ProtocolBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ProtocolBinding::Post => write!(f, "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST"),
            ProtocolBinding::Redirect => {
                write!(f, "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect")
            }
        }
    }
}

impl FromStr for ProtocolBinding {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" => Ok(ProtocolBinding::Post),
            "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" => Ok(ProtocolBinding::Redirect),
            _ => Err(()),
        }
    }
}

/// A decoded AuthnRequest together with the raw redirect parameters it arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthnRequest {
    pub(crate) id: String,
    pub(crate) issue_instant: Option<OffsetDateTime>,
    pub(crate) service_provider: String,
    pub(crate) destination: String,
    pub(crate) assertion_consumer_service_url: Option<String>,
    pub(crate) protocol_binding: Option<ProtocolBinding>,
    pub(crate) force_authn: bool,
    pub(crate) is_passive: bool,
    pub(crate) subject_name_id: Option<String>,
    pub(crate) query: RedirectQuery,
}

impl AuthnRequest {
    pub fn new(id: &str, service_provider: &str, destination: &str, query: RedirectQuery) -> Self {
        AuthnRequest {
            id: id.into(),
            issue_instant: None,
            service_provider: service_provider.into(),
            destination: destination.into(),
            assertion_consumer_service_url: None,
            protocol_binding: None,
            force_authn: false,
            is_passive: false,
            subject_name_id: None,
            query,
        }
    }

    pub fn with_issue_instant(self, instant: OffsetDateTime) -> Self {
        AuthnRequest {
            issue_instant: Some(instant),
            ..self
        }
    }

    pub fn with_assertion_consumer_service_url(self, url: &str) -> Self {
        AuthnRequest {
            assertion_consumer_service_url: Some(url.into()),
            ..self
        }
    }

    pub fn with_protocol_binding(self, binding: ProtocolBinding) -> Self {
        AuthnRequest {
            protocol_binding: Some(binding),
            ..self
        }
    }

    pub fn with_subject_name_id(self, name_id: &str) -> Self {
        AuthnRequest {
            subject_name_id: Some(name_id.into()),
            ..self
        }
    }

    pub fn with_flags(self, force_authn: bool, is_passive: bool) -> Self {
        AuthnRequest {
            force_authn,
            is_passive,
            ..self
        }
    }

    pub fn request_id(&self) -> &str {
        &self.id
    }

    pub fn issue_instant(&self) -> Option<OffsetDateTime> {
        self.issue_instant
    }

    /// Entity id of the service provider that issued the request.
    pub fn service_provider(&self) -> &str {
        &self.service_provider
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn assertion_consumer_service_url(&self) -> Option<&str> {
        self.assertion_consumer_service_url.as_deref()
    }

    pub fn protocol_binding(&self) -> Option<ProtocolBinding> {
        self.protocol_binding
    }

    pub fn is_force_authn(&self) -> bool {
        self.force_authn
    }

    pub fn is_passive(&self) -> bool {
        self.is_passive
    }

    pub fn subject_name_id(&self) -> Option<&str> {
        self.subject_name_id.as_deref()
    }

    pub fn relay_state(&self) -> SamlResult<Option<String>> {
        self.query.relay_state()
    }

    pub fn query(&self) -> &RedirectQuery {
        &self.query
    }

    pub fn is_signed(&self) -> bool {
        self.query.raw_signature().is_some_and(|sig| !sig.is_empty())
    }

    /// The decoded `SigAlg` URI, if one was sent and can be decoded.
    pub fn signature_algorithm(&self) -> Option<String> {
        self.query
            .sig_alg()
            .ok()
            .flatten()
            .filter(|alg| !alg.is_empty())
    }

    pub fn signature_bytes(&self) -> SamlResult<Vec<u8>> {
        let signature = self
            .query
            .signature()?
            .ok_or_else(|| SamlError::BadRequest("request carries no signature".into()))?;
        decode_xml_base64(&signature)
            .map_err(|e| SamlError::InvalidEncoding(format!("Invalid signature encoding: {e}")))
    }

    /// The exact octets the detached signature covers, or `None` when unsigned.
    pub fn signed_query(&self) -> Option<String> {
        self.query.signed_content()
    }

    pub fn build_request_query(&self) -> String {
        self.query.to_query_string()
    }
}

#[derive(Default)]
pub struct AuthnRequestBuilder {
    id: Option<String>,
    issue_instant: Option<OffsetDateTime>,
    issuer: Option<String>,
    destination: Option<String>,
    protocol_binding: ProtocolBinding,
    consumer_url: Option<String>,
    name_format: Option<String>,
    deny_create: bool,
    force_authn: bool,
    is_passive: bool,
    subject: Option<String>,
}

impl AuthnRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(self, id: &str) -> Self {
        AuthnRequestBuilder {
            id: Some(id.into()),
            ..self
        }
    }

    pub fn auto_id(self) -> Self {
        AuthnRequestBuilder {
            id: Some(format!("_id{}", random_string(32))),
            ..self
        }
    }

    pub fn issue_instant(self, instant: OffsetDateTime) -> Self {
        AuthnRequestBuilder {
            issue_instant: Some(instant),
            ..self
        }
    }

    pub fn issued_now(self) -> Self {
        AuthnRequestBuilder {
            issue_instant: Some(OffsetDateTime::now_utc()),
            ..self
        }
    }

    pub fn issuer(self, issuer: &str) -> Self {
        AuthnRequestBuilder {
            issuer: Some(issuer.into()),
            ..self
        }
    }

    pub fn destination(self, destination: &str) -> Self {
        AuthnRequestBuilder {
            destination: Some(destination.into()),
            ..self
        }
    }

    pub fn protocol_binding(self, binding: ProtocolBinding) -> Self {
        AuthnRequestBuilder {
            protocol_binding: binding,
            ..self
        }
    }

    pub fn consumer_url(self, url: &str) -> Self {
        AuthnRequestBuilder {
            consumer_url: Some(url.into()),
            ..self
        }
    }

    pub fn name_format(self, format: &str) -> Self {
        AuthnRequestBuilder {
            name_format: Some(format.into()),
            ..self
        }
    }

    pub fn allow_create(self, allow: bool) -> Self {
        AuthnRequestBuilder {
            deny_create: !allow,
            ..self
        }
    }

    pub fn force_authn(self, force_authn: bool) -> Self {
        AuthnRequestBuilder {
            force_authn,
            ..self
        }
    }

    pub fn is_passive(self, is_passive: bool) -> Self {
        AuthnRequestBuilder { is_passive, ..self }
    }

    pub fn subject(self, subject: &str) -> Self {
        AuthnRequestBuilder {
            subject: Some(subject.into()),
            ..self
        }
    }

    fn into_document(self) -> AuthnRequestDocument {
        AuthnRequestDocument {
            id: self.id.expect("ID is required"),
            version: "2.0".to_string(),
            issue_instant: self
                .issue_instant
                .expect("IssueInstant is required")
                .format(&DATE_TIME_FORMAT)
                .expect("Infallible formatting"),
            destination: self.destination.expect("Destination is required"),
            protocol_binding: self.protocol_binding.to_string(),
            assertion_consumer_service_url: self.consumer_url.expect("Consumer URL is required"),
            force_authn: self.force_authn,
            is_passive: self.is_passive,
            issuer: Issuer {
                format: "urn:oasis:names:tc:SAML:2.0:nameid-format:entity".to_string(),
                content: self.issuer.expect("Issuer is required"),
            },
            subject: self.subject.map(|subject| Subject {
                name_id: NameId {
                    format: self.name_format.clone().expect("Name format is required"),
                    content: subject,
                },
            }),
            name_id_policy: NameIdPolicy {
                format: self.name_format.clone().expect("Name format is required"),
                allow_create: !self.deny_create,
            },
        }
    }

    pub fn build(self) -> String {
        yaserde::ser::to_string(&self.into_document()).expect("Infallible serialization")
    }

    /// Serializes, deflates and base64 encodes the request.
    pub fn build_and_encode(self) -> String {
        encode_xml(&self.build())
    }

    /// Builds the request as it travels over the HTTP-Redirect binding.
    pub fn build_request(self, relay_state: Option<&str>) -> AuthnRequest {
        let binding = self.protocol_binding;
        let document = self.into_document();
        // Carry the instant at the precision it was serialized with.
        let issue_instant = OffsetDateTime::parse(&document.issue_instant, &Iso8601::DEFAULT).ok();
        let encoded = encode_xml(
            &yaserde::ser::to_string(&document).expect("Infallible serialization"),
        );

        AuthnRequest {
            id: document.id,
            issue_instant,
            service_provider: document.issuer.content,
            destination: document.destination,
            assertion_consumer_service_url: Some(document.assertion_consumer_service_url),
            protocol_binding: Some(binding),
            force_authn: document.force_authn,
            is_passive: document.is_passive,
            subject_name_id: document.subject.map(|subject| subject.name_id.content),
            query: RedirectQuery::from_encoded_request(&urlencoding::encode(&encoded), relay_state),
        }
    }

    /// Like [`AuthnRequestBuilder::build_request`], adding a detached `SigAlg`/`Signature` pair.
    pub fn build_signed_request(
        self,
        relay_state: Option<&str>,
        key: &PKeyRef<Private>,
        algorithm: SignatureAlgorithm,
    ) -> SamlResult<AuthnRequest> {
        let request = self.build_request(relay_state);
        let query = request.query.with_sig_alg(algorithm.uri());
        let signature = sign_redirect_query(
            &query.signed_content().expect("SigAlg was just set"),
            key,
            algorithm,
        )?;
        Ok(AuthnRequest {
            query: query.with_signature(&signature),
            ..request
        })
    }
}

fn encode_xml(xml: &str) -> String {
    BASE64_STANDARD.encode(deflate_bytes(xml.as_bytes()))
}
