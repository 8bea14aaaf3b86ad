use libxml::{parser::Parser as XmlParser, xpath::Context};
use time::{format_description::well_known::Iso8601, OffsetDateTime};

use crate::{
    utils::{decode_xml_base64, inflate_bounded, single_node},
    AuthnRequest, HttpRequest, RedirectQuery, SamlError, SamlResult,
};

const SAMLP_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
const SAML_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";

/// Upper bound for the url-encoded `SAMLRequest` value.
const MAX_ENCODED_SIZE: usize = 128 * 1024;

const DEFAULT_MAX_INFLATED_SIZE: usize = 64 * 1024;

/// Turns the query of an HTTP-Redirect request into an [`AuthnRequest`].
pub trait AuthnRequestFactory: Send + Sync {
    /// Decodes the request, ignoring any detached signature parameters.
    fn create_unsigned_from_http_request(&self, request: &HttpRequest) -> SamlResult<AuthnRequest>;

    /// Decodes the request, keeping `SigAlg` and `Signature` as received.
    fn create_signed_from_http_request(&self, request: &HttpRequest) -> SamlResult<AuthnRequest>;
}

#[derive(Debug, Clone)]
pub struct XmlAuthnRequestFactory {
    max_inflated_size: usize,
}

impl Default for XmlAuthnRequestFactory {
    fn default() -> Self {
        XmlAuthnRequestFactory {
            max_inflated_size: DEFAULT_MAX_INFLATED_SIZE,
        }
    }
}

impl XmlAuthnRequestFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_inflated_size(self, max_inflated_size: usize) -> Self {
        XmlAuthnRequestFactory { max_inflated_size }
    }

    fn capture_query(request: &HttpRequest) -> SamlResult<RedirectQuery> {
        let raw = request
            .raw_query()
            .ok_or_else(|| SamlError::InvalidEncoding("request has no query string".into()))?;
        let query = RedirectQuery::parse(raw)?;
        if query.raw_saml_request().len() > MAX_ENCODED_SIZE {
            return Err(SamlError::InvalidEncoding(format!(
                "SAMLRequest exceeds {MAX_ENCODED_SIZE} bytes"
            )));
        }
        Ok(query)
    }

    fn decode(&self, query: RedirectQuery) -> SamlResult<AuthnRequest> {
        let compressed = decode_xml_base64(&query.saml_request()?)
            .map_err(|e| SamlError::InvalidEncoding(format!("Base64 decode error: {e}")))?;
        let xml = inflate_bounded(&compressed, self.max_inflated_size)?;
        parse_authn_request(&xml, query)
    }
}

impl AuthnRequestFactory for XmlAuthnRequestFactory {
    fn create_unsigned_from_http_request(&self, request: &HttpRequest) -> SamlResult<AuthnRequest> {
        self.decode(Self::capture_query(request)?.without_signature())
    }

    fn create_signed_from_http_request(&self, request: &HttpRequest) -> SamlResult<AuthnRequest> {
        self.decode(Self::capture_query(request)?)
    }
}

fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|value| !value.is_empty())
}

fn parse_bool(value: Option<String>, attribute: &str) -> SamlResult<bool> {
    match value.as_deref() {
        None => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(SamlError::InvalidAuthnRequest(format!(
            "{attribute} is not a boolean: \"{other}\""
        ))),
    }
}

/// Reads the inflated AuthnRequest XML. `query` is the transport it arrived in.
pub(crate) fn parse_authn_request(xml: &[u8], query: RedirectQuery) -> SamlResult<AuthnRequest> {
    let parser = XmlParser::default();

    let document = parser.parse_string(xml).map_err(SamlError::InvalidXml)?;

    let mut context = Context::new(&document)
        .map_err(|_| SamlError::InvalidAuthnRequest("failed to create XPath context".into()))?;
    for (prefix, href) in [("samlp", SAMLP_NS), ("saml", SAML_NS)] {
        context.register_namespace(prefix, href).map_err(|_| {
            SamlError::InvalidAuthnRequest(format!("failed to register namespace {prefix}"))
        })?;
    }

    let root = single_node(
        &context
            .evaluate("/samlp:AuthnRequest")
            .map_err(|_| SamlError::InvalidAuthnRequest("not an AuthnRequest".into()))?,
        "samlp:AuthnRequest root element",
    )?;

    let id = root
        .get_attribute("ID")
        .and_then(non_empty)
        .ok_or_else(|| SamlError::InvalidAuthnRequest("ID is missing".into()))?;

    match root.get_attribute("Version").as_deref() {
        Some("2.0") => {}
        other => {
            return Err(SamlError::InvalidAuthnRequest(format!(
                "unsupported SAML version {other:?}"
            )))
        }
    }

    let issue_instant = root
        .get_attribute("IssueInstant")
        .map(|instant| {
            OffsetDateTime::parse(&instant, &Iso8601::DEFAULT).map_err(|_| {
                SamlError::InvalidAuthnRequest(format!("IssueInstant is invalid: \"{instant}\""))
            })
        })
        .transpose()?;

    let service_provider = context
        .findvalue("/samlp:AuthnRequest/saml:Issuer/text()", None)
        .ok()
        .map(|issuer| issuer.trim().to_string())
        .and_then(non_empty)
        .ok_or_else(|| SamlError::InvalidAuthnRequest("Issuer is missing".into()))?;

    let subject_name_id = context
        .findvalue("/samlp:AuthnRequest/saml:Subject/saml:NameID/text()", None)
        .ok()
        .map(|name_id| name_id.trim().to_string())
        .and_then(non_empty);

    Ok(AuthnRequest {
        id,
        issue_instant,
        service_provider,
        destination: root.get_attribute("Destination").unwrap_or_default(),
        assertion_consumer_service_url: root
            .get_attribute("AssertionConsumerServiceURL")
            .and_then(non_empty),
        protocol_binding: root
            .get_attribute("ProtocolBinding")
            .and_then(|binding| binding.parse().ok()),
        force_authn: parse_bool(root.get_attribute("ForceAuthn"), "ForceAuthn")?,
        is_passive: parse_bool(root.get_attribute("IsPassive"), "IsPassive")?,
        subject_name_id,
        query,
    })
}

#[cfg(test)]
mod tests {
    use base64::{prelude::BASE64_STANDARD, Engine};
    use deflate::deflate_bytes;

    use crate::{
        signature::tests::generate_key_and_certificate, AuthnRequestBuilder, ProtocolBinding,
        SignatureAlgorithm, NAME_ID_FORMAT_EMAIL_ADDRESS,
    };

    use super::*;

    fn builder() -> AuthnRequestBuilder {
        AuthnRequestBuilder::new()
            .id("_4fee3b046395c4e751011e97f8900b5273d56685")
            .issued_now()
            .issuer("https://sp.example/metadata")
            .destination("https://idp.example/sso")
            .consumer_url("https://sp.example/acs")
            .name_format(NAME_ID_FORMAT_EMAIL_ADDRESS)
    }

    fn http_request(query: &str) -> HttpRequest {
        HttpRequest::new("https://idp.example", "", "/sso", Some(query))
    }

    fn encode_xml(xml: &str) -> String {
        urlencoding::encode(&BASE64_STANDARD.encode(deflate_bytes(xml.as_bytes()))).into_owned()
    }

    #[test]
    fn decodes_unsigned_request() {
        let sent = builder()
            .subject("user@sp.example")
            .is_passive(true)
            .build_request(Some("state"));
        let request = http_request(&sent.build_request_query());

        let decoded = XmlAuthnRequestFactory::new()
            .create_unsigned_from_http_request(&request)
            .unwrap();

        assert_eq!(decoded.request_id(), "_4fee3b046395c4e751011e97f8900b5273d56685");
        assert_eq!(decoded.service_provider(), "https://sp.example/metadata");
        assert_eq!(decoded.destination(), "https://idp.example/sso");
        assert_eq!(decoded.assertion_consumer_service_url(), Some("https://sp.example/acs"));
        assert_eq!(decoded.protocol_binding(), Some(ProtocolBinding::Redirect));
        assert_eq!(decoded.subject_name_id(), Some("user@sp.example"));
        assert!(decoded.is_passive());
        assert!(!decoded.is_force_authn());
        assert!(decoded.issue_instant().is_some());
        assert_eq!(decoded.relay_state().unwrap().as_deref(), Some("state"));
        assert!(!decoded.is_signed());
    }

    #[test]
    fn unsigned_variant_drops_signature_parameters() {
        let (key, _) = generate_key_and_certificate();
        let sent = builder()
            .build_signed_request(None, &key, SignatureAlgorithm::RsaSha256)
            .unwrap();
        let request = http_request(&sent.build_request_query());

        let unsigned = XmlAuthnRequestFactory::new()
            .create_unsigned_from_http_request(&request)
            .unwrap();
        assert!(!unsigned.is_signed());
        assert_eq!(unsigned.signature_algorithm(), None);

        let signed = XmlAuthnRequestFactory::new()
            .create_signed_from_http_request(&request)
            .unwrap();
        assert!(signed.is_signed());
        assert_eq!(signed.signed_query(), sent.signed_query());
        assert_eq!(signed.signature_bytes().unwrap(), sent.signature_bytes().unwrap());
    }

    #[test]
    fn signed_variant_ignores_foreign_parameters() {
        let (key, _) = generate_key_and_certificate();
        let sent = builder()
            .build_signed_request(Some("rs"), &key, SignatureAlgorithm::RsaSha256)
            .unwrap();
        let request = http_request(&format!("foo=bar&{}&baz", sent.build_request_query()));

        let signed = XmlAuthnRequestFactory::new()
            .create_signed_from_http_request(&request)
            .unwrap();
        assert_eq!(signed.signed_query(), sent.signed_query());
    }

    #[test]
    fn rejects_undecodable_payloads() {
        let factory = XmlAuthnRequestFactory::new();

        let err = factory
            .create_unsigned_from_http_request(&http_request("SAMLRequest=%21%21%21"))
            .unwrap_err();
        assert!(matches!(err, SamlError::InvalidEncoding(_)));

        let not_deflated = urlencoding::encode(&BASE64_STANDARD.encode([0xffu8; 8])).into_owned();
        let err = factory
            .create_unsigned_from_http_request(&http_request(&format!("SAMLRequest={not_deflated}")))
            .unwrap_err();
        assert!(matches!(err, SamlError::InvalidEncoding(_)));

        let err = factory
            .create_unsigned_from_http_request(&HttpRequest::new("https://idp.example", "", "/sso", None))
            .unwrap_err();
        assert!(err.is_bad_request());
    }

    #[test]
    fn rejects_oversized_payloads() {
        let sent = builder().build_request(None);
        let request = http_request(&sent.build_request_query());

        let err = XmlAuthnRequestFactory::new()
            .max_inflated_size(64)
            .create_unsigned_from_http_request(&request)
            .unwrap_err();
        assert!(matches!(err, SamlError::InvalidEncoding(_)));

        let huge = "A".repeat(MAX_ENCODED_SIZE + 1);
        assert!(XmlAuthnRequestFactory::new()
            .create_unsigned_from_http_request(&http_request(&format!("SAMLRequest={huge}")))
            .is_err());
    }

    #[test]
    fn rejects_documents_that_are_not_authn_requests() {
        let factory = XmlAuthnRequestFactory::new();

        let logout = r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_1" Version="2.0"/>"#;
        let err = factory
            .create_unsigned_from_http_request(&http_request(&format!(
                "SAMLRequest={}",
                encode_xml(logout)
            )))
            .unwrap_err();
        assert!(matches!(err, SamlError::InvalidAuthnRequest(_)));

        let no_issuer = r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_1" Version="2.0" Destination="https://idp.example/sso"/>"#;
        let err = factory
            .create_unsigned_from_http_request(&http_request(&format!(
                "SAMLRequest={}",
                encode_xml(no_issuer)
            )))
            .unwrap_err();
        assert!(matches!(err, SamlError::InvalidAuthnRequest(_)));

        let old_version = r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_1" Version="1.1"><saml:Issuer>sp</saml:Issuer></samlp:AuthnRequest>"#;
        let err = factory
            .create_unsigned_from_http_request(&http_request(&format!(
                "SAMLRequest={}",
                encode_xml(old_version)
            )))
            .unwrap_err();
        assert!(matches!(err, SamlError::InvalidAuthnRequest(_)));

        let err = factory
            .create_unsigned_from_http_request(&http_request(&format!(
                "SAMLRequest={}",
                encode_xml("<samlp:AuthnRequest")
            )))
            .unwrap_err();
        assert!(err.is_bad_request());
    }

    #[test]
    fn missing_destination_decodes_as_empty() {
        let minimal = r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_1" Version="2.0" IssueInstant="2024-01-08T16:31:18Z"><saml:Issuer> https://sp.example/metadata </saml:Issuer></samlp:AuthnRequest>"#;
        let decoded = XmlAuthnRequestFactory::new()
            .create_unsigned_from_http_request(&http_request(&format!(
                "SAMLRequest={}",
                encode_xml(minimal)
            )))
            .unwrap();
        assert_eq!(decoded.destination(), "");
        assert_eq!(decoded.service_provider(), "https://sp.example/metadata");
        assert_eq!(decoded.protocol_binding(), None);
        assert_eq!(decoded.subject_name_id(), None);
    }
}
