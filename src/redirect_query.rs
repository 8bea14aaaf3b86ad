//! Raw capture of the HTTP-Redirect binding query parameters.
//!
//! The detached signature covers the parameters exactly as they appeared on
//! the wire, so values are kept in their received url-encoded form and never
//! re-serialized from decoded data.

use crate::{
    utils::decode_query_value, SamlError, SamlResult, PARAMETER_RELAY_STATE, PARAMETER_REQUEST,
    PARAMETER_SIGNATURE, PARAMETER_SIGNATURE_ALGORITHM,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectQuery {
    saml_request: String,
    relay_state: Option<String>,
    sig_alg: Option<String>,
    signature: Option<String>,
}

impl RedirectQuery {
    /// Captures the SAML parameters from a raw query string (without the leading `?`).
    ///
    /// Unrelated parameters are ignored. A SAML parameter that occurs more than
    /// once makes the query ambiguous and is rejected.
    pub fn parse(query: &str) -> SamlResult<Self> {
        let mut saml_request = None;
        let mut relay_state = None;
        let mut sig_alg = None;
        let mut signature = None;

        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let slot = match key {
                PARAMETER_REQUEST => &mut saml_request,
                PARAMETER_RELAY_STATE => &mut relay_state,
                PARAMETER_SIGNATURE_ALGORITHM => &mut sig_alg,
                PARAMETER_SIGNATURE => &mut signature,
                _ => continue,
            };
            if slot.is_some() {
                return Err(SamlError::InvalidEncoding(format!(
                    "parameter \"{key}\" occurs more than once"
                )));
            }
            *slot = Some(value.to_string());
        }

        let saml_request = saml_request
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                SamlError::InvalidEncoding(format!("parameter \"{PARAMETER_REQUEST}\" is missing"))
            })?;

        Ok(RedirectQuery {
            saml_request,
            relay_state,
            sig_alg,
            signature,
        })
    }

    /// Builds a query from an already url-encoded `SAMLRequest` value.
    pub fn from_encoded_request(saml_request: &str, relay_state: Option<&str>) -> Self {
        RedirectQuery {
            saml_request: saml_request.into(),
            relay_state: relay_state.map(|rs| urlencoding::encode(rs).into_owned()),
            sig_alg: None,
            signature: None,
        }
    }

    /// Sets the signature algorithm, which becomes part of the signed content.
    pub fn with_sig_alg(self, sig_alg: &str) -> Self {
        RedirectQuery {
            sig_alg: Some(urlencoding::encode(sig_alg).into_owned()),
            ..self
        }
    }

    /// Attaches the base64 value of a detached signature.
    pub fn with_signature(self, signature: &str) -> Self {
        RedirectQuery {
            signature: Some(urlencoding::encode(signature).into_owned()),
            ..self
        }
    }

    /// The same query with any detached signature dropped.
    pub fn without_signature(self) -> Self {
        RedirectQuery {
            sig_alg: None,
            signature: None,
            ..self
        }
    }

    pub fn raw_saml_request(&self) -> &str {
        &self.saml_request
    }

    pub fn raw_relay_state(&self) -> Option<&str> {
        self.relay_state.as_deref()
    }

    pub fn raw_sig_alg(&self) -> Option<&str> {
        self.sig_alg.as_deref()
    }

    pub fn raw_signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn saml_request(&self) -> SamlResult<String> {
        decode_query_value(&self.saml_request)
    }

    pub fn relay_state(&self) -> SamlResult<Option<String>> {
        self.relay_state.as_deref().map(decode_query_value).transpose()
    }

    pub fn sig_alg(&self) -> SamlResult<Option<String>> {
        self.sig_alg.as_deref().map(decode_query_value).transpose()
    }

    pub fn signature(&self) -> SamlResult<Option<String>> {
        self.signature.as_deref().map(decode_query_value).transpose()
    }

    /// The octet string the detached signature is computed over:
    /// `SAMLRequest=..[&RelayState=..]&SigAlg=..` with values as received.
    ///
    /// `None` when the query carries no `SigAlg`.
    pub fn signed_content(&self) -> Option<String> {
        let sig_alg = self.sig_alg.as_deref()?;
        let mut content = format!("{PARAMETER_REQUEST}={}", self.saml_request);
        if let Some(relay_state) = &self.relay_state {
            content.push_str(&format!("&{PARAMETER_RELAY_STATE}={relay_state}"));
        }
        content.push_str(&format!("&{PARAMETER_SIGNATURE_ALGORITHM}={sig_alg}"));
        Some(content)
    }

    pub fn to_query_string(&self) -> String {
        let mut query = match self.signed_content() {
            Some(content) => content,
            None => {
                let mut query = format!("{PARAMETER_REQUEST}={}", self.saml_request);
                if let Some(relay_state) = &self.relay_state {
                    query.push_str(&format!("&{PARAMETER_RELAY_STATE}={relay_state}"));
                }
                query
            }
        };
        if let Some(signature) = &self.signature {
            query.push_str(&format!("&{PARAMETER_SIGNATURE}={signature}"));
        }
        query
    }
}
