use url::{form_urlencoded, Url};

use crate::{SamlError, SamlResult};

/// The parts of an inbound HTTP request the redirect binding looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    scheme_and_host: String,
    base_path: String,
    path_info: String,
    query: Option<String>,
}

impl HttpRequest {
    /// `scheme_and_host` is e.g. `https://idp.example:8443`, `base_path` is the
    /// mount point of the application (may be empty) and `path_info` the path
    /// below it. `query` is the raw query string as received, without `?`.
    pub fn new(scheme_and_host: &str, base_path: &str, path_info: &str, query: Option<&str>) -> Self {
        HttpRequest {
            scheme_and_host: scheme_and_host.trim_end_matches('/').into(),
            base_path: base_path.trim_end_matches('/').into(),
            path_info: path_info.into(),
            query: query.map(Into::into),
        }
    }

    pub fn from_url(url: &str) -> SamlResult<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| SamlError::BadRequest(format!("Invalid request URL: {e}")))?;
        Ok(HttpRequest::new(
            &parsed.origin().ascii_serialization(),
            "",
            parsed.path(),
            parsed.query(),
        ))
    }

    pub fn with_base_path(self, base_path: &str) -> Self {
        let base_path = base_path.trim_end_matches('/');
        let path_info = match self.path_info.strip_prefix(base_path) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.to_string(),
            _ => self.path_info.clone(),
        };
        HttpRequest {
            base_path: base_path.into(),
            path_info,
            ..self
        }
    }

    /// The URL the request was received on, without the query string.
    pub fn full_uri(&self) -> String {
        format!("{}{}{}", self.scheme_and_host, self.base_path, self.path_info)
    }

    pub fn raw_query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// First decoded value of the query parameter `name`.
    pub fn parameter(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Like [`HttpRequest::parameter`], treating an empty value as absent.
    pub fn non_empty_parameter(&self, name: &str) -> Option<String> {
        self.parameter(name).filter(|value| !value.is_empty())
    }
}

/// A `302 Found` pointing the user agent at `location`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectResponse {
    location: String,
}

impl RedirectResponse {
    pub fn new(location: String) -> Self {
        RedirectResponse { location }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn status(&self) -> u16 {
        302
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_uri_excludes_query() {
        let request =
            HttpRequest::from_url("https://idp.example/sso?SAMLRequest=abc&RelayState=x").unwrap();
        assert_eq!(request.full_uri(), "https://idp.example/sso");
        assert_eq!(request.raw_query(), Some("SAMLRequest=abc&RelayState=x"));
    }

    #[test]
    fn full_uri_keeps_non_default_port() {
        let request = HttpRequest::from_url("https://idp.example:8443/saml/sso").unwrap();
        assert_eq!(request.full_uri(), "https://idp.example:8443/saml/sso");

        let request = HttpRequest::from_url("https://idp.example:443/saml/sso").unwrap();
        assert_eq!(request.full_uri(), "https://idp.example/saml/sso");
    }

    #[test]
    fn base_path_is_part_of_full_uri() {
        let request = HttpRequest::new("https://idp.example", "/app/", "/sso", None);
        assert_eq!(request.full_uri(), "https://idp.example/app/sso");

        let request = HttpRequest::from_url("https://idp.example/app/sso")
            .unwrap()
            .with_base_path("/app");
        assert_eq!(request.full_uri(), "https://idp.example/app/sso");
    }

    #[test]
    fn parameters_are_form_decoded() {
        let request = HttpRequest::new(
            "https://idp.example",
            "",
            "/sso",
            Some("SAMLRequest=a%2Bb+c&Signature=&SigAlg=x&SigAlg=y"),
        );
        assert_eq!(request.parameter("SAMLRequest").as_deref(), Some("a+b c"));
        assert_eq!(request.parameter("Signature").as_deref(), Some(""));
        assert_eq!(request.non_empty_parameter("Signature"), None);
        assert_eq!(request.parameter("SigAlg").as_deref(), Some("x"));
        assert_eq!(request.parameter("RelayState"), None);
    }

    #[test]
    fn redirect_is_found() {
        let response = RedirectResponse::new("https://sp.example/acs".into());
        assert_eq!(response.status(), 302);
        assert_eq!(response.location(), "https://sp.example/acs");
    }

    #[test]
    fn rejects_relative_url() {
        assert!(HttpRequest::from_url("/sso?SAMLRequest=abc").is_err());
    }
}
