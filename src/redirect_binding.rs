//! Validation of SAML 2.0 AuthnRequests received over the HTTP-Redirect binding.
//!
//! Both pipelines run an ordered series of gates and stop at the first
//! failure; an [`AuthnRequest`] is only handed out once every gate passed.

use std::sync::Arc;

use crate::{
    AuthnRequest, AuthnRequestFactory, HttpRequest, RedirectResponse, RsaSignatureVerifier,
    SamlError, SamlResult, ServiceProviderRepository, SignatureVerifier, XmlAuthnRequestFactory,
    PARAMETER_REQUEST, PARAMETER_SIGNATURE, PARAMETER_SIGNATURE_ALGORITHM, RSA_SHA256,
};

#[derive(Default)]
pub struct RedirectBindingBuilder {
    repository: Option<Arc<dyn ServiceProviderRepository>>,
    signature_verifier: Option<Arc<dyn SignatureVerifier>>,
    factory: Option<Arc<dyn AuthnRequestFactory>>,
}

impl RedirectBindingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repository(self, repository: Arc<dyn ServiceProviderRepository>) -> Self {
        RedirectBindingBuilder {
            repository: Some(repository),
            ..self
        }
    }

    pub fn signature_verifier(self, signature_verifier: Arc<dyn SignatureVerifier>) -> Self {
        RedirectBindingBuilder {
            signature_verifier: Some(signature_verifier),
            ..self
        }
    }

    pub fn factory(self, factory: Arc<dyn AuthnRequestFactory>) -> Self {
        RedirectBindingBuilder {
            factory: Some(factory),
            ..self
        }
    }

    pub fn build(self) -> SamlResult<RedirectBinding> {
        let repository = self.repository.ok_or_else(|| {
            tracing::error!("redirect binding built without a service provider repository");
            SamlError::Configuration(
                "RedirectBinding requires a ServiceProviderRepository to be configured".into(),
            )
        })?;
        Ok(RedirectBinding {
            repository,
            signature_verifier: self
                .signature_verifier
                .unwrap_or_else(|| Arc::new(RsaSignatureVerifier::default())),
            factory: self
                .factory
                .unwrap_or_else(|| Arc::new(XmlAuthnRequestFactory::default())),
        })
    }
}

/// Decodes and authenticates AuthnRequests sent with the HTTP-Redirect binding.
#[derive(Clone)]
pub struct RedirectBinding {
    repository: Arc<dyn ServiceProviderRepository>,
    signature_verifier: Arc<dyn SignatureVerifier>,
    factory: Arc<dyn AuthnRequestFactory>,
}

impl RedirectBinding {
    pub fn new(
        repository: Arc<dyn ServiceProviderRepository>,
        signature_verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        RedirectBinding {
            repository,
            signature_verifier,
            factory: Arc::new(XmlAuthnRequestFactory::default()),
        }
    }

    pub fn builder() -> RedirectBindingBuilder {
        RedirectBindingBuilder::new()
    }

    /// Accepts a request without looking at its signature.
    ///
    /// The caller decides when the unsigned pipeline is appropriate.
    pub fn process_unsigned_request(&self, request: &HttpRequest) -> SamlResult<AuthnRequest> {
        require_saml_request(request)?;

        let authn_request = self.factory.create_unsigned_from_http_request(request)?;

        self.check_destination(request, &authn_request)?;
        self.check_service_provider(&authn_request)?;

        tracing::debug!(
            entity_id = %authn_request.service_provider(),
            request_id = %authn_request.request_id(),
            "accepted unsigned AuthnRequest"
        );
        Ok(authn_request)
    }

    /// Accepts a request only if it carries a valid detached signature of a
    /// registered service provider.
    pub fn process_signed_request(&self, request: &HttpRequest) -> SamlResult<AuthnRequest> {
        require_saml_request(request)?;

        if let Some(signature) = request.non_empty_parameter(PARAMETER_SIGNATURE) {
            if request
                .non_empty_parameter(PARAMETER_SIGNATURE_ALGORITHM)
                .is_none()
            {
                tracing::warn!("signature sent without {PARAMETER_SIGNATURE_ALGORITHM}");
                return Err(SamlError::BadRequest(format!(
                    "The request includes a signature \"{signature}\", but does not include the \
                     signature algorithm ({PARAMETER_SIGNATURE_ALGORITHM}) parameter"
                )));
            }
        }

        let authn_request = self.factory.create_signed_from_http_request(request)?;

        self.check_destination(request, &authn_request)?;
        self.check_service_provider(&authn_request)?;
        self.verify_signature(&authn_request)?;

        tracing::info!(
            entity_id = %authn_request.service_provider(),
            request_id = %authn_request.request_id(),
            "accepted signed AuthnRequest"
        );
        Ok(authn_request)
    }

    #[deprecated(note = "use process_signed_request or process_unsigned_request")]
    pub fn process_request(&self, request: &HttpRequest) -> SamlResult<AuthnRequest> {
        self.process_signed_request(request)
    }

    pub fn create_redirect_response(&self, request: &AuthnRequest) -> RedirectResponse {
        RedirectResponse::new(format!(
            "{}?{}",
            request.destination(),
            request.build_request_query()
        ))
    }

    fn check_destination(
        &self,
        request: &HttpRequest,
        authn_request: &AuthnRequest,
    ) -> SamlResult<()> {
        let current_uri = request.full_uri();
        if authn_request.destination() != current_uri {
            tracing::warn!(
                actual = %current_uri,
                declared = %authn_request.destination(),
                "AuthnRequest destination mismatch"
            );
            return Err(SamlError::BadRequest(format!(
                "Actual Destination \"{current_uri}\" does not match the AuthnRequest \
                 Destination \"{}\"",
                authn_request.destination()
            )));
        }
        Ok(())
    }

    fn check_service_provider(&self, authn_request: &AuthnRequest) -> SamlResult<()> {
        if !self
            .repository
            .has_service_provider(authn_request.service_provider())
        {
            tracing::warn!(entity_id = %authn_request.service_provider(), "unknown service provider");
            return Err(SamlError::UnknownServiceProvider(
                authn_request.service_provider().into(),
            ));
        }
        Ok(())
    }

    fn verify_signature(&self, authn_request: &AuthnRequest) -> SamlResult<()> {
        if !authn_request.is_signed() {
            tracing::warn!(entity_id = %authn_request.service_provider(), "unsigned AuthnRequest");
            return Err(SamlError::BadRequest("The SAMLRequest has to be signed".into()));
        }

        if authn_request.signature_algorithm().is_none() {
            tracing::warn!(
                entity_id = %authn_request.service_provider(),
                "signed AuthnRequest without signature algorithm"
            );
            return Err(SamlError::BadRequest(format!(
                "The SAMLRequest has to be signed with SHA256 algorithm: \"{RSA_SHA256}\""
            )));
        }

        let service_provider = self
            .repository
            .get_service_provider(authn_request.service_provider())
            .ok_or_else(|| {
                tracing::warn!(
                    entity_id = %authn_request.service_provider(),
                    "service provider disappeared before signature verification"
                );
                SamlError::UnknownServiceProvider(authn_request.service_provider().into())
            })?;

        if !self
            .signature_verifier
            .has_valid_signature(authn_request, &service_provider)
        {
            tracing::warn!(
                entity_id = %authn_request.service_provider(),
                request_id = %authn_request.request_id(),
                "AuthnRequest signature rejected"
            );
            return Err(SamlError::BadRequest(
                "The SAMLRequest has been signed, but the signature could not be validated".into(),
            ));
        }
        Ok(())
    }
}

fn require_saml_request(request: &HttpRequest) -> SamlResult<()> {
    if request.non_empty_parameter(PARAMETER_REQUEST).is_none() {
        tracing::warn!("request without {PARAMETER_REQUEST} parameter");
        return Err(SamlError::BadRequest(format!(
            "Required GET parameter \"{PARAMETER_REQUEST}\" is missing"
        )));
    }
    Ok(())
}
