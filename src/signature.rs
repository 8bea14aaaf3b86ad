use std::{fmt::Display, str::FromStr};

use base64::{prelude::BASE64_STANDARD, Engine};
use openssl::{
    hash::MessageDigest,
    pkey::{PKeyRef, Private},
    sign::{Signer, Verifier},
    x509::X509,
};

use crate::{
    AuthnRequest, SamlError, SamlResult, ServiceProvider, RSA_SHA1, RSA_SHA256, RSA_SHA384,
    RSA_SHA512,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    RsaSha1,
    #[default]
    RsaSha256,
    RsaSha384,
    RsaSha512,
}

impl SignatureAlgorithm {
    pub fn uri(&self) -> &'static str {
        match self {
            SignatureAlgorithm::RsaSha1 => RSA_SHA1,
            SignatureAlgorithm::RsaSha256 => RSA_SHA256,
            SignatureAlgorithm::RsaSha384 => RSA_SHA384,
            SignatureAlgorithm::RsaSha512 => RSA_SHA512,
        }
    }

    fn digest(&self) -> MessageDigest {
        match self {
            SignatureAlgorithm::RsaSha1 => MessageDigest::sha1(),
            SignatureAlgorithm::RsaSha256 => MessageDigest::sha256(),
            SignatureAlgorithm::RsaSha384 => MessageDigest::sha384(),
            SignatureAlgorithm::RsaSha512 => MessageDigest::sha512(),
        }
    }
}

impl Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.uri())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            RSA_SHA1 => Ok(SignatureAlgorithm::RsaSha1),
            RSA_SHA256 => Ok(SignatureAlgorithm::RsaSha256),
            RSA_SHA384 => Ok(SignatureAlgorithm::RsaSha384),
            RSA_SHA512 => Ok(SignatureAlgorithm::RsaSha512),
            _ => Err(()),
        }
    }
}

/// Checks the detached signature of an AuthnRequest against a service provider's keys.
pub trait SignatureVerifier: Send + Sync {
    fn has_valid_signature(&self, request: &AuthnRequest, provider: &ServiceProvider) -> bool;
}

/// Verifies HTTP-Redirect signatures with the provider's RSA signing certificates.
#[derive(Debug, Default, Clone)]
pub struct RsaSignatureVerifier {
    allow_sha1: bool,
}

impl RsaSignatureVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_sha1(self, allow: bool) -> Self {
        RsaSignatureVerifier { allow_sha1: allow }
    }

    fn verify(&self, request: &AuthnRequest, provider: &ServiceProvider) -> SamlResult<bool> {
        let sig_alg = request
            .signature_algorithm()
            .ok_or_else(|| SamlError::BadRequest("missing signature algorithm".into()))?;
        let algorithm: SignatureAlgorithm = sig_alg.parse().map_err(|_| {
            SamlError::BadRequest(format!("unsupported signature algorithm \"{sig_alg}\""))
        })?;
        if algorithm == SignatureAlgorithm::RsaSha1 && !self.allow_sha1 {
            return Err(SamlError::BadRequest("SHA-1 signatures are not allowed".into()));
        }

        let signed_content = request
            .signed_query()
            .ok_or_else(|| SamlError::BadRequest("no signed query content".into()))?;
        let signature = request.signature_bytes()?;

        for der in &provider.signing_certificates {
            match verify_with_certificate(der, algorithm, &signed_content, &signature) {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        entity_id = %provider.entity_id,
                        certificate = %hex::encode(openssl::sha::sha256(der)),
                        error = %e,
                        "skipping unusable signing certificate"
                    );
                }
            }
        }
        Ok(false)
    }
}

fn verify_with_certificate(
    der: &[u8],
    algorithm: SignatureAlgorithm,
    signed_content: &str,
    signature: &[u8],
) -> SamlResult<bool> {
    let public_key = X509::from_der(der)?.public_key()?;
    let mut verifier = Verifier::new(algorithm.digest(), &public_key)?;
    verifier.update(signed_content.as_bytes())?;
    // A key of the wrong type or size surfaces as an error rather than a mismatch.
    Ok(verifier.verify(signature).unwrap_or(false))
}

impl SignatureVerifier for RsaSignatureVerifier {
    fn has_valid_signature(&self, request: &AuthnRequest, provider: &ServiceProvider) -> bool {
        if provider.signing_certificates.is_empty() {
            tracing::warn!(
                entity_id = %provider.entity_id,
                "service provider has no signing certificates"
            );
            return false;
        }
        match self.verify(request, provider) {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(
                    entity_id = %provider.entity_id,
                    certificates = ?provider.certificate_fingerprints(),
                    "signature does not match any signing certificate"
                );
                false
            }
            Err(e) => {
                tracing::warn!(entity_id = %provider.entity_id, error = %e, "signature rejected");
                false
            }
        }
    }
}

/// Signs the `SAMLRequest[&RelayState]&SigAlg` content, returning the base64 signature value.
pub fn sign_redirect_query(
    signed_content: &str,
    key: &PKeyRef<Private>,
    algorithm: SignatureAlgorithm,
) -> SamlResult<String> {
    let mut signer = Signer::new(algorithm.digest(), key)?;
    signer.update(signed_content.as_bytes())?;
    Ok(BASE64_STANDARD.encode(signer.sign_to_vec()?))
}
