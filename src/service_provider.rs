use std::collections::HashMap;

use openssl::{sha::sha256, x509::X509};

use crate::SamlResult;

/// A registered service provider and the key material its requests are checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ServiceProvider {
    pub entity_id: String,
    /// DER encoded X.509 signing certificates.
    pub signing_certificates: Vec<Vec<u8>>,
    pub assertion_consumer_url: Option<String>,
}

impl ServiceProvider {
    pub fn new(entity_id: &str) -> Self {
        ServiceProvider {
            entity_id: entity_id.into(),
            signing_certificates: Vec::new(),
            assertion_consumer_url: None,
        }
    }

    pub fn signing_certificate_der(mut self, der: Vec<u8>) -> Self {
        self.signing_certificates.push(der);
        self
    }

    pub fn signing_certificate_pem(self, pem: &[u8]) -> SamlResult<Self> {
        let der = X509::from_pem(pem)?.to_der()?;
        Ok(self.signing_certificate_der(der))
    }

    pub fn assertion_consumer_url(self, url: &str) -> Self {
        ServiceProvider {
            assertion_consumer_url: Some(url.into()),
            ..self
        }
    }

    /// Hex SHA-256 fingerprints of the signing certificates, for logging.
    pub fn certificate_fingerprints(&self) -> Vec<String> {
        self.signing_certificates
            .iter()
            .map(|der| hex::encode(sha256(der)))
            .collect()
    }
}

/// Resolves SAML entity ids to service provider configuration.
///
/// The implementation can be as simple as a fixed list, or consult a database.
pub trait ServiceProviderRepository: Send + Sync {
    fn get_service_provider(&self, entity_id: &str) -> Option<ServiceProvider>;

    fn has_service_provider(&self, entity_id: &str) -> bool {
        self.get_service_provider(entity_id).is_some()
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryServiceProviderRepository {
    providers: HashMap<String, ServiceProvider>,
}

impl InMemoryServiceProviderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service_provider(mut self, provider: ServiceProvider) -> Self {
        self.insert(provider);
        self
    }

    /// Registers `provider`, replacing any earlier entry with the same entity id.
    pub fn insert(&mut self, provider: ServiceProvider) -> Option<ServiceProvider> {
        self.providers.insert(provider.entity_id.clone(), provider)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl FromIterator<ServiceProvider> for InMemoryServiceProviderRepository {
    fn from_iter<I: IntoIterator<Item = ServiceProvider>>(iter: I) -> Self {
        let mut repository = Self::new();
        for provider in iter {
            repository.insert(provider);
        }
        repository
    }
}

impl ServiceProviderRepository for InMemoryServiceProviderRepository {
    fn get_service_provider(&self, entity_id: &str) -> Option<ServiceProvider> {
        self.providers.get(entity_id).cloned()
    }

    fn has_service_provider(&self, entity_id: &str) -> bool {
        self.providers.contains_key(entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_providers() {
        let repository: InMemoryServiceProviderRepository = [
            ServiceProvider::new("https://sp-one.example/metadata"),
            ServiceProvider::new("https://sp-two.example/metadata")
                .assertion_consumer_url("https://sp-two.example/acs"),
        ]
        .into_iter()
        .collect();

        assert_eq!(repository.len(), 2);
        assert!(repository.has_service_provider("https://sp-one.example/metadata"));
        assert!(!repository.has_service_provider("https://sp-three.example/metadata"));
        assert_eq!(
            repository
                .get_service_provider("https://sp-two.example/metadata")
                .unwrap()
                .assertion_consumer_url
                .as_deref(),
            Some("https://sp-two.example/acs")
        );
        assert_eq!(
            repository.get_service_provider("https://sp-three.example/metadata"),
            None
        );
    }

    #[test]
    fn entity_ids_are_case_sensitive() {
        let repository = InMemoryServiceProviderRepository::new()
            .with_service_provider(ServiceProvider::new("https://SP.example/metadata"));
        assert!(!repository.has_service_provider("https://sp.example/metadata"));
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let mut repository = InMemoryServiceProviderRepository::new();
        assert!(repository
            .insert(ServiceProvider::new("sp").signing_certificate_der(vec![1]))
            .is_none());
        let previous = repository
            .insert(ServiceProvider::new("sp").signing_certificate_der(vec![2]))
            .unwrap();
        assert_eq!(previous.signing_certificates, vec![vec![1]]);
        assert_eq!(
            repository.get_service_provider("sp").unwrap().signing_certificates,
            vec![vec![2]]
        );
    }

    #[test]
    fn fingerprints_are_sha256_hex() {
        let provider = ServiceProvider::new("sp").signing_certificate_der(b"abc".to_vec());
        assert_eq!(
            provider.certificate_fingerprints(),
            vec!["ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad".to_string()]
        );
    }

    #[test]
    fn rejects_malformed_pem() {
        assert!(ServiceProvider::new("sp")
            .signing_certificate_pem(b"-----BEGIN CERTIFICATE-----\nnope\n-----END CERTIFICATE-----\n")
            .is_err());
    }
}
