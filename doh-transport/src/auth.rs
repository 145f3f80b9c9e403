//! Client Auth Provider: supplies a TLS client certificate chain on demand.

use std::sync::Arc;

use rustls::sign::CertifiedKey;

/// External collaborator providing TLS client-certificate material, e.g. for
/// mutually authenticated DoH endpoints.
pub trait ClientAuthProvider: Send + Sync {
    fn get_client_certificate(&self) -> Option<Arc<CertifiedKey>>;
}

pub(crate) struct CertResolver(pub Arc<dyn ClientAuthProvider>);

impl std::fmt::Debug for CertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertResolver").finish_non_exhaustive()
    }
}

impl rustls::client::ResolvesClientCert for CertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sig_schemes: &[rustls::SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        self.0.get_client_certificate()
    }

    fn has_certs(&self) -> bool {
        true
    }
}
