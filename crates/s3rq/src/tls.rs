//! TLS peer verification
//!
//! When a forced `Host` header value is in play the connection authority
//! and the logical host diverge, so default hostname verification cannot
//! apply. The engine keeps chain validation and replaces the name check:
//! Subject Alternative Name DNS entries first (exact case-insensitive, or
//! a single leftmost `*.` wildcard label), then the subject Common Name
//! (exact only). Entries carrying an embedded NUL byte are ignored.

use std::sync::Arc;

use tokio_rustls::rustls;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::rustls::RootCertStore;
use tokio_rustls::rustls::client::WebPkiServerVerifier;
use tokio_rustls::rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::crypto::CryptoProvider;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{CertificateError, DigitallySignedStruct, Error as TlsError, SignatureScheme};
use tracing::warn;

use crate::status::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SanMatch {
    Match,
    /// The certificate carries no SAN extension; the CN decides.
    NoSan,
    Mismatch,
}

/// Checks `hostname` against the SAN DNS entries of the leaf.
pub(crate) fn matches_subject_alt_name(hostname: &str, leaf: &LeafNames) -> SanMatch {
    if !leaf.has_san {
        return SanMatch::NoSan;
    }
    for dns in &leaf.san_dns {
        if dns.contains(&0) {
            warn!("embedded NUL in certificate DNS name, skipping entry");
            continue;
        }
        let Ok(name) = std::str::from_utf8(dns) else { continue };
        if name.eq_ignore_ascii_case(hostname) {
            return SanMatch::Match;
        }
        if name.len() > 2 && name.starts_with("*.") {
            // Single leftmost wildcard label: the suffix after `*` must
            // equal the hostname from its first dot.
            let dns_suffix = &name[1..];
            if let Some(dot) = hostname.find('.')
                && hostname[dot..].eq_ignore_ascii_case(dns_suffix)
            {
                return SanMatch::Match;
            }
        }
    }
    SanMatch::Mismatch
}

/// Checks `hostname` against the subject CN. No wildcards here.
pub(crate) fn matches_common_name(hostname: &str, cn: Option<&[u8]>) -> bool {
    let Some(cn) = cn else { return false };
    if cn.contains(&0) {
        return false;
    }
    let Ok(cn) = std::str::from_utf8(cn) else { return false };
    cn.eq_ignore_ascii_case(hostname)
}

/// Full hostname check over a DER-encoded leaf certificate: SAN first,
/// CN only when no SAN extension is present.
pub(crate) fn verify_peer_hostname(hostname: &str, leaf_der: &[u8]) -> bool {
    let Some(leaf) = x509::parse_leaf(leaf_der) else {
        return false;
    };
    match matches_subject_alt_name(hostname, &leaf) {
        SanMatch::Match => true,
        SanMatch::NoSan => matches_common_name(hostname, leaf.cn.as_deref()),
        SanMatch::Mismatch => false,
    }
}

/// DNS names extracted from a leaf certificate.
#[derive(Debug, Default)]
pub(crate) struct LeafNames {
    pub has_san: bool,
    pub san_dns: Vec<Vec<u8>>,
    pub cn: Option<Vec<u8>>,
}

/// Just enough DER to pull SAN dNSName entries and the subject CN out of
/// an X.509 certificate.
mod x509 {
    use super::LeafNames;

    const OID_COMMON_NAME: &[u8] = &[0x55, 0x04, 0x03];
    const OID_SUBJECT_ALT_NAME: &[u8] = &[0x55, 0x1D, 0x11];

    struct Der<'a> {
        data: &'a [u8],
    }

    impl<'a> Der<'a> {
        fn new(data: &'a [u8]) -> Self {
            Self { data }
        }

        fn peek_tag(&self) -> Option<u8> {
            self.data.first().copied()
        }

        fn read_tlv(&mut self) -> Option<(u8, &'a [u8])> {
            let (&tag, rest) = self.data.split_first()?;
            let (&first_len, rest) = rest.split_first()?;
            let (len, rest) = if first_len < 0x80 {
                (usize::from(first_len), rest)
            } else {
                let n = usize::from(first_len & 0x7f);
                if n == 0 || n > 4 || rest.len() < n {
                    return None;
                }
                let mut len = 0usize;
                for &b in &rest[..n] {
                    len = (len << 8) | usize::from(b);
                }
                (len, &rest[n..])
            };
            if rest.len() < len {
                return None;
            }
            let (content, tail) = rest.split_at(len);
            self.data = tail;
            Some((tag, content))
        }

        fn expect(&mut self, expected: u8) -> Option<&'a [u8]> {
            let (tag, content) = self.read_tlv()?;
            (tag == expected).then_some(content)
        }

        fn is_empty(&self) -> bool {
            self.data.is_empty()
        }
    }

    /// Parses the subject and SAN extension of a DER certificate.
    /// Returns `None` on any structural surprise.
    pub(super) fn parse_leaf(der: &[u8]) -> Option<LeafNames> {
        let mut top = Der::new(der);
        let cert = top.expect(0x30)?;
        let mut cert = Der::new(cert);
        let tbs = cert.expect(0x30)?;
        let mut tbs = Der::new(tbs);

        if tbs.peek_tag() == Some(0xA0) {
            tbs.read_tlv()?; // version
        }
        tbs.expect(0x02)?; // serial number
        tbs.expect(0x30)?; // signature algorithm
        tbs.expect(0x30)?; // issuer
        tbs.expect(0x30)?; // validity
        let subject = tbs.expect(0x30)?;
        tbs.expect(0x30)?; // subject public key info

        let mut names = LeafNames {
            cn: parse_common_name(subject),
            ..LeafNames::default()
        };

        while !tbs.is_empty() {
            let (tag, content) = tbs.read_tlv()?;
            if tag == 0xA3 {
                parse_extensions(content, &mut names);
            }
        }
        Some(names)
    }

    /// Subject is a SEQUENCE of RDN SETs of AttributeTypeAndValue; the
    /// first CN attribute wins.
    fn parse_common_name(subject: &[u8]) -> Option<Vec<u8>> {
        let mut rdns = Der::new(subject);
        while !rdns.is_empty() {
            let set = rdns.expect(0x31)?;
            let mut set = Der::new(set);
            while !set.is_empty() {
                let atv = set.expect(0x30)?;
                let mut atv = Der::new(atv);
                let oid = atv.expect(0x06)?;
                let (_, value) = atv.read_tlv()?;
                if oid == OID_COMMON_NAME {
                    return Some(value.to_vec());
                }
            }
        }
        None
    }

    fn parse_extensions(explicit: &[u8], names: &mut LeafNames) {
        let mut wrapper = Der::new(explicit);
        let Some(list) = wrapper.expect(0x30) else { return };
        let mut list = Der::new(list);
        while !list.is_empty() {
            let Some(ext) = list.expect(0x30) else { return };
            let mut ext = Der::new(ext);
            let Some(oid) = ext.expect(0x06) else { return };
            if ext.peek_tag() == Some(0x01) {
                ext.read_tlv(); // critical flag
            }
            let Some(value) = ext.expect(0x04) else { return };
            if oid == OID_SUBJECT_ALT_NAME {
                names.has_san = true;
                parse_general_names(value, &mut names.san_dns);
            }
        }
    }

    fn parse_general_names(octets: &[u8], dns_out: &mut Vec<Vec<u8>>) {
        let mut wrapper = Der::new(octets);
        let Some(list) = wrapper.expect(0x30) else { return };
        let mut list = Der::new(list);
        while !list.is_empty() {
            let Some((tag, content)) = list.read_tlv() else { return };
            // dNSName is context tag 2 (IA5String)
            if tag == 0x82 {
                dns_out.push(content.to_vec());
            }
        }
    }
}

/// Verifier for connections with a forced `Host` header: the inner
/// webpki verifier still validates the chain, but the hostname decision
/// is made against the pinned name with the SAN/CN rules above.
#[derive(Debug)]
pub(crate) struct PinnedHostVerifier {
    inner: Arc<WebPkiServerVerifier>,
    hostname: String,
}

impl PinnedHostVerifier {
    pub fn new(roots: Arc<RootCertStore>, hostname: &str) -> Result<Self, Status> {
        let inner = WebPkiServerVerifier::builder(roots)
            .build()
            .map_err(|_| Status::FailedToInitializeRequest)?;
        Ok(Self { inner, hostname: hostname.to_owned() })
    }
}

impl ServerCertVerifier for PinnedHostVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        let chain_result = self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);
        match chain_result {
            // A name mismatch is expected here: only the chain matters,
            // the hostname decision is ours.
            Ok(_)
            | Err(TlsError::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => {
                if verify_peer_hostname(&self.hostname, end_entity.as_ref()) {
                    Ok(ServerCertVerified::assertion())
                } else {
                    warn!(hostname = %self.hostname, "peer certificate does not match the expected hostname");
                    Err(TlsError::InvalidCertificate(CertificateError::NotValidForName))
                }
            }
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Accept-everything verifier used when peer verification is disabled.
/// Handshake signatures are still checked.
#[derive(Debug)]
pub(crate) struct NoVerification {
    provider: Arc<CryptoProvider>,
}

impl NoVerification {
    pub fn new() -> Self {
        Self {
            provider: Arc::new(rustls::crypto::aws_lc_rs::default_provider()),
        }
    }
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Builds the per-connection TLS client configuration.
///
/// `tls12_only` pins the connection to exactly TLS 1.2; otherwise any
/// version from 1.2 up is negotiated. Session resumption is disabled,
/// some TLS stacks in the wild mishandle it.
pub(crate) fn client_config(
    roots: &Arc<RootCertStore>,
    verify_peer: bool,
    pinned_host: Option<&str>,
    tls12_only: bool,
) -> Result<ClientConfig, Status> {
    let versions: &[&rustls::SupportedProtocolVersion] = if tls12_only {
        &[&rustls::version::TLS12]
    } else {
        rustls::ALL_VERSIONS
    };
    let builder = ClientConfig::builder_with_protocol_versions(versions);

    let mut config = if !verify_peer {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification::new()))
            .with_no_client_auth()
    } else if let Some(host) = pinned_host {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(PinnedHostVerifier::new(roots.clone(), host)?))
            .with_no_client_auth()
    } else {
        builder.with_root_certificates(roots.clone()).with_no_client_auth()
    };
    config.resumption = rustls::client::Resumption::disabled();
    Ok(config)
}
