//! CA lifecycle and per-hostname leaf certificate minting.
//!
//! The CA is loaded or generated once at construction and never rotated.
//! Leaf entries are created lazily on first SNI match, persisted immediately,
//! and cached for the lifetime of the process — see `getOrMint`'s contract
//! in `mint`.
//!
//! rcgen cannot itself generate RSA keypairs (its `aws_lc_rs`/`ring` backends
//! only produce ECDSA/Ed25519 keys); it can only *sign* with an
//! externally-supplied RSA key. We generate the RSA-2048 material with the
//! `rsa` crate and hand rcgen the PKCS#8 DER to sign with, while persisting
//! the same key to disk as PKCS#1 PEM to match the on-disk format this proxy
//! has always used.

use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_singleflight::Group;
use parking_lot::RwLock;
use rand::RngCore;
use rcgen::{
	BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
	Ia5String, Issuer, IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use rustls_pki_types::PrivatePkcs8KeyDer;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, info, warn};

use crate::error::CertError;

const RSA_BITS: usize = 2048;
const LEAF_VALIDITY_DAYS: i64 = 365;
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const CA_COMMON_NAME: &str = "EvilProxy TLS Interception";
const CA_ORG: &str = "EvilCorp";
const KEY_FILE_MODE: u32 = 0o600;
const CERT_FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

/// An immutable, minted (or loaded) leaf certificate and its signing key.
pub struct LeafCert {
	pub dns_names: Vec<String>,
	pub cert_pem: String,
	pub key_pem: String,
}

/// Fields cloned from a probed origin leaf, to be grafted onto the leaf
/// template. DNS SANs travel alongside `dns_names` at the call site rather
/// than through this struct.
struct ProbedLeaf {
	ip_names: Vec<IpAddr>,
	subject_cn: Option<String>,
	subject_org: Option<String>,
	not_before: OffsetDateTime,
	not_after: OffsetDateTime,
	key_usages: Vec<KeyUsagePurpose>,
	extended_key_usages: Vec<ExtendedKeyUsagePurpose>,
}

struct CaEntry {
	key_pair: KeyPair,
	params: CertificateParams,
}

/// Loads/creates the CA, mints leaf certificates on demand, and persists both.
pub struct CertStore {
	ca: CaEntry,
	ca_cert_pem: String,
	dir: PathBuf,
	cache: RwLock<HashMap<String, Arc<LeafCert>>>,
	inflight: Group<Arc<LeafCert>, String>,
	probe_roots: Arc<rustls::RootCertStore>,
}

impl CertStore {
	/// Loads the CA from `ca_cert`/`ca_key` if given, else from `<dir>/ca.{crt,key}`
	/// if both are already present, else generates and persists a fresh one.
	/// Afterwards, scans `<dir>` for existing leaf pairs and warms the cache.
	pub fn new(
		ca_cert: Option<PathBuf>,
		ca_key: Option<PathBuf>,
		dir: PathBuf,
	) -> Result<Self, CertError> {
		ensure_dir(&dir)?;

		let default_cert = dir.join("ca.crt");
		let default_key = dir.join("ca.key");
		let paths = match (ca_cert, ca_key) {
			(Some(c), Some(k)) => Some((c, k)),
			(None, None) if default_cert.exists() && default_key.exists() => {
				Some((default_cert, default_key))
			},
			_ => None,
		};

		let (ca, ca_cert_pem) = match paths {
			Some((cert_path, key_path)) => Self::load_ca(&cert_path, &key_path)?,
			None => {
				let (ca, cert_pem, key_pem) = Self::generate_ca()?;
				persist_pair(&dir, "ca", &cert_pem, &key_pem)?;
				(ca, cert_pem)
			},
		};

		let probe_roots = Arc::new(load_native_roots());

		let store = CertStore {
			ca,
			ca_cert_pem,
			dir,
			cache: RwLock::new(HashMap::new()),
			inflight: Group::new(),
			probe_roots,
		};
		store.warm_cache();
		Ok(store)
	}

	fn warm_cache(&self) {
		let Ok(entries) = fs::read_dir(&self.dir) else { return };
		for entry in entries.flatten() {
			let path = entry.path();
			if path.extension().and_then(|e| e.to_str()) != Some("crt") {
				continue;
			}
			let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
			if stem == "ca" {
				continue;
			}
			let key_path = self.dir.join(format!("{stem}.key"));
			match (fs::read_to_string(&path), fs::read_to_string(&key_path)) {
				(Ok(cert_pem), Ok(key_pem)) => {
					self.cache.write().insert(
						stem.to_string(),
						Arc::new(LeafCert {
							dns_names: vec![stem.to_string()],
							cert_pem,
							key_pem,
						}),
					);
				},
				_ => {
					warn!(host = stem, "skipping malformed cached certificate pair");
				},
			}
		}
	}

	/// Returns the cached leaf for `host`, minting and persisting one if absent.
	/// At most one mint is ever in flight per hostname; concurrent callers for
	/// the same host share the winner's result.
	pub async fn get_or_mint(&self, host: &str) -> Result<Arc<LeafCert>, CertError> {
		let h = host.to_ascii_lowercase();
		if let Some(entry) = self.cache.read().get(&h) {
			return Ok(entry.clone());
		}

		let fut = async { self.mint(&h).await.map_err(|e| e.to_string()) };
		let (result, err, _owned) = self.inflight.work(&h, fut).await;
		match result {
			Some(leaf) => Ok(leaf),
			None => Err(CertError::MintFailed(err.unwrap_or_else(|| "mint failed".to_string()))),
		}
	}

	async fn mint(&self, h: &str) -> Result<Arc<LeafCert>, CertError> {
		if let Some(entry) = self.cache.read().get(h) {
			return Ok(entry.clone());
		}

		let template = match self.probe_upstream(h).await {
			Some(probed) => probed,
			None => leaf_params(vec![h.to_string()], None),
		};

		// rsa 0.9 bounds RsaPrivateKey::new on rand_core 0.6's CryptoRngCore, while
		// `rand::rng()` (rand 0.10) only implements rand_core 0.9 — use rsa's own
		// re-exported rand_core::OsRng to avoid the version mismatch.
		let rsa_key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, RSA_BITS)
			.map_err(|e| CertError::RsaKeygen(e.to_string()))?;
		let key_pair = rcgen_keypair_from_rsa(&rsa_key)?;

		let issuer = Issuer::new(self.ca.params.clone(), &self.ca.key_pair);
		let cert = template
			.signed_by(&key_pair, &issuer)
			.map_err(CertError::CryptoFailure)?;

		let mut cert_pem = cert.pem();
		cert_pem.push('\n');
		cert_pem.push_str(&self.ca_cert_pem);
		let key_pem = rsa_pkcs1_pem(&rsa_key)?;

		persist_pair(&self.dir, h, &cert_pem, &key_pem)?;

		let leaf = Arc::new(LeafCert {
			dns_names: vec![h.to_string()],
			cert_pem,
			key_pem,
		});
		self.cache.write().insert(h.to_string(), leaf.clone());
		debug!(host = h, "minted leaf certificate");
		Ok(leaf)
	}

	/// Attempts to clone SANs (DNS + IP), subject, validity, key usage and EKU
	/// from the real origin's leaf certificate. Returns `None` on any
	/// failure; minting falls back to the single-SAN default template rather
	/// than failing.
	async fn probe_upstream(&self, host: &str) -> Option<CertificateParams> {
		let connector = tokio_rustls::TlsConnector::from(Arc::new(
			rustls::ClientConfig::builder()
				.with_root_certificates(self.probe_roots.clone())
				.with_no_client_auth(),
		));
		let addr = format!("{host}:443");
		let server_name = rustls_pki_types::ServerName::try_from(host.to_string()).ok()?;

		let connect = async {
			let stream = tokio::net::TcpStream::connect(&addr).await.ok()?;
			let tls = connector.connect(server_name, stream).await.ok()?;
			let (_, conn) = tls.get_ref();
			let chain = conn.peer_certificates()?;
			let leaf = chain.first()?;
			let (_, parsed) = x509_parser::parse_x509_certificate(leaf).ok()?;

			let general_names: Vec<&x509_parser::extensions::GeneralName> = parsed
				.subject_alternative_name()
				.ok()
				.flatten()
				.map(|ext| ext.value.general_names.iter().collect())
				.unwrap_or_default();
			let dns_names: Vec<String> = general_names
				.iter()
				.filter_map(|n| match n {
					x509_parser::extensions::GeneralName::DNSName(d) => Some(d.to_string()),
					_ => None,
				})
				.collect();
			if dns_names.is_empty() {
				return None;
			}
			let ip_names: Vec<IpAddr> = general_names
				.iter()
				.filter_map(|n| match n {
					x509_parser::extensions::GeneralName::IPAddress(bytes) => bytes_to_ip(bytes),
					_ => None,
				})
				.collect();

			let subject_cn =
				parsed.subject.iter_common_name().next().and_then(|cn| cn.as_str().ok()).map(str::to_string);
			let subject_org =
				parsed.subject.iter_organization().next().and_then(|o| o.as_str().ok()).map(str::to_string);

			let key_usages = parsed
				.key_usage()
				.ok()
				.flatten()
				.map(|ext| key_usage_purposes(ext.value))
				.unwrap_or_default();
			let extended_key_usages = parsed
				.extended_key_usage()
				.ok()
				.flatten()
				.map(|ext| extended_key_usage_purposes(ext.value))
				.unwrap_or_default();

			let not_before = asn1_to_offset(parsed.validity.not_before.timestamp());
			let not_after = asn1_to_offset(parsed.validity.not_after.timestamp());

			Some((
				dns_names,
				ProbedLeaf { ip_names, subject_cn, subject_org, not_before, not_after, key_usages, extended_key_usages },
			))
		};

		let (dns_names, probed) = tokio::time::timeout(PROBE_TIMEOUT, connect).await.ok().flatten()?;

		info!(
			host,
			dns_san_count = dns_names.len(),
			ip_san_count = probed.ip_names.len(),
			"cloned upstream cert fields for leaf template"
		);
		Some(leaf_params(dns_names, Some(probed)))
	}

	fn load_ca(cert_path: &Path, key_path: &Path) -> Result<(CaEntry, String), CertError> {
		let cert_pem = fs::read_to_string(cert_path).map_err(|source| CertError::CaInvalid {
			path: cert_path.to_path_buf(),
			source: source.into(),
		})?;
		let key_pem = fs::read_to_string(key_path).map_err(|source| CertError::CaInvalid {
			path: key_path.to_path_buf(),
			source: source.into(),
		})?;

		let rsa_key = RsaPrivateKey::from_pkcs1_pem(&key_pem).map_err(|source| CertError::CaInvalid {
			path: key_path.to_path_buf(),
			source: anyhow::anyhow!(source),
		})?;
		let key_pair = rcgen_keypair_from_rsa(&rsa_key)?;

		let params =
			CertificateParams::from_ca_cert_pem(&cert_pem).map_err(|source| CertError::CaInvalid {
				path: cert_path.to_path_buf(),
				source: anyhow::anyhow!(source),
			})?;

		Ok((CaEntry { key_pair, params }, cert_pem))
	}

	fn generate_ca() -> Result<(CaEntry, String, String), CertError> {
		let rsa_key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, RSA_BITS)
			.map_err(|e| CertError::RsaKeygen(e.to_string()))?;
		let key_pair = rcgen_keypair_from_rsa(&rsa_key)?;

		let params = ca_params();
		let cert = params.clone().self_signed(&key_pair).map_err(CertError::CryptoFailure)?;
		let cert_pem = cert.pem();
		let key_pem = rsa_pkcs1_pem(&rsa_key)?;

		Ok((CaEntry { key_pair, params }, cert_pem, key_pem))
	}

	pub fn ca_cert_pem(&self) -> &str {
		&self.ca_cert_pem
	}
}

fn base_params(dns_names: Vec<String>) -> CertificateParams {
	let mut params = CertificateParams::default();
	let now = OffsetDateTime::now_utc();
	params.not_before = now - TimeDuration::days(1);
	params.not_after = now + TimeDuration::days(LEAF_VALIDITY_DAYS);
	params.serial_number = Some(random_serial());
	params.subject_alt_names = dns_names
		.iter()
		.filter_map(|n| Ia5String::try_from(n.as_str()).ok())
		.map(SanType::DnsName)
		.collect();

	let mut dn = DistinguishedName::new();
	dn.push(DnType::CommonName, CA_COMMON_NAME);
	dn.push(DnType::OrganizationName, CA_ORG);
	params.distinguished_name = dn;
	params
}

/// The base template fixes validity at `[now, now+365d]`; the CA
/// specialisation only adds `IsCa` and unions in the signing key usages on
/// top of the base template's `DigitalSignature | KeyEncipherment |
/// KeyAgreement`, rather than replacing them.
fn ca_params() -> CertificateParams {
	let mut params = base_params(vec![]);
	let now = OffsetDateTime::now_utc();
	params.not_before = now;
	params.not_after = now + TimeDuration::days(LEAF_VALIDITY_DAYS);
	params.subject_alt_names = vec![];
	params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
	params.key_usages = vec![
		KeyUsagePurpose::DigitalSignature,
		KeyUsagePurpose::KeyEncipherment,
		KeyUsagePurpose::KeyAgreement,
		KeyUsagePurpose::KeyCertSign,
		KeyUsagePurpose::CrlSign,
	];
	params
}

/// `probed` carries the fields cloned from a probed peer leaf when SAN
/// cloning succeeded; `None` falls back to the default template.
fn leaf_params(dns_names: Vec<String>, probed: Option<ProbedLeaf>) -> CertificateParams {
	let mut params = base_params(dns_names);
	// Never grant a minted leaf CA powers, regardless of what the probed
	// origin's own basic constraints say: this cert must not be usable to
	// sign further certificates.
	params.is_ca = IsCa::NoCa;
	params.key_usages = vec![
		KeyUsagePurpose::DigitalSignature,
		KeyUsagePurpose::KeyEncipherment,
		KeyUsagePurpose::KeyAgreement,
	];
	params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

	if let Some(probed) = probed {
		let now = OffsetDateTime::now_utc();
		// §9: clamp rather than trust the origin's window verbatim, so a
		// skewed local clock or a near-expiry origin cert can't hand out an
		// already-invalid leaf.
		params.not_before = probed.not_before.max(now - TimeDuration::days(1));
		params.not_after = probed.not_after.min(now + TimeDuration::days(LEAF_VALIDITY_DAYS));

		for ip in probed.ip_names {
			params.subject_alt_names.push(SanType::IpAddress(ip));
		}

		if probed.subject_cn.is_some() || probed.subject_org.is_some() {
			let mut dn = DistinguishedName::new();
			if let Some(cn) = &probed.subject_cn {
				dn.push(DnType::CommonName, cn.as_str());
			}
			if let Some(org) = &probed.subject_org {
				dn.push(DnType::OrganizationName, org.as_str());
			}
			params.distinguished_name = dn;
		}

		if !probed.key_usages.is_empty() {
			params.key_usages = probed.key_usages;
		}

		if !probed.extended_key_usages.is_empty() {
			let mut ekus = probed.extended_key_usages;
			if !ekus.contains(&ExtendedKeyUsagePurpose::ServerAuth) {
				ekus.push(ExtendedKeyUsagePurpose::ServerAuth);
			}
			params.extended_key_usages = ekus;
		}
	}
	params
}

fn bytes_to_ip(bytes: &[u8]) -> Option<IpAddr> {
	match bytes.len() {
		4 => Some(IpAddr::V4(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))),
		16 => {
			let octets: [u8; 16] = bytes.try_into().ok()?;
			Some(IpAddr::V6(Ipv6Addr::from(octets)))
		}
		_ => None,
	}
}

fn key_usage_purposes(ku: &x509_parser::extensions::KeyUsage) -> Vec<KeyUsagePurpose> {
	let mut purposes = Vec::new();
	if ku.digital_signature() {
		purposes.push(KeyUsagePurpose::DigitalSignature);
	}
	if ku.non_repudiation() {
		purposes.push(KeyUsagePurpose::ContentCommitment);
	}
	if ku.key_encipherment() {
		purposes.push(KeyUsagePurpose::KeyEncipherment);
	}
	if ku.data_encipherment() {
		purposes.push(KeyUsagePurpose::DataEncipherment);
	}
	if ku.key_agreement() {
		purposes.push(KeyUsagePurpose::KeyAgreement);
	}
	if ku.key_cert_sign() {
		purposes.push(KeyUsagePurpose::KeyCertSign);
	}
	if ku.crl_sign() {
		purposes.push(KeyUsagePurpose::CrlSign);
	}
	if ku.encipher_only() {
		purposes.push(KeyUsagePurpose::EncipherOnly);
	}
	if ku.decipher_only() {
		purposes.push(KeyUsagePurpose::DecipherOnly);
	}
	purposes
}

fn extended_key_usage_purposes(eku: &x509_parser::extensions::ExtendedKeyUsage) -> Vec<ExtendedKeyUsagePurpose> {
	let mut purposes = Vec::new();
	if eku.server_auth {
		purposes.push(ExtendedKeyUsagePurpose::ServerAuth);
	}
	if eku.client_auth {
		purposes.push(ExtendedKeyUsagePurpose::ClientAuth);
	}
	if eku.code_signing {
		purposes.push(ExtendedKeyUsagePurpose::CodeSigning);
	}
	if eku.email_protection {
		purposes.push(ExtendedKeyUsagePurpose::EmailProtection);
	}
	if eku.time_stamping {
		purposes.push(ExtendedKeyUsagePurpose::TimeStamping);
	}
	if eku.ocsp_signing {
		purposes.push(ExtendedKeyUsagePurpose::OcspSigning);
	}
	purposes
}

fn random_serial() -> SerialNumber {
	let mut bytes = [0u8; 8];
	rand::rng().fill_bytes(&mut bytes);
	bytes[0] &= 0x7f; // keep the DER INTEGER unambiguously positive
	SerialNumber::from_slice(&bytes)
}

fn rcgen_keypair_from_rsa(key: &RsaPrivateKey) -> Result<KeyPair, CertError> {
	let der = key.to_pkcs8_der().map_err(|e| CertError::RsaKeygen(e.to_string()))?;
	let pkcs8 = PrivatePkcs8KeyDer::from(der.as_bytes().to_vec());
	KeyPair::from_der_and_sign_algo(&pkcs8, &rcgen::PKCS_RSA_SHA256).map_err(CertError::CryptoFailure)
}

fn rsa_pkcs1_pem(key: &RsaPrivateKey) -> Result<String, CertError> {
	key
		.to_pkcs1_pem(LineEnding::LF)
		.map(|p| p.to_string())
		.map_err(|e| CertError::RsaKeygen(e.to_string()))
}

fn asn1_to_offset(timestamp: i64) -> OffsetDateTime {
	OffsetDateTime::from_unix_timestamp(timestamp).unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn load_native_roots() -> rustls::RootCertStore {
	let mut roots = rustls::RootCertStore::empty();
	match rustls_native_certs::load_native_certs() {
		result if !result.certs.is_empty() => {
			let (added, ignored) = roots.add_parsable_certificates(result.certs);
			debug!(added, ignored, "loaded native trust roots for upstream probing");
		},
		_ => warn!("no native trust roots found; upstream SAN cloning will always fall back"),
	}
	roots
}

fn ensure_dir(dir: &Path) -> Result<(), CertError> {
	fs::create_dir_all(dir).map_err(|source| CertError::CannotPersist { path: dir.to_path_buf(), source })?;
	fs::set_permissions(dir, fs::Permissions::from_mode(DIR_MODE))
		.map_err(|source| CertError::CannotPersist { path: dir.to_path_buf(), source })?;
	Ok(())
}

fn persist_pair(dir: &Path, stem: &str, cert_pem: &str, key_pem: &str) -> Result<(), CertError> {
	let cert_path = dir.join(format!("{stem}.crt"));
	let key_path = dir.join(format!("{stem}.key"));

	fs::write(&cert_path, cert_pem).map_err(|source| CertError::CannotPersist { path: cert_path.clone(), source })?;
	fs::set_permissions(&cert_path, fs::Permissions::from_mode(CERT_FILE_MODE))
		.map_err(|source| CertError::CannotPersist { path: cert_path.clone(), source })?;

	fs::write(&key_path, key_pem).map_err(|source| CertError::CannotPersist { path: key_path.clone(), source })?;
	fs::set_permissions(&key_path, fs::Permissions::from_mode(KEY_FILE_MODE))
		.map_err(|source| CertError::CannotPersist { path: key_path.clone(), source })?;

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn mint_is_idempotent_per_host() {
		let dir = tempfile::tempdir().unwrap();
		let store = CertStore::new(None, None, dir.path().to_path_buf()).unwrap();

		let a = store.get_or_mint("example.com").await.unwrap();
		let b = store.get_or_mint("example.com").await.unwrap();
		assert_eq!(a.cert_pem, b.cert_pem);
	}

	#[tokio::test]
	async fn mint_includes_hostname_in_sans() {
		// Whether `probe_upstream` actually reaches the real host depends on the
		// sandbox's network access; either way the lowercased hostname itself
		// must appear among the minted SANs (as the sole SAN on fallback, or
		// among the cloned upstream SANs on success).
		let dir = tempfile::tempdir().unwrap();
		let store = CertStore::new(None, None, dir.path().to_path_buf()).unwrap();

		let leaf = store.get_or_mint("Example.COM").await.unwrap();
		assert!(leaf.dns_names.contains(&"example.com".to_string()));
	}

	#[test]
	fn construction_persists_ca_at_0600() {
		let dir = tempfile::tempdir().unwrap();
		let _store = CertStore::new(None, None, dir.path().to_path_buf()).unwrap();

		let key_path = dir.path().join("ca.key");
		let mode = fs::metadata(&key_path).unwrap().permissions().mode() & 0o777;
		assert_eq!(mode, KEY_FILE_MODE);
	}

	#[test]
	fn reopening_the_same_dir_loads_the_existing_ca() {
		let dir = tempfile::tempdir().unwrap();
		let first = CertStore::new(None, None, dir.path().to_path_buf()).unwrap();
		let second = CertStore::new(None, None, dir.path().to_path_buf()).unwrap();
		assert_eq!(first.ca_cert_pem(), second.ca_cert_pem());
	}
}
