//! Profile directories and CA material I/O.
//!
//! A profile is a named directory under the storage root holding one CA
//! identity and its issuance journal:
//!
//! ```text
//! <root>/<name>/cacert.pem     CA certificate
//! <root>/<name>/cakey.pem      CA private key (owner-only)
//! <root>/<name>/issuedb.json   issue journal
//! ```

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use inkan_pki::Certificate;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

const CA_CERT_FILENAME: &str = "cacert.pem";
const CA_KEY_FILENAME: &str = "cakey.pem";
const ISSUE_DB_FILENAME: &str = "issuedb.json";
const SERVER_CERT_FILENAME: &str = "server.pem";
const SERVER_KEY_FILENAME: &str = "server-key.pem";

/// Root of the on-disk profile tree.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Opens a storage root. The directory is created lazily on first write.
    #[must_use]
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the storage root path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the existing profile with the given name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for unsafe names and
    /// [`Error::ProfileNotFound`] if the profile directory does not exist.
    pub fn profile(&self, name: &str) -> Result<Profile> {
        validate_name(name)?;
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Err(Error::ProfileNotFound(name.to_string()));
        }
        Ok(Profile {
            name: name.to_string(),
            dir,
        })
    }

    /// Returns the profile with the given name, creating its directory if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error for unsafe names or if the directory cannot be
    /// created.
    pub fn ensure_profile(&self, name: &str) -> Result<Profile> {
        validate_name(name)?;
        let dir = self.root.join(name);
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        Ok(Profile {
            name: name.to_string(),
            dir,
        })
    }

    /// Enumerates all profiles under the root, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be read.
    pub fn profiles(&self) -> Result<Vec<Profile>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut profiles = Vec::new();
        let entries = fs::read_dir(&self.root).map_err(|e| Error::io(&self.root, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_name(&name).is_err() {
                continue;
            }
            profiles.push(Profile {
                name,
                dir: entry.path(),
            });
        }
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(profiles)
    }
}

/// Status of a profile's CA material at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileStatus {
    /// No CA material present yet.
    NotCa,
    /// CA certificate present and not expired.
    ValidCa,
    /// CA certificate present but past its notAfter.
    Expired {
        /// When the CA certificate expired.
        not_after: DateTime<Utc>,
    },
}

impl fmt::Display for ProfileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCa => write!(f, "no CA set up"),
            Self::ValidCa => write!(f, "valid CA"),
            Self::Expired { not_after } => write!(f, "CA expired at {not_after}"),
        }
    }
}

/// A named on-disk profile.
#[derive(Debug, Clone)]
pub struct Profile {
    name: String,
    dir: PathBuf,
}

impl Profile {
    /// Returns the profile name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the profile directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the CA certificate.
    #[must_use]
    pub fn ca_cert_path(&self) -> PathBuf {
        self.dir.join(CA_CERT_FILENAME)
    }

    /// Path of the CA private key.
    #[must_use]
    pub fn ca_key_path(&self) -> PathBuf {
        self.dir.join(CA_KEY_FILENAME)
    }

    /// Path of the issue journal.
    #[must_use]
    pub fn issue_db_path(&self) -> PathBuf {
        self.dir.join(ISSUE_DB_FILENAME)
    }

    /// Path of the server leaf certificate, used by the auth profile.
    #[must_use]
    pub fn server_cert_path(&self) -> PathBuf {
        self.dir.join(SERVER_CERT_FILENAME)
    }

    /// Path of the server leaf private key, used by the auth profile.
    #[must_use]
    pub fn server_key_path(&self) -> PathBuf {
        self.dir.join(SERVER_KEY_FILENAME)
    }

    /// Reads and parses the CA certificate.
    ///
    /// # Errors
    ///
    /// Returns `CorruptState` for unparseable material and `Io` for
    /// filesystem failures (including absence).
    pub fn read_ca_cert(&self) -> Result<Certificate> {
        read_cert(&self.ca_cert_path())
    }

    /// Reads the CA private key PEM. The buffer is zeroized on drop.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be read.
    pub fn read_ca_key_pem(&self) -> Result<Zeroizing<String>> {
        let path = self.ca_key_path();
        let pem = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        Ok(Zeroizing::new(pem))
    }

    /// Writes the CA certificate PEM.
    ///
    /// # Errors
    ///
    /// Returns an error on filesystem failure.
    pub fn write_ca_cert(&self, pem: &str) -> Result<()> {
        write_file(&self.ca_cert_path(), pem)
    }

    /// Writes the CA private key PEM with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns an error on filesystem failure.
    pub fn write_ca_key(&self, pem: &str) -> Result<()> {
        write_key_file(&self.ca_key_path(), pem)
    }

    /// Classifies the profile's CA material at `now`.
    ///
    /// A profile is a CA profile iff both the CA certificate and the CA key
    /// are present and parseable.
    ///
    /// # Errors
    ///
    /// Returns `CorruptState` if material is present but unparseable.
    pub fn status(&self, now: DateTime<Utc>) -> Result<ProfileStatus> {
        let cert_path = self.ca_cert_path();
        let key_path = self.ca_key_path();
        if !cert_path.is_file() || !key_path.is_file() {
            return Ok(ProfileStatus::NotCa);
        }

        let cert = self.read_ca_cert()?;
        let key_pem = self.read_ca_key_pem()?;
        rcgen::KeyPair::from_pem(&key_pem)
            .map_err(|e| Error::corrupt(&key_path, format!("unparseable CA key: {e}")))?;

        if cert.is_expired(now) {
            return Ok(ProfileStatus::Expired {
                not_after: cert.not_after(),
            });
        }
        Ok(ProfileStatus::ValidCa)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Reads and parses a certificate PEM file.
///
/// # Errors
///
/// Returns `CorruptState` for unparseable material and `Io` for filesystem
/// failures.
pub fn read_cert(path: &Path) -> Result<Certificate> {
    let pem = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Certificate::from_pem(&pem).map_err(|e| Error::corrupt(path, e.to_string()))
}

/// Writes a file, creating parent directories as needed.
///
/// # Errors
///
/// Returns an error on filesystem failure.
pub fn write_file(path: &Path, data: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    fs::write(path, data).map_err(|e| Error::io(path, e))?;
    debug!(path = %path.display(), "wrote file");
    Ok(())
}

/// Writes private material with owner-only permissions.
///
/// # Errors
///
/// Returns an error on filesystem failure.
pub fn write_key_file(path: &Path, data: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(|e| Error::io(path, e))?;
    file.write_all(data.as_bytes())
        .map_err(|e| Error::io(path, e))?;

    // The mode above only applies on creation; enforce it for pre-existing
    // files as well.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::io(path, e))?;
    }

    debug!(path = %path.display(), "wrote private key material");
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use inkan_pki::{rcgen_time, KeyUsages};
    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa};

    fn write_test_ca(profile: &Profile, now: DateTime<Utc>, validity_days: i64) {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, "Test CA");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = KeyUsages::ca().rcgen_key_usages();
        params.not_before = rcgen_time(now - Duration::hours(1)).unwrap();
        params.not_after = rcgen_time(now + Duration::days(validity_days)).unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        profile.write_ca_cert(&cert.pem()).unwrap();
        profile.write_ca_key(&key_pair.serialize_pem()).unwrap();
    }

    #[test]
    fn missing_profile_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        let err = storage.profile("ca1").unwrap_err();
        assert!(matches!(err, Error::ProfileNotFound(_)));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        for name in ["", ".hidden", "a/b", "a b", "../escape"] {
            assert!(
                matches!(storage.profile(name), Err(Error::InvalidName(_))),
                "expected {name:?} to be rejected"
            );
        }
    }

    #[test]
    fn ensure_profile_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        let profile = storage.ensure_profile("ca1").unwrap();
        assert!(profile.dir().is_dir());
        assert_eq!(storage.profile("ca1").unwrap().name(), "ca1");
    }

    #[test]
    fn profiles_are_enumerated_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        storage.ensure_profile("beta").unwrap();
        storage.ensure_profile("alpha").unwrap();
        let names: Vec<_> = storage
            .profiles()
            .unwrap()
            .into_iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn empty_root_has_no_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("missing"));
        assert!(storage.profiles().unwrap().is_empty());
    }

    #[test]
    fn status_of_empty_profile_is_not_ca() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        let profile = storage.ensure_profile("ca1").unwrap();
        assert_eq!(profile.status(Utc::now()).unwrap(), ProfileStatus::NotCa);
    }

    #[test]
    fn status_of_provisioned_profile_is_valid_ca() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        let profile = storage.ensure_profile("ca1").unwrap();
        let now = Utc::now();
        write_test_ca(&profile, now, 3650);
        assert_eq!(profile.status(now).unwrap(), ProfileStatus::ValidCa);
    }

    #[test]
    fn status_past_not_after_is_expired() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        let profile = storage.ensure_profile("ca1").unwrap();
        let now = Utc::now();
        write_test_ca(&profile, now, 30);
        let later = now + Duration::days(31);
        assert!(matches!(
            profile.status(later).unwrap(),
            ProfileStatus::Expired { .. }
        ));
    }

    #[test]
    fn corrupt_ca_cert_is_distinguishable() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        let profile = storage.ensure_profile("ca1").unwrap();
        profile.write_ca_cert("not a certificate").unwrap();
        profile.write_ca_key("not a key").unwrap();
        let err = profile.status(Utc::now()).unwrap_err();
        assert!(matches!(err, Error::CorruptState { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn ca_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        let profile = storage.ensure_profile("ca1").unwrap();
        profile.write_ca_key("key material").unwrap();
        let mode = fs::metadata(profile.ca_key_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn round_trip_ca_material() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        let profile = storage.ensure_profile("ca1").unwrap();
        let now = Utc::now();
        write_test_ca(&profile, now, 3650);

        let cert = profile.read_ca_cert().unwrap();
        assert_eq!(cert.subject(), "Test CA");
        let key_pem = profile.read_ca_key_pem().unwrap();
        assert!(rcgen::KeyPair::from_pem(&key_pem).is_ok());
    }
}
