use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Profile used when none is named.
pub const DEFAULT_PROFILE: &str = "default-profile";

pub const CLIENT_ID_ENV: &str = "SH_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "SH_CLIENT_SECRET";
/// Overrides the location of the profile file.
pub const CONFIG_PATH_ENV: &str = "S2FETCH_CONFIG";

/// Copernicus Data Space Ecosystem deployment of Sentinel Hub.
pub const CDSE_BASE_URL: &str = "https://sh.dataspace.copernicus.eu";
pub const CDSE_TOKEN_URL: &str =
    "https://identity.dataspace.copernicus.eu/auth/realms/CDSE/protocol/openid-connect/token";
pub const CDSE_AUTH_BASE_URL: &str = "https://identity.dataspace.copernicus.eu";

/// Resolved credentials and endpoints for one Sentinel Hub deployment.
#[derive(Clone, PartialEq, Eq)]
pub struct SentinelHubConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Base URL of the Process API, e.g. `https://sh.dataspace.copernicus.eu`.
    pub base_url: String,
    /// OAuth2 token endpoint.
    pub token_url: String,
    pub auth_base_url: String,
}

impl fmt::Debug for SentinelHubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentinelHubConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("token_url", &self.token_url)
            .field("auth_base_url", &self.auth_base_url)
            .finish()
    }
}

/// Credential values supplied outside the profile file, normally from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialOverrides {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl CredentialOverrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads `SH_CLIENT_ID` and `SH_CLIENT_SECRET` through `lookup`.
    /// Values are trimmed; blank ones count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            client_id: non_empty(lookup(CLIENT_ID_ENV)),
            client_secret: non_empty(lookup(CLIENT_SECRET_ENV)),
        }
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sh_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sh_client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sh_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sh_token_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sh_auth_base_url: Option<String>,
}

impl Profile {
    /// Overrides win over stored credentials.
    fn merged(&self, overrides: &CredentialOverrides) -> Profile {
        self.completed(
            overrides
                .client_id
                .clone()
                .or_else(|| non_empty(self.sh_client_id.clone())),
            overrides
                .client_secret
                .clone()
                .or_else(|| non_empty(self.sh_client_secret.clone())),
        )
    }

    /// Stored credentials win; overrides only fill what is missing.
    fn filled(&self, overrides: &CredentialOverrides) -> Profile {
        self.completed(
            non_empty(self.sh_client_id.clone()).or_else(|| overrides.client_id.clone()),
            non_empty(self.sh_client_secret.clone()).or_else(|| overrides.client_secret.clone()),
        )
    }

    fn completed(&self, client_id: Option<String>, client_secret: Option<String>) -> Profile {
        Profile {
            sh_client_id: client_id,
            sh_client_secret: client_secret,
            sh_base_url: non_empty(self.sh_base_url.clone())
                .or_else(|| Some(CDSE_BASE_URL.to_string())),
            sh_token_url: non_empty(self.sh_token_url.clone())
                .or_else(|| Some(CDSE_TOKEN_URL.to_string())),
            sh_auth_base_url: non_empty(self.sh_auth_base_url.clone())
                .or_else(|| Some(CDSE_AUTH_BASE_URL.to_string())),
        }
    }

    fn into_config(self, name: &str, store: &Path) -> Result<SentinelHubConfig> {
        let (Some(client_id), Some(client_secret)) = (self.sh_client_id, self.sh_client_secret)
        else {
            bail!(
                "Missing credentials for profile `{}` (set {} and {}, or run `s2fetch configure` to store them in {})",
                name,
                CLIENT_ID_ENV,
                CLIENT_SECRET_ENV,
                store.display()
            );
        };

        Ok(SentinelHubConfig {
            client_id,
            client_secret,
            base_url: self.sh_base_url.unwrap_or_else(|| CDSE_BASE_URL.to_string()),
            token_url: self.sh_token_url.unwrap_or_else(|| CDSE_TOKEN_URL.to_string()),
            auth_base_url: self
                .sh_auth_base_url
                .unwrap_or_else(|| CDSE_AUTH_BASE_URL.to_string()),
        })
    }
}

/// JSON file holding named profiles.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `S2FETCH_CONFIG` if set, otherwise `<config dir>/s2fetch/profiles.json`.
    pub fn locate() -> Result<Self> {
        if let Ok(p) = std::env::var(CONFIG_PATH_ENV) {
            if !p.trim().is_empty() {
                return Ok(Self::new(p));
            }
        }
        let Some(dir) = dirs::config_dir() else {
            bail!(
                "could not determine a configuration directory; set {} to a profile file path",
                CONFIG_PATH_ENV
            );
        };
        Ok(Self::new(dir.join("s2fetch").join("profiles.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profile_names(&self) -> Result<Vec<String>> {
        Ok(self.read_all()?.into_keys().collect())
    }

    /// Resolves a profile without touching the file.
    ///
    /// Overrides win over stored credentials; missing endpoints fall back to
    /// the CDSE deployment.
    pub fn resolve(&self, name: &str, overrides: &CredentialOverrides) -> Result<SentinelHubConfig> {
        let stored = self.read_all()?.remove(name).unwrap_or_default();
        debug!(profile = name, path = %self.path.display(), "resolving profile");
        stored.merged(overrides).into_config(name, &self.path)
    }

    /// Completes a profile from `overrides` and the CDSE defaults and writes it back.
    ///
    /// Only missing fields are filled: credentials already in the file are
    /// kept. Other profiles are left as they are. Nothing is written when
    /// credentials are still missing after filling.
    pub fn provision(&self, name: &str, overrides: &CredentialOverrides) -> Result<SentinelHubConfig> {
        let mut all = self.read_all()?;
        let merged = all.get(name).cloned().unwrap_or_default().filled(overrides);
        let config = merged.clone().into_config(name, &self.path)?;

        all.insert(name.to_string(), merged);
        self.write_all(&all)?;
        info!(profile = name, path = %self.path.display(), "profile saved");
        Ok(config)
    }

    fn read_all(&self) -> Result<BTreeMap<String, Profile>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = std::fs::read_to_string(&self.path).with_context(|| {
            format!("failed to read configuration file {}", self.path.display())
        })?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse configuration file {}", self.path.display()))
    }

    fn write_all(&self, all: &BTreeMap<String, Profile>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create directory {}", parent.display()))?;
            }
        }
        let text = serde_json::to_string_pretty(all)? + "\n";

        // The file holds client secrets, so it is readable by the owner only.
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&self.path)
            .with_context(|| format!("failed to open configuration file {}", self.path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // `mode` only applies on creation; tighten files written by older versions too.
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("failed to restrict {}", self.path.display()))?;
        }
        file.write_all(text.as_bytes())
            .and_then(|()| file.flush())
            .with_context(|| format!("failed to write configuration file {}", self.path.display()))
    }
}

/// Reads profile `name` from the default store, taking credentials from the
/// environment when set. Never writes.
pub fn load_config(name: &str) -> Result<SentinelHubConfig> {
    ProfileStore::locate()?.resolve(name, &CredentialOverrides::from_env())
}

/// Explicit bootstrap: completes profile `name` from the environment and saves it.
pub fn provision(name: &str) -> Result<SentinelHubConfig> {
    ProfileStore::locate()?.provision(name, &CredentialOverrides::from_env())
}
