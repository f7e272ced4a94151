//! Partner capability negotiation
//!
//! A partner's announced version decides which dialect and features both
//! sides use. The version may be followed by `.` and a JSON object whose
//! fields override the derived values (digest algorithm, separator,
//! proxied flag). Negotiation never fails: a missing or malformed version
//! yields the most conservative capability.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::digest::DigestAlgo;
use crate::packet::Dialect;
use crate::version::{
    VERSION_CHANGE_FILE_INFO, VERSION_FILE_SIZE, VERSION_JSON, VERSION_SEPARATOR, is_at_least,
    parse_version, split_extension,
};
use crate::{BLANK_SEPARATOR, DEFAULT_FIELD_SEPARATOR, PROTOCOL_VERSION};

/// JSON capability extension appended to an announced version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct CapabilityExtension {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digestalgo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalhash: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r66version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<bool>,
}

/// Protocol features agreed with one partner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerCapability {
    pub host_id: String,
    /// Plain version (extension stripped)
    pub version: String,
    /// Full announced string, used to detect version changes
    pub announced: String,
    pub use_json: bool,
    pub digest: DigestAlgo,
    pub separator: String,
    pub supports_file_size: bool,
    pub supports_final_hash: bool,
    pub proxied: bool,
    pub change_file_info: bool,
    pub compression: bool,
}

impl PartnerCapability {
    /// Legacy dialect with blank separators and no optional features
    #[must_use]
    pub fn conservative(host_id: &str, announced: &str, default_digest: DigestAlgo) -> Self {
        let (version, _) = split_extension(announced);
        Self {
            host_id: host_id.to_string(),
            version: version.to_string(),
            announced: announced.to_string(),
            use_json: false,
            digest: default_digest,
            separator: BLANK_SEPARATOR.to_string(),
            supports_file_size: false,
            supports_final_hash: false,
            proxied: false,
            change_file_info: false,
            compression: false,
        }
    }

    /// Derive the capability of a partner from its announced version
    ///
    /// # Arguments
    ///
    /// * `host_id` - Partner host id
    /// * `announced` - Version string from the authentication packet
    /// * `default_digest` - Digest used when the partner names none we know
    #[must_use]
    pub fn negotiate(host_id: &str, announced: &str, default_digest: DigestAlgo) -> Self {
        let (plain, extension) = split_extension(announced);
        let Some(version) = parse_version(plain) else {
            return Self::conservative(host_id, announced, default_digest);
        };

        let legacy_sizes = is_at_least(&version, &VERSION_FILE_SIZE);
        let separator = if is_at_least(&version, &VERSION_SEPARATOR) {
            DEFAULT_FIELD_SEPARATOR
        } else {
            BLANK_SEPARATOR
        };
        let mut capability = Self {
            host_id: host_id.to_string(),
            version: plain.to_string(),
            announced: announced.to_string(),
            use_json: is_at_least(&version, &VERSION_JSON),
            digest: default_digest,
            separator: separator.to_string(),
            supports_file_size: legacy_sizes,
            supports_final_hash: legacy_sizes,
            proxied: false,
            change_file_info: is_at_least(&version, &VERSION_CHANGE_FILE_INFO),
            compression: false,
        };

        // An unparsable extension leaves the version-derived values in place
        let parsed =
            extension.and_then(|e| serde_json::from_str::<CapabilityExtension>(e).ok());
        if let Some(ext) = parsed {
            capability.apply(ext, default_digest);
        }
        capability
    }

    fn apply(&mut self, ext: CapabilityExtension, default_digest: DigestAlgo) {
        if let Some(algo) = ext.digestalgo {
            self.digest = DigestAlgo::parse_or(&algo, default_digest);
        }
        if let Some(sep) = ext.separator.filter(|s| !s.is_empty()) {
            self.separator = sep;
        }
        if let Some(v) = ext.filesize {
            self.supports_file_size = v;
        }
        if let Some(v) = ext.finalhash {
            self.supports_final_hash = v;
        }
        if let Some(v) = ext.proxified {
            self.proxied = v;
        }
        if let Some(v) = ext.compression {
            self.compression = v;
        }
    }

    /// Capability this host announces about itself
    #[must_use]
    pub fn local(host_id: &str, digest: DigestAlgo, separator: &str, proxied: bool) -> Self {
        Self {
            host_id: host_id.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            announced: String::new(),
            use_json: true,
            digest,
            separator: separator.to_string(),
            supports_file_size: true,
            supports_final_hash: true,
            proxied,
            change_file_info: true,
            compression: false,
        }
    }

    /// Version string with the JSON extension, as sent in authentication
    #[must_use]
    pub fn announce(&self) -> String {
        let ext = CapabilityExtension {
            hostid: Some(self.host_id.clone()),
            version: Some(self.version.clone()),
            digestalgo: Some(self.digest.as_str().to_string()),
            filesize: Some(self.supports_file_size),
            finalhash: Some(self.supports_final_hash),
            proxified: Some(self.proxied),
            separator: Some(self.separator.clone()),
            r66version: Some(self.version.clone()),
            compression: Some(self.compression),
        };
        match serde_json::to_string(&ext) {
            Ok(json) => format!("{}.{}", self.version, json),
            Err(_) => self.version.clone(),
        }
    }

    /// Features both sides support, given what this host announced
    ///
    /// A feature is used only when both ends have it; a blank separator on
    /// either end wins since the older side cannot split on anything else.
    /// The digest stays the partner's (already resolved against ours).
    #[must_use]
    pub fn common_with(&self, local: &PartnerCapability) -> Self {
        let separator = if local.separator == BLANK_SEPARATOR {
            BLANK_SEPARATOR.to_string()
        } else {
            self.separator.clone()
        };
        Self {
            use_json: self.use_json && local.use_json,
            separator,
            supports_file_size: self.supports_file_size && local.supports_file_size,
            supports_final_hash: self.supports_final_hash && local.supports_final_hash,
            change_file_info: self.change_file_info && local.change_file_info,
            compression: self.compression && local.compression,
            ..self.clone()
        }
    }

    /// Packet dialect to use with this partner
    #[must_use]
    pub fn dialect(&self) -> Dialect {
        if self.use_json {
            Dialect::json(&self.separator)
        } else {
            Dialect::legacy(&self.separator)
        }
    }
}

/// Negotiated capabilities keyed by host id
///
/// Entries are replaced only when a partner announces a different version
/// string; readers always see a complete capability.
#[derive(Debug, Default)]
pub struct PartnerCache {
    entries: RwLock<HashMap<String, Arc<PartnerCapability>>>,
}

impl PartnerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached capability for a host, if one was negotiated
    pub fn get(&self, host_id: &str) -> Option<Arc<PartnerCapability>> {
        self.entries
            .read()
            .expect("partner cache lock")
            .get(host_id)
            .cloned()
    }

    /// Return the cached capability, renegotiating when the version changed
    pub fn resolve(
        &self,
        host_id: &str,
        announced: &str,
        default_digest: DigestAlgo,
    ) -> Arc<PartnerCapability> {
        if let Some(existing) = self.get(host_id)
            && existing.announced == announced
        {
            return existing;
        }
        let fresh = Arc::new(PartnerCapability::negotiate(
            host_id,
            announced,
            default_digest,
        ));
        self.entries
            .write()
            .expect("partner cache lock")
            .insert(host_id.to_string(), Arc::clone(&fresh));
        fresh
    }

    /// True when any known partner declared itself proxied
    pub fn any_proxied(&self) -> bool {
        self.entries
            .read()
            .expect("partner cache lock")
            .values()
            .any(|c| c.proxied)
    }

    /// Number of cached partners
    pub fn len(&self) -> usize {
        self.entries.read().expect("partner cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
