use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Separates the values of a scope parameter that is sent more than once:
/// `stages = "A;B"` goes out as `stages=A&stages=B`.
pub const MULTI_VALUE_SEPARATOR: char = ';';

/// Normalized identity of one logical API call.
///
/// Fields are kept in a sorted set and scope parameters in a sorted map, so
/// the same logical request always produces the same key no matter in which
/// order the fields were picked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    endpoint: String,
    fields: BTreeSet<String>,
    scope: BTreeMap<String, String>,
}

impl RequestKey {
    pub fn new<F, S, K, V>(endpoint: &str, fields: F, scope: S) -> Self
    where
        F: IntoIterator,
        F::Item: AsRef<str>,
        S: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let fields = fields
            .into_iter()
            .map(|f| f.as_ref().trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();

        let scope = scope
            .into_iter()
            .map(|(k, v)| (k.as_ref().trim().to_string(), v.as_ref().trim().to_string()))
            .filter(|(k, _)| !k.is_empty())
            .collect();

        Self {
            endpoint: endpoint.trim().to_string(),
            fields,
            scope,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn fields(&self) -> &BTreeSet<String> {
        &self.fields
    }

    pub fn scope(&self) -> &BTreeMap<String, String> {
        &self.scope
    }

    /// Same endpoint and scope, regardless of fields.
    pub fn same_scope(&self, other: &RequestKey) -> bool {
        self.endpoint == other.endpoint && self.scope == other.scope
    }

    /// True when an entry stored under `self` can answer `request`:
    /// identical endpoint and scope, and a field set that is a superset.
    pub fn covers(&self, request: &RequestKey) -> bool {
        self.same_scope(request) && self.fields.is_superset(&request.fields)
    }

    /// Canonical text form: `endpoint|f1,f2|k1=v1&k2=v2`. Used for display;
    /// separators are not escaped, so distinct keys can share this text.
    pub fn canonical(&self) -> String {
        let fields: Vec<&str> = self.fields.iter().map(String::as_str).collect();
        let scope: Vec<String> = self
            .scope
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{}|{}|{}", self.endpoint, fields.join(","), scope.join("&"))
    }

    /// Hex SHA-256 of a length-prefixed encoding of every part, used as the
    /// persisted file name. Distinct keys get distinct digests.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hash_part(&mut hasher, &self.endpoint);
        hasher.update((self.fields.len() as u64).to_le_bytes());
        for field in &self.fields {
            hash_part(&mut hasher, field);
        }
        hasher.update((self.scope.len() as u64).to_le_bytes());
        for (name, value) in &self.scope {
            hash_part(&mut hasher, name);
            hash_part(&mut hasher, value);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Scope-only label used in manifests and logs, e.g. `id=42`.
    pub fn scope_label(&self) -> String {
        if self.scope.is_empty() {
            return "(unscoped)".to_string();
        }
        self.scope
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn hash_part(hasher: &mut Sha256, part: &str) {
    hasher.update((part.len() as u64).to_le_bytes());
    hasher.update(part.as_bytes());
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// What the API client receives for a live call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub endpoint: String,
    pub fields: Vec<String>,
    pub scope: Vec<(String, String)>,
}

impl From<&RequestKey> for RequestDescriptor {
    fn from(key: &RequestKey) -> Self {
        Self {
            endpoint: key.endpoint.clone(),
            fields: key.fields.iter().cloned().collect(),
            scope: key
                .scope
                .iter()
                .flat_map(|(k, v)| {
                    v.split(MULTI_VALUE_SEPARATOR)
                        .map(move |part| (k.clone(), part.to_string()))
                })
                .collect(),
        }
    }
}
