//! YAML manifest loading using yaml-rust2
//!
//! Manifests are parsed with yaml-rust2, converted to `serde_json::Value`,
//! and deserialized into typed CRDs. Used for CRD tests and for seeding the
//! trust registry and secret store from a file when running without a cluster.

use k8s_openapi::api::core::v1::Secret;
use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

use crate::crd::{Authorization, KubernetesFederation, SpiffeFederation};
use crate::error::Error;

/// Parse a YAML string into a serde_json::Value.
///
/// For multi-document YAML, returns only the first document.
/// Returns `Value::Null` for empty input.
pub fn parse_yaml(input: &str) -> Result<Value, Error> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| Error::serialization(e.to_string()))?;
    match docs.into_iter().next() {
        Some(doc) => yaml_to_json(doc),
        None => Ok(Value::Null),
    }
}

/// Parse a multi-document YAML string; each `---` document becomes one Value
pub fn parse_yaml_multi(input: &str) -> Result<Vec<Value>, Error> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| Error::serialization(e.to_string()))?;
    docs.into_iter()
        .filter(|doc| !doc.is_null())
        .map(yaml_to_json)
        .collect()
}

/// Trust objects declared in a manifest file
#[derive(Debug, Default)]
pub struct TrustManifests {
    /// Authorization policies
    pub authorizations: Vec<Authorization>,
    /// Kubernetes federations
    pub kubernetes_federations: Vec<KubernetesFederation>,
    /// SPIFFE federations
    pub spiffe_federations: Vec<SpiffeFederation>,
    /// Secrets served by the in-memory secret store
    pub secrets: Vec<Secret>,
}

/// Load Authorization, federation and Secret objects from a multi-document manifest
///
/// Documents of other kinds are rejected so typos in `kind` do not silently
/// drop a policy.
pub fn load_trust_manifests(input: &str) -> Result<TrustManifests, Error> {
    let mut manifests = TrustManifests::default();

    for doc in parse_yaml_multi(input)? {
        let kind = doc
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::serialization("manifest document has no kind"))?
            .to_string();

        let decode_err = |e: serde_json::Error| Error::serialization_for_kind(&kind, e.to_string());
        match kind.as_str() {
            "Authorization" => manifests
                .authorizations
                .push(serde_json::from_value(doc).map_err(decode_err)?),
            "KubernetesFederation" => manifests
                .kubernetes_federations
                .push(serde_json::from_value(doc).map_err(decode_err)?),
            "SpiffeFederation" => manifests
                .spiffe_federations
                .push(serde_json::from_value(doc).map_err(decode_err)?),
            "Secret" => manifests
                .secrets
                .push(serde_json::from_value(doc).map_err(decode_err)?),
            other => {
                return Err(Error::serialization(format!(
                    "unsupported kind in trust manifest: {}",
                    other
                )))
            }
        }
    }

    Ok(manifests)
}

fn yaml_to_json(yaml: Yaml) -> Result<Value, Error> {
    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e: std::num::ParseFloatError| Error::serialization(e.to_string()))?;
            Ok(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(arr) => arr
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Yaml::Hash(map) => map
            .into_iter()
            .map(|(k, v)| {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Integer(i) => i.to_string(),
                    Yaml::Boolean(b) => b.to_string(),
                    _ => return Err(Error::serialization("unsupported YAML key type")),
                };
                yaml_to_json(v).map(|v| (key, v))
            })
            .collect::<Result<Map<String, Value>, _>>()
            .map(Value::Object),
        Yaml::Alias(_) => Err(Error::serialization("YAML aliases not supported")),
        Yaml::BadValue => Err(Error::serialization("bad YAML value")),
    }
}
