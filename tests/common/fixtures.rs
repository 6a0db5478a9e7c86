//! Test fixtures and builder patterns for Ingresses and Secrets.

use std::collections::BTreeMap;

use ingress_core::annotations::ANNOTATION_PREFIX;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Builder for creating Ingress test fixtures.
///
/// # Example
/// ```ignore
/// let ingress = IngressBuilder::new("web")
///     .namespace("shop")
///     .annotation("enable-cors", "true")
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct IngressBuilder {
    name: String,
    namespace: Option<String>,
    annotations: BTreeMap<String, String>,
    generation: Option<i64>,
}

impl IngressBuilder {
    /// Create a new builder in the `default` namespace.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some("default".to_string()),
            annotations: BTreeMap::new(),
            generation: None,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Add `ingress.kubernetes.io/<name>`.
    pub fn annotation(mut self, name: &str, value: impl Into<String>) -> Self {
        self.annotations
            .insert(format!("{ANNOTATION_PREFIX}{name}"), value.into());
        self
    }

    /// Add an annotation under its full key.
    pub fn raw_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn generation(mut self, generation: i64) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn build(self) -> Ingress {
        Ingress {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: self.namespace,
                annotations: if self.annotations.is_empty() {
                    None
                } else {
                    Some(self.annotations)
                },
                generation: self.generation,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

impl Default for IngressBuilder {
    fn default() -> Self {
        Self::new("web")
    }
}

/// Secret with the given data entries.
pub fn secret(name: &str, namespace: &str, data: &[(&str, &[u8])]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| ((*k).to_string(), ByteString(v.to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}
