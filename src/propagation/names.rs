//! Referenced Secret discovery.

use crate::constants::SECRET_NAMES_ANNOTATION_KEY;
use k8s_openapi::api::core::v1::{Container, PodSpec};
use std::collections::{BTreeMap, BTreeSet};

fn container_refs<'a>(container: &'a Container, out: &mut BTreeSet<&'a str>) {
    for env in container.env.iter().flatten() {
        if let Some(secret_ref) = env
            .value_from
            .as_ref()
            .and_then(|v| v.secret_key_ref.as_ref())
        {
            out.insert(secret_ref.name.as_str());
        }
    }
    for source in container.env_from.iter().flatten() {
        if let Some(secret_ref) = &source.secret_ref {
            out.insert(secret_ref.name.as_str());
        }
    }
}

/// Every Secret a pod spec references through env, envFrom or volumes.
///
/// Init containers are included. The result is deduplicated and sorted.
#[must_use]
pub fn collect_secret_names(spec: &PodSpec) -> Vec<String> {
    let mut names = BTreeSet::new();

    for container in spec.containers.iter().chain(spec.init_containers.iter().flatten()) {
        container_refs(container, &mut names);
    }

    for volume in spec.volumes.iter().flatten() {
        if let Some(name) = volume.secret.as_ref().and_then(|s| s.secret_name.as_deref()) {
            names.insert(name);
        }
    }

    names
        .into_iter()
        .filter(|n| !n.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Parse the `secretNames` annotation, if present
#[must_use]
pub fn secret_names_from_annotations(annotations: Option<&BTreeMap<String, String>>) -> Option<Vec<String>> {
    let raw = annotations?.get(SECRET_NAMES_ANNOTATION_KEY)?;
    let names: BTreeSet<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .collect();
    Some(names.into_iter().map(ToString::to_string).collect())
}

#[must_use]
pub fn format_secret_names(names: &[String]) -> String {
    names.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_spec(json: serde_json::Value) -> PodSpec {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_collects_all_reference_kinds() {
        let spec = pod_spec(serde_json::json!({
            "initContainers": [{
                "name": "init",
                "envFrom": [{"secretRef": {"name": "init-secret"}}]
            }],
            "containers": [{
                "name": "app",
                "env": [
                    {"name": "A", "valueFrom": {"secretKeyRef": {"name": "db", "key": "pw"}}},
                    {"name": "B", "value": "literal"},
                    {"name": "C", "valueFrom": {"configMapKeyRef": {"name": "cm", "key": "k"}}}
                ],
                "envFrom": [
                    {"secretRef": {"name": "api"}},
                    {"configMapRef": {"name": "cm"}}
                ]
            }, {
                "name": "sidecar",
                "env": [{"name": "A", "valueFrom": {"secretKeyRef": {"name": "db", "key": "user"}}}]
            }],
            "volumes": [
                {"name": "certs", "secret": {"secretName": "tls"}},
                {"name": "scratch", "emptyDir": {}}
            ]
        }));

        assert_eq!(
            collect_secret_names(&spec),
            vec!["api", "db", "init-secret", "tls"]
        );
    }

    #[test]
    fn test_no_references() {
        let spec = pod_spec(serde_json::json!({"containers": [{"name": "app"}]}));
        assert!(collect_secret_names(&spec).is_empty());
    }

    #[test]
    fn test_annotation_round_trip() {
        let names = vec!["a".to_string(), "b".to_string()];
        let annotations = BTreeMap::from([(
            SECRET_NAMES_ANNOTATION_KEY.to_string(),
            format_secret_names(&names),
        )]);
        assert_eq!(secret_names_from_annotations(Some(&annotations)), Some(names));
    }

    #[test]
    fn test_annotation_is_normalized() {
        let annotations = BTreeMap::from([(
            SECRET_NAMES_ANNOTATION_KEY.to_string(),
            "b, a,,b".to_string(),
        )]);
        assert_eq!(
            secret_names_from_annotations(Some(&annotations)),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(secret_names_from_annotations(None), None);
    }
}
