//! RFC 6902 patch generation for workload labels and pod template annotations.

use json_patch::{AddOperation, Patch, PatchOperation, RemoveOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

const LABELS_PATH: [&str; 2] = ["metadata", "labels"];
const TEMPLATE_METADATA_PATH: [&str; 3] = ["spec", "template", "metadata"];
const TEMPLATE_ANNOTATIONS_PATH: [&str; 4] = ["spec", "template", "metadata", "annotations"];

fn pointer(base: &[&str], key: &str) -> PointerBuf {
    PointerBuf::from_tokens(base.iter().copied().chain([key]))
}

fn to_value(map: &BTreeMap<String, String>) -> serde_json::Value {
    serde_json::Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect(),
    )
}

/// Operations turning `old` into `new` under the map at `base`.
///
/// A missing parent map becomes a single `add` of the whole map.
#[must_use]
pub fn diff_map(
    base: &[&str],
    old: Option<&BTreeMap<String, String>>,
    new: &BTreeMap<String, String>,
) -> Vec<PatchOperation> {
    let Some(old) = old else {
        if new.is_empty() {
            return Vec::new();
        }
        return vec![PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(base.iter().copied()),
            value: to_value(new),
        })];
    };

    let mut ops = Vec::new();
    for (key, value) in new {
        match old.get(key) {
            Some(existing) if existing == value => {}
            Some(_) => ops.push(PatchOperation::Replace(ReplaceOperation {
                path: pointer(base, key),
                value: serde_json::Value::String(value.clone()),
            })),
            None => ops.push(PatchOperation::Add(AddOperation {
                path: pointer(base, key),
                value: serde_json::Value::String(value.clone()),
            })),
        }
    }
    for key in old.keys().filter(|k| !new.contains_key(*k)) {
        ops.push(PatchOperation::Remove(RemoveOperation {
            path: pointer(base, key),
        }));
    }
    ops
}

/// Patch a workload's pod template annotations, then its labels.
///
/// `template_metadata` is the pod template's current metadata, if any.
#[must_use]
pub fn workload_patch(
    labels: Option<&BTreeMap<String, String>>,
    new_labels: &BTreeMap<String, String>,
    template_metadata: Option<&ObjectMeta>,
    new_annotations: &BTreeMap<String, String>,
) -> Patch {
    let mut ops = match template_metadata {
        Some(meta) => diff_map(
            &TEMPLATE_ANNOTATIONS_PATH,
            meta.annotations.as_ref(),
            new_annotations,
        ),
        None if new_annotations.is_empty() => Vec::new(),
        None => vec![PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(TEMPLATE_METADATA_PATH),
            value: serde_json::json!({ "annotations": to_value(new_annotations) }),
        })],
    };
    ops.extend(diff_map(&LABELS_PATH, labels, new_labels));
    Patch(ops)
}
