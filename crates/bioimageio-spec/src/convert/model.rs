use serde_json::{Value as JsonValue, json};

use super::{MigrationStep, bump, remove_if_empty, strip_cite_doi_prefixes, wrap_name_list};
use crate::document::Document;

const STEPS_V0_4: [MigrationStep; 8] = [
    MigrationStep {
        from: &["0.3.0"],
        to: "0.3.1",
        summary: "version bump",
        apply: bump,
    },
    MigrationStep {
        from: &["0.3.1"],
        to: "0.3.2",
        summary: "wrap bare author names, apply config.future updates",
        apply: model_v0_3_1_to_v0_3_2,
    },
    MigrationStep {
        from: &["0.3.2", "0.3.3", "0.3.4", "0.3.5"],
        to: "0.3.6",
        summary: "version bump",
        apply: bump,
    },
    MigrationStep {
        from: &["0.3.6"],
        to: "0.4.0",
        summary: "move architecture into the pytorch_state_dict weights entry",
        apply: model_v0_3_6_to_v0_4_0,
    },
    MigrationStep {
        from: &["0.4.0"],
        to: "0.4.1",
        summary: "move dependencies into the pytorch_state_dict weights entry",
        apply: model_v0_4_0_to_v0_4_1,
    },
    MigrationStep {
        from: &["0.4.1", "0.4.2", "0.4.3", "0.4.4"],
        to: "0.4.5",
        summary: "parent as a plain uri",
        apply: model_v0_4_4_to_v0_4_5,
    },
    MigrationStep {
        from: &["0.4.5", "0.4.6", "0.4.7", "0.4.8"],
        to: "0.4.9",
        summary: "version bump",
        apply: bump,
    },
    MigrationStep {
        from: &["0.4.9"],
        to: "0.4.10",
        summary: "bare DOIs in cite",
        apply: model_v0_4_9_to_v0_4_10,
    },
];

pub static MODEL_V0_4: &[MigrationStep] = &STEPS_V0_4;

pub static MODEL_V0_5: &[MigrationStep] = &[
    STEPS_V0_4[0],
    STEPS_V0_4[1],
    STEPS_V0_4[2],
    STEPS_V0_4[3],
    STEPS_V0_4[4],
    STEPS_V0_4[5],
    STEPS_V0_4[6],
    STEPS_V0_4[7],
    MigrationStep {
        from: &["0.4.10"],
        to: "0.5.3",
        summary: "tensor ids, axes as objects, per-tensor test files, structured architecture",
        apply: model_v0_4_10_to_v0_5_3,
    },
    MigrationStep {
        from: &["0.5.0", "0.5.1", "0.5.2"],
        to: "0.5.3",
        summary: "version bump",
        apply: bump,
    },
];

const WEIGHTS_FORMATS_WITH_AUTHORS: [&str; 6] = [
    "keras_hdf5",
    "onnx",
    "pytorch_state_dict",
    "tensorflow_js",
    "tensorflow_saved_model_bundle",
    "torchscript",
];

fn model_v0_3_1_to_v0_3_2(document: &Document) -> Document {
    let mut out = document.clone();

    let future = match out.get_mut("config").and_then(|config| config.get_mut("future")) {
        Some(JsonValue::Object(future)) => future.remove("0.3.2"),
        _ => None,
    };

    if let Some(authors) = out.get_mut("authors") {
        wrap_name_list(authors);
        let updates = future
            .as_ref()
            .and_then(|future| future.get("authors"))
            .and_then(JsonValue::as_array);
        if let (JsonValue::Array(authors), Some(updates)) = (authors, updates) {
            for (author, update) in authors.iter_mut().zip(updates) {
                if let (JsonValue::Object(author), JsonValue::Object(update)) = (author, update) {
                    for (key, value) in update {
                        author.insert(key.clone(), value.clone());
                    }
                }
            }
        }
    }
    if let Some(packaged_by) = out.get_mut("packaged_by") {
        wrap_name_list(packaged_by);
    }
    if let Some(JsonValue::Object(weights)) = out.get_mut("weights") {
        for format in WEIGHTS_FORMATS_WITH_AUTHORS {
            if let Some(authors) = weights
                .get_mut(format)
                .and_then(|entry| entry.get_mut("authors"))
            {
                wrap_name_list(authors);
            }
        }
    }

    if let Some(JsonValue::Object(config)) = out.get_mut("config") {
        remove_if_empty(config, "future");
    }
    remove_if_empty(&mut out, "config");
    out
}

fn model_v0_3_6_to_v0_4_0(document: &Document) -> Document {
    let mut out = document.clone();
    out.remove("language");
    out.remove("framework");
    let architecture = out.remove("source");
    let architecture_sha256 = out.remove("sha256");
    let kwargs = out.remove("kwargs");

    if let Some(JsonValue::Object(weights)) = out.get_mut("weights") {
        if let Some(JsonValue::Object(entry)) = weights.get_mut("pytorch_state_dict") {
            if let Some(architecture) = architecture {
                entry.insert("architecture".into(), architecture);
            }
            if let Some(digest) = architecture_sha256 {
                entry.insert("architecture_sha256".into(), digest);
            }
            if let Some(kwargs) = kwargs {
                entry.insert("kwargs".into(), kwargs);
            }
        }
        if let Some(script) = weights.remove("pytorch_script") {
            weights.insert("torchscript".into(), script);
        }
    }
    out
}

fn model_v0_4_0_to_v0_4_1(document: &Document) -> Document {
    let mut out = document.clone();
    let Some(dependencies) = out.remove("dependencies") else {
        return out;
    };
    if let Some(JsonValue::Object(entry)) = out
        .get_mut("weights")
        .and_then(|weights| weights.get_mut("pytorch_state_dict"))
    {
        entry.insert("dependencies".into(), dependencies);
    }
    out
}

fn model_v0_4_4_to_v0_4_5(document: &Document) -> Document {
    let mut out = document.clone();
    let uri = match out.get("parent") {
        Some(JsonValue::Object(parent)) => parent.get("uri").cloned(),
        _ => None,
    };
    if let Some(uri) = uri {
        out.insert("parent".into(), uri);
    }
    out
}

fn model_v0_4_9_to_v0_4_10(document: &Document) -> Document {
    let mut out = document.clone();
    strip_cite_doi_prefixes(&mut out);
    out
}

fn model_v0_4_10_to_v0_5_3(document: &Document) -> Document {
    let mut out = document.clone();

    let input_ids = tensor_names(document.get("inputs"));
    for (key, test_key, sample_key) in [
        ("inputs", "test_inputs", "sample_inputs"),
        ("outputs", "test_outputs", "sample_outputs"),
    ] {
        let test_files = out.remove(test_key);
        let sample_files = out.remove(sample_key);
        let Some(JsonValue::Array(tensors)) = out.get_mut(key) else {
            continue;
        };
        for (idx, tensor) in tensors.iter_mut().enumerate() {
            let JsonValue::Object(tensor) = tensor else {
                continue;
            };
            convert_tensor_v0_5(tensor, &input_ids);
            if let Some(file) = nth_file(test_files.as_ref(), idx) {
                tensor.insert("test_tensor".into(), json!({ "source": file }));
            }
            if let Some(file) = nth_file(sample_files.as_ref(), idx) {
                tensor.insert("sample_tensor".into(), json!({ "source": file }));
            }
        }
    }

    if let Some(JsonValue::Object(weights)) = out.get_mut("weights") {
        for (_, entry) in weights.iter_mut() {
            let JsonValue::Object(entry) = entry else {
                continue;
            };
            if let Some(JsonValue::String(dependencies)) = entry.get("dependencies") {
                let file = dependencies
                    .strip_prefix("conda:")
                    .unwrap_or(dependencies)
                    .to_string();
                entry.insert("dependencies".into(), json!({ "source": file }));
            }
        }
        if let Some(JsonValue::Object(entry)) = weights.get_mut("pytorch_state_dict") {
            let digest = entry.remove("architecture_sha256");
            if let Some(JsonValue::String(architecture)) = entry.get("architecture") {
                let structured = architecture_v0_5(architecture, digest);
                entry.insert("architecture".into(), structured);
            }
        }
    }
    out
}

fn tensor_names(tensors: Option<&JsonValue>) -> Vec<String> {
    tensors
        .and_then(JsonValue::as_array)
        .map(|tensors| {
            tensors
                .iter()
                .filter_map(|tensor| tensor.get("name").and_then(JsonValue::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn nth_file(files: Option<&JsonValue>, idx: usize) -> Option<JsonValue> {
    files
        .and_then(JsonValue::as_array)
        .and_then(|files| files.get(idx))
        .cloned()
}

/// `name` becomes `id`, `data_type` moves into `data`, the axes string and
/// shape are combined into axis objects, processing steps are keyed by `id`.
fn convert_tensor_v0_5(tensor: &mut Document, input_ids: &[String]) {
    if let Some(name) = tensor.remove("name") {
        tensor.insert("id".into(), name);
    }
    if let Some(data_type) = tensor.remove("data_type") {
        tensor.insert("data".into(), json!({ "type": data_type }));
    }
    tensor.remove("data_range");

    let shape = tensor.remove("shape");
    let halo = tensor.remove("halo");
    if let Some(JsonValue::String(axes)) = tensor.get("axes") {
        let axes: Vec<char> = axes.chars().collect();
        let converted = axes
            .iter()
            .enumerate()
            .map(|(idx, axis)| axis_v0_5(*axis, idx, shape.as_ref(), halo.as_ref(), input_ids))
            .collect();
        tensor.insert("axes".into(), JsonValue::Array(converted));
    }

    for key in ["preprocessing", "postprocessing"] {
        let Some(JsonValue::Array(steps)) = tensor.get_mut(key) else {
            continue;
        };
        for step in steps.iter_mut() {
            if let JsonValue::Object(step) = step
                && let Some(name) = step.remove("name")
            {
                step.insert("id".into(), name);
            }
        }
    }
}

fn axis_v0_5(
    axis: char,
    idx: usize,
    shape: Option<&JsonValue>,
    halo: Option<&JsonValue>,
    input_ids: &[String],
) -> JsonValue {
    let size = axis_size(idx, shape, axis, input_ids);
    let mut out = Document::new();
    match axis {
        'b' => {
            out.insert("type".into(), json!("batch"));
            return JsonValue::Object(out);
        }
        'c' => {
            out.insert("type".into(), json!("channel"));
            let count = size.as_ref().and_then(JsonValue::as_u64).unwrap_or(1);
            let names: Vec<JsonValue> = (0..count)
                .map(|channel| JsonValue::String(format!("channel{channel}")))
                .collect();
            out.insert("channel_names".into(), JsonValue::Array(names));
            return JsonValue::Object(out);
        }
        'i' => {
            out.insert("type".into(), json!("index"));
        }
        't' => {
            out.insert("type".into(), json!("time"));
        }
        other => {
            out.insert("type".into(), json!("space"));
            out.insert("id".into(), JsonValue::String(other.to_string()));
        }
    }
    if let Some(size) = size {
        out.insert("size".into(), size);
    }
    if let Some(halo) = halo
        .and_then(JsonValue::as_array)
        .and_then(|halo| halo.get(idx))
        .filter(|halo| halo.as_u64().is_some_and(|value| value > 0))
    {
        out.insert("halo".into(), halo.clone());
    }
    JsonValue::Object(out)
}

fn axis_size(
    idx: usize,
    shape: Option<&JsonValue>,
    axis: char,
    input_ids: &[String],
) -> Option<JsonValue> {
    match shape? {
        JsonValue::Array(sizes) => sizes.get(idx).cloned(),
        JsonValue::Object(shape) => {
            if let (Some(min), Some(step)) = (shape.get("min"), shape.get("step")) {
                let min = min.get(idx)?.clone();
                let step = step.get(idx)?.clone();
                if step.as_u64() == Some(0) {
                    return Some(min);
                }
                return Some(json!({ "min": min, "step": step }));
            }
            let reference = shape.get("reference_tensor")?.as_str()?;
            if !input_ids.iter().any(|id| id == reference) {
                return None;
            }
            let axis_id = match axis {
                'i' => "index".to_string(),
                't' => "time".to_string(),
                other => other.to_string(),
            };
            Some(json!({ "tensor_id": reference, "axis_id": axis_id }))
        }
        _ => None,
    }
}

/// `"model.py:UNet"` or `"torchvision.models:resnet18"` as a structured entry.
fn architecture_v0_5(architecture: &str, sha256: Option<JsonValue>) -> JsonValue {
    let (location, callable) = architecture
        .rsplit_once(':')
        .unwrap_or((architecture, ""));
    let is_file = location.ends_with(".py") || location.contains('/');
    let mut out = Document::new();
    if is_file {
        out.insert("source".into(), JsonValue::String(location.to_string()));
        if let Some(sha256) = sha256 {
            out.insert("sha256".into(), sha256);
        }
    } else {
        out.insert("import_from".into(), JsonValue::String(location.to_string()));
    }
    out.insert("callable".into(), JsonValue::String(callable.to_string()));
    JsonValue::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::MigrationChain;
    use indoc::indoc;

    fn doc(value: JsonValue) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn chains_are_well_ordered() {
        MigrationChain::new(MODEL_V0_4).check().unwrap();
        MigrationChain::new(MODEL_V0_5).check().unwrap();
    }

    #[test]
    fn v0_3_1_authors_take_future_updates() {
        let input = doc(json!({
            "format_version": "0.3.1",
            "authors": ["Jane", "Max"],
            "config": {"future": {"0.3.2": {"authors": [{"affiliation": "EMBL"}]}}}
        }));
        let out = model_v0_3_1_to_v0_3_2(&input);
        assert_eq!(
            out["authors"],
            json!([{"name": "Jane", "affiliation": "EMBL"}, {"name": "Max"}])
        );
        assert!(!out.contains_key("config"));
    }

    #[test]
    fn v0_3_6_moves_architecture_into_weights() {
        let input = doc(json!({
            "format_version": "0.3.6",
            "language": "python",
            "framework": "pytorch",
            "source": "unet.py:UNet",
            "sha256": "ab",
            "kwargs": {"depth": 3},
            "dependencies": "conda:env.yaml",
            "weights": {
                "pytorch_state_dict": {"source": "weights.pt"},
                "pytorch_script": {"source": "weights.ts"}
            }
        }));
        let out = MigrationChain::new(MODEL_V0_4).migrate(&input).document;
        assert_eq!(out["format_version"], "0.4.10");
        assert!(!out.contains_key("language") && !out.contains_key("source"));
        let entry = &out["weights"]["pytorch_state_dict"];
        assert_eq!(entry["architecture"], "unet.py:UNet");
        assert_eq!(entry["architecture_sha256"], "ab");
        assert_eq!(entry["kwargs"], json!({"depth": 3}));
        assert_eq!(entry["dependencies"], "conda:env.yaml");
        assert_eq!(out["weights"]["torchscript"], json!({"source": "weights.ts"}));
    }

    #[test]
    fn parent_uri_is_flattened() {
        let input = doc(json!({
            "format_version": "0.4.2",
            "parent": {"uri": "https://x/rdf.yaml", "sha256": "00"}
        }));
        let out = MigrationChain::new(MODEL_V0_4).migrate(&input).document;
        assert_eq!(out["parent"], "https://x/rdf.yaml");
    }

    #[test]
    fn v0_4_10_to_v0_5_3_restructures_tensors() {
        let text = indoc! {r#"
            format_version: 0.4.10
            inputs:
              - name: raw
                axes: bcyx
                data_type: float32
                shape:
                  min: [1, 1, 64, 64]
                  step: [0, 0, 16, 16]
                preprocessing:
                  - name: zero_mean_unit_variance
            outputs:
              - name: mask
                axes: bcyx
                data_type: float32
                shape:
                  reference_tensor: raw
                  scale: [1, 1, 1, 1]
                  offset: [0, 0, 0, 0]
                halo: [0, 0, 8, 8]
            test_inputs: [test_input.npy]
            test_outputs: [test_output.npy]
            weights:
              pytorch_state_dict:
                source: weights.pt
                architecture: unet.py:UNet
                architecture_sha256: "0000000000000000000000000000000000000000000000000000000000000000"
                dependencies: conda:environment.yaml
        "#};
        let input = crate::document::parse_yaml(text).unwrap();
        let out = MigrationChain::new(MODEL_V0_5).migrate(input.as_object().unwrap()).document;
        assert_eq!(out["format_version"], "0.5.3");
        assert!(!out.contains_key("test_inputs"));

        let raw = &out["inputs"][0];
        assert_eq!(raw["id"], "raw");
        assert_eq!(raw["data"], json!({"type": "float32"}));
        assert_eq!(raw["test_tensor"], json!({"source": "test_input.npy"}));
        assert_eq!(
            raw["axes"],
            json!([
                {"type": "batch"},
                {"type": "channel", "channel_names": ["channel0"]},
                {"type": "space", "id": "y", "size": {"min": 64, "step": 16}},
                {"type": "space", "id": "x", "size": {"min": 64, "step": 16}}
            ])
        );
        assert_eq!(raw["preprocessing"][0]["id"], "zero_mean_unit_variance");

        let mask = &out["outputs"][0];
        assert_eq!(
            mask["axes"][2],
            json!({
                "type": "space",
                "id": "y",
                "size": {"tensor_id": "raw", "axis_id": "y"},
                "halo": 8
            })
        );

        let weights = &out["weights"]["pytorch_state_dict"];
        assert_eq!(weights["architecture"]["source"], "unet.py");
        assert_eq!(weights["architecture"]["callable"], "UNet");
        assert!(weights["architecture"]["sha256"].is_string());
        assert_eq!(weights["dependencies"], json!({"source": "environment.yaml"}));
    }

    #[test]
    fn importable_architecture() {
        let out = architecture_v0_5("torchvision.models:resnet18", None);
        assert_eq!(
            out,
            json!({"import_from": "torchvision.models", "callable": "resnet18"})
        );
    }
}
