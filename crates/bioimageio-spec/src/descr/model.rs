//! Model descriptions (0.4 and 0.5).

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;
use time::format_description::well_known::Iso8601;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

use super::generic::{CommonRules, validate_common};
use crate::context::ValidationContext;
use crate::document::{Document, Loc};
use crate::error::Result;
use crate::file::check_file;
use crate::issues::Issues;
use crate::registry::DescrKind;
use crate::summary::Severity;

pub const WEIGHTS_FORMATS: [&str; 6] = [
    "keras_hdf5",
    "onnx",
    "pytorch_state_dict",
    "tensorflow_js",
    "tensorflow_saved_model_bundle",
    "torchscript",
];

const DATA_TYPES: [&str; 11] = [
    "bool", "float32", "float64", "int8", "int16", "int32", "int64", "uint8", "uint16", "uint32",
    "uint64",
];

const AXES_V0_4: &str = "bitczyx";

const AXIS_TYPES_V0_5: [&str; 5] = ["batch", "channel", "index", "time", "space"];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Input,
    Output,
}

impl Side {
    fn key(self) -> &'static str {
        match self {
            Side::Input => "inputs",
            Side::Output => "outputs",
        }
    }
}

pub(crate) fn validate_v0_4(
    doc: &Document,
    ctx: &ValidationContext,
    issues: &mut Issues,
) -> Result<()> {
    let kind = DescrKind::Model04;
    validate_common(kind, doc, ctx, issues, CommonRules::for_kind(kind));
    check_timestamp(doc, issues);

    let root = Loc::root();
    let mut seen: BTreeMap<String, Loc> = BTreeMap::new();
    let input_names = tensors_v0_4(doc, issues, Side::Input, &[], &mut seen);
    tensors_v0_4(doc, issues, Side::Output, &input_names, &mut seen);

    for (key, tensors_key, required) in [
        ("test_inputs", "inputs", true),
        ("test_outputs", "outputs", true),
        ("sample_inputs", "inputs", false),
        ("sample_outputs", "outputs", false),
    ] {
        let files = if required {
            issues.require_list(doc, &root, key, 1)
        } else {
            issues.optional_list(doc, &root, key)
        };
        let Some(files) = files else {
            continue;
        };
        for (idx, file) in files.iter().enumerate() {
            check_file(issues, ctx, root.join(key).join(idx), file, None);
        }
        let expected = doc
            .get(tensors_key)
            .and_then(JsonValue::as_array)
            .map_or(0, Vec::len);
        if !files.is_empty() && files.len() != expected {
            issues.error(
                root.join(key),
                "value_error",
                format!(
                    "expected {expected} {key} (one per entry in {tensors_key}), got {}",
                    files.len()
                ),
            );
        }
    }

    check_weights(doc, ctx, issues, kind);

    if let Some(run_mode) = issues.optional_map(doc, &root, "run_mode") {
        issues.require_str(run_mode, &root.join("run_mode"), "name");
    }
    issues.optional_str(doc, &root, "parent");
    Ok(())
}

fn tensors_v0_4(
    doc: &Document,
    issues: &mut Issues,
    side: Side,
    input_names: &[String],
    seen: &mut BTreeMap<String, Loc>,
) -> Vec<String> {
    let root = Loc::root();
    let key = side.key();
    let mut names = Vec::new();
    let Some(tensors) = issues.require_list(doc, &root, key, 1) else {
        return names;
    };
    for (idx, tensor) in tensors.iter().enumerate() {
        let loc = root.join(key).join(idx);
        let Some(tensor) = issues.expect_map(tensor, loc.clone()) else {
            continue;
        };
        if let Some(name) = issues.require_str(tensor, &loc, "name") {
            unique_tensor_id(issues, seen, name, loc.join("name"));
            names.push(name.to_string());
        }
        issues.literal(tensor, &loc, "data_type", &DATA_TYPES);
        issues.optional_str(tensor, &loc, "description");

        let axes = issues.require_str(tensor, &loc, "axes").and_then(|axes| {
            let mut valid = true;
            for (pos, axis) in axes.char_indices() {
                if !AXES_V0_4.contains(axis) {
                    issues.error(
                        loc.join("axes"),
                        "value_error",
                        format!("invalid axis '{axis}'; axes may only use the letters {AXES_V0_4}"),
                    );
                    valid = false;
                } else if axes[..pos].contains(axis) {
                    issues.error(
                        loc.join("axes"),
                        "value_error",
                        format!("duplicate axis '{axis}'"),
                    );
                    valid = false;
                }
            }
            valid.then_some(axes.chars().count())
        });

        match tensor.get("shape") {
            None | Some(JsonValue::Null) => issues.missing(loc.join("shape")),
            Some(JsonValue::Array(shape)) => {
                check_int_list(issues, shape, loc.join("shape"), axes, 1);
            }
            Some(JsonValue::Object(shape)) => {
                let shape_loc = loc.join("shape");
                match side {
                    Side::Input => {
                        for part in ["min", "step"] {
                            if let Some(values) = issues.require_list(shape, &shape_loc, part, 0) {
                                let floor = if part == "min" { 1 } else { 0 };
                                check_int_list(issues, values, shape_loc.join(part), axes, floor);
                            }
                        }
                    }
                    Side::Output => {
                        if let Some(reference) =
                            issues.require_str(shape, &shape_loc, "reference_tensor")
                            && !input_names.iter().any(|name| name == reference)
                        {
                            issues.error(
                                shape_loc.join("reference_tensor"),
                                "value_error",
                                format!("'{reference}' does not name an input tensor"),
                            );
                        }
                        for part in ["scale", "offset"] {
                            if let Some(values) = issues.require_list(shape, &shape_loc, part, 0) {
                                check_number_list(issues, values, shape_loc.join(part), axes);
                            }
                        }
                    }
                }
            }
            Some(other) => {
                issues.expect_list(other, loc.join("shape"));
            }
        }

        if side == Side::Output
            && let Some(halo) = issues.optional_list(tensor, &loc, "halo")
        {
            check_int_list(issues, halo, loc.join("halo"), axes, 0);
        }

        for processing in ["preprocessing", "postprocessing"] {
            let Some(steps) = issues.optional_list(tensor, &loc, processing) else {
                continue;
            };
            for (step_idx, step) in steps.iter().enumerate() {
                let step_loc = loc.join(processing).join(step_idx);
                if let Some(step) = issues.expect_map(step, step_loc.clone()) {
                    issues.require_str(step, &step_loc, "name");
                    issues.optional_map(step, &step_loc, "kwargs");
                }
            }
        }
    }
    names
}

fn check_int_list(
    issues: &mut Issues,
    values: &[JsonValue],
    loc: Loc,
    expected_len: Option<usize>,
    floor: i64,
) {
    for (idx, value) in values.iter().enumerate() {
        match value.as_i64() {
            Some(number) if number >= floor => {}
            _ => issues.error(
                loc.join(idx),
                "int_type",
                format!("Input should be an integer >= {floor}"),
            ),
        }
    }
    check_len(issues, values, loc, expected_len);
}

fn check_number_list(
    issues: &mut Issues,
    values: &[JsonValue],
    loc: Loc,
    expected_len: Option<usize>,
) {
    for (idx, value) in values.iter().enumerate() {
        if !value.is_number() {
            issues.error(loc.join(idx), "float_type", "Input should be a valid number");
        }
    }
    check_len(issues, values, loc, expected_len);
}

fn check_len(issues: &mut Issues, values: &[JsonValue], loc: Loc, expected_len: Option<usize>) {
    if let Some(expected) = expected_len
        && values.len() != expected
    {
        issues.error(
            loc,
            "value_error",
            format!("expected {expected} entries (one per axis), got {}", values.len()),
        );
    }
}

pub(crate) fn validate_v0_5(
    doc: &Document,
    ctx: &ValidationContext,
    issues: &mut Issues,
) -> Result<()> {
    let kind = DescrKind::Model05;
    validate_common(kind, doc, ctx, issues, CommonRules::for_kind(kind));
    check_timestamp(doc, issues);

    let known_ids = declared_tensor_ids(doc);
    let mut seen: BTreeMap<String, Loc> = BTreeMap::new();
    for side in [Side::Input, Side::Output] {
        tensors_v0_5(doc, ctx, issues, side, &known_ids, &mut seen);
    }

    check_weights(doc, ctx, issues, kind);
    Ok(())
}

fn declared_tensor_ids(doc: &Document) -> Vec<String> {
    ["inputs", "outputs"]
        .into_iter()
        .filter_map(|key| doc.get(key).and_then(JsonValue::as_array))
        .flatten()
        .filter_map(|tensor| tensor.get("id").and_then(JsonValue::as_str))
        .map(str::to_string)
        .collect()
}

fn tensors_v0_5(
    doc: &Document,
    ctx: &ValidationContext,
    issues: &mut Issues,
    side: Side,
    known_ids: &[String],
    seen: &mut BTreeMap<String, Loc>,
) {
    let root = Loc::root();
    let key = side.key();
    let Some(tensors) = issues.require_list(doc, &root, key, 1) else {
        return;
    };
    for (idx, tensor) in tensors.iter().enumerate() {
        let loc = root.join(key).join(idx);
        let Some(tensor) = issues.expect_map(tensor, loc.clone()) else {
            continue;
        };
        if let Some(id) = issues.require_str(tensor, &loc, "id") {
            unique_tensor_id(issues, seen, id, loc.join("id"));
        }
        issues.optional_str(tensor, &loc, "description");

        if let Some(axes) = issues.require_list(tensor, &loc, "axes", 1) {
            check_axes_v0_5(issues, axes, &loc.join("axes"), side, known_ids);
        }

        if let Some(data) = issues.optional_map(tensor, &loc, "data") {
            issues.literal(data, &loc.join("data"), "type", &DATA_TYPES);
        }

        for (file_key, required) in [("test_tensor", true), ("sample_tensor", false)] {
            let entry = if required {
                issues.require_map(tensor, &loc, file_key)
            } else {
                issues.optional_map(tensor, &loc, file_key)
            };
            let Some(entry) = entry else {
                continue;
            };
            let entry_loc = loc.join(file_key);
            let sha256 = issues.optional_sha256(entry, &entry_loc, "sha256");
            if let Some(source) = issues.require(entry, &entry_loc, "source") {
                check_file(issues, ctx, entry_loc.join("source"), source, sha256);
            }
        }

        for processing in ["preprocessing", "postprocessing"] {
            let Some(steps) = issues.optional_list(tensor, &loc, processing) else {
                continue;
            };
            for (step_idx, step) in steps.iter().enumerate() {
                let step_loc = loc.join(processing).join(step_idx);
                if let Some(step) = issues.expect_map(step, step_loc.clone()) {
                    issues.require_str(step, &step_loc, "id");
                    issues.optional_map(step, &step_loc, "kwargs");
                }
            }
        }
    }
}

fn check_axes_v0_5(
    issues: &mut Issues,
    axes: &[JsonValue],
    loc: &Loc,
    side: Side,
    known_ids: &[String],
) {
    let mut axis_ids: Vec<String> = Vec::new();
    for (idx, axis) in axes.iter().enumerate() {
        let axis_loc = loc.join(idx);
        let Some(axis) = issues.expect_map(axis, axis_loc.clone()) else {
            continue;
        };
        let Some(axis_type) = issues.literal(axis, &axis_loc, "type", &AXIS_TYPES_V0_5) else {
            continue;
        };
        let axis_id = match issues.optional_str(axis, &axis_loc, "id") {
            Some(id) => id.to_string(),
            None if axis_type == "space" => {
                issues.missing(axis_loc.join("id"));
                continue;
            }
            None => axis_type.to_string(),
        };
        if axis_ids.contains(&axis_id) {
            issues.error(
                axis_loc.join("id"),
                "value_error",
                format!("duplicate axis id '{axis_id}'"),
            );
        }
        axis_ids.push(axis_id);

        match axis_type {
            "batch" => match axis.get("size") {
                None | Some(JsonValue::Null) => {}
                Some(size) if size.as_u64() == Some(1) => {}
                Some(_) => issues.error(
                    axis_loc.join("size"),
                    "value_error",
                    "batch axis size must be 1 when given",
                ),
            },
            "channel" => {
                if let Some(names) = issues.require_list(axis, &axis_loc, "channel_names", 1) {
                    for (name_idx, name) in names.iter().enumerate() {
                        issues.expect_str(name, axis_loc.join("channel_names").join(name_idx));
                    }
                }
            }
            _ => {
                if let Some(size) = issues.require(axis, &axis_loc, "size") {
                    check_axis_size(issues, size, axis_loc.join("size"), known_ids);
                }
            }
        }

        if let Some(halo) = axis.get("halo").filter(|halo| !halo.is_null()) {
            if side == Side::Input {
                issues.error(
                    axis_loc.join("halo"),
                    "value_error",
                    "halo is only allowed on output axes",
                );
            } else if halo.as_u64().is_none() {
                issues.error(
                    axis_loc.join("halo"),
                    "int_type",
                    "Input should be a non-negative integer",
                );
            }
        }
    }
}

fn check_axis_size(issues: &mut Issues, size: &JsonValue, loc: Loc, known_ids: &[String]) {
    match size {
        JsonValue::Number(number) => {
            if !number.as_u64().is_some_and(|value| value >= 1) {
                issues.error(loc, "int_type", "size should be a positive integer");
            }
        }
        JsonValue::Object(size) => {
            if size.contains_key("min") || size.contains_key("step") {
                for (part, floor) in [("min", 1), ("step", 0)] {
                    if let Some(value) = issues.require(size, &loc, part)
                        && !value.as_u64().is_some_and(|value| value >= floor)
                    {
                        issues.error(
                            loc.join(part),
                            "int_type",
                            format!("Input should be an integer >= {floor}"),
                        );
                    }
                }
            } else {
                if let Some(tensor_id) = issues.require_str(size, &loc, "tensor_id")
                    && !known_ids.iter().any(|id| id == tensor_id)
                {
                    issues.error(
                        loc.join("tensor_id"),
                        "value_error",
                        format!("'{tensor_id}' does not name a tensor of this model"),
                    );
                }
                issues.require_str(size, &loc, "axis_id");
            }
        }
        other => {
            issues.error(
                loc,
                "value_error",
                format!(
                    "size should be an integer, a parameterized size or a size reference, got {}",
                    crate::document::kind_name(other)
                ),
            );
        }
    }
}

fn unique_tensor_id(issues: &mut Issues, seen: &mut BTreeMap<String, Loc>, id: &str, loc: Loc) {
    if let Some(first) = seen.get(id) {
        issues.error(
            loc,
            "value_error",
            format!("duplicate tensor id '{id}' (first used at {first})"),
        );
    } else {
        seen.insert(id.to_string(), loc);
    }
}

fn check_timestamp(doc: &Document, issues: &mut Issues) {
    let root = Loc::root();
    if let Some(timestamp) = issues.require_str(doc, &root, "timestamp")
        && !is_iso8601(timestamp)
    {
        issues.error(
            root.join("timestamp"),
            "datetime_parsing",
            format!("'{timestamp}' is not an ISO 8601 timestamp"),
        );
    }
}

pub(crate) fn is_iso8601(value: &str) -> bool {
    OffsetDateTime::parse(value, &Iso8601::DEFAULT).is_ok()
        || PrimitiveDateTime::parse(value, &Iso8601::DEFAULT).is_ok()
        || Date::parse(value, &Iso8601::DEFAULT).is_ok()
}

fn check_weights(doc: &Document, ctx: &ValidationContext, issues: &mut Issues, kind: DescrKind) {
    let root = Loc::root();
    let Some(weights) = issues.require_map(doc, &root, "weights") else {
        return;
    };
    let weights_loc = root.join("weights");
    if weights.is_empty() {
        issues.error(
            weights_loc,
            "too_short",
            "at least one weights format is required",
        );
        return;
    }

    let mut has_root_entry = false;
    for (format, entry) in weights {
        let loc = weights_loc.join(format.as_str());
        if !WEIGHTS_FORMATS.contains(&format.as_str()) {
            issues.error(
                loc,
                "literal_error",
                format!(
                    "unknown weights format '{format}'; expected one of {}",
                    WEIGHTS_FORMATS.join(", ")
                ),
            );
            continue;
        }
        let Some(entry) = issues.expect_map(entry, loc.clone()) else {
            continue;
        };

        let sha256 = issues.optional_sha256(entry, &loc, "sha256");
        if let Some(source) = issues.require(entry, &loc, "source") {
            check_file(issues, ctx, loc.join("source"), source, sha256);
        }

        if let Some(authors) = issues.optional_list(entry, &loc, "authors") {
            for (idx, author) in authors.iter().enumerate() {
                let author_loc = loc.join("authors").join(idx);
                if let Some(author) = issues.expect_map(author, author_loc.clone()) {
                    issues.require_str(author, &author_loc, "name");
                }
            }
        }

        match issues.optional_str(entry, &loc, "parent") {
            Some(parent) if parent == format.as_str() => issues.error(
                loc.join("parent"),
                "value_error",
                "a weights entry cannot be its own parent",
            ),
            Some(parent) if !weights.contains_key(parent) => issues.error(
                loc.join("parent"),
                "value_error",
                format!("parent '{parent}' is not a weights format of this model"),
            ),
            Some(_) => {}
            None => has_root_entry = true,
        }

        check_dependencies(entry, ctx, issues, &loc, kind);

        match format.as_str() {
            "pytorch_state_dict" => {
                check_architecture(entry, ctx, issues, &loc, kind);
                check_framework_version(entry, issues, &loc, "pytorch_version", kind);
            }
            "torchscript" => check_framework_version(entry, issues, &loc, "pytorch_version", kind),
            "tensorflow_js" | "tensorflow_saved_model_bundle" | "keras_hdf5" => {
                check_framework_version(entry, issues, &loc, "tensorflow_version", kind)
            }
            "onnx" => {
                if let Some(opset) = entry.get("opset_version").filter(|v| !v.is_null())
                    && !opset.as_u64().is_some_and(|value| value >= 7)
                {
                    issues.error(
                        loc.join("opset_version"),
                        "int_type",
                        "opset_version should be an integer >= 7",
                    );
                }
            }
            _ => {}
        }
    }

    if !has_root_entry {
        issues.error(
            weights_loc,
            "value_error",
            "at least one weights entry must not declare a parent",
        );
    }
}

fn check_dependencies(
    entry: &Document,
    ctx: &ValidationContext,
    issues: &mut Issues,
    loc: &Loc,
    kind: DescrKind,
) {
    let dep_loc = loc.join("dependencies");
    match (kind, entry.get("dependencies")) {
        (_, None | Some(JsonValue::Null)) => {}
        (DescrKind::Model04, Some(value)) => {
            let Some(text) = issues.expect_str(value, dep_loc.clone()) else {
                return;
            };
            match text.split_once(':') {
                Some(("conda" | "pip", file)) => {
                    check_file(issues, ctx, dep_loc, &JsonValue::String(file.to_string()), None);
                }
                _ => issues.error(
                    dep_loc,
                    "value_error",
                    "dependencies must be given as 'conda:<file>' or 'pip:<file>'",
                ),
            }
        }
        (_, Some(value)) => {
            let Some(dependencies) = issues.expect_map(value, dep_loc.clone()) else {
                return;
            };
            let sha256 = issues.optional_sha256(dependencies, &dep_loc, "sha256");
            if let Some(source) = issues.require(dependencies, &dep_loc, "source") {
                check_file(issues, ctx, dep_loc.join("source"), source, sha256);
            }
        }
    }
}

fn check_architecture(
    entry: &Document,
    ctx: &ValidationContext,
    issues: &mut Issues,
    loc: &Loc,
    kind: DescrKind,
) {
    let arch_loc = loc.join("architecture");
    if kind == DescrKind::Model04 {
        let Some(architecture) = issues.require_str(entry, loc, "architecture") else {
            return;
        };
        let Some((location, callable)) = architecture.rsplit_once(':') else {
            issues.error(
                arch_loc,
                "value_error",
                "architecture must be given as '<file>:<callable>' or '<module>:<callable>'",
            );
            return;
        };
        if callable.is_empty() {
            issues.error(arch_loc.clone(), "value_error", "architecture callable is empty");
        }
        let sha256 = issues.optional_sha256(entry, loc, "architecture_sha256");
        if location.ends_with(".py") || location.contains('/') {
            if sha256.is_none() {
                issues.warn(
                    loc.join("architecture_sha256"),
                    "missing_sha256",
                    "architecture_sha256 should be given for file-based architectures",
                    Severity::Warning,
                );
            }
            check_file(issues, ctx, arch_loc, &JsonValue::String(location.to_string()), sha256);
        }
        issues.optional_map(entry, loc, "kwargs");
        return;
    }

    let Some(architecture) = issues.require_map(entry, loc, "architecture") else {
        return;
    };
    issues.require_str(architecture, &arch_loc, "callable");
    let sha256 = issues.optional_sha256(architecture, &arch_loc, "sha256");
    match (
        architecture.get("source").filter(|v| !v.is_null()),
        issues.optional_str(architecture, &arch_loc, "import_from"),
    ) {
        (Some(source), None) => {
            check_file(issues, ctx, arch_loc.join("source"), source, sha256);
        }
        (None, Some(_)) => {}
        (Some(_), Some(_)) => issues.error(
            arch_loc,
            "value_error",
            "architecture takes either 'source' or 'import_from', not both",
        ),
        (None, None) => issues.error(
            arch_loc,
            "value_error",
            "architecture needs a 'source' file or an 'import_from' module",
        ),
    }
    issues.optional_map(architecture, &loc.join("architecture"), "kwargs");
}

fn check_framework_version(
    entry: &Document,
    issues: &mut Issues,
    loc: &Loc,
    key: &str,
    kind: DescrKind,
) {
    let version = issues.optional_str(entry, loc, key);
    if version.is_none() && kind == DescrKind::Model05 {
        issues.warn(
            loc.join(key),
            "missing_framework_version",
            format!("{key} is not specified"),
            Severity::Warning,
        );
    }
}

/// Tensor ids (0.5) or names (0.4) of one side, in declaration order.
pub fn tensor_ids(doc: &Document, key: &str) -> Vec<String> {
    doc.get(key)
        .and_then(JsonValue::as_array)
        .map(|tensors| {
            tensors
                .iter()
                .filter_map(|tensor| {
                    tensor
                        .get("id")
                        .or_else(|| tensor.get("name"))
                        .and_then(JsonValue::as_str)
                })
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
