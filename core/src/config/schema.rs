//! Validation of raw config records against the configuration schema.
//!
//! Validation runs on the untouched JSON value, before defaults are merged,
//! so a wrong type is reported against the key the user wrote instead of
//! surfacing as a serde error. Unknown keys are rejected.

use serde_json::Value;

use super::Protocol;

/// A single validation error for a config field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dot-path to the field (e.g., `"host"`, `"watcher.autoUpload"`, `"ignore.1"`).
    pub field: String,
    /// Human-readable reason.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Accepted shape of one config key.
enum Rule {
    String,
    NullableString,
    Boolean,
    Integer { min: i64, max: i64 },
    OneOf(&'static [&'static str]),
    /// `true`, `false`, `"control"` or `"implicit"`.
    Secure,
    /// String, `true`, or `null`.
    Passphrase,
    NullableObject,
    StringArray,
    Watcher,
    Any,
}

struct Field {
    key: &'static str,
    rule: Rule,
    required: bool,
}

const fn field(key: &'static str, rule: Rule) -> Field {
    Field {
        key,
        rule,
        required: false,
    }
}

const fn required(key: &'static str, rule: Rule) -> Field {
    Field {
        key,
        rule,
        required: true,
    }
}

const FIELDS: &[Field] = &[
    field("context", Rule::String),
    field("virtualName", Rule::NullableString),
    field("virname", Rule::NullableString),
    field("protocol", Rule::OneOf(&Protocol::ALL)),
    required("host", Rule::String),
    field("port", Rule::Integer { min: 1, max: 65535 }),
    required("username", Rule::String),
    field("password", Rule::NullableString),
    field("agent", Rule::NullableString),
    field("privateKeyPath", Rule::NullableString),
    field("passphrase", Rule::Passphrase),
    field("interactiveAuth", Rule::Boolean),
    field("algorithms", Rule::Any),
    field("secure", Rule::Secure),
    field("secureOptions", Rule::NullableObject),
    field("passive", Rule::Boolean),
    required("remotePath", Rule::String),
    field("uploadOnSave", Rule::Boolean),
    field("syncMode", Rule::OneOf(&["update", "full"])),
    field("ignore", Rule::StringArray),
    field("watcher", Rule::Watcher),
    field("concurrency", Rule::Integer { min: 1, max: MAX_CONCURRENCY }),
];

/// Largest transfer limit a semaphore can hold.
const MAX_CONCURRENCY: i64 = tokio::sync::Semaphore::MAX_PERMITS as i64;

/// Validate one raw config record.
///
/// Returns every violation found; an empty list means the record is valid.
pub fn validate_record(record: &Value) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let Some(object) = record.as_object() else {
        errors.push(ValidationError::new("value", "must be an object"));
        return errors;
    };

    for key in object.keys() {
        if !FIELDS.iter().any(|f| f.key == key) {
            errors.push(ValidationError::new(key.clone(), "is not allowed"));
        }
    }

    if object.contains_key("virtualName") && object.contains_key("virname") {
        errors.push(ValidationError::new(
            "virname",
            "conflicts with \"virtualName\"",
        ));
    }

    for field in FIELDS {
        match object.get(field.key) {
            None if field.required => {
                errors.push(ValidationError::new(field.key, "is required"));
            }
            None => {}
            Some(value) => validate_value(field.key, &field.rule, value, &mut errors),
        }
    }

    errors
}

fn validate_value(key: &str, rule: &Rule, value: &Value, errors: &mut Vec<ValidationError>) {
    match rule {
        Rule::String => {
            if !value.is_string() {
                errors.push(ValidationError::new(key, "must be a string"));
            }
        }
        Rule::NullableString => {
            if !value.is_string() && !value.is_null() {
                errors.push(ValidationError::new(key, "must be a string"));
            }
        }
        Rule::Boolean => {
            if !value.is_boolean() {
                errors.push(ValidationError::new(key, "must be a boolean"));
            }
        }
        Rule::Integer { min, max } => match value.as_i64() {
            Some(n) if n < *min => {
                errors.push(ValidationError::new(key, format!("must be at least {min}")));
            }
            Some(n) if n > *max => {
                errors.push(ValidationError::new(key, format!("must be at most {max}")));
            }
            Some(_) => {}
            None if value.is_number() => {
                errors.push(ValidationError::new(key, "must be an integer"));
            }
            None => {
                errors.push(ValidationError::new(key, "must be a number"));
            }
        },
        Rule::OneOf(options) => {
            let ok = value.as_str().is_some_and(|s| options.contains(&s));
            if !ok {
                errors.push(ValidationError::new(
                    key,
                    format!("must be one of [{}]", options.join(", ")),
                ));
            }
        }
        Rule::Secure => {
            let ok = value.is_boolean()
                || matches!(value.as_str(), Some("control") | Some("implicit"));
            if !ok {
                errors.push(ValidationError::new(
                    key,
                    "must be one of [true, false, control, implicit]",
                ));
            }
        }
        Rule::Passphrase => {
            let ok = value.is_string() || value.is_null() || *value == Value::Bool(true);
            if !ok {
                errors.push(ValidationError::new(key, "must be a string or true"));
            }
        }
        Rule::NullableObject => {
            if !value.is_object() && !value.is_null() {
                errors.push(ValidationError::new(key, "must be an object"));
            }
        }
        Rule::StringArray => match value.as_array() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    if !item.is_string() {
                        errors.push(ValidationError::new(
                            format!("{key}.{i}"),
                            "must be a string",
                        ));
                    }
                }
            }
            None => errors.push(ValidationError::new(key, "must be an array")),
        },
        Rule::Watcher => validate_watcher(key, value, errors),
        Rule::Any => {}
    }
}

fn validate_watcher(key: &str, value: &Value, errors: &mut Vec<ValidationError>) {
    let Some(watcher) = value.as_object() else {
        errors.push(ValidationError::new(key, "must be an object"));
        return;
    };

    for (sub_key, sub_value) in watcher {
        let path = format!("{key}.{sub_key}");
        match sub_key.as_str() {
            "files" => {
                let ok = sub_value.is_string()
                    || sub_value.is_null()
                    || *sub_value == Value::Bool(false);
                if !ok {
                    errors.push(ValidationError::new(path, "must be a string or false"));
                }
            }
            "autoUpload" | "autoDelete" => {
                validate_value(&path, &Rule::Boolean, sub_value, errors);
            }
            _ => errors.push(ValidationError::new(path, "is not allowed")),
        }
    }
}
