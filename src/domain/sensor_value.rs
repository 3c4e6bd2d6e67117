use serde::Serialize;
use serde_json::Value;

/// A sensor field value as published by a station.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SensorValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Number,
    Text,
    Boolean,
    Absent,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Absent => "absent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "number" => Some(Self::Number),
            "text" => Some(Self::Text),
            "boolean" => Some(Self::Boolean),
            "absent" => Some(Self::Absent),
            _ => None,
        }
    }
}

impl SensorValue {
    /// Nested arrays and objects are kept as their compact JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Absent,
            Value::Bool(flag) => Self::Boolean(*flag),
            Value::Number(number) => number
                .as_f64()
                .map(Self::Number)
                .unwrap_or_else(|| Self::Text(number.to_string())),
            Value::String(text) => Self::Text(text.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Number(_) => ValueKind::Number,
            Self::Text(_) => ValueKind::Text,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Absent => ValueKind::Absent,
        }
    }

    pub fn to_storage_text(&self) -> String {
        match self {
            Self::Number(number) => number.to_string(),
            Self::Text(text) => text.clone(),
            Self::Boolean(flag) => flag.to_string(),
            Self::Absent => String::new(),
        }
    }

    /// Rows without a kind, or whose text no longer matches their kind, read back as text.
    pub fn from_storage(kind: Option<&str>, text: Option<String>) -> Self {
        let text = text.unwrap_or_default();
        match kind.and_then(ValueKind::parse) {
            Some(ValueKind::Number) => match text.trim().parse::<f64>() {
                Ok(number) => Self::Number(number),
                Err(_) => Self::Text(text),
            },
            Some(ValueKind::Boolean) => match text.as_str() {
                "true" => Self::Boolean(true),
                "false" => Self::Boolean(false),
                _ => Self::Text(text),
            },
            Some(ValueKind::Absent) => Self::Absent,
            Some(ValueKind::Text) | None => Self::Text(text),
        }
    }
}
