use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request from the LLM to call a tool, in the OpenAI wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments object, exactly as the model produced it.
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "function".into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// The result of executing one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    /// The uniform `{success, data|error, tool}` envelope.
    pub result: Value,
}

impl ToolResult {
    /// Wrap a successful tool result in the uniform envelope.
    pub fn ok(call_id: impl Into<String>, tool: &str, data: Value) -> Self {
        Self {
            id: call_id.into(),
            kind: "function".into(),
            result: serde_json::json!({
                "success": true,
                "data": data,
                "tool": tool,
            }),
        }
    }

    /// Wrap a tool failure in the uniform envelope.
    pub fn err(call_id: impl Into<String>, tool: &str, error: &str) -> Self {
        Self {
            id: call_id.into(),
            kind: "function".into(),
            result: serde_json::json!({
                "success": false,
                "error": error,
                "tool": tool,
            }),
        }
    }
}

/// A JSON-schema parameter description for a tool, as a tagged sum rather
/// than a free-form map. Serializes to the exact OpenAI schema shape
/// (`{"type":"object","properties":{…},"required":[…]}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schema {
    Object {
        #[serde(default)]
        properties: BTreeMap<String, Schema>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        required: Vec<String>,
    },
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
    Boolean {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
    Array {
        items: Box<Schema>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl Schema {
    /// An object schema from (name, schema) pairs plus required names.
    pub fn object<const N: usize, const R: usize>(
        properties: [(&str, Schema); N],
        required: [&str; R],
    ) -> Self {
        Schema::Object {
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            required: required.into_iter().map(String::from).collect(),
        }
    }

    pub fn string(description: &str) -> Self {
        Schema::String {
            description: Some(description.to_string()),
            default: None,
        }
    }

    pub fn integer(description: &str) -> Self {
        Schema::Integer {
            description: Some(description.to_string()),
            default: None,
        }
    }

    pub fn number(description: &str) -> Self {
        Schema::Number {
            description: Some(description.to_string()),
            default: None,
        }
    }

    pub fn boolean(description: &str) -> Self {
        Schema::Boolean {
            description: Some(description.to_string()),
            default: None,
        }
    }

    pub fn with_default(self, value: Value) -> Self {
        match self {
            Schema::String { description, .. } => Schema::String {
                description,
                default: Some(value),
            },
            Schema::Integer { description, .. } => Schema::Integer {
                description,
                default: Some(value),
            },
            Schema::Number { description, .. } => Schema::Number {
                description,
                default: Some(value),
            },
            Schema::Boolean { description, .. } => Schema::Boolean {
                description,
                default: Some(value),
            },
            other => other,
        }
    }
}

/// An OpenAI tool spec: `{"type":"function","function":{…}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: Schema,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str, parameters: Schema) -> Self {
        Self {
            kind: "function".into(),
            function: ToolFunction {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_serializes_to_openai_shape() {
        let schema = Schema::object(
            [
                ("path", Schema::string("File path")),
                (
                    "limit",
                    Schema::integer("Max results").with_default(serde_json::json!(5)),
                ),
            ],
            ["path"],
        );
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["type"], "object");
        assert_eq!(json["properties"]["path"]["type"], "string");
        assert_eq!(json["properties"]["limit"]["default"], 5);
        assert_eq!(json["required"][0], "path");
    }

    #[test]
    fn schema_round_trips() {
        let schema = Schema::object(
            [(
                "tags",
                Schema::Array {
                    items: Box::new(Schema::string("tag")),
                    description: None,
                },
            )],
            [],
        );
        let json = serde_json::to_string(&schema).unwrap();
        let back: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn tool_result_envelope_shape() {
        let ok = ToolResult::ok("call_0", "read", serde_json::json!({"text": "x"}));
        assert_eq!(ok.result["success"], true);
        assert_eq!(ok.result["tool"], "read");
        let err = ToolResult::err("call_1", "read", "file not found");
        assert_eq!(err.result["success"], false);
        assert_eq!(err.result["error"], "file not found");
    }
}
