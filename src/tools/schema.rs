use serde_json::{json, Map, Value};

use crate::error::SchemaError;

/// Type of a declared tool argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    String,
    /// A string restricted to a fixed vocabulary.
    Choice(&'static [&'static str]),
}

/// One declared argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub field_type: FieldType,
    pub required: bool,
}

/// Static argument schema for a tool.
///
/// Validation is strict: unknown fields, missing required fields, wrong types
/// and out-of-vocabulary choices are all rejected before the tool runs.
/// A JSON `null` for an optional field is treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgSchema {
    fields: Vec<FieldSpec>,
}

impl ArgSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &'static str, field_type: FieldType, description: &'static str) -> Self {
        self.fields.push(FieldSpec {
            name,
            description,
            field_type,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: &'static str, field_type: FieldType, description: &'static str) -> Self {
        self.fields.push(FieldSpec {
            name,
            description,
            field_type,
            required: false,
        });
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Check `args` for `tool` and return the accepted values.
    pub fn validate(&self, tool: &str, args: &Value) -> Result<ToolArgs, SchemaError> {
        let empty = Map::new();
        let object = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                return Err(SchemaError::NotAnObject {
                    tool: tool.to_string(),
                })
            }
        };

        if let Some(unknown) = object
            .keys()
            .find(|key| !self.fields.iter().any(|f| f.name == key.as_str()))
        {
            return Err(SchemaError::UnknownField {
                tool: tool.to_string(),
                field: unknown.clone(),
            });
        }

        let mut accepted = Map::new();
        for field in &self.fields {
            let value = match object.get(field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(SchemaError::MissingField {
                            tool: tool.to_string(),
                            field: field.name.to_string(),
                        });
                    }
                    continue;
                }
                Some(v) => v,
            };

            let text = value.as_str().ok_or_else(|| SchemaError::InvalidType {
                tool: tool.to_string(),
                field: field.name.to_string(),
                expected: "a string".to_string(),
            })?;

            if field.required && text.trim().is_empty() {
                return Err(SchemaError::MissingField {
                    tool: tool.to_string(),
                    field: field.name.to_string(),
                });
            }

            if let FieldType::Choice(allowed) = field.field_type {
                if !allowed.contains(&text) {
                    return Err(SchemaError::InvalidChoice {
                        tool: tool.to_string(),
                        field: field.name.to_string(),
                        allowed: allowed.join(", "),
                        value: text.to_string(),
                    });
                }
            }

            accepted.insert(field.name.to_string(), Value::String(text.to_string()));
        }

        Ok(ToolArgs(accepted))
    }

    /// Render as a JSON Schema object.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = json!({
                "type": "string",
                "description": field.description,
            });
            if let FieldType::Choice(allowed) = field.field_type {
                prop["enum"] = json!(allowed);
            }
            properties.insert(field.name.to_string(), prop);
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

/// Arguments that passed schema validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    /// A validated string argument. Required fields are always present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// A required argument, or the empty string if the schema did not require it.
    pub fn get_required(&self, name: &str) -> &str {
        self.get(name).unwrap_or_default()
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}
