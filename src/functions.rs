use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::LLMError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: FunctionParameters,
}

impl FunctionDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: FunctionParameters::new(),
        }
    }

    /// Builds the parameter block from the JSON schema of an argument struct.
    pub fn for_arguments<T: JsonSchema>(name: impl Into<String>) -> Self {
        let mut definition = Self::new(name);
        let schema = json_schema_for::<T>();

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            definition.parameters.properties = properties
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
        }
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            definition.parameters.required = required
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }

        definition
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn to_tool(&self) -> Tool {
        Tool::from(self.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionParameters {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(rename = "additionalProperties", skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<bool>,
}

impl FunctionParameters {
    pub fn new() -> Self {
        Self {
            kind: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional_properties: Some(false),
        }
    }
}

impl Default for FunctionParameters {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: ToolType,
    pub function: FunctionDefinition,
}

impl From<FunctionDefinition> for Tool {
    fn from(function: FunctionDefinition) -> Self {
        Self {
            kind: ToolType::Function,
            function,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    Function,
}

#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Value,
    pub raw_arguments: Option<String>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            raw_arguments: None,
        }
    }

    /// Parses provider-supplied argument text. Text that is not JSON is kept
    /// verbatim as a string value so it can still be shown in a trace.
    pub fn from_raw(name: impl Into<String>, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let arguments = if raw.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(&raw).unwrap_or_else(|_| Value::String(raw.clone()))
        };

        Self {
            name: name.into(),
            arguments,
            raw_arguments: Some(raw),
        }
    }

    pub fn with_raw_arguments(mut self, raw: impl Into<String>) -> Self {
        self.raw_arguments = Some(raw.into());
        self
    }

    pub fn argument_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: Option<String>,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(function: FunctionCall) -> Self {
        Self { id: None, function }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl Serialize for ToolCall {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("ToolCall", 3)?;
        if let Some(id) = &self.id {
            state.serialize_field("id", id)?;
        }
        state.serialize_field("type", "function")?;
        state.serialize_field("function", &SerializableFunctionCall(&self.function))?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ToolCall {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawFunctionCall {
            name: String,
            #[serde(default)]
            arguments: Option<Value>,
        }

        #[derive(Deserialize)]
        struct RawToolCall {
            #[serde(default)]
            id: Option<String>,
            #[serde(rename = "type", default)]
            kind: Option<String>,
            function: RawFunctionCall,
        }

        let raw = RawToolCall::deserialize(deserializer)?;
        if let Some(kind) = raw.kind.as_deref() {
            if kind != "function" {
                return Err(serde::de::Error::custom(format!(
                    "unsupported tool call type '{kind}'"
                )));
            }
        }

        // Providers send arguments as JSON text; stored transcripts may hold the object itself.
        let function = match raw.function.arguments {
            Some(Value::String(text)) => FunctionCall::from_raw(raw.function.name, text),
            Some(value) => FunctionCall::new(raw.function.name, value),
            None => FunctionCall::new(raw.function.name, Value::Object(Map::new())),
        };

        Ok(Self { id: raw.id, function })
    }
}

struct SerializableFunctionCall<'a>(&'a FunctionCall);

impl<'a> Serialize for SerializableFunctionCall<'a> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("function", 2)?;
        state.serialize_field("name", &self.0.name)?;
        let raw = match (&self.0.raw_arguments, &self.0.arguments) {
            (Some(raw), _) => raw.clone(),
            (None, Value::String(text)) => text.clone(),
            (None, value) => serde_json::to_string(value)
                .map_err(|error| serde::ser::Error::custom(error.to_string()))?,
        };
        state.serialize_field("arguments", &raw)?;
        state.end()
    }
}

#[async_trait]
pub trait KernelFunction: Send + Sync {
    fn definition(&self) -> FunctionDefinition;

    async fn invoke(&self, arguments: &Value) -> Result<Value, LLMError>;
}

pub type DynKernelFunction = Arc<dyn KernelFunction>;

#[derive(Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, DynKernelFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, function: DynKernelFunction) {
        let name = function.definition().name;
        self.functions.insert(name, function);
    }

    pub fn register_all<I>(&mut self, functions: I)
    where
        I: IntoIterator<Item = DynKernelFunction>,
    {
        for function in functions {
            self.register(function);
        }
    }

    pub fn get(&self, name: &str) -> Option<&DynKernelFunction> {
        self.functions.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.functions.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn definitions(&self) -> Vec<FunctionDefinition> {
        self.functions
            .values()
            .map(|function| function.definition())
            .collect()
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.definitions().into_iter().map(Tool::from).collect()
    }

    pub async fn invoke(&self, call: &FunctionCall) -> Result<Value, LLMError> {
        let function = self
            .get(&call.name)
            .ok_or_else(|| LLMError::UnknownFunction(call.name.clone()))?;
        function.invoke(&call.arguments).await
    }
}

pub fn json_schema_for<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema.schema).unwrap_or_else(|_| Value::Object(Map::new()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Simple(ToolChoiceSimple),
    Function {
        #[serde(rename = "type")]
        kind: ToolType,
        function: ToolChoiceFunction,
    },
}

impl ToolChoice {
    pub fn auto() -> Self {
        Self::Simple(ToolChoiceSimple::Auto)
    }

    pub fn none() -> Self {
        Self::Simple(ToolChoiceSimple::None)
    }

    pub fn function(name: impl Into<String>) -> Self {
        Self::Function {
            kind: ToolType::Function,
            function: ToolChoiceFunction { name: name.into() },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoiceSimple {
    None,
    Auto,
    Required,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolChoiceFunction {
    pub name: String,
}
