//! 工具输入校验与工具调用 JSON Schema
//!
//! validate_input 只覆盖工具声明所用的子集：object、required、属性的基本类型。
//! tool_call_schema_json 用 schemars 生成「合法 tool call」结构，拼入 system prompt。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// LLM 工具调用请求格式：`{"tool": "...", "args": {...}}`（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，如 search_knowledge_base、get_user_info
    pub tool: String,
    /// 工具参数，依工具 input schema 而定
    pub args: HashMap<String, Value>,
}

/// 一次回复可包含多个工具调用
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallBatchFormat {
    pub tool_calls: Vec<ToolCallFormat>,
}

/// 返回工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallBatchFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// schema 中 required 列表
pub fn required_inputs(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// schema 中声明的全部属性名
pub fn declared_inputs(schema: &Value) -> Vec<&str> {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|p| p.keys().map(String::as_str).collect())
        .unwrap_or_default()
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

/// 校验参数：必须是对象；required 字段存在且非 null；已声明属性类型一致
pub fn validate_input(schema: &Value, args: &Value) -> Result<(), String> {
    let obj = args
        .as_object()
        .ok_or_else(|| "arguments must be a JSON object".to_string())?;

    for field in required_inputs(schema) {
        match obj.get(field) {
            None | Some(Value::Null) => return Err(format!("missing required field '{field}'")),
            Some(_) => {}
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    for (key, value) in obj {
        if value.is_null() {
            continue;
        }
        let expected = properties
            .and_then(|p| p.get(key))
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str);
        if let Some(expected) = expected {
            if !type_matches(expected, value) {
                return Err(format!("field '{key}' must be of type {expected}"));
            }
        }
    }
    Ok(())
}
