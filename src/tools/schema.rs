//! 工具参数 JSON Schema 生成（schemars）
//!
//! 内置工具的参数结构体派生 JsonSchema，注册时转为模型侧 `parameters` 字段。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 生成参数 schema，去掉顶层 `$schema` / `title` 等对模型无用的字段
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| {
        serde_json::json!({
            "type": "object",
            "properties": {},
        })
    });
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct ReadArgs {
        /// 文件路径
        path: String,
        limit: Option<u32>,
    }

    #[test]
    fn test_parameters_schema_shape() {
        let schema = parameters_schema::<ReadArgs>();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["path"].is_object());
        assert!(schema.get("$schema").is_none());
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0], "path");
    }
}
