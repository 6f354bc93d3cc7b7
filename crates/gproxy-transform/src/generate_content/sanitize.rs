use gproxy_protocol::gemini::generate_content::request::{
    GenerateContentRequest as GeminiGenerateContentRequest,
};
use gproxy_protocol::gemini::generate_content::types::{
    HarmBlockThreshold, HarmCategory, SafetySetting,
};
use gproxy_protocol::gemini::shared::{ContentRole, Modality};

/// The placeholder `thoughtSignature` AI Studio expects on a replayed
/// `functionCall` part when the original signature wasn't preserved
/// client-side. Named so a future model-specific override is one line.
pub const PLACEHOLDER_THOUGHT_SIGNATURE: &str = "placeholder-thought-signature";

/// TTS models reject `tools`/`thinkingConfig` and require an explicit
/// `AUDIO` response modality; everything else passes through untouched.
pub fn sanitize_for_model_family(request: &mut GeminiGenerateContentRequest) {
    let model_id = request
        .path
        .model
        .strip_prefix("models/")
        .unwrap_or(request.path.model.as_str());

    if !is_tts_model(model_id) {
        return;
    }

    request.body.tools = None;
    request.body.tool_config = None;

    let config = request.body.generation_config.get_or_insert_with(Default::default);
    config.thinking_config = None;
    config.response_modalities = Some(vec![Modality::Audio]);
}

fn is_tts_model(model_id: &str) -> bool {
    model_id.contains("tts")
}

/// Brings an inbound native-Gemini request up to what AI Studio actually
/// accepts: every replayed `functionCall` part needs a `thoughtSignature`,
/// tool parameter schemas carry `$schema`/`additionalProperties` keys that
/// AI Studio's validator rejects, and safety filtering is disabled since
/// the proxy itself makes no content policy decisions.
pub fn sanitize_gemini_inbound(request: &mut GeminiGenerateContentRequest) {
    for content in &mut request.body.contents {
        if content.role != Some(ContentRole::Model) {
            continue;
        }
        for part in &mut content.parts {
            if part.function_call.is_some() && part.thought_signature.is_none() {
                part.thought_signature = Some(PLACEHOLDER_THOUGHT_SIGNATURE.to_string());
            }
        }
    }

    if let Some(tools) = &mut request.body.tools {
        for tool in tools {
            if let Some(declarations) = &mut tool.function_declarations {
                for declaration in declarations {
                    if let Some(schema) = &mut declaration.parameters_json_schema {
                        strip_schema_keys(schema);
                    }
                }
            }
        }
    }

    request.body.safety_settings = Some(force_block_none());
}

fn force_block_none() -> Vec<SafetySetting> {
    [
        HarmCategory::HarmCategoryHarassment,
        HarmCategory::HarmCategoryHateSpeech,
        HarmCategory::HarmCategorySexuallyExplicit,
        HarmCategory::HarmCategoryDangerousContent,
        HarmCategory::HarmCategoryCivicIntegrity,
    ]
    .into_iter()
    .map(|category| SafetySetting {
        category,
        threshold: HarmBlockThreshold::BlockNone,
    })
    .collect()
}

fn strip_schema_keys(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.remove("$schema");
            map.remove("additionalProperties");
            for nested in map.values_mut() {
                strip_schema_keys(nested);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                strip_schema_keys(item);
            }
        }
        _ => {}
    }
}

/// Full outbound tool-schema rewrite for an OpenAI JSON Schema on its way to
/// Gemini's `parametersJsonSchema`: strips the keys AI Studio's validator
/// rejects and uppercases every `type` value, collapsing a `["T","null"]`
/// union into `type:"T", nullable:true` (an empty remainder after the
/// `null` filter defaults to `STRING`).
pub fn rewrite_tool_schema(value: &mut serde_json::Value) {
    strip_schema_keys(value);
    uppercase_and_collapse_types(value);
}

fn uppercase_and_collapse_types(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(type_value) = map.remove("type") {
                let (resolved_type, nullable) = resolve_type_value(type_value);
                map.insert("type".to_string(), serde_json::Value::String(resolved_type));
                if nullable {
                    map.insert("nullable".to_string(), serde_json::Value::Bool(true));
                }
            }
            for nested in map.values_mut() {
                uppercase_and_collapse_types(nested);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                uppercase_and_collapse_types(item);
            }
        }
        _ => {}
    }
}

/// Returns the uppercased Gemini type and whether `null` was part of the
/// original union (which Gemini expresses as `nullable` rather than as a
/// member of `type`).
fn resolve_type_value(type_value: serde_json::Value) -> (String, bool) {
    match type_value {
        serde_json::Value::String(name) => (name.to_uppercase(), false),
        serde_json::Value::Array(items) => {
            let had_null = items.iter().any(|item| item.as_str() == Some("null"));
            let remaining: Vec<String> = items
                .iter()
                .filter_map(|item| item.as_str())
                .filter(|name| *name != "null")
                .map(str::to_uppercase)
                .collect();
            match remaining.first() {
                Some(name) => (name.clone(), had_null),
                None => ("STRING".to_string(), had_null),
            }
        }
        other => (
            other.as_str().unwrap_or("STRING").to_uppercase(),
            false,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_protocol::gemini::generate_content::request::{
        GenerateContentPath, GenerateContentRequestBody,
    };

    fn base_request(model: &str) -> GeminiGenerateContentRequest {
        GeminiGenerateContentRequest {
            path: GenerateContentPath {
                model: model.to_string(),
            },
            body: GenerateContentRequestBody {
                contents: vec![],
                model: None,
                tools: None,
                tool_config: None,
                safety_settings: None,
                system_instruction: None,
                generation_config: None,
                cached_content: None,
            },
        }
    }

    #[test]
    fn tts_model_strips_tools_and_forces_audio_modality() {
        let mut request = base_request("models/gemini-2.5-flash-preview-tts");
        request.body.tools = Some(vec![]);
        sanitize_for_model_family(&mut request);
        assert!(request.body.tools.is_none());
        let config = request.body.generation_config.expect("generation config");
        assert_eq!(config.response_modalities, Some(vec![Modality::Audio]));
    }

    #[test]
    fn non_tts_model_is_untouched() {
        let mut request = base_request("models/gemini-2.5-flash");
        request.body.tools = Some(vec![]);
        sanitize_for_model_family(&mut request);
        assert!(request.body.tools.is_some());
    }

    #[test]
    fn strip_schema_keys_removes_nested_occurrences() {
        let mut schema = serde_json::json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "city": {"type": "string", "additionalProperties": false}
            }
        });
        strip_schema_keys(&mut schema);
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("additionalProperties").is_none());
        assert!(schema["properties"]["city"].get("additionalProperties").is_none());
    }

    #[test]
    fn rewrite_tool_schema_uppercases_types_and_strips_keys() {
        let mut schema = serde_json::json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "city": {"type": "string"}
            }
        });
        rewrite_tool_schema(&mut schema);
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("additionalProperties").is_none());
        assert_eq!(schema["type"], "OBJECT");
        assert_eq!(schema["properties"]["city"]["type"], "STRING");
    }

    #[test]
    fn rewrite_tool_schema_collapses_nullable_union() {
        let mut schema = serde_json::json!({"type": ["string", "null"]});
        rewrite_tool_schema(&mut schema);
        assert_eq!(schema["type"], "STRING");
        assert_eq!(schema["nullable"], true);
    }

    #[test]
    fn rewrite_tool_schema_defaults_empty_union_to_string() {
        let mut schema = serde_json::json!({"type": ["null"]});
        rewrite_tool_schema(&mut schema);
        assert_eq!(schema["type"], "STRING");
        assert_eq!(schema["nullable"], true);
    }
}
