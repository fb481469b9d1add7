use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::{ContextAssembler, ContextParams};
use crate::error::{KycError, Result};
use crate::mcp::types::{Tool, ToolsCallResult};
use crate::model::RiskCountrySet;

const MAX_TOOL_DEPTH: usize = 20;
const MAX_TOOL_TOP_K: usize = 50;
const MAX_TOOL_MEDIA: usize = 200;

fn lei_property() -> Value {
    json!({
        "type": "string",
        "description": "Legal Entity Identifier of the entity under review"
    })
}

fn threshold_property() -> Value {
    json!({
        "type": "number",
        "description": "Minimum ownership percentage for an edge to count",
        "minimum": 0,
        "maximum": 100
    })
}

fn risk_countries_property() -> Value {
    json!({
        "type": "array",
        "items": {"type": "string", "pattern": "^[A-Za-z]{2}$"},
        "description": "ISO-3166 alpha-2 codes treated as high risk (server default when omitted)"
    })
}

/// Get all tool definitions for tools/list
pub fn get_tool_definitions() -> Vec<Tool> {
    vec![
        Tool {
            name: "kyc_context".to_string(),
            description: "Assemble the full KYC context for an entity: ownership chains, jurisdiction risk, structural complexity and adverse media. Sections that could not be fetched are marked unavailable.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "lei": lei_property(),
                    "threshold_percent": threshold_property(),
                    "max_depth": {"type": "integer", "minimum": 1, "maximum": MAX_TOOL_DEPTH},
                    "top_k": {"type": "integer", "minimum": 1, "maximum": MAX_TOOL_TOP_K},
                    "risk_countries": risk_countries_property(),
                    "media_limit": {"type": "integer", "minimum": 0, "maximum": MAX_TOOL_MEDIA}
                },
                "required": ["lei"]
            }),
        },
        Tool {
            name: "kyc_ownership_chain".to_string(),
            description: "Walk ownership upward from an entity: direct parents, ultimate parent and ranked ownership paths with cycle flags".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "lei": lei_property(),
                    "threshold_percent": threshold_property(),
                    "max_depth": {"type": "integer", "minimum": 1, "maximum": MAX_TOOL_DEPTH},
                    "top_k": {"type": "integer", "minimum": 1, "maximum": MAX_TOOL_TOP_K}
                },
                "required": ["lei"]
            }),
        },
        Tool {
            name: "kyc_jurisdiction_risk".to_string(),
            description: "Classify exposure to high-risk jurisdictions among an entity's ownership neighbors (LOW, MEDIUM, HIGH, CRITICAL)".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "lei": lei_property(),
                    "risk_countries": risk_countries_property(),
                    "threshold_percent": threshold_property()
                },
                "required": ["lei"]
            }),
        },
        Tool {
            name: "kyc_complexity".to_string(),
            description: "Structural complexity of the corporate group around an entity: related entity count, hop depth and jurisdiction spread".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "lei": lei_property(),
                    "max_depth": {"type": "integer", "minimum": 1, "maximum": MAX_TOOL_DEPTH}
                },
                "required": ["lei"]
            }),
        },
        Tool {
            name: "kyc_adverse_media".to_string(),
            description: "Adverse media linked to an entity, deduplicated and most recent first".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "lei": lei_property(),
                    "limit": {"type": "integer", "minimum": 0, "maximum": MAX_TOOL_MEDIA}
                },
                "required": ["lei"]
            }),
        },
    ]
}

/// Run a tool by name. `Ok(None)` means the tool does not exist.
///
/// Errors the caller can fix come back as `isError` results; anything else is
/// returned for the transport to report as an internal error.
pub async fn call_tool(
    assembler: &ContextAssembler,
    name: &str,
    arguments: &Value,
) -> Result<Option<ToolsCallResult>> {
    let start = std::time::Instant::now();
    let outcome = match name {
        "kyc_context" => handle_context(assembler, arguments).await,
        "kyc_ownership_chain" => handle_ownership_chain(assembler, arguments).await,
        "kyc_jurisdiction_risk" => handle_jurisdiction_risk(assembler, arguments).await,
        "kyc_complexity" => handle_complexity(assembler, arguments).await,
        "kyc_adverse_media" => handle_adverse_media(assembler, arguments).await,
        _ => return Ok(None),
    };
    log::debug!("Tool {} finished in {:?}", name, start.elapsed());

    match outcome {
        Ok(result) => Ok(Some(result)),
        Err(e) if e.is_caller_error() => {
            log::info!("Tool {} rejected request: {}", name, e);
            Ok(Some(ToolsCallResult::caller_error(e.to_string())))
        }
        Err(e) => Err(e),
    }
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: &Value) -> Result<T> {
    serde_json::from_value(arguments.clone())
        .map_err(|e| KycError::InvalidInput(format!("invalid {} arguments: {}", tool, e)))
}

fn bounded(name: &str, value: Option<usize>, max: usize, default: usize) -> Result<usize> {
    match value {
        Some(v) if v > max => Err(KycError::InvalidInput(format!("{} must be at most {}", name, max))),
        Some(v) => Ok(v),
        None => Ok(default),
    }
}

fn risk_countries(codes: Option<Vec<String>>, default: &RiskCountrySet) -> Result<RiskCountrySet> {
    match codes {
        Some(codes) => RiskCountrySet::parse_list(&codes.join(",")),
        None => Ok(default.clone()),
    }
}

fn json_text<T: serde::Serialize>(value: &T) -> Result<ToolsCallResult> {
    let text = serde_json::to_string_pretty(value).map_err(KycError::Serialization)?;
    Ok(ToolsCallResult::text(text))
}

#[derive(Debug, Deserialize)]
struct ContextArgs {
    lei: String,
    threshold_percent: Option<f64>,
    max_depth: Option<usize>,
    top_k: Option<usize>,
    risk_countries: Option<Vec<String>>,
    media_limit: Option<usize>,
}

/// Handle kyc_context tool
async fn handle_context(assembler: &ContextAssembler, arguments: &Value) -> Result<ToolsCallResult> {
    let args: ContextArgs = parse_args("kyc_context", arguments)?;
    let defaults = assembler.default_params();

    let params = ContextParams {
        threshold_percent: args.threshold_percent.unwrap_or(defaults.threshold_percent),
        max_depth: bounded("max_depth", args.max_depth, MAX_TOOL_DEPTH, defaults.max_depth)?,
        top_k: bounded("top_k", args.top_k, MAX_TOOL_TOP_K, defaults.top_k)?,
        risk_countries: risk_countries(args.risk_countries, &defaults.risk_countries)?,
        media_limit: bounded("media_limit", args.media_limit, MAX_TOOL_MEDIA, defaults.media_limit)?,
    };

    let context = assembler.assemble(&args.lei, &params).await?;
    json_text(&json!({
        "digest": context.digest()?,
        "context": context,
    }))
}

#[derive(Debug, Deserialize)]
struct ChainArgs {
    lei: String,
    threshold_percent: Option<f64>,
    max_depth: Option<usize>,
    top_k: Option<usize>,
}

/// Handle kyc_ownership_chain tool
async fn handle_ownership_chain(assembler: &ContextAssembler, arguments: &Value) -> Result<ToolsCallResult> {
    let args: ChainArgs = parse_args("kyc_ownership_chain", arguments)?;
    let config = assembler.traversal().config();

    let result = assembler
        .traversal()
        .traverse(
            &args.lei,
            args.threshold_percent.unwrap_or(config.default_threshold),
            bounded("max_depth", args.max_depth, MAX_TOOL_DEPTH, config.max_depth)?,
            bounded("top_k", args.top_k, MAX_TOOL_TOP_K, config.top_k)?,
        )
        .await?;
    json_text(&result)
}

#[derive(Debug, Deserialize)]
struct JurisdictionArgs {
    lei: String,
    risk_countries: Option<Vec<String>>,
    threshold_percent: Option<f64>,
}

/// Handle kyc_jurisdiction_risk tool
async fn handle_jurisdiction_risk(assembler: &ContextAssembler, arguments: &Value) -> Result<ToolsCallResult> {
    let args: JurisdictionArgs = parse_args("kyc_jurisdiction_risk", arguments)?;
    let scorer = assembler.jurisdiction();
    let risk = risk_countries(args.risk_countries, &scorer.configured_risk_countries())?;

    let result = match args.threshold_percent {
        Some(threshold) => scorer.score_at_threshold(&args.lei, &risk, threshold).await?,
        None => scorer.score(&args.lei, &risk).await?,
    };
    json_text(&json!({
        "risk_countries": risk,
        "risk": result,
    }))
}

#[derive(Debug, Deserialize)]
struct ComplexityArgs {
    lei: String,
    max_depth: Option<usize>,
}

/// Handle kyc_complexity tool
async fn handle_complexity(assembler: &ContextAssembler, arguments: &Value) -> Result<ToolsCallResult> {
    let args: ComplexityArgs = parse_args("kyc_complexity", arguments)?;
    let default_depth = assembler.traversal().config().max_depth;
    let depth = bounded("max_depth", args.max_depth, MAX_TOOL_DEPTH, default_depth)?;

    let result = assembler.complexity().score_within(&args.lei, depth).await?;
    json_text(&result)
}

#[derive(Debug, Deserialize)]
struct MediaArgs {
    lei: String,
    limit: Option<usize>,
}

/// Handle kyc_adverse_media tool
async fn handle_adverse_media(assembler: &ContextAssembler, arguments: &Value) -> Result<ToolsCallResult> {
    let args: MediaArgs = parse_args("kyc_adverse_media", arguments)?;
    let linker = assembler.media();
    let limit = bounded("limit", args.limit, MAX_TOOL_MEDIA, linker.default_limit())?;

    let records = linker.fetch(&args.lei, limit).await?;
    json_text(&json!({
        "lei": args.lei.trim(),
        "count": records.len(),
        "records": records,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing::TestGraph;

    fn fixture() -> (TestGraph, ContextAssembler) {
        let graph = TestGraph::new();
        graph
            .entity("A", Some("GB"))
            .entity("B", Some("IR"))
            .edge("B", "A", 75.0)
            .media("m1", "A", "Sanctions probe", Some("Wire"), Some("2024-02-01"));
        let assembler = ContextAssembler::new(graph.store(), &Config::default());
        (graph, assembler)
    }

    fn payload(result: &ToolsCallResult) -> Value {
        serde_json::from_str(&result.content[0].text).unwrap()
    }

    #[test]
    fn test_tool_definitions() {
        let tools = get_tool_definitions();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "kyc_context",
                "kyc_ownership_chain",
                "kyc_jurisdiction_risk",
                "kyc_complexity",
                "kyc_adverse_media"
            ]
        );
        for tool in &tools {
            assert_eq!(tool.input_schema["required"], json!(["lei"]));
        }
    }

    #[tokio::test]
    async fn test_context_tool() {
        let (_graph, assembler) = fixture();
        let result = call_tool(&assembler, "kyc_context", &json!({"lei": "A", "risk_countries": ["ir"]}))
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_error.is_none());

        let value = payload(&result);
        assert_eq!(value["digest"].as_str().unwrap().len(), 64);
        assert_eq!(value["context"]["entity"]["lei"], "A");
        // B is both a direct neighbor and the ultimate parent.
        assert_eq!(value["context"]["jurisdiction_risk"]["value"]["tier"], "CRITICAL");
        assert_eq!(value["context"]["parameters"]["risk_countries"], json!(["IR"]));
    }

    #[tokio::test]
    async fn test_chain_tool() {
        let (_graph, assembler) = fixture();
        let result = call_tool(&assembler, "kyc_ownership_chain", &json!({"lei": "A"}))
            .await
            .unwrap()
            .unwrap();
        let value = payload(&result);
        assert_eq!(value["ultimate_parent"]["lei"], "B");
        assert_eq!(value["direct_parents"][0]["ownership_percentage"], json!(75.0));
    }

    #[tokio::test]
    async fn test_scoring_and_media_tools() {
        let (_graph, assembler) = fixture();

        let risk = call_tool(&assembler, "kyc_jurisdiction_risk", &json!({"lei": "A", "risk_countries": ["IR"]}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload(&risk)["risk"]["exposure_count"], json!(1));

        let complexity = call_tool(&assembler, "kyc_complexity", &json!({"lei": "A", "max_depth": 2}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload(&complexity)["related_count"], json!(1));

        let media = call_tool(&assembler, "kyc_adverse_media", &json!({"lei": "A", "limit": 5}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload(&media)["count"], json!(1));
    }

    #[tokio::test]
    async fn test_caller_errors_are_tool_errors() {
        let (_graph, assembler) = fixture();

        let missing = call_tool(&assembler, "kyc_context", &json!({"lei": "NOPE"})).await.unwrap().unwrap();
        assert_eq!(missing.is_error, Some(true));
        assert!(missing.content[0].text.contains("Entity not found"));

        let bad_threshold = call_tool(
            &assembler,
            "kyc_ownership_chain",
            &json!({"lei": "A", "threshold_percent": -5}),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(bad_threshold.is_error, Some(true));

        let no_lei = call_tool(&assembler, "kyc_complexity", &json!({})).await.unwrap().unwrap();
        assert_eq!(no_lei.is_error, Some(true));

        let bad_country = call_tool(
            &assembler,
            "kyc_jurisdiction_risk",
            &json!({"lei": "A", "risk_countries": ["IRN"]}),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(bad_country.is_error, Some(true));

        let too_deep = call_tool(&assembler, "kyc_complexity", &json!({"lei": "A", "max_depth": 500}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(too_deep.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (_graph, assembler) = fixture();
        assert!(call_tool(&assembler, "nope", &json!({})).await.unwrap().is_none());
    }
}
