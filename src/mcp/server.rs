use crate::context::ContextAssembler;
use crate::error::{KycError, Result};
use crate::mcp::tools;
use crate::mcp::types::*;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader as AsyncBufReader};

/// MCP Server implementation
#[derive(Clone)]
pub struct McpServer {
    assembler: ContextAssembler,
}

impl McpServer {
    pub fn new(assembler: ContextAssembler) -> Self {
        Self { assembler }
    }

    /// Process an MCP JSON-RPC request (transport-agnostic)
    ///
    /// # Returns
    /// * `Ok(Some(response))` - Response to send back to client
    /// * `Ok(None)` - Notification (no response needed)
    pub async fn process_mcp_request(
        &self,
        request: JsonRpcRequest,
        initialized: &mut bool,
    ) -> Result<Option<JsonRpcResponse>> {
        let id = match &request.id {
            Some(id) => id.clone(),
            None => {
                if request.method == "notifications/initialized" {
                    *initialized = true;
                }
                return Ok(None);
            }
        };

        if request.jsonrpc != "2.0" {
            return Ok(Some(JsonRpcResponse::error(
                id,
                error_codes::INVALID_REQUEST,
                format!("Unsupported jsonrpc version: {}", request.jsonrpc),
                None,
            )));
        }

        // HTTP requests are stateless, so `initialized` is not enforced here.
        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(&id, &request.params),
            "tools/list" => self.handle_tools_list(&id),
            "tools/call" => self.handle_tools_call(&id, &request.params).await,
            "shutdown" => Ok(JsonRpcResponse::result(id.clone(), Value::Null)),
            _ => Ok(JsonRpcResponse::error(
                id.clone(),
                error_codes::METHOD_NOT_FOUND,
                format!("Unknown method: {}", request.method),
                None,
            )),
        };

        match response {
            Ok(resp) => Ok(Some(resp)),
            Err(e) => {
                log::error!("{} failed: {}", request.method, e);
                Ok(Some(JsonRpcResponse::error(
                    id,
                    error_codes::INTERNAL_ERROR,
                    format!("Internal error: {}", e),
                    Some(serde_json::json!({ "details": e.to_string(), "retryable": e.is_transient() })),
                )))
            }
        }
    }

    /// Run the MCP server (reads from stdin, writes to stdout)
    pub async fn run(&self) -> Result<()> {
        let stdin = tokio::io::stdin();
        let mut stdin_reader = AsyncBufReader::new(stdin);
        let mut stdout = tokio::io::stdout();

        let mut line = String::new();
        let mut initialized = false;

        log::info!("kycgraph MCP server v{} starting on stdio", env!("CARGO_PKG_VERSION"));

        loop {
            line.clear();
            let bytes_read = stdin_reader.read_line(&mut line).await.map_err(KycError::Io)?;

            // EOF - client disconnected
            if bytes_read == 0 {
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
                Ok(req) => req,
                Err(e) => {
                    let id = extract_id_from_line(trimmed).unwrap_or(Value::Null);
                    let error_response = JsonRpcResponse::error(
                        id,
                        error_codes::PARSE_ERROR,
                        format!("Parse error: {}", e),
                        None,
                    );
                    send_response(&mut stdout, &error_response).await?;
                    continue;
                }
            };

            let is_shutdown = request.method == "shutdown";
            let was_initialized = initialized;
            match self.process_mcp_request(request, &mut initialized).await {
                Ok(Some(response)) => send_response(&mut stdout, &response).await?,
                Ok(None) => {
                    if initialized && !was_initialized {
                        log::info!("Client initialized");
                    }
                }
                Err(e) => log::error!("Unexpected error in process_mcp_request: {}", e),
            }
            if is_shutdown {
                break;
            }
        }

        log::info!("MCP server shutting down");
        Ok(())
    }

    fn handle_initialize(&self, id: &JsonRpcId, params: &Option<Value>) -> Result<JsonRpcResponse> {
        let params: InitializeParams =
            serde_json::from_value(params.clone().unwrap_or(serde_json::json!({})))
                .map_err(|e| KycError::McpProtocol(format!("Invalid initialize params: {}", e)))?;

        // Clients on any 2024/2025 revision get the stable version.
        let protocol_version = if params.protocol_version.starts_with("2024")
            || params.protocol_version.starts_with("2025")
        {
            "2024-11-05".to_string()
        } else {
            params.protocol_version.clone()
        };

        let result = InitializeResult {
            protocol_version,
            capabilities: serde_json::json!({ "tools": {} }),
            server_info: ServerInfo {
                name: "kycgraph".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        Ok(JsonRpcResponse::result(id.clone(), serde_json::to_value(&result)?))
    }

    fn handle_tools_list(&self, id: &JsonRpcId) -> Result<JsonRpcResponse> {
        let result = ToolsListResult {
            tools: tools::get_tool_definitions(),
        };
        Ok(JsonRpcResponse::result(id.clone(), serde_json::to_value(&result)?))
    }

    async fn handle_tools_call(&self, id: &JsonRpcId, params: &Option<Value>) -> Result<JsonRpcResponse> {
        let params: ToolsCallParams = match params.clone().map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return Ok(JsonRpcResponse::error(
                    id.clone(),
                    error_codes::INVALID_PARAMS,
                    format!("Invalid tools/call params: {}", e),
                    None,
                ))
            }
            None => {
                return Ok(JsonRpcResponse::error(
                    id.clone(),
                    error_codes::INVALID_PARAMS,
                    "Missing params for tools/call",
                    None,
                ))
            }
        };

        match tools::call_tool(&self.assembler, &params.name, &params.arguments).await? {
            Some(result) => Ok(JsonRpcResponse::result(id.clone(), serde_json::to_value(&result)?)),
            None => Ok(JsonRpcResponse::error(
                id.clone(),
                error_codes::INVALID_PARAMS,
                format!("Unknown tool: {}", params.name),
                None,
            )),
        }
    }
}

/// Send JSON-RPC response to stdout (newline-delimited)
async fn send_response(stdout: &mut tokio::io::Stdout, response: &JsonRpcResponse) -> Result<()> {
    let json = serde_json::to_string(response)?;
    stdout.write_all(json.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

/// Extract ID from JSON line (for error handling)
fn extract_id_from_line(line: &str) -> Option<Value> {
    let id_start = line.find(r#""id":"#)?;
    let id_str = &line[id_start + 5..];
    let id_end = id_str.find(|c| c == ',' || c == '}')?;
    let id_val = id_str[..id_end].trim();
    if id_val.len() >= 2 && id_val.starts_with('"') && id_val.ends_with('"') {
        Some(Value::String(id_val[1..id_val.len() - 1].to_string()))
    } else {
        id_val.parse::<i64>().ok().map(|n| Value::Number(n.into()))
    }
}
