//! MCP (Model Context Protocol) server implementation
//!
//! Provides a stdio JSON-RPC interface exposing the Calendar, Gmail and
//! Tasks tools.

mod protocol;
mod tools;

pub use protocol::*;
pub use tools::*;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::tools::ToolContext;

/// MCP Server for gassist
#[derive(Clone)]
pub struct McpServer {
    tools: ToolHandler,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(ctx: ToolContext) -> Self {
        Self {
            tools: ToolHandler::new(ctx),
        }
    }

    /// Run the MCP server on stdio
    pub async fn run(&self) -> Result<()> {
        info!("Starting MCP server on stdio");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve newline-delimited JSON-RPC until the reader hits EOF.
    ///
    /// Each `tools/call` runs on its own task, so a tool waiting on browser
    /// consent does not hold up `ping` or other tools. Responses go out
    /// through a single writer in completion order, and calls still in
    /// flight at EOF are answered before this returns.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();

        let read_loop = async move {
            let mut line = String::new();

            loop {
                line.clear();
                let n = reader.read_line(&mut line).await?;

                if n == 0 {
                    // EOF
                    debug!("Received EOF, shutting down");
                    break;
                }

                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                debug!("Received request: {}", line);

                // Parse JSON-RPC request
                let request = match serde_json::from_str::<JsonRpcRequest>(line) {
                    Ok(request) => request,
                    Err(e) => {
                        let _ = tx.send(JsonRpcResponse::failure(
                            None,
                            JsonRpcError {
                                code: -32700,
                                message: format!("Parse error: {}", e),
                                data: None,
                            },
                        ));
                        continue;
                    }
                };

                // Notifications get no reply
                if request.id.is_none() && request.method.starts_with("notifications/") {
                    debug!("Notification {}", request.method);
                    continue;
                }

                if request.method == "tools/call" {
                    let server = self.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let response = server.handle_request(&request).await;
                        let _ = tx.send(response);
                    });
                } else {
                    let _ = tx.send(self.handle_request(&request).await);
                }
            }

            Ok::<(), Error>(())
        };

        let write_loop = async {
            // Ends once the reader and every spawned call have dropped their sender
            while let Some(response) = rx.recv().await {
                let response_json = serde_json::to_string(&response)?;
                debug!("Sending response: {}", response_json);
                writer.write_all(response_json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok::<(), Error>(())
        };

        tokio::try_join!(read_loop, write_loop)?;
        Ok(())
    }

    /// Handle a JSON-RPC request
    async fn handle_request(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let start = std::time::Instant::now();
        let method = &request.method;

        // Log incoming request (with tool name if it's a tool call)
        let request_desc = if method == "tools/call" {
            let tool_name = request
                .params
                .as_ref()
                .and_then(|p| p["name"].as_str())
                .unwrap_or("unknown");
            format!("tools/call:{}", tool_name)
        } else {
            method.clone()
        };

        info!("→ {}", request_desc);

        let result = match method.as_str() {
            "initialize" => Ok(self.handle_initialize()),
            "initialized" => Ok(Value::Null),
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => Ok(serde_json::json!({ "tools": get_tool_definitions() })),
            "tools/call" => self.handle_tools_call(&request.params).await,
            _ => Err(Error::McpProtocol(format!("Unknown method: {}", method))),
        };

        let elapsed_ms = start.elapsed().as_millis();

        match result {
            Ok(value) => {
                // Log slow requests with warning
                if elapsed_ms > 1000 {
                    warn!("← {} OK ({}ms) SLOW", request_desc, elapsed_ms);
                } else {
                    info!("← {} OK ({}ms)", request_desc, elapsed_ms);
                }
                JsonRpcResponse::success(request.id.clone(), value)
            }
            Err(e) => {
                error!("← {} ERROR ({}ms): {}", request_desc, elapsed_ms, e);
                let code = match e {
                    Error::McpProtocol(_) => -32601,
                    Error::InvalidRequest(_) => -32602,
                    _ => -32000,
                };
                JsonRpcResponse::failure(
                    request.id.clone(),
                    JsonRpcError {
                        code,
                        message: e.to_string(),
                        data: Some(serde_json::json!({
                            "code": e.code(),
                            "action": e.action_hint()
                        })),
                    },
                )
            }
        }
    }

    fn handle_initialize(&self) -> Value {
        serde_json::json!({
            "protocolVersion": "2024-11-05",
            "serverInfo": {
                "name": "gassist",
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {
                "tools": {}
            }
        })
    }

    /// Handle tools/call request
    async fn handle_tools_call(&self, params: &Option<Value>) -> Result<Value> {
        let params = params
            .as_ref()
            .ok_or_else(|| Error::InvalidRequest("Missing params".to_string()))?;

        let name = params["name"]
            .as_str()
            .ok_or_else(|| Error::InvalidRequest("Missing tool name".to_string()))?;

        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or(Value::Object(Default::default()));

        self.tools.execute(name, &arguments).await
    }
}
