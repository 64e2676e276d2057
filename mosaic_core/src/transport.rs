use serde_json::Value;
use std::io;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader as AsyncBufReader,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::mcp_server::JsonRpcHandler;

/// Stdio transport for MCP server
pub struct StdioTransport {
    handler: JsonRpcHandler,
}

impl StdioTransport {
    pub fn new(handler: JsonRpcHandler) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &JsonRpcHandler {
        &self.handler
    }

    /// Run the stdio transport, reading from stdin and writing to stdout
    pub async fn run(&self) -> io::Result<()> {
        info!("Starting stdio transport");

        // Create channels for communication
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        // Spawn a task to read from stdin
        tokio::spawn(async move {
            let mut reader = AsyncBufReader::new(tokio::io::stdin());
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!("EOF reached on stdin");
                        break;
                    }
                    Ok(_) => {
                        if !line.trim().is_empty() {
                            if let Err(e) = tx.send(line.clone()) {
                                error!("Failed to send line: {}", e);
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Error reading from stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if let Err(e) = self.process_line(&line, &mut stdout).await {
                error!("Error processing line: {}", e);
            }
        }

        info!("stdio transport closed");
        Ok(())
    }

    /// Serve newline-delimited JSON-RPC from any reader until EOF.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            self.process_line(&line, &mut writer).await?;
        }
        Ok(())
    }

    /// Process a single line of input
    async fn process_line<W: AsyncWrite + Unpin>(
        &self,
        line: &str,
        writer: &mut W,
    ) -> io::Result<()> {
        debug!("Processing line: {}", line.trim_end());

        match serde_json::from_str::<Value>(line) {
            Ok(request) => {
                if let Some(response) = self.handler.handle_request(request).await {
                    write_response(writer, &response).await?;
                }
            }
            Err(e) => {
                error!("Failed to parse JSON-RPC request: {}", e);

                let error_response = serde_json::json!({
                    "jsonrpc": "2.0",
                    "error": {
                        "code": -32700,
                        "message": "Parse error",
                        "data": e.to_string()
                    },
                    "id": null
                });

                write_response(writer, &error_response).await?;
            }
        }

        Ok(())
    }
}

/// One response per line.
async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &Value) -> io::Result<()> {
    let response_str = serde_json::to_string(response)?;

    writer.write_all(response_str.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    debug!("Sent response: {}", response_str);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{build_federation, FederationConfig};
    use crate::mcp_server::McpServer;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_serve_answers_requests_and_parse_errors() {
        let federator = build_federation(&FederationConfig::default()).await.unwrap();
        let server = McpServer::new(Arc::new(federator));
        let transport = StdioTransport::new(JsonRpcHandler::new(server));

        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n",
            "\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
            "not json\n",
        );
        let mut output = Vec::new();
        transport.serve(input.as_bytes(), &mut output).await.unwrap();

        let responses: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[1]["error"]["code"], -32700);
    }
}
