//! Scripted MCP tool provider used by the integration tests.
//!
//! Usage: `mock-provider <mode> [count]`. Reads one JSON-RPC message per line
//! from stdin and answers on stdout according to `mode`:
//!
//! - `echo`: `{"result":{}}` for every request
//! - `tools`: a small tool catalogue (see `call_tool`)
//! - `noisy`: like `tools`, but prints a log line and a blank line first
//! - `noise <n>`: like `tools`, but prints `n` log lines before every reply
//! - `init-error`: `initialize` returns a JSON-RPC error
//! - `exit-after-init`: exits without replying to the first post-handshake request
//! - `wrong-id`: every reply is preceded by a reply with a stale id
//! - `list-error`: `tools/list` returns a JSON-RPC error
//! - `bad-tools`: `tools/list` returns `tools` that is not an array
//! - `latin1`: like `tools`, but writes a non-UTF-8 line to stdout and stderr first
//! - `hang`: reads requests but never replies
//!
//! If `MOCK_PID_FILE` is set, the process id is written there at startup.

use std::io::{BufRead, Write};

use serde_json::{json, Value};

fn main() {
    let mut argv = std::env::args().skip(1);
    let mode = argv.next().unwrap_or_else(|| "tools".to_string());
    let noise_lines: usize = argv.next().and_then(|n| n.parse().ok()).unwrap_or(0);

    if let Ok(path) = std::env::var("MOCK_PID_FILE") {
        let _ = std::fs::write(path, std::process::id().to_string());
    }
    eprintln!("mock provider starting in {mode} mode");

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut initialized = false;

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let Ok(msg) = serde_json::from_str::<Value>(&line) else {
            eprintln!("ignoring unparseable input: {line}");
            continue;
        };
        let Some(id) = msg.get("id").and_then(Value::as_u64) else {
            // Notification: nothing to answer.
            continue;
        };
        let method = msg.get("method").and_then(Value::as_str).unwrap_or_default();

        let reply = match mode.as_str() {
            "echo" => ok(id, json!({})),
            "hang" => continue,
            "init-error" if method == "initialize" => {
                eprintln!("fatal: config missing");
                err(id, -32603, "boom")
            }
            "exit-after-init" if initialized => {
                eprintln!("crashing");
                std::process::exit(1);
            }
            "list-error" if method == "tools/list" => err(id, -32001, "listing disabled"),
            "bad-tools" if method == "tools/list" => ok(id, json!({"tools": "nope"})),
            _ => handle(id, method, &msg),
        };

        if method == "initialize" {
            initialized = true;
        }

        let mut lines = Vec::new();
        match mode.as_str() {
            "noisy" => {
                lines.push("server starting…".to_string());
                lines.push(String::new());
            }
            "noise" => lines.extend((0..noise_lines).map(|i| format!("log line {i}"))),
            "wrong-id" => lines.push(ok(id + 100, json!({"stale": true})).to_string()),
            _ => {}
        }
        lines.push(reply.to_string());

        if mode == "latin1" {
            let _ = std::io::stderr().write_all(b"caf\xe9 warming up\n");
            if out.write_all(b"caf\xe9 starting\n").is_err() {
                return;
            }
        }

        for l in lines {
            if writeln!(out, "{l}").is_err() {
                return;
            }
        }
        if out.flush().is_err() {
            return;
        }
    }
}

fn handle(id: u64, method: &str, msg: &Value) -> Value {
    match method {
        "initialize" => {
            let client = msg["params"]["clientInfo"]["name"].as_str().unwrap_or("unknown");
            eprintln!("handshake from {client}");
            ok(
                id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "mock-provider", "version": "0.0.1"}
                }),
            )
        }
        "tools/list" => ok(
            id,
            json!({
                "tools": [
                    {
                        "name": "answer",
                        "description": "Returns the answer",
                        "inputSchema": {"type": "object", "properties": {}}
                    },
                    {
                        "name": "echo",
                        "description": "Echoes `text`",
                        "inputSchema": {
                            "type": "object",
                            "properties": {"text": {"type": "string"}},
                            "required": ["text"]
                        }
                    },
                    {"name": "whoami"},
                    {"description": "entry without a name"},
                    {"name": "empty"},
                    {"name": "structured"},
                    {"name": "image"},
                    {"name": "opaque"},
                    {"name": "fail"}
                ]
            }),
        ),
        "tools/call" => call_tool(id, &msg["params"]),
        _ => err(id, -32601, "Method not found"),
    }
}

fn call_tool(id: u64, params: &Value) -> Value {
    let name = params["name"].as_str().unwrap_or_default();
    let args = &params["arguments"];
    match name {
        "answer" => ok(id, json!({"content": [{"type": "text", "text": "42"}]})),
        "echo" => {
            let text = args["text"].as_str().unwrap_or_default();
            ok(id, json!({"content": [{"type": "text", "text": text}]}))
        }
        "whoami" => ok(id, json!({"content": [{"type": "text", "text": id.to_string()}]})),
        "empty" => ok(id, json!({"content": []})),
        "structured" => ok(id, json!({"status": "navigated"})),
        "image" => ok(
            id,
            json!({"content": [{"type": "image", "data": "aW1n", "mimeType": "image/png"}]}),
        ),
        "opaque" => ok(id, json!({"content": [{"type": "resource", "resource": {}}]})),
        "fail" => err(id, -32000, "tool exploded"),
        _ => err(id, -32602, "unknown tool"),
    }
}

fn ok(id: u64, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn err(id: u64, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}
