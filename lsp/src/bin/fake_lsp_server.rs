//! Scripted language server for the integration tests.
//!
//! `fake-lsp-server [normal|ignore-shutdown|malformed-first]`
//!
//! Answers `initialize` with a fixed payload, publishes one diagnostic per
//! opened document and reports every method it received through the
//! `fake/receivedMethods` request.

use langbridge_lsp::{FrameReader, FrameWriter};
use serde_json::{Value, json};
use tokio::io::{AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    /// Never answers `shutdown` and ignores `exit` and EOF.
    IgnoreShutdown,
    /// Writes two broken frames before anything else.
    MalformedFirst,
}

fn initialize_result() -> Value {
    json!({
        "capabilities": {
            "textDocumentSync": 1,
            "hoverProvider": true
        },
        "serverInfo": {
            "name": "fake-lsp-server",
            "version": "1.0.0"
        }
    })
}

async fn reply<W>(writer: &mut FrameWriter<W>, id: Value, result: Value) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_frame(&json!({"jsonrpc": "2.0", "id": id, "result": result}))
        .await?;
    Ok(())
}

async fn publish_for<W>(writer: &mut FrameWriter<W>, params: &Value) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let uri = &params["textDocument"]["uri"];
    writer
        .write_frame(&json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {
                "uri": uri,
                "version": params["textDocument"]["version"],
                "diagnostics": [{
                    "range": {
                        "start": {"line": 0, "character": 0},
                        "end": {"line": 0, "character": 1}
                    },
                    "severity": 2,
                    "source": "fake",
                    "message": "fake diagnostic"
                }]
            }
        }))
        .await?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mode = match std::env::args().nth(1).as_deref() {
        None | Some("normal") => Mode::Normal,
        Some("ignore-shutdown") => Mode::IgnoreShutdown,
        Some("malformed-first") => Mode::MalformedFirst,
        Some(other) => anyhow::bail!("unknown mode: {other}"),
    };
    eprintln!("fake-lsp-server starting in {mode:?} mode");

    let mut stdout = tokio::io::stdout();
    if mode == Mode::MalformedFirst {
        stdout.write_all(b"Content-Length: nope\r\n\r\n").await?;
        stdout.write_all(b"Content-Length: 5\r\n\r\n{oops").await?;
        stdout.flush().await?;
    }

    let mut reader = FrameReader::new(tokio::io::stdin());
    let mut writer = FrameWriter::new(stdout);
    let mut received: Vec<String> = Vec::new();

    loop {
        let frame = match reader.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) if e.is_fatal() => break,
            Err(e) => {
                eprintln!("skipping bad frame: {e}");
                continue;
            }
        };
        // Responses to requests this server never sends.
        let Some(method) = frame["method"].as_str().map(String::from) else {
            continue;
        };
        received.push(method.clone());

        match (method.as_str(), frame.get("id").cloned()) {
            ("initialize", Some(id)) => reply(&mut writer, id, initialize_result()).await?,
            ("shutdown", Some(_)) if mode == Mode::IgnoreShutdown => {}
            ("shutdown", Some(id)) => reply(&mut writer, id, Value::Null).await?,
            ("exit", None) if mode == Mode::IgnoreShutdown => {}
            ("exit", None) => return Ok(()),
            ("fake/receivedMethods", Some(id)) => reply(&mut writer, id, json!(received)).await?,
            ("textDocument/didOpen" | "textDocument/didChange", None) => {
                publish_for(&mut writer, &frame["params"]).await?;
            }
            (_, Some(id)) => {
                let echo = json!({"method": method, "params": frame["params"]});
                reply(&mut writer, id, echo).await?;
            }
            (_, None) => {}
        }
    }

    if mode == Mode::IgnoreShutdown {
        std::future::pending::<()>().await;
    }
    Ok(())
}
