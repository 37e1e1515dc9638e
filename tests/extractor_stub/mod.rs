use std::io::Read as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use base64::Engine as _;
use serde_json::Value;

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum StubBehavior {
    /// Answers with `structure` and the given `(image_ref, bytes)` pairs.
    Respond {
        structure: Value,
        images: Vec<(String, Vec<u8>)>,
    },
    Fail {
        status: u16,
        message: String,
    },
}

/// Minimal stand-in for the external extraction service.
pub struct ExtractorStub {
    pub url: String,
    calls: Arc<AtomicUsize>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ExtractorStub {
    pub fn spawn(behavior: StubBehavior) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start extractor stub server");
        let addr = server.server_addr();
        let url = format!("http://{addr}/extract");

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_thread = Arc::clone(&calls);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                if request.method() != &tiny_http::Method::Post || request.url() != "/extract" {
                    let _ = request.respond(
                        tiny_http::Response::from_string("not found").with_status_code(404),
                    );
                    continue;
                }
                calls_for_thread.fetch_add(1, Ordering::SeqCst);

                let mut body = String::new();
                if request.as_reader().read_to_string(&mut body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }
                let parsed: Value = match serde_json::from_str(&body) {
                    Ok(value) => value,
                    Err(_) => {
                        let _ = request.respond(
                            tiny_http::Response::from_string("invalid json").with_status_code(400),
                        );
                        continue;
                    }
                };
                let has_file = parsed
                    .get("file")
                    .and_then(Value::as_str)
                    .is_some_and(|file| {
                        base64::engine::general_purpose::STANDARD
                            .decode(file)
                            .is_ok()
                    });
                let has_version = parsed.get("version").and_then(Value::as_str).is_some();
                if !has_file || !has_version {
                    let _ = request.respond(
                        tiny_http::Response::from_string(
                            serde_json::json!({ "error": "missing file or version" }).to_string(),
                        )
                        .with_status_code(400),
                    );
                    continue;
                }

                let (status, response_body) = match &behavior {
                    StubBehavior::Respond { structure, images } => {
                        let images = images
                            .iter()
                            .map(|(image_ref, bytes)| {
                                serde_json::json!({
                                    "image_ref": image_ref,
                                    "data": base64::engine::general_purpose::STANDARD.encode(bytes),
                                })
                            })
                            .collect::<Vec<_>>();
                        (
                            200,
                            serde_json::json!({ "structure": structure, "images": images }),
                        )
                    }
                    StubBehavior::Fail { status, message } => {
                        (*status, serde_json::json!({ "error": message }))
                    }
                };

                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("build header");
                let response = tiny_http::Response::from_string(response_body.to_string())
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            url,
            calls,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    #[allow(dead_code)]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Drop for ExtractorStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Two headings, one visual, two pages.
#[allow(dead_code)]
pub fn sample_structure() -> Value {
    serde_json::json!({
        "metadata": { "title": "Quarterly Report", "page_count": 2, "author": "Finance", "file_size": 2048 },
        "headings": [
            {
                "text": "Summary",
                "page": 1,
                "subheadings": [
                    {
                        "title": "Revenue",
                        "context": "Revenue grew.",
                        "page": 1,
                        "visuals": [
                            { "caption": "Revenue by month", "image_ref": "fig-revenue", "page": 1 }
                        ]
                    }
                ]
            },
            { "text": "Outlook", "page": 2, "subheadings": [] }
        ],
        "pages": [
            { "page_number": 1, "image_ref": "page-1" },
            { "page_number": 2, "image_ref": "page-2" }
        ]
    })
}
