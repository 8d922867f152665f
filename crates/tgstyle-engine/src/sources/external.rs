use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use tgstyle_contracts::classification::{ClassificationResult, GarmentLabel, ResultSource};

use crate::resolver::{
    truncate_text, ClassificationSource, DEFAULT_HEALTH_TIMEOUT, DEFAULT_INFERENCE_TIMEOUT,
};

/// The upstream service returns prose, not a calibrated score.
pub const EXTERNAL_CONFIDENCE: f64 = 95.0;

/// Ordered keyword dictionary; the first keyword found in the text wins.
/// Russian forms are listed because the vision server is often prompted to
/// answer in Russian.
const GARMENT_KEYWORDS: &[(&str, GarmentLabel)] = &[
    ("платье", GarmentLabel::Dress),
    ("dress", GarmentLabel::Dress),
    ("футболка", GarmentLabel::Tshirt),
    ("t-shirt", GarmentLabel::Tshirt),
    ("tshirt", GarmentLabel::Tshirt),
    ("рубашка", GarmentLabel::Shirt),
    ("shirt", GarmentLabel::Shirt),
    ("брюки", GarmentLabel::Pants),
    ("trousers", GarmentLabel::Pants),
    ("pants", GarmentLabel::Pants),
    ("джинсы", GarmentLabel::Jeans),
    ("jeans", GarmentLabel::Jeans),
    ("куртка", GarmentLabel::Jacket),
    ("jacket", GarmentLabel::Jacket),
    ("пиджак", GarmentLabel::Blazer),
    ("blazer", GarmentLabel::Blazer),
    ("свитер", GarmentLabel::Sweater),
    ("sweater", GarmentLabel::Sweater),
    ("кардиган", GarmentLabel::Cardigan),
    ("cardigan", GarmentLabel::Cardigan),
    ("юбка", GarmentLabel::Skirt),
    ("skirt", GarmentLabel::Skirt),
    ("блузка", GarmentLabel::Blouse),
    ("blouse", GarmentLabel::Blouse),
    ("пальто", GarmentLabel::Coat),
    ("coat", GarmentLabel::Coat),
];

pub fn extract_garment_label(description: &str) -> GarmentLabel {
    let haystack = description.to_lowercase();
    GARMENT_KEYWORDS
        .iter()
        .find(|(keyword, _)| haystack.contains(keyword))
        .map(|(_, label)| *label)
        .unwrap_or(GarmentLabel::Clothing)
}

/// Vision-model server reached over HTTP (`GET /health`, `POST /analyze`).
#[derive(Debug, Clone)]
pub struct ExternalInferenceSource {
    base_url: String,
    prompt: String,
    health_timeout: Duration,
    inference_timeout: Duration,
}

impl ExternalInferenceSource {
    pub fn new(base_url: &str, prompt: String) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            prompt,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, health: Duration, inference: Duration) -> Self {
        self.health_timeout = health;
        self.inference_timeout = inference;
        self
    }

    pub fn health_check(&self) -> Result<()> {
        let client = HttpClient::builder()
            .timeout(self.health_timeout)
            .build()
            .context("health client build failed")?;
        let response = client
            .get(format!("{}/health", self.base_url))
            .send()
            .context("health probe failed")?;
        if !response.status().is_success() {
            bail!("health probe returned {}", response.status().as_u16());
        }
        Ok(())
    }

    pub fn describe(&self, image: &[u8]) -> Result<String> {
        let client = HttpClient::builder()
            .timeout(self.inference_timeout)
            .build()
            .context("inference client build failed")?;
        let payload = json!({
            "image_base64": BASE64.encode(image),
            "prompt": self.prompt,
        });
        let response = client
            .post(format!("{}/analyze", self.base_url))
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .context("inference request failed")?;
        let parsed = response_json_or_error(response)?;
        if parsed.get("success").and_then(Value::as_bool) != Some(true) {
            let reason = parsed
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("no reason given");
            bail!("inference service reported failure: {reason}");
        }
        Ok(parsed
            .get("analysis")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}

impl ClassificationSource for ExternalInferenceSource {
    fn name(&self) -> &str {
        "external"
    }

    fn classify(&self, image: &[u8]) -> Result<ClassificationResult> {
        self.health_check()
            .context("external inference service unavailable")?;
        let description = self.describe(image)?;
        let label = extract_garment_label(&description);
        Ok(
            ClassificationResult::new(label, EXTERNAL_CONFIDENCE, ResultSource::ExternalInference)
                .with_detail_text(description),
        )
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .context("inference response body read failed")?;
    if !status.is_success() {
        bail!(
            "inference request failed ({}): {}",
            status.as_u16(),
            truncate_text(&body, 512)
        );
    }
    serde_json::from_str(&body).context("inference service returned invalid JSON payload")
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use serde_json::Value;
    use tgstyle_contracts::classification::{GarmentLabel, ResultSource};

    use super::*;

    /// Serves one canned response per expected request, capturing request bodies.
    fn stub_service(responses: Vec<(u16, String)>) -> (String, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");
        let handle = thread::spawn(move || {
            let mut bodies = Vec::new();
            for (status, body) in responses {
                let Ok((stream, _)) = listener.accept() else {
                    break;
                };
                let mut reader = BufReader::new(stream);
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 {
                        break;
                    }
                    let lower = line.to_ascii_lowercase();
                    if let Some(value) = lower.strip_prefix("content-length:") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                    if line == "\r\n" {
                        break;
                    }
                }
                let mut request_body = vec![0u8; content_length];
                let _ = reader.read_exact(&mut request_body);
                bodies.push(String::from_utf8_lossy(&request_body).to_string());

                let mut stream = reader.into_inner();
                let reply = format!(
                    "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(reply.as_bytes());
                let _ = stream.flush();
            }
            bodies
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn keyword_lookup_is_ordered_and_case_insensitive() {
        assert_eq!(
            extract_garment_label("A RED Dress with a leather jacket"),
            GarmentLabel::Dress
        );
        assert_eq!(
            extract_garment_label("На фото синие джинсы и белая Футболка"),
            GarmentLabel::Tshirt
        );
        assert_eq!(extract_garment_label("a plain T-Shirt"), GarmentLabel::Tshirt);
        assert_eq!(
            extract_garment_label("a bright scarf and gloves"),
            GarmentLabel::Clothing
        );
    }

    #[test]
    fn healthy_service_produces_external_result_with_detail() -> anyhow::Result<()> {
        let (base, handle) = stub_service(vec![
            (200, "{\"status\":\"healthy\"}".to_string()),
            (
                200,
                "{\"success\":true,\"analysis\":\"A long navy wool coat over jeans.\"}".to_string(),
            ),
        ]);
        let source = ExternalInferenceSource::new(&base, "describe".to_string());
        let result = source.classify(&[7u8; 256])?;

        assert_eq!(result.source, ResultSource::ExternalInference);
        assert_eq!(result.label, GarmentLabel::Jeans);
        assert_eq!(result.confidence, EXTERNAL_CONFIDENCE);
        assert_eq!(
            result.detail_text.as_deref(),
            Some("A long navy wool coat over jeans.")
        );

        let bodies = handle.join().map_err(|_| anyhow::anyhow!("stub panicked"))?;
        let analyze_body: Value = serde_json::from_str(&bodies[1])?;
        assert_eq!(analyze_body["prompt"], Value::from("describe"));
        assert_eq!(
            analyze_body["image_base64"],
            Value::from(BASE64.encode([7u8; 256]))
        );
        Ok(())
    }

    #[test]
    fn unhealthy_service_is_an_error() {
        let (base, handle) = stub_service(vec![(503, "{}".to_string())]);
        let source = ExternalInferenceSource::new(&base, "describe".to_string());
        let err = source.classify(&[7u8; 256]).err();
        assert!(err.is_some());
        let _ = handle.join();
    }

    #[test]
    fn reported_failure_is_an_error() {
        let (base, handle) = stub_service(vec![
            (200, "{}".to_string()),
            (200, "{\"success\":false,\"error\":\"model busy\"}".to_string()),
        ]);
        let source = ExternalInferenceSource::new(&base, "describe".to_string());
        let err = source
            .classify(&[7u8; 256])
            .err()
            .map(|err| format!("{err:#}"))
            .unwrap_or_default();
        assert!(err.contains("model busy"), "unexpected error: {err}");
        let _ = handle.join();
    }
}
