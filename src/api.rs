//! HTTP client for the chat/redaction backend
//!
//! Four endpoints: text and image detection, which return proposed
//! redactions plus findings, and text and image send, which deliver the
//! finalized content and return the assistant's reply.

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};

use crate::attachment::Attachment;
use crate::redaction::Finding;

#[derive(Serialize)]
struct DetectTextRequest<'a> {
    conversion_id: Option<&'a str>,
    message_id: Option<&'a str>,
    text: &'a str,
}

#[derive(Serialize)]
struct FinalTextRequest<'a> {
    conversion_id: Option<&'a str>,
    message_id: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct DirectTextRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct ReplyResponse {
    message: String,
}

#[derive(Debug, Deserialize)]
pub struct TextDetection {
    pub message_id: Option<String>,
    pub redacted_text: Option<String>,
    #[serde(default, deserialize_with = "detection_list")]
    pub detection: Vec<Finding>,
}

#[derive(Debug, Deserialize)]
pub struct ImageDetection {
    pub message_id: Option<String>,
    pub redacted_image_url: Option<String>,
    #[serde(default, deserialize_with = "detection_list")]
    pub detection: Vec<Finding>,
}

/// `detection` may arrive as a single object, a list, or not at all.
fn detection_list<'de, D>(de: D) -> Result<Vec<Finding>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<Finding>),
        One(Finding),
    }

    Ok(match Option::<OneOrMany>::deserialize(de)? {
        None => Vec::new(),
        Some(OneOrMany::Many(list)) => list,
        Some(OneOrMany::One(one)) => vec![one],
    })
}

#[derive(Clone)]
pub struct ChatApi {
    client: Client,
    base_url: String,
}

impl ChatApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// First-phase text call. `message_id` is always null for an initial
    /// message; the current conversion id rides along when one exists.
    pub async fn detect_text(&self, conversion_id: Option<&str>, text: &str) -> Result<TextDetection> {
        let url = format!("{}/api/chat/detect", self.base_url);
        let request = DetectTextRequest {
            conversion_id,
            message_id: None,
            text,
        };

        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "detection request failed with status {}",
                response.status()
            ));
        }
        Ok(response.json().await?)
    }

    pub async fn detect_image(
        &self,
        conversion_id: Option<&str>,
        attachment: &Attachment,
    ) -> Result<ImageDetection> {
        let url = format!("{}/api/chat/detect-image", self.base_url);
        let form = Form::new()
            .text("conversion_id", conversion_id.unwrap_or("").to_string())
            .text("message_id", "null")
            .part("image", image_part(attachment)?);

        let response = self.client.post(&url).multipart(form).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "image detection failed with status {}",
                response.status()
            ));
        }
        Ok(response.json().await?)
    }

    /// Second-phase text call: deliver the user-approved text and get the
    /// assistant's reply.
    pub async fn send_final_text(
        &self,
        conversion_id: Option<&str>,
        message_id: &str,
        text: &str,
    ) -> Result<String> {
        let url = format!("{}/api/chat/text", self.base_url);
        let request = FinalTextRequest {
            conversion_id,
            message_id,
            text,
        };

        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("send failed with status {}", response.status()));
        }
        let reply: ReplyResponse = response.json().await?;
        Ok(reply.message)
    }

    pub async fn send_final_image(
        &self,
        conversion_id: Option<&str>,
        message_id: &str,
        attachment: &Attachment,
    ) -> Result<String> {
        let url = format!("{}/api/chat/image", self.base_url);
        let form = Form::new()
            .text("conversion_id", conversion_id.unwrap_or("").to_string())
            .text("message_id", message_id.to_string())
            .part("image", image_part(attachment)?);

        let response = self.client.post(&url).multipart(form).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("image send failed with status {}", response.status()));
        }
        let reply: ReplyResponse = response.json().await?;
        Ok(reply.message)
    }

    /// Detection-free text send.
    pub async fn send_text(&self, text: &str) -> Result<String> {
        let url = format!("{}/api/chat/text", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&DirectTextRequest { text })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("send failed with status {}", response.status()));
        }
        let reply: ReplyResponse = response.json().await?;
        Ok(reply.message)
    }

    /// Detection-free image send, with an optional caption.
    pub async fn send_image(&self, attachment: &Attachment, message: Option<&str>) -> Result<String> {
        let url = format!("{}/api/chat/image", self.base_url);
        let mut form = Form::new().part("image", image_part(attachment)?);
        if let Some(message) = message {
            form = form.text("message", message.to_string());
        }

        let response = self.client.post(&url).multipart(form).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("image send failed with status {}", response.status()));
        }
        let reply: ReplyResponse = response.json().await?;
        Ok(reply.message)
    }

    /// Fetch image bytes for a local save. Data URLs are decoded in place,
    /// anything else is fetched over HTTP.
    pub async fn fetch_image_bytes(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(rest) = url.strip_prefix("data:") {
            let payload = rest
                .split_once(',')
                .map(|(_, data)| data)
                .ok_or_else(|| anyhow!("malformed data URL"))?;
            return Ok(BASE64.decode(payload)?);
        }

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("download failed with status {}", response.status()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

fn image_part(attachment: &Attachment) -> Result<Part> {
    Ok(Part::bytes(attachment.bytes.clone())
        .file_name(attachment.file_name.clone())
        .mime_str(attachment.mime)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    fn test_attachment() -> Attachment {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        crate::attachment::from_bytes(Path::new("photo.png"), bytes).unwrap()
    }

    #[tokio::test]
    async fn detect_text_sends_null_ids_for_initial_message() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat/detect"))
            .and(body_json(json!({
                "conversion_id": null,
                "message_id": null,
                "text": "hello"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message_id": "m-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = ChatApi::new(&server.uri());
        let res = api.detect_text(None, "hello").await.unwrap();
        assert_eq!(res.message_id.as_deref(), Some("m-1"));
        assert!(res.redacted_text.is_none(), "server omitted the redaction");
        assert!(res.detection.is_empty(), "absent detection is an empty list");
    }

    #[tokio::test]
    async fn detect_text_normalizes_single_object_detection() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat/detect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message_id": "m-2",
                "redacted_text": "call [PHONE] now",
                "detection": {
                    "id": "f-1",
                    "type": "PHONE",
                    "value": "555-1234",
                    "confidence": 0.93,
                    "position": { "start": 5, "end": 13 }
                }
            })))
            .mount(&server)
            .await;

        let api = ChatApi::new(&server.uri());
        let res = api.detect_text(Some("c-1"), "call 555-1234 now").await.unwrap();

        assert_eq!(res.detection.len(), 1);
        let finding = &res.detection[0];
        assert_eq!(finding.id, "f-1");
        assert_eq!(finding.kind.as_deref(), Some("PHONE"));
        assert_eq!(finding.value.as_deref(), Some("555-1234"));
        assert_eq!(finding.position.unwrap().start, 5);
        assert!(finding.selected, "findings start selected");
    }

    #[tokio::test]
    async fn detect_text_accepts_detection_list() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat/detect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message_id": "m-3",
                "redacted_text": "x",
                "detection": [
                    { "id": "a", "type": "EMAIL" },
                    { "id": "b", "type": "NAME" }
                ]
            })))
            .mount(&server)
            .await;

        let api = ChatApi::new(&server.uri());
        let res = api.detect_text(None, "x").await.unwrap();
        assert_eq!(res.detection.len(), 2);
        assert_eq!(res.detection[1].kind.as_deref(), Some("NAME"));
    }

    #[tokio::test]
    async fn detect_text_error_status_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat/detect"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let api = ChatApi::new(&server.uri());
        assert!(api.detect_text(None, "hello").await.is_err());
    }

    #[tokio::test]
    async fn send_final_text_carries_the_pending_ids() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat/text"))
            .and(body_json(json!({
                "conversion_id": "c-1",
                "message_id": "m-1",
                "text": "call \u{2588}\u{2588}\u{2588} now"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": "Got it."
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = ChatApi::new(&server.uri());
        let reply = api
            .send_final_text(Some("c-1"), "m-1", "call \u{2588}\u{2588}\u{2588} now")
            .await
            .unwrap();
        assert_eq!(reply, "Got it.");
    }

    #[tokio::test]
    async fn direct_text_sends_only_the_text() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat/text"))
            .and(body_json(json!({ "text": "hi" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": "hello"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = ChatApi::new(&server.uri());
        assert_eq!(api.send_text("hi").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn detect_image_parses_redacted_url() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat/detect-image"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message_id": "m-9",
                "redacted_image_url": "https://cdn.example/redacted.png",
                "detection": { "id": "face-1", "type": "FACE" }
            })))
            .mount(&server)
            .await;

        let api = ChatApi::new(&server.uri());
        let res = api.detect_image(None, &test_attachment()).await.unwrap();
        assert_eq!(
            res.redacted_image_url.as_deref(),
            Some("https://cdn.example/redacted.png")
        );
        assert_eq!(res.detection.len(), 1);

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("name=\"conversion_id\""));
        assert!(body.contains("name=\"message_id\""));
        assert!(body.contains("name=\"image\""));
        assert!(body.contains("photo.png"));
    }

    #[tokio::test]
    async fn send_final_image_posts_multipart_with_ids() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat/image"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": "Nice picture."
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = ChatApi::new(&server.uri());
        let reply = api
            .send_final_image(Some("c-2"), "m-7", &test_attachment())
            .await
            .unwrap();
        assert_eq!(reply, "Nice picture.");

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("c-2"));
        assert!(body.contains("m-7"));
    }

    #[tokio::test]
    async fn fetch_image_bytes_decodes_data_urls_locally() {
        let api = ChatApi::new("http://unused.invalid");
        let bytes = api
            .fetch_image_bytes("data:image/png;base64,aGVsbG8=")
            .await
            .unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn fetch_image_bytes_downloads_over_http() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/img.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG_MAGIC.to_vec()))
            .mount(&server)
            .await;

        let api = ChatApi::new(&server.uri());
        let bytes = api
            .fetch_image_bytes(&format!("{}/img.png", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, PNG_MAGIC.to_vec());
    }
}
