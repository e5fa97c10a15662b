//! Embedded HTTP API: accepts uploaded footage, forwards it to the model with
//! the right prompt, and answers with the parsed analysis.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

use crate::overlay::parse_overlays;
use crate::tactics::{parse_counter, parse_dna};
use crate::{ai, capture};

const RECV_TIMEOUT: Duration = Duration::from_millis(250);

const PARSE_FAILURE_MESSAGE: &str = "Failed to parse JSON response";

/// Media payload extracted from a request.
pub struct MediaPayload {
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Seam between the HTTP layer and the external model.
pub trait FootageModel: Send + Sync {
    fn generate(&self, prompt: &str, media: Option<&MediaPayload>) -> Result<String>;
}

/// Production model: samples frames from the payload and forwards them with
/// the prompt to the chat-vision API.
pub struct OpenAiModel {
    runtime: tokio::runtime::Handle,
    model: String,
}

impl OpenAiModel {
    pub fn new(runtime: tokio::runtime::Handle, model: String) -> Self {
        capture::init();
        Self { runtime, model }
    }

    fn frames_for(&self, media: &MediaPayload) -> Result<Vec<String>> {
        if media.mime.starts_with("image/") {
            return Ok(vec![capture::image_data_url(&media.bytes, &media.mime)]);
        }

        // ffmpeg wants a path, so spool the upload to disk first.
        let mut spool = tempfile::NamedTempFile::new().context("failed to spool upload")?;
        spool.write_all(&media.bytes)?;
        spool.flush()?;

        capture::frames_for_clip(spool.path(), 8)
    }
}

impl FootageModel for OpenAiModel {
    fn generate(&self, prompt: &str, media: Option<&MediaPayload>) -> Result<String> {
        match media {
            Some(media) => {
                let frames = self.frames_for(media)?;
                self.runtime
                    .block_on(ai::describe_frames(&self.model, prompt, frames))
            }
            None => self.runtime.block_on(ai::complete_text(&self.model, prompt)),
        }
    }
}

/// The API server worker. Runs on its own thread until [`ApiServer::stop`].
pub struct ApiServer {
    shutdown: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

impl ApiServer {
    pub fn spawn(addr: &str, model: Arc<dyn FootageModel>) -> Result<Self> {
        let server = Server::http(addr).map_err(|e| anyhow!("failed to bind {}: {}", addr, e))?;
        info!("analysis API listening on http://{}/api", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let handle = thread::spawn(move || {
            while !shutdown_clone.load(Ordering::Relaxed) {
                match server.recv_timeout(RECV_TIMEOUT) {
                    Ok(Some(request)) => handle_request(request, model.as_ref()),
                    Ok(None) => continue,
                    Err(err) => {
                        warn!("API server receive error: {}", err);
                        thread::sleep(Duration::from_millis(100));
                    }
                }
            }
        });

        Ok(Self { shutdown, handle })
    }

    pub fn stop(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Err(err) = self.handle.join() {
            warn!("failed to join API server thread: {:?}", err);
        }
    }
}

fn handle_request(mut request: Request, model: &dyn FootageModel) {
    let method = request.method().clone();
    let url = request.url().to_string();
    let content_type = get_header_value(&request, "Content-Type").unwrap_or_default();

    let mut body = Vec::new();
    if let Err(err) = request.as_reader().read_to_end(&mut body) {
        respond(
            request,
            StatusCode(400),
            json!({ "error": format!("failed to read body: {}", err) }),
        );
        return;
    }

    let (status, payload) = match (method, url.as_str()) {
        (Method::Post, "/api/analyze-video") => analyze_video(&body, &content_type, model),
        (Method::Post, "/api/analyze") => analyze_footage(&body, &content_type, model),
        (Method::Post, "/api/analyze-youtube") => analyze_youtube(&body, model),
        _ => (StatusCode(404), json!({ "error": "not found" })),
    };

    respond(request, status, payload);
}

fn analyze_video(body: &[u8], content_type: &str, model: &dyn FootageModel) -> (StatusCode, Value) {
    let mut form = match parse_upload_form(body, content_type) {
        Ok(form) => form,
        Err(err) => return (StatusCode(400), json!({ "error": err.to_string() })),
    };
    let Some(file) = form.file.take() else {
        return (StatusCode(400), json!({ "error": "No file provided" }));
    };

    let duration = form
        .first_value("duration")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0);

    let media = MediaPayload {
        bytes: file.data,
        mime: file
            .content_type
            .unwrap_or_else(|| "application/octet-stream".to_string()),
    };

    let reply = match model.generate(&ai::overlay_prompt(duration), Some(&media)) {
        Ok(reply) => reply,
        Err(err) => return (StatusCode(500), json!({ "error": err.to_string() })),
    };

    match parse_overlays(&reply) {
        Ok(overlays) => (StatusCode(200), json!({ "success": true, "overlays": overlays })),
        Err(failure) => (
            StatusCode(200),
            json!({ "success": false, "error": PARSE_FAILURE_MESSAGE, "raw": failure.raw }),
        ),
    }
}

fn analyze_footage(
    body: &[u8],
    content_type: &str,
    model: &dyn FootageModel,
) -> (StatusCode, Value) {
    let mut form = match parse_upload_form(body, content_type) {
        Ok(form) => form,
        Err(err) => return (StatusCode(400), json!({ "error": err.to_string() })),
    };
    let Some(file) = form.file.take() else {
        return (StatusCode(400), json!({ "error": "No file provided" }));
    };

    let team_name = form.first_value("teamName").unwrap_or("Team").to_string();
    let analysis_type = form.first_value("analysisType").unwrap_or("dna").to_string();

    let prompt = match analysis_type.as_str() {
        "dna" => ai::dna_prompt(&team_name),
        "counter" => {
            let opponent_dna = form
                .first_value("opponentDNA")
                .unwrap_or("No opponent DNA provided");
            ai::counter_prompt(opponent_dna)
        }
        other => {
            return (
                StatusCode(400),
                json!({ "error": format!("unknown analysisType '{}'", other) }),
            )
        }
    };

    let media = MediaPayload {
        bytes: file.data,
        mime: file
            .content_type
            .unwrap_or_else(|| "application/octet-stream".to_string()),
    };

    let reply = match model.generate(&prompt, Some(&media)) {
        Ok(reply) => reply,
        Err(err) => return (StatusCode(500), json!({ "error": err.to_string() })),
    };

    tactics_response(&analysis_type, &reply)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct YoutubeAnalysisRequest {
    youtube_url: Option<String>,
    team_name: Option<String>,
    analysis_type: Option<String>,
    opponent_dna: Option<String>,
}

fn analyze_youtube(body: &[u8], model: &dyn FootageModel) -> (StatusCode, Value) {
    let payload: YoutubeAnalysisRequest = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(err) => {
            return (
                StatusCode(400),
                json!({ "error": format!("invalid JSON body: {}", err) }),
            )
        }
    };

    let Some(youtube_url) = payload.youtube_url.filter(|url| !url.trim().is_empty()) else {
        return (StatusCode(400), json!({ "error": "No YouTube URL provided" }));
    };

    let team_name = payload.team_name.unwrap_or_else(|| "Team".to_string());
    let analysis_type = payload.analysis_type.unwrap_or_else(|| "dna".to_string());

    let prompt = match analysis_type.as_str() {
        "dna" => ai::youtube_dna_prompt(&youtube_url, &team_name),
        "counter" => ai::youtube_counter_prompt(
            &youtube_url,
            payload
                .opponent_dna
                .as_deref()
                .unwrap_or("No opponent DNA provided"),
        ),
        other => {
            return (
                StatusCode(400),
                json!({ "error": format!("unknown analysisType '{}'", other) }),
            )
        }
    };

    let reply = match model.generate(&prompt, None) {
        Ok(reply) => reply,
        Err(err) => return (StatusCode(500), json!({ "error": err.to_string() })),
    };

    tactics_response(&analysis_type, &reply)
}

fn tactics_response(analysis_type: &str, reply: &str) -> (StatusCode, Value) {
    let parsed = match analysis_type {
        "counter" => parse_counter(reply).map(|plan| json!(plan)),
        _ => parse_dna(reply).map(|dna| json!(dna)),
    };

    match parsed {
        Ok(data) => (StatusCode(200), json!({ "success": true, "data": data })),
        Err(failure) => (
            StatusCode(200),
            json!({ "success": false, "error": PARSE_FAILURE_MESSAGE, "raw": failure.raw }),
        ),
    }
}

#[derive(Default)]
struct MultipartFile {
    data: Vec<u8>,
    content_type: Option<String>,
}

#[derive(Default)]
struct UploadForm {
    file: Option<MultipartFile>,
    fields: HashMap<String, Vec<String>>,
}

impl UploadForm {
    fn push_field(&mut self, name: String, value: String) {
        self.fields.entry(name).or_default().push(value);
    }

    fn first_value(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(|values| values.first().map(String::as_str))
    }
}

fn parse_upload_form(body: &[u8], content_type: &str) -> Result<UploadForm> {
    let boundary = parse_multipart_boundary(content_type)
        .ok_or_else(|| anyhow!("expected multipart/form-data"))?;
    parse_multipart_form_data(body, &boundary)
}

fn parse_multipart_boundary(content_type: &str) -> Option<String> {
    let lowered = content_type.to_ascii_lowercase();
    if !lowered.starts_with("multipart/form-data") {
        return None;
    }

    for part in content_type.split(';').map(str::trim) {
        if let Some(value) = part.strip_prefix("boundary=") {
            let trimmed = value.trim_matches('"').trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    None
}

fn parse_multipart_form_data(body: &[u8], boundary: &str) -> Result<UploadForm> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut marker = Vec::with_capacity(4 + boundary.len());
    marker.extend_from_slice(b"\r\n--");
    marker.extend_from_slice(boundary.as_bytes());

    let mut position = find_subslice_from(body, &delimiter, 0)
        .ok_or_else(|| anyhow!("invalid multipart body: boundary not found"))?;
    let mut form = UploadForm::default();

    loop {
        position += delimiter.len();

        if body.get(position..position + 2) == Some(b"--") {
            break;
        }

        if body.get(position..position + 2) != Some(b"\r\n") {
            return Err(anyhow!("invalid multipart body framing"));
        }
        position += 2;

        let header_end = find_subslice_from(body, b"\r\n\r\n", position)
            .ok_or_else(|| anyhow!("invalid multipart part headers"))?;
        let headers = parse_part_headers(&body[position..header_end])?;
        let part_start = header_end + 4;
        let part_end = find_subslice_from(body, &marker, part_start)
            .ok_or_else(|| anyhow!("multipart part missing trailing boundary"))?;
        let part_data = &body[part_start..part_end];

        let disposition = headers
            .get("content-disposition")
            .ok_or_else(|| anyhow!("multipart part missing Content-Disposition header"))?;
        let name = parse_content_disposition_name(disposition)
            .ok_or_else(|| anyhow!("multipart part missing field name"))?;

        if name == "file" {
            form.file = Some(MultipartFile {
                data: part_data.to_vec(),
                content_type: headers.get("content-type").cloned(),
            });
        } else {
            let value = String::from_utf8(part_data.to_vec())
                .context("multipart text fields must be valid UTF-8")?;
            form.push_field(name, value);
        }

        position = part_end + 2;
    }

    Ok(form)
}

fn parse_part_headers(header_bytes: &[u8]) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::new();
    for line in header_bytes.split(|byte| *byte == b'\n') {
        let line = String::from_utf8(line.to_vec())?.trim().to_string();
        if line.is_empty() {
            continue;
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| anyhow!("invalid multipart part header"))?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }
    Ok(headers)
}

fn parse_content_disposition_name(value: &str) -> Option<String> {
    for part in value.split(';').map(str::trim) {
        if let Some(name) = part.strip_prefix("name=") {
            return Some(name.trim_matches('"').to_string());
        }
    }
    None
}

fn find_subslice_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }

    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

fn get_header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|header| header.field.as_str().to_string().eq_ignore_ascii_case(name))
        .map(|header| header.value.as_str().to_string())
}

fn respond(request: Request, status: StatusCode, payload: Value) {
    let mut response = Response::from_string(payload.to_string()).with_status_code(status);
    if let Ok(header) = Header::from_bytes("Content-Type", "application/json") {
        response.add_header(header);
    }
    if let Err(err) = request.respond(response) {
        warn!("failed to send API response: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    struct ScriptedModel {
        reply: String,
    }

    impl FootageModel for ScriptedModel {
        fn generate(&self, _prompt: &str, _media: Option<&MediaPayload>) -> Result<String> {
            Ok(self.reply.clone())
        }
    }

    struct FailingModel;

    impl FootageModel for FailingModel {
        fn generate(&self, _prompt: &str, _media: Option<&MediaPayload>) -> Result<String> {
            Err(anyhow!("upstream model unavailable"))
        }
    }

    fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    fn spawn_server(model: Arc<dyn FootageModel>) -> (String, ApiServer) {
        let addr = format!("127.0.0.1:{}", free_port());
        let server = ApiServer::spawn(&addr, model).unwrap();
        (addr, server)
    }

    fn send_http(addr: &str, raw_request: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(raw_request).unwrap();
        stream.shutdown(std::net::Shutdown::Write).unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    fn multipart_body(boundary: &str, fields: &[(&str, &str)], file: Option<&[u8]>) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some(data) = file {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            body.extend_from_slice(
                b"Content-Disposition: form-data; name=\"file\"; filename=\"clip.mp4\"\r\n",
            );
            body.extend_from_slice(b"Content-Type: video/mp4\r\n\r\n");
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        for (name, value) in fields {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            );
            body.extend_from_slice(value.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        body
    }

    fn post(addr: &str, path: &str, content_type: &str, body: &[u8]) -> String {
        let head = format!(
            "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            path,
            addr,
            content_type,
            body.len()
        );
        let mut raw = head.into_bytes();
        raw.extend_from_slice(body);
        send_http(addr, &raw)
    }

    const OVERLAY_REPLY: &str = "```json\n[{\"timestamp\": 0, \"phase\": \"pre-snap\", \"text\": \"Offense lines up in spread formation.\"}]\n```";

    #[test]
    fn analyze_video_returns_overlays() {
        let model = Arc::new(ScriptedModel {
            reply: OVERLAY_REPLY.to_string(),
        });
        let (addr, server) = spawn_server(model);

        let boundary = "----playlensBoundary";
        let body = multipart_body(boundary, &[("duration", "14.5")], Some(b"fake video bytes"));
        let response = post(
            &addr,
            "/api/analyze-video",
            &format!("multipart/form-data; boundary={}", boundary),
            &body,
        );

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"success\":true"));
        assert!(response.contains("Offense lines up in spread formation."));

        server.stop();
    }

    #[test]
    fn analyze_video_without_file_is_rejected() {
        let model = Arc::new(ScriptedModel {
            reply: OVERLAY_REPLY.to_string(),
        });
        let (addr, server) = spawn_server(model);

        let boundary = "----playlensBoundary";
        let body = multipart_body(boundary, &[("duration", "10")], None);
        let response = post(
            &addr,
            "/api/analyze-video",
            &format!("multipart/form-data; boundary={}", boundary),
            &body,
        );

        assert!(response.starts_with("HTTP/1.1 400"));
        assert!(response.contains("No file provided"));

        server.stop();
    }

    #[test]
    fn analyze_video_parse_failure_preserves_raw_reply() {
        let model = Arc::new(ScriptedModel {
            reply: "The defense ran a cover-two shell on this play.".to_string(),
        });
        let (addr, server) = spawn_server(model);

        let boundary = "----playlensBoundary";
        let body = multipart_body(boundary, &[], Some(b"fake video bytes"));
        let response = post(
            &addr,
            "/api/analyze-video",
            &format!("multipart/form-data; boundary={}", boundary),
            &body,
        );

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"success\":false"));
        assert!(response.contains("Failed to parse JSON response"));
        assert!(response.contains("cover-two shell"));

        server.stop();
    }

    #[test]
    fn analyze_footage_returns_tactical_dna() {
        let reply = r#"{
            "teamName": "Riverside",
            "formation": "4-3-3",
            "playingStyle": {"tempo": "fast", "possession": "high", "pressing": "aggressive", "width": "wide", "verticality": "direct"},
            "tacticalTendencies": ["early switches"],
            "strengths": ["counter-press"],
            "weaknesses": ["space behind the fullbacks"],
            "playerMovement": {"defensive": "mid-block", "offensive": "high wingers", "transitions": "vertical outlet"},
            "dnaSignature": "Direct and wide."
        }"#;
        let model = Arc::new(ScriptedModel {
            reply: reply.to_string(),
        });
        let (addr, server) = spawn_server(model);

        let boundary = "----playlensBoundary";
        let body = multipart_body(
            boundary,
            &[("teamName", "Riverside"), ("analysisType", "dna")],
            Some(b"fake footage"),
        );
        let response = post(
            &addr,
            "/api/analyze",
            &format!("multipart/form-data; boundary={}", boundary),
            &body,
        );

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"success\":true"));
        assert!(response.contains("\"teamName\":\"Riverside\""));

        server.stop();
    }

    #[test]
    fn analyze_footage_rejects_unknown_analysis_type() {
        let model = Arc::new(ScriptedModel {
            reply: "{}".to_string(),
        });
        let (addr, server) = spawn_server(model);

        let boundary = "----playlensBoundary";
        let body = multipart_body(boundary, &[("analysisType", "scouting")], Some(b"bytes"));
        let response = post(
            &addr,
            "/api/analyze",
            &format!("multipart/form-data; boundary={}", boundary),
            &body,
        );

        assert!(response.starts_with("HTTP/1.1 400"));

        server.stop();
    }

    #[test]
    fn analyze_youtube_counter_mode() {
        let reply = r#"{
            "counterStrategies": [{"strategy": "Switch play", "description": "d", "implementation": "i", "targetWeakness": "w"}],
            "formationRecommendation": "3-5-2",
            "keyTacticalAdjustments": ["drop the line"],
            "playerInstructions": {"defense": "d", "midfield": "m", "attack": "a"}
        }"#;
        let model = Arc::new(ScriptedModel {
            reply: reply.to_string(),
        });
        let (addr, server) = spawn_server(model);

        let body = json!({
            "youtubeUrl": "https://youtube.com/watch?v=abc",
            "analysisType": "counter",
            "opponentDNA": "presses high"
        })
        .to_string();
        let response = post(&addr, "/api/analyze-youtube", "application/json", body.as_bytes());

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"formationRecommendation\":\"3-5-2\""));

        server.stop();
    }

    #[test]
    fn analyze_youtube_requires_url() {
        let model = Arc::new(ScriptedModel {
            reply: "{}".to_string(),
        });
        let (addr, server) = spawn_server(model);

        let response = post(&addr, "/api/analyze-youtube", "application/json", b"{}");

        assert!(response.starts_with("HTTP/1.1 400"));
        assert!(response.contains("No YouTube URL provided"));

        server.stop();
    }

    #[test]
    fn model_failure_maps_to_500() {
        let (addr, server) = spawn_server(Arc::new(FailingModel));

        let boundary = "----playlensBoundary";
        let body = multipart_body(boundary, &[], Some(b"fake video bytes"));
        let response = post(
            &addr,
            "/api/analyze-video",
            &format!("multipart/form-data; boundary={}", boundary),
            &body,
        );

        assert!(response.starts_with("HTTP/1.1 500"));
        assert!(response.contains("upstream model unavailable"));

        server.stop();
    }

    #[test]
    fn unknown_route_is_404() {
        let model = Arc::new(ScriptedModel {
            reply: String::new(),
        });
        let (addr, server) = spawn_server(model);

        let response = post(&addr, "/api/unknown", "application/json", b"{}");
        assert!(response.starts_with("HTTP/1.1 404"));

        server.stop();
    }
}
