use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use arabic_translator::core::errors::{RenderingResult, TranslationResult};
use arabic_translator::services::detection::FallbackRegionDetector;
use arabic_translator::{
    build_router, AppState, BackgroundFillInpainter, Config, DetectionService, Metrics,
    PipelineComponents, PipelineOrchestrator, TextRenderer, TranslatedRegion, Translator,
};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use image::{Rgba, RgbaImage};
use serde_json::Value;
use tower::ServiceExt;
use zip::write::SimpleFileOptions;

const BOUNDARY: &str = "upload-boundary-7MA4YWxkTrZu0gW";

struct EchoTranslator;

#[async_trait]
impl Translator for EchoTranslator {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn translate(&self, text: &str, _source: &str, _target: &str) -> TranslationResult<String> {
        Ok(text.to_string())
    }
}

struct IdentityRenderer;

#[async_trait]
impl TextRenderer for IdentityRenderer {
    async fn render(&self, image: &RgbaImage, _regions: &[TranslatedRegion]) -> RenderingResult<RgbaImage> {
        Ok(image.clone())
    }
}

fn router_with(pairs: &[(&str, &str)]) -> Router {
    let pairs: Vec<(String, String)> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let config = Arc::new(
        Config::from_lookup(|key| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()))
            .expect("test config must be valid"),
    );
    let metrics = Metrics::new();
    let components = PipelineComponents {
        detection: DetectionService::new(Arc::new(FallbackRegionDetector), 0.3, None),
        translator: Arc::new(EchoTranslator),
        remover: Arc::new(BackgroundFillInpainter::from_config(&config)),
        renderer: Arc::new(IdentityRenderer),
    };
    let orchestrator = Arc::new(PipelineOrchestrator::new(config.clone(), components, metrics.clone()));
    build_router(AppState::new(config, orchestrator, metrics))
}

fn router() -> Router {
    router_with(&[])
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 200, 255]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("png encoding");
    bytes
}

fn zip_of(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("zip entry");
        writer.write_all(data).expect("zip write");
    }
    writer.finish().expect("zip finish").into_inner()
}

fn multipart_request(field: &str, filename: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .expect("request builder should not fail")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request builder should not fail")
}

fn header_str<'a>(response: &'a axum::response::Response, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("{name} header present"))
        .to_str()
        .expect("header must be valid ascii")
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("response body must be readable")
        .to_bytes()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("response must be valid JSON")
}

#[tokio::test]
async fn health_reports_fallback_detector() {
    let response = router().oneshot(get("/health")).await.expect("health responds");
    assert_eq!(response.status(), StatusCode::OK);

    let value = body_json(response).await;
    assert_eq!(value["ocr_available"], Value::Bool(false));
    assert_eq!(value["detector"], "fallback");
    assert_eq!(value["services"]["arabic_renderer"], Value::Bool(true));
}

#[tokio::test]
async fn root_lists_supported_formats() {
    let response = router().oneshot(get("/")).await.expect("root responds");
    assert_eq!(response.status(), StatusCode::OK);

    let value = body_json(response).await;
    let archives = value["supported_formats"]["archive"]
        .as_array()
        .expect("archive formats listed");
    assert!(archives.iter().any(|ext| ext.as_str() == Some("cbz")));
    assert_eq!(value["max_upload_mb"], 200);
}

#[tokio::test]
async fn single_image_upload_returns_png() {
    let source = png(24, 16);
    let response = router()
        .oneshot(multipart_request("file", "cover page.png", &source))
        .await
        .expect("upload responds");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "content-type"), "image/png");
    assert_eq!(
        header_str(&response, "content-disposition"),
        "attachment; filename=\"translated_cover page.png\""
    );
    assert_eq!(header_str(&response, "x-images-total"), "1");
    assert_eq!(header_str(&response, "x-images-dropped"), "0");

    let returned = image::load_from_memory(&body_bytes(response).await)
        .expect("body is an image")
        .to_rgba8();
    let original = image::load_from_memory(&source).expect("source decodes").to_rgba8();
    assert_eq!(returned, original);
}

#[tokio::test]
async fn archive_upload_returns_zip_in_order() {
    let archive = zip_of(&[
        ("p1.png", png(10, 10)),
        ("credits.txt", b"scanlation group".to_vec()),
        ("p2.png", png(20, 10)),
    ]);
    let response = router()
        .oneshot(multipart_request("file", "chapter.cbz", &archive))
        .await
        .expect("upload responds");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "content-type"), "application/zip");
    assert_eq!(
        header_str(&response, "content-disposition"),
        "attachment; filename=\"translated_chapter.zip\""
    );
    assert_eq!(header_str(&response, "x-images-total"), "2");

    let mut zip = zip::ZipArchive::new(Cursor::new(body_bytes(response).await)).expect("valid zip");
    assert_eq!(zip.len(), 2);
    for (i, width) in [10u32, 20].iter().enumerate() {
        let mut entry = zip.by_index(i).expect("entry");
        assert_eq!(entry.name(), format!("translated_{}.png", i + 1));
        let mut data = Vec::new();
        entry.read_to_end(&mut data).expect("entry readable");
        let image = image::load_from_memory(&data).expect("entry is png");
        assert_eq!(image.width(), *width);
    }
}

#[tokio::test]
async fn invalid_extension_is_rejected() {
    let response = router()
        .oneshot(multipart_request("file", "setup.exe", b"MZ\x90\x00"))
        .await
        .expect("upload responds");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let value = body_json(response).await;
    assert_eq!(value["error"], "invalid_input");
    assert!(value["message"]
        .as_str()
        .expect("message is a string")
        .contains("Invalid file type"));
}

#[tokio::test]
async fn missing_file_field_is_rejected() {
    let response = router()
        .oneshot(multipart_request("attachment", "page.png", &png(4, 4)))
        .await
        .expect("upload responds");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["message"], "No file selected");
}

#[tokio::test]
async fn oversized_file_is_rejected() {
    let app = router_with(&[("MAX_FILE_SIZE", "1024")]);
    let response = app
        .oneshot(multipart_request("file", "big.png", &vec![0u8; 4096]))
        .await
        .expect("upload responds");

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn archive_without_images_is_unprocessable() {
    let archive = zip_of(&[("readme.txt", b"no pages".to_vec())]);
    let response = router()
        .oneshot(multipart_request("file", "empty.zip", &archive))
        .await
        .expect("upload responds");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let value = body_json(response).await;
    assert_eq!(value["error"], "empty_archive");
}

#[tokio::test]
async fn metrics_count_uploads() {
    let app = router();
    let response = app
        .clone()
        .oneshot(multipart_request("file", "page.png", &png(8, 8)))
        .await
        .expect("upload responds");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/metrics")).await.expect("metrics responds");
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response).await).expect("utf-8 metrics");
    assert!(text.contains("files_received_total 1"));
    assert!(text.contains("images_unchanged_total 1"));
}

#[tokio::test]
async fn api_key_health_without_client() {
    let response = router()
        .oneshot(get("/health/api-keys"))
        .await
        .expect("api key health responds");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["configured"], Value::Bool(false));
}
