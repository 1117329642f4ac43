use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use image::{DynamicImage, RgbaImage};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, instrument};

use crate::config;
use crate::options::{Algorithm, DitheringOptions};
use crate::raster::RasterImage;
use crate::worker::{DispatchError, Dispatcher, TransformRequest, TransformResponse};

#[derive(Clone)]
pub struct AppState {
    pub cfg: config::SharedConfig,
    pub dispatcher: Dispatcher,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DitherPayload {
    #[serde(default)]
    pub id: Option<String>,
    pub image: RasterImage,
    #[serde(default)]
    pub options: DitheringOptions,
    /// Configured palette to use when `options.palette` is absent.
    #[serde(default)]
    pub palette_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub workers: usize,
    pub in_flight: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaletteEntry {
    pub input: String,
    pub hex: String,
    pub rgb: [u8; 3],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaletteResponse {
    pub name: String,
    pub colors: Vec<PaletteEntry>,
}

#[derive(Deserialize)]
pub struct PalettePayload {
    pub colors: Vec<String>,
}

// Logs all 4xx/5xx responses with method, URI, status and latency.
async fn log_error_responses(req: axum::extract::Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();
    let res = next.run(req).await;
    let status = res.status();
    if status.is_server_error() {
        tracing::error!(%method, %uri, %status, elapsed_ms = start.elapsed().as_millis(), "http 5xx");
    } else if status.is_client_error() {
        tracing::warn!(%method, %uri, %status, elapsed_ms = start.elapsed().as_millis(), "http 4xx");
    }
    res
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        workers: state.dispatcher.workers(),
        in_flight: state.dispatcher.in_flight(),
    })
}

pub async fn list_algorithms() -> Json<Vec<&'static str>> {
    Json(Algorithm::ALL.iter().map(|a| a.name()).collect())
}

pub async fn get_config(State(state): State<AppState>) -> Result<Json<config::Config>, StatusCode> {
    config::ConfigManager::to_struct(&state.cfg)
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

fn palette_response(name: &str, colors: &[String]) -> PaletteResponse {
    let mut out = Vec::with_capacity(colors.len());
    for s in colors {
        match config::parse_color(s) {
            Some([r, g, b]) => out.push(PaletteEntry {
                input: s.clone(),
                hex: format!("#{:02x}{:02x}{:02x}", r, g, b),
                rgb: [r, g, b],
            }),
            None => out.push(PaletteEntry {
                input: s.clone(),
                hex: String::from("invalid"),
                rgb: [0, 0, 0],
            }),
        }
    }
    PaletteResponse {
        name: name.to_string(),
        colors: out,
    }
}

pub async fn list_palettes(
    State(state): State<AppState>,
) -> Result<Json<Vec<PaletteResponse>>, StatusCode> {
    let cfg = config::ConfigManager::to_struct(&state.cfg)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(
        cfg.palettes
            .iter()
            .map(|(name, colors)| palette_response(name, colors))
            .collect(),
    ))
}

#[instrument(err, skip_all)]
pub async fn put_palette(
    Path(name): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<PalettePayload>,
) -> Result<Json<PaletteResponse>, StatusCode> {
    config::ConfigManager::set_palette(&state.cfg, &name, &payload.colors)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    config::ConfigManager::save(&state.cfg)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    tracing::info!(palette = %name, colors = payload.colors.len(), "palette saved");
    Ok(Json(palette_response(&name, &payload.colors)))
}

/// Fill `options.palette` from the named config palette unless one is given inline.
async fn apply_named_palette(
    state: &AppState,
    options: &mut DitheringOptions,
    name: Option<&str>,
) -> Result<(), StatusCode> {
    let Some(name) = name else { return Ok(()) };
    if options.palette.is_some() {
        return Ok(());
    }
    let cfg = config::ConfigManager::to_struct(&state.cfg)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let palette = cfg.palette(name).ok_or(StatusCode::NOT_FOUND)?;
    options.palette = Some(palette);
    Ok(())
}

fn dispatch_status(e: &DispatchError) -> StatusCode {
    match e {
        DispatchError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::DuplicateId(_) => StatusCode::CONFLICT,
    }
}

pub async fn dither_json(
    State(state): State<AppState>,
    Json(payload): Json<DitherPayload>,
) -> Result<(StatusCode, Json<TransformResponse>), StatusCode> {
    let DitherPayload {
        id,
        image,
        mut options,
        palette_name,
    } = payload;
    apply_named_palette(&state, &mut options, palette_name.as_deref()).await?;
    let id = id.unwrap_or_else(|| state.dispatcher.next_id());
    let response = state
        .dispatcher
        .submit(TransformRequest { id, image, options })
        .await
        .map_err(|e| dispatch_status(&e))?;
    let status = if response.is_success() {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(response)))
}

/// Multipart upload: `file` (encoded image), optional `options` (JSON) and `palette`
/// (configured palette name). Responds with the dithered image as PNG.
pub async fn dither_png(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, StatusCode> {
    let mut data: Option<Vec<u8>> = None;
    let mut options = DitheringOptions::default();
    let mut palette_name: Option<String> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("file") => {
                data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|_| StatusCode::BAD_REQUEST)?
                        .to_vec(),
                );
            }
            Some("options") => {
                let text = field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                options = serde_json::from_str(&text).map_err(|_| StatusCode::BAD_REQUEST)?;
            }
            Some("palette") => {
                palette_name = Some(field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?);
            }
            _ => {}
        }
    }
    let data = data.ok_or(StatusCode::BAD_REQUEST)?;
    apply_named_palette(&state, &mut options, palette_name.as_deref()).await?;

    let decoded = image::load_from_memory(&data).map_err(|e| {
        tracing::debug!(error = %e, "failed to decode uploaded image");
        StatusCode::BAD_REQUEST
    })?;
    let image = RasterImage::from(decoded.to_rgba8());
    let id = state.dispatcher.next_id();
    let response = state
        .dispatcher
        .submit(TransformRequest { id, image, options })
        .await
        .map_err(|e| dispatch_status(&e))?;
    if let Some(err) = response.error {
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, err).into_response());
    }

    let buf: RgbaImage = response
        .image
        .try_into()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let mut png_bytes = Vec::new();
    DynamicImage::ImageRgba8(buf)
        .write_to(
            &mut std::io::Cursor::new(&mut png_bytes),
            image::ImageFormat::Png,
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok((
        [
            (header::CONTENT_TYPE, mime::IMAGE_PNG.to_string()),
            (header::HeaderName::from_static("x-request-id"), response.id),
        ],
        png_bytes,
    )
        .into_response())
}

pub fn router(state: AppState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
        .on_failure(DefaultOnFailure::new().level(Level::ERROR));

    // Build API router and mount it under /api
    let api = Router::new()
        .route("/health", get(health))
        .route("/algorithms", get(list_algorithms))
        .route("/config", get(get_config))
        .route("/palettes", get(list_palettes))
        .route("/palettes/{name}", put(put_palette))
        .route("/dither", post(dither_json))
        .route("/dither/png", post(dither_png))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(trace)
        .layer(middleware::from_fn(log_error_responses));

    Router::new().nest("/api", api)
}

/// Serve the HTTP API. If `bind` is Some it is parsed as a socket address, otherwise
/// defaults to 0.0.0.0:8080.
pub async fn serve(app: Router, bind: Option<String>) -> anyhow::Result<()> {
    let bind_addr = bind.unwrap_or_else(|| "0.0.0.0:8080".to_string());
    let addr: SocketAddr = bind_addr.parse()?;
    tracing::info!(addr=%addr, "starting http server");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const CONFIG: &str = r##"
[engine]
workers = 2
queue_capacity = 4

[palettes]
duo = ["#ff0000", "black"]
"##;

    fn app_with_path(path: std::path::PathBuf) -> Router {
        let cfg = config::ConfigManager::from_text(path, CONFIG).unwrap();
        let state = AppState {
            cfg,
            dispatcher: Dispatcher::start(2, 4),
        };
        router(state, 1024 * 1024)
    }

    fn app() -> Router {
        app_with_path(std::path::PathBuf::from("unused.toml"))
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, axum::body::Bytes) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn lists_algorithms() {
        let (status, body) = send(app(), Request::get("/api/algorithms").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert_eq!(names.len(), Algorithm::ALL.len());
        assert!(names.contains(&"floyd-steinberg".to_string()));
        assert!(names.contains(&"crosshatch".to_string()));
    }

    #[tokio::test]
    async fn dithers_json_request() {
        let body = json!({
            "id": "scenario-a",
            "image": { "width": 2, "height": 2, "data": ([128u8, 128, 128, 255].repeat(4)) },
            "options": { "algorithm": "floyd-steinberg" }
        });
        let (status, body) = send(app(), post_json("/api/dither", body)).await;
        assert_eq!(status, StatusCode::OK);
        let resp: TransformResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.id, "scenario-a");
        assert!(resp.error.is_none());
        let firsts: Vec<u8> = resp.image.data.chunks_exact(4).map(|p| p[0]).collect();
        assert_eq!(firsts, vec![255, 0, 0, 255]);
    }

    #[tokio::test]
    async fn bad_dimensions_return_original_with_error() {
        let data = vec![10u8; 7];
        let body = json!({
            "id": "scenario-e",
            "image": { "width": 2, "height": 2, "data": data },
            "options": {}
        });
        let (status, body) = send(app(), post_json("/api/dither", body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let resp: TransformResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.id, "scenario-e");
        assert_eq!(resp.image.data, vec![10u8; 7]);
        assert!(resp.error.unwrap().contains("invalid image dimensions"));
    }

    #[tokio::test]
    async fn named_palette_is_applied() {
        let body = json!({
            "image": { "width": 3, "height": 3, "data": ([200u8, 40, 30, 255].repeat(9)) },
            "options": { "algorithm": "atkinson" },
            "paletteName": "duo"
        });
        let (status, body) = send(app(), post_json("/api/dither", body)).await;
        assert_eq!(status, StatusCode::OK);
        let resp: TransformResponse = serde_json::from_slice(&body).unwrap();
        assert!(resp.id.starts_with("req-"));
        for px in resp.image.data.chunks_exact(4) {
            assert!(px[..3] == [255, 0, 0] || px[..3] == [0, 0, 0]);
        }

        let body = json!({
            "image": { "width": 1, "height": 1, "data": [0,0,0,255] },
            "paletteName": "missing"
        });
        let (status, _) = send(app(), post_json("/api/dither", body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dithers_png_upload() {
        let src = RgbaImage::from_fn(8, 6, |x, y| image::Rgba([(x * 30) as u8, (y * 40) as u8, 90, 255]));
        let mut png = Vec::new();
        DynamicImage::ImageRgba8(src)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let boundary = "XBOUNDARYX";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"options\"\r\n\r\n{{\"algorithm\":\"bayer-8\"}}\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"in.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(&png);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let req = Request::post("/api/dither/png")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let out = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(out.dimensions(), (8, 6));
        for px in out.pixels() {
            assert!(px[0] == 0 || px[0] == 255);
        }
    }

    #[tokio::test]
    async fn rejects_undecodable_upload() {
        let boundary = "B";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"x.png\"\r\n\r\nnot an image\r\n--{boundary}--\r\n"
        );
        let req = Request::post("/api/dither/png")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();
        let (status, _) = send(app(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn put_palette_saves_config() {
        let path = std::env::temp_dir().join(format!(
            "dither-worker-http-test-{}.toml",
            std::process::id()
        ));
        let app = app_with_path(path.clone());
        let req = Request::put("/api/palettes/mono")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "colors": ["#000000", "white"] }).to_string()))
            .unwrap();
        let (status, body) = send(app.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["colors"][1]["hex"], "#ffffff");

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("mono"));
        let _ = std::fs::remove_file(&path);

        let (status, body) = send(app, Request::get("/api/palettes").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let v: Value = serde_json::from_slice(&body).unwrap();
        let names: Vec<&str> = v.as_array().unwrap().iter().map(|p| p["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["duo", "mono"]);
    }

    #[tokio::test]
    async fn health_reports_workers() {
        let (status, body) = send(app(), Request::get("/api/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["workers"], 2);
        assert_eq!(v["inFlight"], 0);
    }
}
