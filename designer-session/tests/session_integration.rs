//! Integration tests for the editing session (designer-session).
//!
//! Drives whole editing flows: variant load with a mask, ingest placement,
//! session recovery across reopen, templates, saved designs, cart hand-off
//! and preview regeneration.

use std::collections::BTreeMap;
use std::sync::Arc;

use designer_core::{
    current_timestamp_ms, CanvasObject, DesignSnapshot, DesignerConfig, DesignerError,
    Document, KeyValueStore, MemoryStore, ObjectKind, RasterImage, SessionPersistence,
    SessionRecord, ShapeKind, TemplateCatalog,
};
use designer_renderer::image::encode_raster_png;
use designer_renderer::to_data_uri;
use designer_session::{
    upload_and_attach, EditorSession, HttpFetcher, ImageFile, StaticVariantSource, TextStyle,
    UploadConfig,
};
use serde_json::json;
use tokio::sync::Mutex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VARIANT: &str = "1234";
const OTHER_VARIANT: &str = "5678";

fn png(raster: &RasterImage) -> Vec<u8> {
    encode_raster_png(raster).expect("png")
}

fn png_uri(raster: &RasterImage) -> String {
    to_data_uri(&png(raster), "image/png")
}

/// 100x100 mask whose opaque square spans pixels 25..75 on both axes.
fn centre_mask() -> RasterImage {
    let mut mask = RasterImage::filled(100, 100, [0, 0, 0, 0]);
    for y in 25..75u32 {
        for x in 25..75u32 {
            let i = ((y * 100 + x) * 4) as usize;
            mask.pixels[i..i + 4].copy_from_slice(&[255, 255, 255, 160]);
        }
    }
    mask
}

fn variants() -> StaticVariantSource {
    StaticVariantSource::new()
        .with_variant(
            VARIANT,
            png_uri(&RasterImage::filled(100, 100, [30, 60, 200, 255])),
            Some(png_uri(&centre_mask())),
        )
        .with_variant(
            OTHER_VARIANT,
            png_uri(&RasterImage::filled(80, 40, [200, 30, 30, 255])),
            None,
        )
}

fn image_file(width: u32, height: u32) -> ImageFile {
    ImageFile {
        name: "photo.png".to_string(),
        mime: "image/png".to_string(),
        bytes: png(&RasterImage::filled(width, height, [0, 120, 0, 255])),
    }
}

fn fetcher() -> HttpFetcher {
    HttpFetcher::new().expect("fetcher")
}

async fn open(store: &MemoryStore) -> EditorSession {
    let mut session = EditorSession::new(DesignerConfig::default(), Arc::new(store.clone()));
    session
        .load_variant(VARIANT, &variants(), &fetcher())
        .await
        .expect("variant loads");
    session
}

fn assert_layered(doc: &Document) {
    let order = doc.paint_order();
    assert_eq!(
        order.first().map(|o| o.id),
        doc.background().map(|o| o.id),
        "background must paint first"
    );
    if let Some(mask) = doc.mask() {
        assert_eq!(order.last().map(|o| o.id), Some(mask.id), "mask must paint last");
    }
}

#[tokio::test]
async fn test_ingest_lands_inside_clip_bounds() {
    let store = MemoryStore::new();
    let mut session = open(&store).await;

    let clip = session.document().clip_bounds().expect("mask has opaque pixels");
    assert!((clip.left - 125.0).abs() < 0.01);
    assert!((clip.width - 250.0).abs() < 0.01);

    let ingested = session.ingest(image_file(1000, 500)).expect("ingest");
    let obj = session.document().get(ingested.id).expect("placed");
    assert!((obj.scaled_width() - 200.0).abs() < 0.01);
    assert!((obj.scaled_height() - 100.0).abs() < 0.01);
    let bounds = obj.bounding_rect();
    assert!(bounds.left >= clip.left && bounds.left + bounds.width <= clip.left + clip.width);
    assert_layered(session.document());
}

#[tokio::test]
async fn test_session_is_recovered_on_reopen() {
    let store = MemoryStore::new();
    let mut first = open(&store).await;
    first.ingest(image_file(64, 64)).expect("ingest");
    first
        .add_text("Hello", &TextStyle::default())
        .expect("text");
    first.close();

    let second = open(&store).await;
    assert_eq!(second.document().user_objects().count(), 2);
    assert_eq!(second.history().len(), 1);
    assert!(!second.can_undo());
    assert_layered(second.document());
}

#[tokio::test]
async fn test_expired_session_is_not_restored() {
    let store = MemoryStore::new();
    let record = SessionRecord {
        variant_id: VARIANT.to_string(),
        user_objects: vec![CanvasObject::text("stale", 20.0, "Arial")],
        timestamp: current_timestamp_ms() - 3 * 60 * 60 * 1000,
    };
    let key = SessionPersistence::key(VARIANT);
    store
        .set(&key, &serde_json::to_string(&record).expect("json"))
        .expect("seed");

    let session = open(&store).await;
    assert_eq!(session.document().user_objects().count(), 0);
    assert!(store.get(&key).expect("store").is_none());
}

#[tokio::test]
async fn test_restore_skips_images_that_fail_to_load() {
    let store = MemoryStore::new();
    let record = SessionRecord {
        variant_id: VARIANT.to_string(),
        user_objects: vec![
            CanvasObject::image("/nonexistent/designer/missing.png", 10, 10),
            CanvasObject::text("kept", 20.0, "Arial"),
        ],
        timestamp: current_timestamp_ms(),
    };
    store
        .set(
            &SessionPersistence::key(VARIANT),
            &serde_json::to_string(&record).expect("json"),
        )
        .expect("seed");

    let session = open(&store).await;
    let kinds: Vec<_> = session
        .document()
        .user_objects()
        .map(CanvasObject::kind_name)
        .collect();
    assert_eq!(kinds, vec!["text"]);
}

#[tokio::test]
async fn test_unknown_variant_and_broken_layer() {
    let mut session = EditorSession::new(DesignerConfig::default(), Arc::new(MemoryStore::new()));
    let err = session
        .load_variant("nope", &variants(), &fetcher())
        .await
        .expect_err("unknown");
    assert!(matches!(err, DesignerError::NoVariant));

    let broken = StaticVariantSource::new().with_variant(
        "broken",
        "data:image/png;base64,AAAA",
        None,
    );
    let err = session
        .load_variant("broken", &broken, &fetcher())
        .await
        .expect_err("undecodable");
    assert!(matches!(err, DesignerError::AssetLoad(_)));
    assert!(!session.document().has_variant());
    assert!(session.variant_id().is_none());
}

#[tokio::test]
async fn test_template_with_replacements() {
    let store = MemoryStore::new();
    let mut session = open(&store).await;
    let catalog = TemplateCatalog::builtin().expect("builtin");
    let template = catalog.find("birthday-cake").expect("template");

    let replacements = BTreeMap::from([("Age Here".to_string(), "7".to_string())]);
    let ids = session
        .apply_template(template, Some(&replacements))
        .expect("applied");
    assert_eq!(ids.len(), 3);
    assert_eq!(session.history().len(), 2);

    let texts: Vec<_> = session
        .document()
        .user_objects()
        .filter_map(|o| match &o.kind {
            ObjectKind::Text { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert!(texts.contains(&"7".to_string()));
    assert!(!texts.iter().any(|t| t.contains("[Age Here]")));
    assert_layered(session.document());

    // The whole template is one undo step.
    assert!(session.can_undo());
    assert!(session.undo().expect("undo"));
    assert!(!session.can_undo());
    assert_eq!(session.document().user_objects().count(), 0);
}

#[tokio::test]
async fn test_saved_design_roundtrip() {
    let store = MemoryStore::new();
    let mut session = open(&store).await;
    session.add_text("Keep me", &TextStyle::default()).expect("text");
    let saved = session.save_design("  Team shirt ").expect("saved");
    assert_eq!(saved.name, "Team shirt");
    assert!(matches!(
        session.save_design(" "),
        Err(DesignerError::Validation(_))
    ));

    session.add_object(CanvasObject::shape(ShapeKind::Rect, 20.0, 20.0));
    assert_eq!(session.document().user_objects().count(), 2);

    let designs = session.saved_designs();
    assert_eq!(designs.len(), 1);
    let restored = session
        .load_saved_design(&designs[0], &fetcher())
        .await
        .expect("load");
    assert_eq!(restored, 1);
    assert_eq!(session.history().len(), 1);

    assert!(session
        .delete_design(&saved.name, saved.date)
        .expect("delete"));
    assert!(session.saved_designs().is_empty());
}

#[tokio::test]
async fn test_restore_design_json_ignores_fixed_entries() {
    let store = MemoryStore::new();
    let mut session = open(&store).await;
    let payload = json!({
        "objects": [
            { "type": "image", "src": "bg.png", "selectable": false },
            { "type": "text", "text": "From the cart", "left": 10, "top": 10 }
        ]
    })
    .to_string();

    let count = session
        .restore_design_json(&payload, &fetcher())
        .await
        .expect("restored");
    assert_eq!(count, 1);
    assert_layered(session.document());

    let err = session
        .restore_design_json("{ not json", &fetcher())
        .await
        .expect_err("malformed");
    assert!(err.is_user_facing());
    assert_eq!(session.document().user_objects().count(), 1);
}

#[tokio::test]
#[cfg_attr(
    target_os = "macos",
    ignore = "wiremock/reqwest system-configuration issue on macOS"
)]
async fn test_apply_design_embeds_preview_when_uploads_fail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let chain = UploadConfig {
        primary_url: Some(format!("{}/upload", server.uri())),
        nonce: Some("n".to_string()),
        cloudinary_cloud: Some("demo".to_string()),
        cloudinary_preset: Some("p".to_string()),
        cloudinary_folder: None,
        cloudinary_base_url: Some(server.uri()),
        timeout_ms: None,
    }
    .build_chain();
    assert_eq!(chain.len(), 2);

    let store = MemoryStore::new();
    let mut session = open(&store).await;
    session.add_text("Go team", &TextStyle::default()).expect("text");

    let attachment = session.apply_design(&chain).await.expect("hand-off");
    assert!(attachment.preview_url.starts_with("data:image/jpeg;base64,"));
    assert_eq!(attachment.element_count, 1);
    let snapshot =
        DesignSnapshot::from_json(&attachment.serialized_user_objects).expect("payload");
    assert_eq!(snapshot.len(), 1);
    assert!(session.document().selected().is_none());
}

#[tokio::test]
#[cfg_attr(
    target_os = "macos",
    ignore = "wiremock/reqwest system-configuration issue on macOS"
)]
async fn test_upload_swaps_in_hosted_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "url": "https://shop.example.com/uploads/photo.png" }
        })))
        .mount(&server)
        .await;
    let chain = UploadConfig {
        primary_url: Some(format!("{}/upload", server.uri())),
        ..UploadConfig::default()
    }
    .build_chain();

    let store = MemoryStore::new();
    let session = Mutex::new(open(&store).await);
    let ingested = session.lock().await.ingest(image_file(32, 32)).expect("ingest");

    let outcome = upload_and_attach(&session, &chain, ingested.upload).await;
    assert!(outcome.is_hosted());

    let guard = session.lock().await;
    let src = guard
        .document()
        .get(ingested.id)
        .and_then(CanvasObject::image_src)
        .map(ToString::to_string);
    assert_eq!(src.as_deref(), Some("https://shop.example.com/uploads/photo.png"));
    // Still renderable from the cached bytes.
    assert!(guard
        .renderer()
        .assets()
        .contains("https://shop.example.com/uploads/photo.png"));
}

#[tokio::test]
async fn test_regenerate_preview_for_another_variant() {
    let store = MemoryStore::new();
    let mut session = open(&store).await;
    session.add_text("Live", &TextStyle::default()).expect("text");
    let live = DesignSnapshot::capture(session.document());

    let payload = json!({ "objects": [ { "type": "text", "text": "Other", "left": 5, "top": 5 } ] })
        .to_string();
    let export = session
        .regenerate_preview(OTHER_VARIANT, &payload, &variants(), &fetcher())
        .await
        .expect("rendered");
    assert_eq!(export.mime, "image/png");
    assert!(!export.bytes.is_empty());
    assert_eq!(DesignSnapshot::capture(session.document()), live);

    assert!(session
        .regenerate_preview(OTHER_VARIANT, "nope", &variants(), &fetcher())
        .await
        .is_none());
    assert!(session
        .regenerate_preview("missing", &payload, &variants(), &fetcher())
        .await
        .is_none());
}
