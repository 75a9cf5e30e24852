use std::fs;
use std::path::PathBuf;

use chartshot::codec::decode_png;
use chartshot::dataset::{DatasetRegistry, DirResourceStore};
use chartshot::export::Exporter;
use chartshot::gate::RenderGate;
use chartshot::widget::WidgetBuilder;
use chartshot::{Backend, EngineConfig, Viewport};
use sha2::{Digest, Sha256};
use std::sync::Arc;

fn golden_path(name: &str) -> PathBuf {
    let mut p = PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/goldens"));
    p.push(name);
    p
}

/// The digest covers the decoded pixels rather than the PNG bytes, so it
/// holds across zlib backends and compression settings of the png crate.
#[tokio::test]
async fn golden_export_matches_fixture() {
    let store = DirResourceStore::new(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/resources"
    ));
    let datasets = DatasetRegistry::load(&store, &["fossil-fuels-consumption"]).unwrap();
    let config = EngineConfig {
        viewport: Viewport { width: 256, height: 128 },
        ..Default::default()
    };
    let factory = Backend::Software.factory(config.clone());
    let gate = RenderGate::start(factory, config.render_timeout()).await.unwrap();
    let widgets = std::env::temp_dir().join(format!("chartshot-golden-{}", uuid::Uuid::new_v4()));
    let exporter = Exporter::new(Arc::new(datasets), WidgetBuilder::new(widgets).unwrap(), gate);

    let chart = chartshot::charts::find("fossil-fuels-consumption").unwrap();
    let params = chart.params_from_query("type=line&labels=true&xmin=1990").unwrap();
    let image = exporter.export_chart(chart, params).await.unwrap();

    let decoded = decode_png(&image.bytes).unwrap();
    assert_eq!((decoded.width, decoded.height), (256, 128));
    let digest = hex::encode(Sha256::digest(&decoded.pixels));

    let expected_path = golden_path("fossil-fuels-consumption.sha256");
    if std::env::var("UPDATE_GOLDENS").is_ok() {
        fs::create_dir_all(golden_path("")).ok();
        fs::write(&expected_path, &digest).expect("write golden");
        println!("Updated golden: {:?}", expected_path);
        return;
    }

    let expected = fs::read_to_string(&expected_path).unwrap_or_else(|e| {
        panic!(
            "No golden at {:?} ({}); run with UPDATE_GOLDENS=1 to create it",
            expected_path, e
        )
    });
    assert_eq!(digest, expected.trim());
}
