//! Export orchestration: dataset -> widget -> render -> convert -> PNG.

use crate::charts::ChartSpec;
use crate::codec::{self, EncodedImage};
use crate::dataset::DatasetRegistry;
use crate::frame;
use crate::gate::RenderGate;
use crate::widget::{DrawParam, WidgetBuilder};
use crate::{Error, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// One export call. Consumed by [`Exporter::export`], never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub dataset_id: String,
    pub draw_function: String,
    pub parameters: Vec<DrawParam>,
}

impl RenderRequest {
    pub fn new(
        dataset_id: impl Into<String>,
        draw_function: impl Into<String>,
        parameters: Vec<DrawParam>,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            draw_function: draw_function.into(),
            parameters,
        }
    }
}

pub struct Exporter {
    datasets: Arc<DatasetRegistry>,
    widgets: WidgetBuilder,
    gate: RenderGate,
    export_dir: Option<PathBuf>,
}

impl Exporter {
    pub fn new(datasets: Arc<DatasetRegistry>, widgets: WidgetBuilder, gate: RenderGate) -> Self {
        Self {
            datasets,
            widgets,
            gate,
            export_dir: None,
        }
    }

    /// Also write every chart export to `{dir}/{chart}.png`
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = Some(dir.into());
        self
    }

    pub fn datasets(&self) -> &DatasetRegistry {
        &self.datasets
    }

    pub fn widgets(&self) -> &WidgetBuilder {
        &self.widgets
    }

    pub fn gate(&self) -> &RenderGate {
        &self.gate
    }

    pub fn export_dir(&self) -> Option<&Path> {
        self.export_dir.as_deref()
    }

    /// Render one request to PNG. Nothing partial is returned on failure.
    pub async fn export(&self, request: &RenderRequest) -> Result<EncodedImage> {
        let started = Instant::now();
        let dataset = self.datasets.get(&request.dataset_id)?;
        let widget = self
            .widgets
            .build(dataset, &request.draw_function, &request.parameters)?;

        let raw = self.gate.render(&widget.address).await;
        // The widget file is only needed while the engine loads it.
        drop(widget);

        let rgba = frame::convert(raw?)?;
        let image = codec::encode_png(&rgba)?;
        info!(
            "Exported {} ({}x{}, {} bytes) in {:?}",
            request.dataset_id,
            image.width,
            image.height,
            image.bytes.len(),
            started.elapsed()
        );
        Ok(image)
    }

    /// Export a catalogue chart and persist it when an export dir is set
    pub async fn export_chart(
        &self,
        chart: &ChartSpec,
        parameters: Vec<DrawParam>,
    ) -> Result<EncodedImage> {
        let request = RenderRequest::new(chart.dataset_id, chart.draw_function, parameters);
        let image = self.export(&request).await?;
        if let Some(dir) = &self.export_dir {
            let path = persist(dir, chart.name, &image)?;
            debug!("Saved {} to {}", chart.name, path.display());
        }
        Ok(image)
    }
}

/// Write `image` to `{dir}/{name}.{ext}` through a temp file and a rename,
/// so readers never observe a half-written image.
pub fn persist(dir: &Path, name: &str, image: &EncodedImage) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let target = dir.join(format!("{}.{}", name, image.format.extension()));
    let tmp = dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()));

    if let Err(e) = std::fs::write(&tmp, &image.bytes) {
        let _ = std::fs::remove_file(&tmp);
        return Err(Error::Io(e));
    }
    if let Err(e) = std::fs::rename(&tmp, &target) {
        let _ = std::fs::remove_file(&tmp);
        return Err(Error::Io(e));
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ImageFormat;

    #[test]
    fn persist_replaces_existing_file() {
        let dir = std::env::temp_dir().join(format!("chartshot-persist-{}", Uuid::new_v4()));
        let image = |bytes: &[u8]| EncodedImage {
            format: ImageFormat::Png,
            width: 1,
            height: 1,
            bytes: bytes.to_vec(),
        };

        let path = persist(&dir, "chart", &image(b"first")).unwrap();
        assert_eq!(path, dir.join("chart.png"));
        persist(&dir, "chart", &image(b"second")).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");

        // No temp files left behind.
        let names: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn request_new_keeps_parameter_order() {
        let r = RenderRequest::new("ds", "window.draw", vec![1i64.into(), "x".into()]);
        assert_eq!(r.parameters, vec![DrawParam::Int(1), DrawParam::Text("x".into())]);
    }
}
