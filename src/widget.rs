//! Chart widgets: one-shot HTML documents that draw a dataset on a canvas.
//!
//! A widget embeds the dataset CSV and the draw call's arguments as JSON
//! literals inside an inline script, next to a `<script src>` for the shared
//! charting bundle. Each build writes a fresh file whose name carries a
//! per-build token, so concurrent builds for the same dataset never touch the
//! same address. The file is removed when the [`Widget`] is dropped.

use crate::dataset::Dataset;
use crate::{Error, Result};
use log::{debug, warn};
use serde_json::Value;
use std::path::{Path, PathBuf};
use url::Url;
use uuid::Uuid;

/// Default name of the charting bundle loaded by every widget
pub const DEFAULT_CHART_SCRIPT: &str = "charts.js";

/// A positional argument of a chart drawing function
#[derive(Debug, Clone, PartialEq)]
pub enum DrawParam {
    /// Lets the drawing function fall back to its own default
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    /// A structured options object
    Object(serde_json::Map<String, Value>),
}

impl DrawParam {
    pub fn to_json(&self) -> Value {
        match self {
            DrawParam::Null => Value::Null,
            DrawParam::Bool(b) => Value::Bool(*b),
            DrawParam::Int(i) => Value::from(*i),
            DrawParam::Text(s) => Value::String(s.clone()),
            DrawParam::Object(map) => Value::Object(map.clone()),
        }
    }
}

impl From<bool> for DrawParam {
    fn from(v: bool) -> Self {
        DrawParam::Bool(v)
    }
}

impl From<i64> for DrawParam {
    fn from(v: i64) -> Self {
        DrawParam::Int(v)
    }
}

impl From<&str> for DrawParam {
    fn from(v: &str) -> Self {
        DrawParam::Text(v.to_string())
    }
}

impl From<String> for DrawParam {
    fn from(v: String) -> Self {
        DrawParam::Text(v)
    }
}

impl<T: Into<DrawParam>> From<Option<T>> for DrawParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(DrawParam::Null)
    }
}

/// A widget document written to disk for a single render pass
#[derive(Debug)]
pub struct Widget {
    /// `file://` URL the engine navigates to
    pub address: String,
    pub markup: String,
    path: PathBuf,
}

impl Widget {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Widget {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove widget {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Builds widget documents inside a directory that also holds the charting bundle
#[derive(Debug, Clone)]
pub struct WidgetBuilder {
    dir: PathBuf,
    chart_script: String,
}

impl WidgetBuilder {
    /// Create a builder writing into `dir` (created if absent)
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::ResourceError(format!("Unable to create widget dir `{}`: {}", dir.display(), e))
        })?;
        // File URLs need an absolute path.
        let dir = dir.canonicalize().map_err(|e| {
            Error::ResourceError(format!("Unable to resolve widget dir `{}`: {}", dir.display(), e))
        })?;
        Ok(Self {
            dir,
            chart_script: DEFAULT_CHART_SCRIPT.to_string(),
        })
    }

    /// Use a different charting bundle name
    pub fn with_chart_script(mut self, name: impl Into<String>) -> Self {
        self.chart_script = name.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fail unless the charting bundle is present next to the widgets
    pub fn verify_chart_script(&self) -> Result<()> {
        let path = self.dir.join(&self.chart_script);
        if !path.is_file() {
            return Err(Error::ResourceError(format!(
                "Charting script `{}` is missing",
                path.display()
            )));
        }
        Ok(())
    }

    /// Render the widget markup without touching the filesystem
    pub fn markup(
        &self,
        dataset: &Dataset,
        draw_function: &str,
        params: &[DrawParam],
    ) -> Result<String> {
        if dataset.csv_content.is_empty() {
            return Err(Error::ResourceError(format!(
                "Dataset `{}` has no CSV content",
                dataset.id
            )));
        }
        validate_function_name(draw_function)?;

        let mut args = vec![script_json(&Value::String(dataset.id.clone()))];
        args.push("parsedData".to_string());
        args.extend(params.iter().map(|p| script_json(&p.to_json())));

        Ok(format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>html, body {{ margin: 0; padding: 0; background: #ffffff; }}</style>
<script type="text/javascript">{hook}</script>
</head>
<body>
<canvas id="{canvas}"></canvas>
<script type="text/javascript" src="{script}"></script>
<script type="text/javascript">
if (window.Chart && window.Chart.defaults) {{ window.Chart.defaults.animation = false; }}
const data = {data};
const parsedData = window.csvToArray(data);
{draw}({args});
window.__widgetDone = true;
</script>
</body>
</html>
"#,
            hook = ERROR_HOOK,
            canvas = escape_attr(&dataset.id),
            script = escape_attr(&self.chart_script),
            data = script_json(&Value::String(dataset.csv_content.clone())),
            draw = draw_function,
            args = args.join(", "),
        ))
    }

    /// Build the widget and write it to a fresh, uniquely named file
    pub fn build(
        &self,
        dataset: &Dataset,
        draw_function: &str,
        params: &[DrawParam],
    ) -> Result<Widget> {
        let markup = self.markup(dataset, draw_function, params)?;
        let file_name = format!("{}-{}.html", file_stem(&dataset.id), Uuid::new_v4().simple());
        let path = self.dir.join(file_name);

        std::fs::write(&path, &markup).map_err(|e| {
            Error::ResourceError(format!("Unable to write widget `{}`: {}", path.display(), e))
        })?;

        // From here on the Widget owns the file and removes it on drop.
        let mut widget = Widget {
            address: String::new(),
            markup,
            path,
        };
        widget.address = Url::from_file_path(&widget.path)
            .map_err(|_| {
                Error::ResourceError(format!(
                    "Widget path `{}` has no file URL",
                    widget.path.display()
                ))
            })?
            .to_string();
        debug!("Built widget {}", widget.address);
        Ok(widget)
    }
}

/// Installed before any other script so drawing failures are observable
const ERROR_HOOK: &str = "window.__widgetErrors = []; window.__widgetDone = false; \
window.addEventListener('error', function (e) { \
window.__widgetErrors.push(String(e.message || e)); }); \
window.addEventListener('unhandledrejection', function (e) { \
window.__widgetErrors.push(String(e.reason)); });";

/// Serialize a JSON value so it can sit inside an inline `<script>` element.
///
/// `<` only ever occurs inside JSON strings, so escaping every one of them
/// rules out `</script>` and `<!--`. U+2028/U+2029 are escaped for older JS
/// parsers that treat them as line terminators inside string literals.
pub fn script_json(value: &Value) -> String {
    let mut out = String::new();
    for c in value.to_string().chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Accept dotted JS identifier paths such as `window.drawChart`
fn validate_function_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.split('.').all(|seg| {
            let mut chars = seg.chars();
            match chars.next() {
                Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
                }
                _ => false,
            }
        });
    if ok {
        Ok(())
    } else {
        Err(Error::ConfigError(format!("Illegal draw function name `{}`", name)))
    }
}
