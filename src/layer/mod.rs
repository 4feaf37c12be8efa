pub mod mbtiles;
pub mod memory;

use crate::{
    jobs::CancelToken,
    math::GeoExtent,
    pyramid::{Profile, TileKey},
    raster::{GeoHeightfield, GeoRaster},
};
use bevy::log::warn;
use serde_json::{json, Value};
use std::{
    fmt,
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc, RwLock,
    },
};

/// Classification of a failed operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// A file, URL, database, or tile is not there. For tile reads this
    /// means "no data here, try the parent".
    ResourceUnavailable,
    /// A site, plugin, or service could not be reached.
    ServiceUnavailable,
    /// Required data or properties are missing or malformed.
    ConfigurationError,
    /// An illegal software state was detected.
    AssertionFailure,
    /// The operation was canceled intentionally. Never an error.
    OperationCanceled,
    GeneralError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureKind::ResourceUnavailable => "Resource unavailable",
            FailureKind::ServiceUnavailable => "Service unavailable",
            FailureKind::ConfigurationError => "Configuration error",
            FailureKind::AssertionFailure => "Assertion failure",
            FailureKind::OperationCanceled => "Operation canceled",
            FailureKind::GeneralError => "General error",
        };
        f.write_str(text)
    }
}

/// A failure with an optional human-readable detail message.
#[derive(Clone, Debug, PartialEq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: Option<String>,
}

impl Failure {
    pub fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn message(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }
}

impl From<FailureKind> for Failure {
    fn from(kind: FailureKind) -> Self {
        Failure::new(kind)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.kind, message),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Failure {}

/// Ambient I/O state threaded through every tile fetch, most importantly
/// the cancelation flag workers check at I/O boundaries.
#[derive(Clone, Default, Debug)]
pub struct IoContext {
    pub cancel: CancelToken,
}

impl IoContext {
    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    pub fn canceled(&self) -> bool {
        self.cancel.canceled()
    }
}

/// What a driver learns about its upstream when it opens.
#[derive(Clone, Debug)]
pub struct SourceInfo {
    pub profile: Profile,
    /// Geographic region where data exists; INVALID means unknown.
    pub data_extent: GeoExtent,
    pub min_lod: u32,
    pub max_lod: u32,
}

/// Connection lifecycle shared by every tile source driver.
pub trait TileSource: Send + Sync {
    /// Driver name used as the `type` field in serialized form.
    fn type_name(&self) -> &'static str;

    /// Driver-specific configuration for serialization, or `Null` for
    /// sources that only exist at runtime.
    fn options_value(&self) -> Value {
        Value::Null
    }

    /// Establishes the upstream connection. Drivers whose native handles
    /// are not reentrant must guard or thread-localize them internally.
    fn open(&mut self, io: &IoContext) -> Result<SourceInfo, Failure>;

    fn close(&mut self) {}
}

pub trait ImageTileSource: TileSource {
    fn read_image(&self, key: &TileKey, io: &IoContext) -> Result<GeoRaster, Failure>;
}

pub trait ElevationTileSource: TileSource {
    fn read_heightfield(&self, key: &TileKey, io: &IoContext) -> Result<GeoHeightfield, Failure>;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum LayerStatus {
    #[default]
    Closed,
    Open,
    Failed(Failure),
}

fn next_uid() -> i32 {
    static NEXT: AtomicI32 = AtomicI32::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

struct LayerInner<S: ?Sized> {
    status: LayerStatus,
    info: Option<SourceInfo>,
    source: Box<S>,
}

/// Driver-independent layer state wrapped around a boxed tile source.
///
/// Reads share the state lock so tile queries do not block each other;
/// open and close take it exclusively.
pub struct TileLayer<S: TileSource + ?Sized> {
    uid: i32,
    pub name: String,
    pub attribution: Option<String>,
    pub open_automatically: bool,
    revision: AtomicI32,
    inner: RwLock<LayerInner<S>>,
}

pub type ImageLayer = TileLayer<dyn ImageTileSource>;
pub type ElevationLayer = TileLayer<dyn ElevationTileSource>;

impl<S: TileSource + ?Sized> TileLayer<S> {
    pub fn new(name: impl Into<String>, source: Box<S>) -> Self {
        Self {
            uid: next_uid(),
            name: name.into(),
            attribution: None,
            open_automatically: true,
            revision: AtomicI32::new(1),
            inner: RwLock::new(LayerInner {
                status: LayerStatus::Closed,
                info: None,
                source,
            }),
        }
    }

    /// Process-unique id, stable for the lifetime of the layer but not
    /// across runs.
    pub fn uid(&self) -> i32 {
        self.uid
    }

    /// Monotonic revision; bumping it invalidates downstream caches.
    pub fn revision(&self) -> i32 {
        self.revision.load(Ordering::Relaxed)
    }

    pub fn dirty(&self) {
        self.revision.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status(&self) -> LayerStatus {
        self.inner.read().unwrap().status.clone()
    }

    pub fn is_open(&self) -> bool {
        self.status() == LayerStatus::Open
    }

    pub fn profile(&self) -> Option<Profile> {
        self.inner
            .read()
            .unwrap()
            .info
            .as_ref()
            .map(|info| info.profile.clone())
    }

    pub fn info(&self) -> Option<SourceInfo> {
        self.inner.read().unwrap().info.clone()
    }

    /// Opens the upstream connection. Idempotent: opening an open layer is
    /// a no-op.
    pub fn open(&self, io: &IoContext) -> Result<(), Failure> {
        let mut inner = self.inner.write().unwrap();

        if inner.status == LayerStatus::Open {
            return Ok(());
        }

        match inner.source.open(io) {
            Ok(info) => {
                inner.info = Some(info);
                inner.status = LayerStatus::Open;
                Ok(())
            }
            Err(failure) => {
                inner.status = LayerStatus::Failed(failure.clone());
                Err(failure)
            }
        }
    }

    pub fn close(&self) {
        let mut inner = self.inner.write().unwrap();
        if inner.status == LayerStatus::Open {
            inner.source.close();
        }
        inner.status = LayerStatus::Closed;
        inner.info = None;
    }

    /// Whether this layer can possibly produce data for the key.
    pub fn may_have_data(&self, key: &TileKey) -> bool {
        match self.info() {
            Some(info) => !info.data_extent.valid() || info.data_extent.intersects(&key.extent()),
            None => false,
        }
    }

    fn check_readable(&self, io: &IoContext) -> Result<(), Failure> {
        if io.canceled() {
            return Err(FailureKind::OperationCanceled.into());
        }
        match self.status() {
            LayerStatus::Open => Ok(()),
            _ => Err(Failure::message(
                FailureKind::ResourceUnavailable,
                format!("layer \"{}\" is not open", self.name),
            )),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.inner.read().unwrap().source.type_name()
    }

    fn options_value(&self) -> Value {
        self.inner.read().unwrap().source.options_value()
    }
}

impl ImageLayer {
    /// Fetches the image for a tile. Fails fast when the layer is closed
    /// or failed.
    pub fn create_image(&self, key: &TileKey, io: &IoContext) -> Result<GeoRaster, Failure> {
        self.check_readable(io)?;
        self.inner.read().unwrap().source.read_image(key, io)
    }
}

impl ElevationLayer {
    /// Fetches the heightfield for a tile. Fails fast when the layer is
    /// closed or failed.
    pub fn create_heightfield(
        &self,
        key: &TileKey,
        io: &IoContext,
    ) -> Result<GeoHeightfield, Failure> {
        self.check_readable(io)?;
        self.inner.read().unwrap().source.read_heightfield(key, io)
    }
}

/// A map layer: one of the supported capability sets.
#[derive(Clone)]
pub enum Layer {
    Image(Arc<ImageLayer>),
    Elevation(Arc<ElevationLayer>),
}

impl Layer {
    pub fn image(layer: ImageLayer) -> Self {
        Layer::Image(Arc::new(layer))
    }

    pub fn elevation(layer: ElevationLayer) -> Self {
        Layer::Elevation(Arc::new(layer))
    }

    pub fn uid(&self) -> i32 {
        match self {
            Layer::Image(layer) => layer.uid(),
            Layer::Elevation(layer) => layer.uid(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Layer::Image(layer) => &layer.name,
            Layer::Elevation(layer) => &layer.name,
        }
    }

    pub fn revision(&self) -> i32 {
        match self {
            Layer::Image(layer) => layer.revision(),
            Layer::Elevation(layer) => layer.revision(),
        }
    }

    pub fn status(&self) -> LayerStatus {
        match self {
            Layer::Image(layer) => layer.status(),
            Layer::Elevation(layer) => layer.status(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status() == LayerStatus::Open
    }

    pub fn open_automatically(&self) -> bool {
        match self {
            Layer::Image(layer) => layer.open_automatically,
            Layer::Elevation(layer) => layer.open_automatically,
        }
    }

    pub fn open(&self, io: &IoContext) -> Result<(), Failure> {
        match self {
            Layer::Image(layer) => layer.open(io),
            Layer::Elevation(layer) => layer.open(io),
        }
    }

    pub fn close(&self) {
        match self {
            Layer::Image(layer) => layer.close(),
            Layer::Elevation(layer) => layer.close(),
        }
    }

    pub fn as_image(&self) -> Option<&Arc<ImageLayer>> {
        match self {
            Layer::Image(layer) => Some(layer),
            _ => None,
        }
    }

    pub fn as_elevation(&self) -> Option<&Arc<ElevationLayer>> {
        match self {
            Layer::Elevation(layer) => Some(layer),
            _ => None,
        }
    }

    /// Serialized form `{type, name, open, attribution, ...driver...}`.
    pub fn to_json(&self) -> Value {
        let (type_name, name, open, attribution, options) = match self {
            Layer::Image(layer) => (
                layer.type_name(),
                layer.name.clone(),
                layer.open_automatically,
                layer.attribution.clone(),
                layer.options_value(),
            ),
            Layer::Elevation(layer) => (
                layer.type_name(),
                layer.name.clone(),
                layer.open_automatically,
                layer.attribution.clone(),
                layer.options_value(),
            ),
        };

        let mut object = json!({
            "type": type_name,
            "name": name,
            "open": open,
        });

        if let Some(attribution) = attribution {
            object["attribution"] = json!(attribution);
        }
        if let Value::Object(options) = options {
            for (key, value) in options {
                object[key] = value;
            }
        }
        object
    }

    /// Builds a layer from its serialized form; the `type` field selects
    /// the driver.
    pub fn from_json(value: &Value) -> anyhow::Result<Layer> {
        let type_name = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("layer config is missing \"type\""))?;

        let name = value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let open = value.get("open").and_then(Value::as_bool).unwrap_or(true);
        let attribution = value
            .get("attribution")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut layer = match type_name {
            mbtiles::IMAGE_TYPE_NAME => {
                let options: mbtiles::MbtilesOptions = serde_json::from_value(value.clone())?;
                Layer::image(ImageLayer::new(
                    name,
                    Box::new(mbtiles::MbtilesImageSource::new(options)),
                ))
            }
            mbtiles::ELEVATION_TYPE_NAME => {
                let options: mbtiles::MbtilesOptions = serde_json::from_value(value.clone())?;
                Layer::elevation(ElevationLayer::new(
                    name,
                    Box::new(mbtiles::MbtilesElevationSource::new(options)),
                ))
            }
            other => {
                warn!("unknown layer type \"{other}\"");
                anyhow::bail!("unknown layer type \"{other}\"");
            }
        };

        match &mut layer {
            Layer::Image(l) => {
                let l = Arc::get_mut(l).unwrap();
                l.open_automatically = open;
                l.attribution = attribution;
            }
            Layer::Elevation(l) => {
                let l = Arc::get_mut(l).unwrap();
                l.open_automatically = open;
                l.attribution = attribution;
            }
        }

        Ok(layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::memory::MemoryImageSource;
    use crate::raster::{PixelFormat, Raster};

    #[test]
    fn failure_strings() {
        assert_eq!(
            Failure::new(FailureKind::ResourceUnavailable).to_string(),
            "Resource unavailable"
        );
        assert_eq!(
            Failure::message(FailureKind::GeneralError, "boom").to_string(),
            "General error: boom"
        );
    }

    #[test]
    fn closed_layer_fails_fast() {
        let profile = Profile::global_geodetic();
        let layer = ImageLayer::new("test", Box::new(MemoryImageSource::new(profile.clone())));
        let key = TileKey::new(0, 0, 0, profile);

        let err = layer.create_image(&key, &IoContext::default()).unwrap_err();
        assert_eq!(err.kind, FailureKind::ResourceUnavailable);
    }

    #[test]
    fn open_is_idempotent_and_revision_bumps() {
        let profile = Profile::global_geodetic();
        let layer = ImageLayer::new("test", Box::new(MemoryImageSource::new(profile)));
        let io = IoContext::default();

        assert!(layer.open(&io).is_ok());
        assert!(layer.is_open());
        assert!(layer.open(&io).is_ok());

        let before = layer.revision();
        layer.dirty();
        assert_eq!(layer.revision(), before + 1);

        layer.close();
        assert_eq!(layer.status(), LayerStatus::Closed);
    }

    #[test]
    fn canceled_read_reports_cancelation() {
        let profile = Profile::global_geodetic();
        let mut source = MemoryImageSource::new(profile.clone());
        let key = TileKey::new(0, 0, 0, profile);
        source.insert(&key, Raster::new(PixelFormat::Rgba8, 4, 4));

        let layer = ImageLayer::new("test", Box::new(source));
        layer.open(&IoContext::default()).unwrap();

        let io = IoContext::default();
        io.cancel.cancel();
        let err = layer.create_image(&key, &io).unwrap_err();
        assert_eq!(err.kind, FailureKind::OperationCanceled);
    }

    #[test]
    fn uids_are_process_unique() {
        let profile = Profile::global_geodetic();
        let a = ImageLayer::new("a", Box::new(MemoryImageSource::new(profile.clone())));
        let b = ImageLayer::new("b", Box::new(MemoryImageSource::new(profile)));
        assert_ne!(a.uid(), b.uid());
    }
}
