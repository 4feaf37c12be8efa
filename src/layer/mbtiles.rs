use crate::{
    layer::{
        ElevationTileSource, Failure, FailureKind, ImageTileSource, IoContext, SourceInfo,
        TileSource,
    },
    math::GeoExtent,
    pyramid::{Profile, TileKey},
    raster::{GeoHeightfield, GeoRaster, Heightfield, PixelFormat, Raster},
};
use bevy::log::{trace, warn};
use flate2::read::ZlibDecoder;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use std::sync::Mutex;

pub const IMAGE_TYPE_NAME: &str = "mbtiles.image";
pub const ELEVATION_TYPE_NAME: &str = "mbtiles.elevation";

/// Configuration of an MBTiles-backed layer.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MbtilesOptions {
    /// Path of the SQLite database.
    pub uri: String,
    /// Tile format (extension such as "png", "jpg", "tif"). Superseded by
    /// the database's own `format` metadata when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Open the database writable, creating it if missing. Requires
    /// `profile` and `format` for a new database.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub writable: bool,
    /// Profile for a newly created database.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    /// Compress stored blobs with zlib (new databases only; existing
    /// databases declare it in metadata).
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub compress: bool,
}

fn general(e: impl std::fmt::Display) -> Failure {
    Failure::message(FailureKind::GeneralError, e.to_string())
}

/// The shared SQLite driver. The connection is not reentrant, so all
/// access funnels through one mutex.
struct Driver {
    connection: Mutex<Connection>,
    format: String,
    compressed: bool,
    min_level: u32,
    max_level: u32,
}

impl Driver {
    fn open(options: &MbtilesOptions) -> Result<(Driver, SourceInfo), Failure> {
        let exists = std::path::Path::new(&options.uri).exists();
        let creating = options.writable && !exists;

        if creating {
            if options.profile.is_none() {
                return Err(Failure::message(
                    FailureKind::ConfigurationError,
                    "cannot create database; required profile is missing",
                ));
            }
            if options.format.is_none() {
                return Err(Failure::message(
                    FailureKind::ConfigurationError,
                    "cannot create database; required format property is missing",
                ));
            }
        } else if !exists && !options.writable {
            return Err(Failure::message(
                FailureKind::ResourceUnavailable,
                format!("database \"{}\" does not exist", options.uri),
            ));
        }

        let flags = if options.writable {
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        };

        let connection = Connection::open_with_flags(&options.uri, flags).map_err(|e| {
            Failure::message(
                FailureKind::ResourceUnavailable,
                format!("database \"{}\": {e}", options.uri),
            )
        })?;

        let mut driver = Driver {
            connection: Mutex::new(connection),
            format: options.format.clone().unwrap_or_default(),
            compressed: options.compress,
            min_level: 0,
            max_level: 0,
        };

        let profile;

        if creating {
            driver.create_tables()?;

            profile = options.profile.clone().unwrap();
            driver.put_metadata("profile", &profile.to_json())?;
            driver.put_metadata("format", &driver.format.clone())?;
            if options.compress {
                driver.put_metadata("compression", "zlib")?;
            }
        } else {
            driver.compute_levels()?;

            // the database's own format wins over the options
            if let Some(format) = driver.get_metadata("format")? {
                if !driver.format.is_empty() && driver.format != format {
                    warn!(
                        "database tile format ({format}) overrides the layer options format ({})",
                        driver.format
                    );
                }
                driver.format = format;
            }
            if driver.format.is_empty() {
                return Err(Failure::message(
                    FailureKind::ConfigurationError,
                    "required format not in metadata, nor specified in the options",
                ));
            }

            driver.compressed = matches!(
                driver.get_metadata("compression")?.as_deref(),
                Some("zlib")
            );

            profile = match driver.get_metadata("profile")? {
                Some(text) => parse_profile(&text).unwrap_or_else(|| {
                    warn!("profile \"{text}\" not recognized; defaulting to spherical-mercator");
                    Profile::spherical_mercator()
                }),
                None => Profile::spherical_mercator(),
            };
        }

        // bounds metadata limits the data extent; without it, assume the
        // whole profile
        let data_extent = match driver.get_metadata("bounds")? {
            Some(bounds) => parse_bounds(&bounds, &profile).unwrap_or_else(|| {
                warn!("mbtiles has invalid bounds \"{bounds}\"");
                *profile.extent()
            }),
            None => *profile.extent(),
        };

        let info = SourceInfo {
            profile,
            data_extent,
            min_lod: driver.min_level,
            max_lod: driver.max_level,
        };

        Ok((driver, info))
    }

    fn create_tables(&self) -> Result<(), Failure> {
        let connection = self.connection.lock().unwrap();

        connection
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS metadata (name text PRIMARY KEY, value text);
                 CREATE TABLE IF NOT EXISTS tiles (
                     zoom_level integer,
                     tile_column integer,
                     tile_row integer,
                     tile_data blob);
                 CREATE UNIQUE INDEX IF NOT EXISTS tile_index
                     ON tiles (zoom_level, tile_column, tile_row);",
            )
            .map_err(general)
    }

    fn compute_levels(&mut self) -> Result<(), Failure> {
        let connection = self.connection.lock().unwrap();

        // separate subqueries so sqlite can answer each from the index
        let result: Option<(Option<i64>, Option<i64>)> = connection
            .query_row(
                "SELECT (SELECT min(zoom_level) FROM tiles), (SELECT max(zoom_level) FROM tiles)",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(general)?;

        if let Some((Some(min), Some(max))) = result {
            self.min_level = min.max(0) as u32;
            self.max_level = max.max(0) as u32;
        }
        Ok(())
    }

    fn get_metadata(&self, name: &str) -> Result<Option<String>, Failure> {
        let connection = self.connection.lock().unwrap();
        connection
            .query_row("SELECT value FROM metadata WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()
            .map_err(general)
    }

    fn put_metadata(&self, name: &str, value: &str) -> Result<(), Failure> {
        let connection = self.connection.lock().unwrap();
        connection
            .execute(
                "INSERT OR REPLACE INTO metadata (name, value) VALUES (?1, ?2)",
                [name, value],
            )
            .map(|_| ())
            .map_err(general)
    }

    /// Reads one tile blob, inflating it if the store is compressed.
    /// The stored row axis is inverted relative to the key's.
    fn read_blob(&self, key: &TileKey) -> Result<Vec<u8>, Failure> {
        if key.lod < self.min_level || key.lod > self.max_level {
            return Err(FailureKind::ResourceUnavailable.into());
        }

        let (_, num_rows) = key.profile.num_tiles(key.lod);
        let row = num_rows - key.y - 1;

        trace!("mbtiles read {} (stored row {row})", key);

        let blob: Option<Vec<u8>> = {
            let connection = self.connection.lock().unwrap();
            connection
                .query_row(
                    "SELECT tile_data FROM tiles
                     WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
                    [key.lod as i64, key.x as i64, row as i64],
                    |r| r.get(0),
                )
                .optional()
                .map_err(general)?
        };

        let blob = blob.ok_or(Failure::new(FailureKind::ResourceUnavailable))?;

        if self.compressed {
            let mut inflated = Vec::new();
            ZlibDecoder::new(Cursor::new(blob))
                .read_to_end(&mut inflated)
                .map_err(|e| Failure::message(FailureKind::GeneralError, format!("inflate: {e}")))?;
            Ok(inflated)
        } else {
            Ok(blob)
        }
    }

    /// Writes one tile blob with the row axis inverted, deflating it if
    /// the store is compressed.
    fn write_blob(&mut self, key: &TileKey, data: &[u8]) -> Result<(), Failure> {
        let (_, num_rows) = key.profile.num_tiles(key.lod);
        let row = num_rows - key.y - 1;

        let deflated;
        let payload: &[u8] = if self.compressed {
            let mut encoder =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            std::io::Write::write_all(&mut encoder, data).map_err(general)?;
            deflated = encoder.finish().map_err(general)?;
            &deflated
        } else {
            data
        };

        {
            let connection = self.connection.lock().unwrap();
            connection
                .execute(
                    "INSERT OR REPLACE INTO tiles
                     (zoom_level, tile_column, tile_row, tile_data) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![key.lod as i64, key.x as i64, row as i64, payload],
                )
                .map_err(general)?;
        }

        self.max_level = self.max_level.max(key.lod);
        self.min_level = self.min_level.min(key.lod);
        Ok(())
    }
}

fn parse_profile(text: &str) -> Option<Profile> {
    Profile::from_json(text)
        .ok()
        .or_else(|| Profile::well_known(text))
}

fn parse_bounds(text: &str, profile: &Profile) -> Option<GeoExtent> {
    let parts: Vec<f64> = text
        .split(',')
        .map(|t| t.trim().parse().ok())
        .collect::<Option<_>>()?;
    if parts.len() != 4 {
        return None;
    }

    let extent = GeoExtent::new(
        profile.srs().geodetic_srs(),
        parts[0],
        parts[1],
        parts[2],
        parts[3],
    );
    extent.valid().then_some(extent)
}

/// An imagery layer reading png/jpeg/webp tiles from an MBTiles store.
pub struct MbtilesImageSource {
    options: MbtilesOptions,
    driver: Option<Driver>,
}

impl MbtilesImageSource {
    pub fn new(options: MbtilesOptions) -> Self {
        Self {
            options,
            driver: None,
        }
    }

    fn driver(&self) -> Result<&Driver, Failure> {
        self.driver
            .as_ref()
            .ok_or(Failure::new(FailureKind::ResourceUnavailable))
    }

    /// Encodes and stores a tile; the store must be open writable.
    pub fn write_image(&mut self, key: &TileKey, raster: &Raster) -> Result<(), Failure> {
        let driver = self
            .driver
            .as_mut()
            .ok_or(Failure::new(FailureKind::ResourceUnavailable))?;

        // rasters are bottom-up, image rows top-down
        let mut flipped = raster.clone();
        flipped.flip_vertical();

        let image = image::RgbaImage::from_raw(
            flipped.width(),
            flipped.height(),
            flipped.into_data(),
        )
        .ok_or(Failure::message(
            FailureKind::AssertionFailure,
            "raster is not rgba8",
        ))?;

        let mut bytes = Cursor::new(Vec::new());
        image
            .write_to(&mut bytes, image::ImageFormat::Png)
            .map_err(general)?;

        driver.write_blob(key, &bytes.into_inner())
    }
}

impl TileSource for MbtilesImageSource {
    fn type_name(&self) -> &'static str {
        IMAGE_TYPE_NAME
    }

    fn options_value(&self) -> serde_json::Value {
        serde_json::to_value(&self.options).unwrap_or_default()
    }

    fn open(&mut self, _io: &IoContext) -> Result<SourceInfo, Failure> {
        let (driver, info) = Driver::open(&self.options)?;
        self.driver = Some(driver);
        Ok(info)
    }

    fn close(&mut self) {
        self.driver = None;
    }
}

impl ImageTileSource for MbtilesImageSource {
    fn read_image(&self, key: &TileKey, io: &IoContext) -> Result<GeoRaster, Failure> {
        if io.canceled() {
            return Err(FailureKind::OperationCanceled.into());
        }

        let blob = self.driver()?.read_blob(key)?;

        let decoded = image::load_from_memory(&blob)
            .map_err(|e| Failure::message(FailureKind::GeneralError, format!("decode: {e}")))?
            .to_rgba8();

        let mut raster = Raster::from_bytes(
            PixelFormat::Rgba8,
            decoded.width(),
            decoded.height(),
            decoded.into_raw(),
        )
        .ok_or(Failure::message(
            FailureKind::AssertionFailure,
            "decoded image has inconsistent size",
        ))?;

        // image rows are top-down, rasters are bottom-up
        raster.flip_vertical();

        Ok(GeoRaster::new(raster, key.extent()))
    }
}

/// An elevation layer reading 32-bit float GeoTIFF tiles from an MBTiles
/// store.
pub struct MbtilesElevationSource {
    options: MbtilesOptions,
    driver: Option<Driver>,
}

impl MbtilesElevationSource {
    pub fn new(options: MbtilesOptions) -> Self {
        Self {
            options,
            driver: None,
        }
    }

    fn driver(&self) -> Result<&Driver, Failure> {
        self.driver
            .as_ref()
            .ok_or(Failure::new(FailureKind::ResourceUnavailable))
    }

    /// Encodes and stores a heightfield tile; the store must be open
    /// writable with a tif format.
    pub fn write_heightfield(
        &mut self,
        key: &TileKey,
        heightfield: &Heightfield,
    ) -> Result<(), Failure> {
        let driver = self
            .driver
            .as_mut()
            .ok_or(Failure::new(FailureKind::ResourceUnavailable))?;

        // heightfields are bottom-up, tiff rows top-down
        let width = heightfield.width();
        let height = heightfield.height();
        let mut rows: Vec<f32> = Vec::with_capacity((width * height) as usize);
        for r in (0..height).rev() {
            for c in 0..width {
                rows.push(heightfield.height_at(c, r));
            }
        }

        let mut bytes = Cursor::new(Vec::new());
        tiff::encoder::TiffEncoder::new(&mut bytes)
            .map_err(general)?
            .write_image::<tiff::encoder::colortype::Gray32Float>(width, height, &rows)
            .map_err(general)?;

        driver.write_blob(key, &bytes.into_inner())
    }
}

impl TileSource for MbtilesElevationSource {
    fn type_name(&self) -> &'static str {
        ELEVATION_TYPE_NAME
    }

    fn options_value(&self) -> serde_json::Value {
        serde_json::to_value(&self.options).unwrap_or_default()
    }

    fn open(&mut self, _io: &IoContext) -> Result<SourceInfo, Failure> {
        let (driver, info) = Driver::open(&self.options)?;

        if !matches!(driver.format.as_str(), "tif" | "tiff") {
            return Err(Failure::message(
                FailureKind::ConfigurationError,
                format!("elevation requires a tif store, found \"{}\"", driver.format),
            ));
        }

        self.driver = Some(driver);
        Ok(info)
    }

    fn close(&mut self) {
        self.driver = None;
    }
}

impl ElevationTileSource for MbtilesElevationSource {
    fn read_heightfield(&self, key: &TileKey, io: &IoContext) -> Result<GeoHeightfield, Failure> {
        if io.canceled() {
            return Err(FailureKind::OperationCanceled.into());
        }

        let blob = self.driver()?.read_blob(key)?;
        let heightfield = decode_tiff_heightfield(&blob)?;

        Ok(GeoHeightfield::new(heightfield, key.extent()))
    }
}

fn decode_tiff_heightfield(blob: &[u8]) -> Result<Heightfield, Failure> {
    use tiff::decoder::DecodingResult;

    let mut decoder = tiff::decoder::Decoder::new(Cursor::new(blob))
        .map_err(|e| Failure::message(FailureKind::GeneralError, format!("tiff: {e}")))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| Failure::message(FailureKind::GeneralError, format!("tiff: {e}")))?;

    let heights: Vec<f32> = match decoder
        .read_image()
        .map_err(|e| Failure::message(FailureKind::GeneralError, format!("tiff: {e}")))?
    {
        DecodingResult::F32(data) => data,
        DecodingResult::I16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U16(data) => data.into_iter().map(|v| v as f32).collect(),
        _ => {
            return Err(Failure::message(
                FailureKind::ConfigurationError,
                "unsupported tiff sample format for elevation",
            ))
        }
    };

    if heights.len() != (width * height) as usize {
        return Err(Failure::message(
            FailureKind::GeneralError,
            "tiff data does not match its dimensions",
        ));
    }

    // tiff rows are top-down, heightfields bottom-up
    let mut heightfield = Heightfield::new(width, height);
    for (i, h) in heights.into_iter().enumerate() {
        let row = height - 1 - i as u32 / width;
        heightfield.set_height(i as u32 % width, row, h);
    }
    Ok(heightfield)
}
