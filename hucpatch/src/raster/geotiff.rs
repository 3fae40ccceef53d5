//! GeoTIFF header parsing, pixel decoding and patch encoding.
//!
//! Only the subset the export service produces is supported: chunky
//! (band-interleaved) images with one or three samples per pixel, north-up
//! georeferencing via `ModelPixelScale` + `ModelTiepoint` or
//! `ModelTransformation`, an EPSG code in the GeoKey directory, and a
//! `GDAL_NODATA` tag.

use std::fs::{self, File};
use std::io::{BufReader, Cursor};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{self, ColorType as EncodeColor};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;
use tiff::{ColorType, TiffResult};

use super::geotransform::GeoTransform;
use super::pixels::{PixelData, SampleType};
use super::RasterError;
use crate::coord::Crs;

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_MODEL_TRANSFORMATION: u16 = 34264;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const KEY_MODEL_TYPE: u16 = 1024;
const KEY_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;
const USER_DEFINED: u16 = 32767;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const RASTER_PIXEL_IS_POINT: u16 = 2;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Everything needed to address a GeoTIFF without decoding its pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoTiffHeader {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub sample_type: SampleType,
    pub transform: GeoTransform,
    pub crs: Crs,
    pub nodata: f64,
}

/// A georeferenced image ready to be encoded.
#[derive(Debug, Clone, Copy)]
pub struct GeoTiffImage<'a> {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
    pub nodata: f64,
    pub pixels: &'a PixelData,
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>, RasterError> {
    let meta = fs::metadata(path).map_err(|e| RasterError::unreadable(path, e.to_string()))?;
    if !meta.is_file() {
        return Err(RasterError::unreadable(path, "not a regular file"));
    }
    if meta.len() == 0 {
        return Err(RasterError::unreadable(path, "file is empty"));
    }
    let file = File::open(path).map_err(|e| RasterError::unreadable(path, e.to_string()))?;
    Decoder::new(BufReader::new(file))
        .map(|d| d.with_limits(Limits::unlimited()))
        .map_err(|e| RasterError::unreadable(path, format!("invalid TIFF: {}", e)))
}

/// Read and validate the header of a GeoTIFF.
pub fn read_header(path: &Path) -> Result<GeoTiffHeader, RasterError> {
    let mut decoder = open_decoder(path)?;
    parse_header(&mut decoder).map_err(|reason| RasterError::unreadable(path, reason))
}

fn parse_header(decoder: &mut Decoder<BufReader<File>>) -> Result<GeoTiffHeader, String> {
    let err = |e: tiff::TiffError| e.to_string();

    let (width, height) = decoder.dimensions().map_err(err)?;
    if width == 0 || height == 0 {
        return Err("image has no pixels".to_string());
    }

    let (bands, bits) = match decoder.colortype().map_err(err)? {
        ColorType::Gray(bits) => (1, bits),
        ColorType::RGB(bits) => (3, bits),
        other => return Err(format!("unsupported color type {:?}", other)),
    };

    let planar = decoder
        .find_tag_unsigned::<u16>(Tag::PlanarConfiguration)
        .map_err(err)?
        .unwrap_or(1);
    if planar != 1 {
        return Err("planar-separate layout is not supported".to_string());
    }

    let sample_format = decoder
        .find_tag_unsigned_vec::<u16>(Tag::SampleFormat)
        .map_err(err)?
        .and_then(|v| v.first().copied())
        .unwrap_or(1);
    let sample_type = SampleType::from_tiff(bits, sample_format).ok_or_else(|| {
        format!(
            "unsupported sample type ({} bits, format {})",
            bits, sample_format
        )
    })?;

    let geokeys = match decoder
        .find_tag_unsigned_vec::<u16>(tag(TAG_GEO_KEY_DIRECTORY))
        .map_err(err)?
    {
        Some(keys) => parse_geokeys(&keys)?,
        None => return Err("missing GeoKeyDirectory (no CRS)".to_string()),
    };
    let epsg = geokeys
        .epsg
        .ok_or_else(|| "GeoKeyDirectory has no EPSG code".to_string())?;
    let crs = Crs::from_epsg(epsg).map_err(|e| e.to_string())?;

    let scale = find_f64_vec(decoder, TAG_MODEL_PIXEL_SCALE)?;
    let tiepoint = find_f64_vec(decoder, TAG_MODEL_TIEPOINT)?;
    let mut transform = match (scale, tiepoint) {
        (Some(scale), Some(tp)) if scale.len() >= 2 && tp.len() >= 6 => GeoTransform::new(
            tp[3] - tp[0] * scale[0],
            tp[4] + tp[1] * scale[1],
            scale[0],
            -scale[1],
        ),
        _ => match find_f64_vec(decoder, TAG_MODEL_TRANSFORMATION)? {
            Some(m) if m.len() >= 8 => {
                if m[1] != 0.0 || m[4] != 0.0 {
                    return Err("rotated rasters are not supported".to_string());
                }
                GeoTransform::new(m[3], m[7], m[0], m[5])
            }
            _ => return Err("missing georeferencing".to_string()),
        },
    };
    if geokeys.pixel_is_point {
        transform.origin_x -= transform.pixel_width / 2.0;
        transform.origin_y -= transform.pixel_height / 2.0;
    }
    if !transform.is_north_up()
        || !transform.origin_x.is_finite()
        || !transform.origin_y.is_finite()
    {
        return Err("georeferencing is not north-up".to_string());
    }

    let nodata = match decoder.find_tag(tag(TAG_GDAL_NODATA)).map_err(err)? {
        Some(value) => {
            let text = value.into_string().map_err(err)?;
            parse_nodata(&text).ok_or_else(|| format!("invalid GDAL_NODATA '{}'", text))?
        }
        None => return Err("missing GDAL_NODATA".to_string()),
    };

    Ok(GeoTiffHeader {
        width: width as usize,
        height: height as usize,
        bands,
        sample_type,
        transform,
        crs,
        nodata,
    })
}

fn find_f64_vec(
    decoder: &mut Decoder<BufReader<File>>,
    code: u16,
) -> Result<Option<Vec<f64>>, String> {
    decoder
        .find_tag(tag(code))
        .and_then(|v| v.map(|v| v.into_f64_vec()).transpose())
        .map_err(|e| e.to_string())
}

fn parse_nodata(text: &str) -> Option<f64> {
    text.trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .parse()
        .ok()
}

fn format_nodata(nodata: f64) -> String {
    if nodata.is_nan() {
        "nan".to_string()
    } else {
        nodata.to_string()
    }
}

#[derive(Debug, Default, PartialEq)]
struct GeoKeys {
    epsg: Option<u32>,
    pixel_is_point: bool,
}

fn parse_geokeys(keys: &[u16]) -> Result<GeoKeys, String> {
    if keys.len() < 4 {
        return Err("malformed GeoKeyDirectory".to_string());
    }
    let count = keys[3] as usize;
    let mut projected = None;
    let mut geographic = None;
    let mut result = GeoKeys::default();

    for entry in keys[4..].chunks_exact(4).take(count) {
        let (id, location, value) = (entry[0], entry[1], entry[3]);
        // Values stored in other tags are never codes we need.
        if location != 0 {
            continue;
        }
        match id {
            KEY_RASTER_TYPE => result.pixel_is_point = value == RASTER_PIXEL_IS_POINT,
            KEY_PROJECTED_CS_TYPE if value != USER_DEFINED => projected = Some(value as u32),
            KEY_GEOGRAPHIC_TYPE if value != USER_DEFINED => geographic = Some(value as u32),
            _ => {}
        }
    }
    result.epsg = projected.or(geographic);
    Ok(result)
}

#[rustfmt::skip]
fn geokey_directory(crs: Crs) -> Vec<u16> {
    let (model, crs_key) = if crs.is_geographic() {
        (MODEL_TYPE_GEOGRAPHIC, KEY_GEOGRAPHIC_TYPE)
    } else {
        (MODEL_TYPE_PROJECTED, KEY_PROJECTED_CS_TYPE)
    };
    vec![
        1, 1, 0, 3,
        KEY_MODEL_TYPE, 0, 1, model,
        KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
        crs_key, 0, 1, crs.epsg() as u16,
    ]
}

/// Decode every pixel of a GeoTIFF whose header was already validated.
pub fn read_pixels(path: &Path, header: &GeoTiffHeader) -> Result<PixelData, RasterError> {
    let mut decoder = open_decoder(path)?;
    let decoded = decoder
        .read_image()
        .map_err(|e| RasterError::unreadable(path, format!("failed to decode pixels: {}", e)))?;

    let pixels = match decoded {
        DecodingResult::U8(v) => PixelData::U8(v),
        DecodingResult::U16(v) => PixelData::U16(v),
        DecodingResult::U32(v) => PixelData::U32(v),
        DecodingResult::I8(v) => PixelData::I8(v),
        DecodingResult::I16(v) => PixelData::I16(v),
        DecodingResult::I32(v) => PixelData::I32(v),
        DecodingResult::F32(v) => PixelData::F32(v),
        DecodingResult::F64(v) => PixelData::F64(v),
        _ => return Err(RasterError::unreadable(path, "unsupported pixel data type")),
    };

    let expected = header.width * header.height * header.bands;
    if pixels.len() != expected || pixels.sample_type() != header.sample_type {
        return Err(RasterError::unreadable(
            path,
            format!(
                "decoded {} {} samples, expected {} {}",
                pixels.len(),
                pixels.sample_type(),
                expected,
                header.sample_type
            ),
        ));
    }
    Ok(pixels)
}

/// Encode an image as a GeoTIFF in memory.
pub fn encode_geotiff(image: &GeoTiffImage<'_>) -> Result<Vec<u8>, RasterError> {
    let expected = image.width * image.height * image.bands;
    if image.pixels.len() != expected {
        return Err(RasterError::Encode(format!(
            "{} samples for a {}x{}x{} image",
            image.pixels.len(),
            image.width,
            image.height,
            image.bands
        )));
    }

    let mut out = Cursor::new(Vec::new());
    let result = match (image.bands, image.pixels) {
        (1, PixelData::U8(v)) => encode_as::<colortype::Gray8>(&mut out, image, v),
        (1, PixelData::U16(v)) => encode_as::<colortype::Gray16>(&mut out, image, v),
        (1, PixelData::U32(v)) => encode_as::<colortype::Gray32>(&mut out, image, v),
        (1, PixelData::I8(v)) => encode_as::<colortype::GrayI8>(&mut out, image, v),
        (1, PixelData::I16(v)) => encode_as::<colortype::GrayI16>(&mut out, image, v),
        (1, PixelData::I32(v)) => encode_as::<colortype::GrayI32>(&mut out, image, v),
        (1, PixelData::F32(v)) => encode_as::<colortype::Gray32Float>(&mut out, image, v),
        (1, PixelData::F64(v)) => encode_as::<colortype::Gray64Float>(&mut out, image, v),
        (3, PixelData::U8(v)) => encode_as::<colortype::RGB8>(&mut out, image, v),
        (3, PixelData::U16(v)) => encode_as::<colortype::RGB16>(&mut out, image, v),
        (3, PixelData::U32(v)) => encode_as::<colortype::RGB32>(&mut out, image, v),
        (3, PixelData::F32(v)) => encode_as::<colortype::RGB32Float>(&mut out, image, v),
        (3, PixelData::F64(v)) => encode_as::<colortype::RGB64Float>(&mut out, image, v),
        (bands, pixels) => {
            return Err(RasterError::Encode(format!(
                "cannot encode {} band(s) of {}",
                bands,
                pixels.sample_type()
            )))
        }
    };
    result.map_err(|e| RasterError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}

fn encode_as<C>(
    out: &mut Cursor<Vec<u8>>,
    image: &GeoTiffImage<'_>,
    data: &[C::Inner],
) -> TiffResult<()>
where
    C: EncodeColor,
    [C::Inner]: TiffValue,
{
    let mut encoder = TiffEncoder::new(out)?;
    let mut tiff = encoder.new_image::<C>(image.width as u32, image.height as u32)?;

    let gt = image.transform;
    let scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    let geokeys = geokey_directory(image.crs);
    let nodata = format_nodata(image.nodata);

    let dir = tiff.encoder();
    dir.write_tag(tag(TAG_MODEL_PIXEL_SCALE), &scale[..])?;
    dir.write_tag(tag(TAG_MODEL_TIEPOINT), &tiepoint[..])?;
    dir.write_tag(tag(TAG_GEO_KEY_DIRECTORY), geokeys.as_slice())?;
    dir.write_tag(tag(TAG_GDAL_NODATA), nodata.as_str())?;

    tiff.write_data(data)
}

/// Encode and write a GeoTIFF directly to `path`.
pub fn write_geotiff(path: &Path, image: &GeoTiffImage<'_>) -> Result<(), RasterError> {
    let bytes = encode_geotiff(image)?;
    fs::write(path, bytes).map_err(|e| RasterError::Encode(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_sample(
        dir: &Path,
        name: &str,
        pixels: &PixelData,
        bands: usize,
        crs: Crs,
    ) -> std::path::PathBuf {
        let path = dir.join(name);
        let image = GeoTiffImage {
            width: 4,
            height: 3,
            bands,
            transform: GeoTransform::new(500_000.0, 4_000_030.0, 10.0, -10.0),
            crs,
            nodata: -9999.0,
            pixels,
        };
        write_geotiff(&path, &image).unwrap();
        path
    }

    #[test]
    fn test_header_round_trip() {
        let temp = TempDir::new().unwrap();
        let pixels = PixelData::F32((0..12).map(|v| v as f32).collect());
        let crs = Crs::from_epsg(32615).unwrap();
        let path = write_sample(temp.path(), "dem.tif", &pixels, 1, crs);

        let header = read_header(&path).unwrap();
        assert_eq!((header.width, header.height, header.bands), (4, 3, 1));
        assert_eq!(header.sample_type, SampleType::F32);
        assert_eq!(header.crs, crs);
        assert_eq!(header.nodata, -9999.0);
        assert_eq!(
            header.transform,
            GeoTransform::new(500_000.0, 4_000_030.0, 10.0, -10.0)
        );
        assert_eq!(read_pixels(&path, &header).unwrap(), pixels);
    }

    #[test]
    fn test_geographic_and_rgb() {
        let temp = TempDir::new().unwrap();
        let pixels = PixelData::U16((0..36).collect());
        let path = write_sample(temp.path(), "optical.tif", &pixels, 3, Crs::WGS84);

        let header = read_header(&path).unwrap();
        assert_eq!(header.bands, 3);
        assert_eq!(header.crs, Crs::WGS84);
        assert_eq!(read_pixels(&path, &header).unwrap(), pixels);
    }

    #[test]
    fn test_signed_integer_samples() {
        let temp = TempDir::new().unwrap();
        let pixels = PixelData::I16((-6..6).collect());
        let path = write_sample(temp.path(), "flow.tif", &pixels, 1, Crs::CONUS_ALBERS);
        let header = read_header(&path).unwrap();
        assert_eq!(header.sample_type, SampleType::I16);
        assert_eq!(read_pixels(&path, &header).unwrap(), pixels);
    }

    #[test]
    fn test_missing_and_empty_files_are_unreadable() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.tif");
        assert!(matches!(
            read_header(&missing),
            Err(RasterError::Unreadable { .. })
        ));

        let empty = temp.path().join("empty.tif");
        fs::write(&empty, b"").unwrap();
        let err = read_header(&empty).unwrap_err();
        assert!(err.to_string().contains("empty"));

        let garbage = temp.path().join("garbage.tif");
        fs::write(&garbage, b"not a tiff at all").unwrap();
        assert!(read_header(&garbage).is_err());
    }

    #[test]
    fn test_plain_tiff_without_georeferencing_is_unreadable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("plain.tif");
        let mut out = Cursor::new(Vec::new());
        TiffEncoder::new(&mut out)
            .unwrap()
            .write_image::<colortype::Gray8>(2, 2, &[1, 2, 3, 4])
            .unwrap();
        fs::write(&path, out.into_inner()).unwrap();

        let err = read_header(&path).unwrap_err();
        assert!(err.to_string().contains("GeoKeyDirectory"), "{}", err);
    }

    #[test]
    fn test_encode_rejects_mismatched_length() {
        let pixels = PixelData::U8(vec![0; 5]);
        let image = GeoTiffImage {
            width: 2,
            height: 2,
            bands: 1,
            transform: GeoTransform::new(0.0, 0.0, 1.0, -1.0),
            crs: Crs::WGS84,
            nodata: 0.0,
            pixels: &pixels,
        };
        assert!(matches!(encode_geotiff(&image), Err(RasterError::Encode(_))));
    }

    #[test]
    fn test_parse_geokeys() {
        let keys = [1, 1, 0, 3, 1024, 0, 1, 1, 1025, 0, 1, 2, 3072, 0, 1, 5070];
        let parsed = parse_geokeys(&keys).unwrap();
        assert_eq!(parsed.epsg, Some(5070));
        assert!(parsed.pixel_is_point);

        let user_defined = [1, 1, 0, 1, 3072, 0, 1, USER_DEFINED];
        assert_eq!(parse_geokeys(&user_defined).unwrap().epsg, None);
        assert!(parse_geokeys(&[1, 1]).is_err());
    }

    #[test]
    fn test_nodata_text() {
        assert_eq!(parse_nodata("-9999\0"), Some(-9999.0));
        assert!(parse_nodata("nan").unwrap().is_nan());
        assert_eq!(format_nodata(-9999.0), "-9999");
        assert_eq!(format_nodata(f64::NAN), "nan");
        assert_eq!(parse_nodata("abc"), None);
    }
}
