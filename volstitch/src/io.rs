//! Multi-page grayscale TIFF volumes.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use glam::DVec3;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, TiffEncoder};
use tracing::debug;

use crate::error::{Error, Result};
use crate::volume::{Volume, VoxelKind};

/// Load every page of a grayscale TIFF as one z slice.
///
/// Pages must share the first page's size and sample format. Spacing is set
/// to 1.0 along all axes; callers apply the real calibration.
pub fn load_tiff_volume<P: AsRef<Path>>(path: P) -> Result<Volume> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    // Volumes routinely exceed the decoder's default buffer limits.
    let mut decoder = Decoder::new(BufReader::new(file))?.with_limits(Limits::unlimited());

    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);
    let mut kind = None;
    let mut data = Vec::new();
    let mut depth = 0;

    loop {
        match decoder.colortype()? {
            tiff::ColorType::Gray(_) => {}
            other => {
                return Err(Error::Tiff(format!(
                    "{}: unsupported color type {other:?}",
                    path.display()
                )))
            }
        }
        let dims = decoder.dimensions()?;
        if (dims.0 as usize, dims.1 as usize) != (width, height) {
            return Err(Error::DimensionMismatch {
                expected: (width, height, depth + 1),
                actual: (dims.0 as usize, dims.1 as usize, depth + 1),
            });
        }

        let page_kind = match decoder.read_image()? {
            DecodingResult::U8(buf) => {
                data.extend(buf.iter().map(|&v| v as f32));
                VoxelKind::U8
            }
            DecodingResult::U16(buf) => {
                data.extend(buf.iter().map(|&v| v as f32));
                VoxelKind::U16
            }
            DecodingResult::F32(buf) => {
                data.extend_from_slice(&buf);
                VoxelKind::F32
            }
            _ => {
                return Err(Error::Tiff(format!(
                    "{}: sample format not supported",
                    path.display()
                )))
            }
        };
        if kind.is_some_and(|k| k != page_kind) {
            return Err(Error::Tiff(format!(
                "{}: page {depth} changes sample format",
                path.display()
            )));
        }
        kind = Some(page_kind);
        depth += 1;

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    debug!(width, height, depth, "Loaded {}", path.display());
    Ok(Volume::new(
        width,
        height,
        depth,
        kind.unwrap_or_default(),
        DVec3::ONE,
        data,
    ))
}

/// Write `volume` as one page per z slice, in the volume's voxel kind.
///
/// Integer kinds are rounded and saturated to their range.
pub fn save_tiff_volume<P: AsRef<Path>>(volume: &Volume, path: P) -> Result<()> {
    let path = path.as_ref();
    if volume.is_empty() {
        return Err(Error::MissingVolume { role: "output" });
    }
    let file = File::create(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
    let (w, h) = (volume.width() as u32, volume.height() as u32);

    for z in 0..volume.depth() {
        let slice = volume.slice_data(z);
        match volume.kind() {
            VoxelKind::U8 => {
                let buf: Vec<u8> = slice.iter().map(|&v| v.round().clamp(0.0, 255.0) as u8).collect();
                encoder.write_image::<colortype::Gray8>(w, h, &buf)?;
            }
            VoxelKind::U16 => {
                let buf: Vec<u16> = slice
                    .iter()
                    .map(|&v| v.round().clamp(0.0, u16::MAX as f32) as u16)
                    .collect();
                encoder.write_image::<colortype::Gray16>(w, h, &buf)?;
            }
            VoxelKind::F32 => {
                encoder.write_image::<colortype::Gray32Float>(w, h, slice)?;
            }
        }
    }

    debug!(depth = volume.depth(), "Saved {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::test_output_path;

    #[test]
    fn test_save_and_reload_u16() {
        let v = Volume::from_fn(7, 5, 3, |x, y, z| (x + 10 * y + 100 * z) as f32)
            .with_kind(VoxelKind::U16);
        let path = test_output_path("volume_u16.tiff");
        save_tiff_volume(&v, &path).unwrap();

        let reloaded = load_tiff_volume(&path).unwrap();
        assert_eq!(reloaded.dims(), (7, 5, 3));
        assert_eq!(reloaded.kind(), VoxelKind::U16);
        assert_eq!(reloaded.data(), v.data());
    }

    #[test]
    fn test_save_and_reload_f32() {
        let v = Volume::from_fn(4, 4, 2, |x, y, z| x as f32 * 0.25 - y as f32 + z as f32 * 1.5);
        let path = test_output_path("volume_f32.tiff");
        save_tiff_volume(&v, &path).unwrap();

        let reloaded = load_tiff_volume(&path).unwrap();
        assert_eq!(reloaded.kind(), VoxelKind::F32);
        assert_eq!(reloaded.data(), v.data());
    }

    #[test]
    fn test_u8_saturates() {
        let v = Volume::from_fn(2, 1, 1, |x, _, _| if x == 0 { -3.0 } else { 300.0 })
            .with_kind(VoxelKind::U8);
        let path = test_output_path("volume_u8_saturate.tiff");
        save_tiff_volume(&v, &path).unwrap();
        assert_eq!(load_tiff_volume(&path).unwrap().data(), &[0.0, 255.0]);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_tiff_volume("/nonexistent/volume.tiff").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/volume.tiff"));
    }
}
