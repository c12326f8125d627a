//! Image stylization: colour filter, bottom crop and a constant border.
//!
//! All filters work on 8-bit RGB. Arithmetic saturates at the channel
//! bounds and rounds to the nearest integer, matching the usual
//! `convertScaleAbs` behaviour of image toolkits.

use image::codecs::jpeg::JpegEncoder;
use image::{ImageReader, Rgb, RgbImage};
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::str::FromStr;

use crate::error::PublishError;

/// Extensions recognised as source images (lowercase)
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tiff", "tif"];

pub const JPEG_QUALITY: u8 = 95;
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterKind {
    #[default]
    Natural,
    Warm,
    Cool,
    Soft,
    Bright,
    Clarity,
    Grayscale,
    Negative,
}

impl FilterKind {
    pub const ALL: [FilterKind; 8] = [
        FilterKind::Natural,
        FilterKind::Warm,
        FilterKind::Cool,
        FilterKind::Soft,
        FilterKind::Bright,
        FilterKind::Clarity,
        FilterKind::Grayscale,
        FilterKind::Negative,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FilterKind::Natural => "natural",
            FilterKind::Warm => "warm",
            FilterKind::Cool => "cool",
            FilterKind::Soft => "soft",
            FilterKind::Bright => "bright",
            FilterKind::Clarity => "clarity",
            FilterKind::Grayscale => "grayscale",
            FilterKind::Negative => "negative",
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|k| k.name()).collect();
                format!("Unsupported filter type: {} (expected one of {})", s, names.join(", "))
            })
    }
}

fn saturate(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn scale_abs(value: u8, alpha: f32, beta: f32) -> u8 {
    saturate((alpha * value as f32 + beta).abs())
}

fn map_channels(image: &mut RgbImage, f: impl Fn(u8) -> u8) {
    for pixel in image.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = f(*channel);
        }
    }
}

pub fn apply_filter(image: &RgbImage, kind: FilterKind) -> RgbImage {
    let mut out = image.clone();
    match kind {
        FilterKind::Natural => {
            map_channels(&mut out, |c| scale_abs(c, 1.1, 0.0));
            for pixel in out.pixels_mut() {
                *pixel = boost_saturation(*pixel, 10);
            }
        }
        FilterKind::Warm => {
            map_channels(&mut out, |c| scale_abs(c, 1.05, 10.0));
            for pixel in out.pixels_mut() {
                pixel.0[0] = pixel.0[0].saturating_add(5);
            }
        }
        FilterKind::Cool => {
            for pixel in out.pixels_mut() {
                pixel.0[2] = pixel.0[2].saturating_add(5);
            }
        }
        FilterKind::Soft => {
            let blurred = gaussian_blur_3x3(image);
            for (pixel, blur) in out.pixels_mut().zip(blurred.pixels()) {
                for (c, b) in pixel.0.iter_mut().zip(blur.0) {
                    *c = saturate(0.9 * *c as f32 + 0.1 * b as f32);
                }
            }
        }
        FilterKind::Bright => map_channels(&mut out, |c| scale_abs(c, 1.1, 10.0)),
        FilterKind::Clarity => out = sharpen(image),
        FilterKind::Grayscale => {
            for pixel in out.pixels_mut() {
                let [r, g, b] = pixel.0;
                let luma = saturate(0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32);
                pixel.0 = [luma; 3];
            }
        }
        FilterKind::Negative => map_channels(&mut out, |c| 255 - c),
    }
    out
}

/// Adds `amount` to the HSV saturation (0-255 scale) of one pixel
fn boost_saturation(pixel: Rgb<u8>, amount: u8) -> Rgb<u8> {
    let [r, g, b] = pixel.0.map(|c| c as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let sat = if max == 0.0 { 0.0 } else { delta / max };

    let sat = (saturate(sat * 255.0).saturating_add(amount)) as f32 / 255.0;
    hsv_to_rgb(hue, sat, max)
}

fn hsv_to_rgb(hue: f32, sat: f32, value: f32) -> Rgb<u8> {
    let sector = (hue / 60.0).floor();
    let f = hue / 60.0 - sector;
    let p = value * (1.0 - sat);
    let q = value * (1.0 - sat * f);
    let t = value * (1.0 - sat * (1.0 - f));

    let (r, g, b) = match sector as i32 % 6 {
        0 => (value, t, p),
        1 => (q, value, p),
        2 => (p, value, t),
        3 => (p, q, value),
        4 => (t, p, value),
        _ => (value, p, q),
    };
    Rgb([saturate(r), saturate(g), saturate(b)])
}

/// Reflect-101 index for a 3x3 neighbourhood (`-1` maps to `1`, `len` to `len - 2`)
fn reflect101(index: i64, len: u32) -> u32 {
    let len = len as i64;
    if len == 1 {
        return 0;
    }
    let reflected = if index < 0 {
        -index
    } else if index >= len {
        2 * len - index - 2
    } else {
        index
    };
    reflected as u32
}

fn convolve_3x3(image: &RgbImage, kernel: [[f32; 3]; 3]) -> RgbImage {
    let (width, height) = image.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let mut acc = [0.0f32; 3];
        for (ky, row) in kernel.iter().enumerate() {
            let sy = reflect101(y as i64 + ky as i64 - 1, height);
            for (kx, weight) in row.iter().enumerate() {
                let sx = reflect101(x as i64 + kx as i64 - 1, width);
                let src = image.get_pixel(sx, sy);
                for (a, c) in acc.iter_mut().zip(src.0) {
                    *a += weight * c as f32;
                }
            }
        }
        Rgb(acc.map(saturate))
    })
}

fn gaussian_blur_3x3(image: &RgbImage) -> RgbImage {
    convolve_3x3(
        image,
        [
            [0.0625, 0.125, 0.0625],
            [0.125, 0.25, 0.125],
            [0.0625, 0.125, 0.0625],
        ],
    )
}

fn sharpen(image: &RgbImage) -> RgbImage {
    convolve_3x3(
        image,
        [[-1.0, -1.0, -1.0], [-1.0, 9.0, -1.0], [-1.0, -1.0, -1.0]],
    )
}

/// Keeps the top 19/20 of the image
pub fn crop_bottom(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let keep = ((height as u64 * 19 / 20) as u32).max(1).min(height);
    image::imageops::crop_imm(image, 0, 0, width, keep).to_image()
}

pub fn add_border(image: &RgbImage, size: u32, color: Rgb<u8>) -> RgbImage {
    let (width, height) = image.dimensions();
    let mut canvas = RgbImage::from_pixel(width + 2 * size, height + 2 * size, color);
    image::imageops::replace(&mut canvas, image, size as i64, size as i64);
    canvas
}

/// Filter, crop and border settings applied to every image
#[derive(Debug, Clone, Copy)]
pub struct Stylizer {
    pub filter: FilterKind,
    pub border_size: u32,
    pub border_color: Rgb<u8>,
}

impl Stylizer {
    pub fn new(filter: FilterKind, border_size: u32) -> Self {
        Self {
            filter,
            border_size,
            border_color: WHITE,
        }
    }

    pub fn apply(&self, image: &RgbImage) -> RgbImage {
        let filtered = apply_filter(image, self.filter);
        let cropped = crop_bottom(&filtered);
        add_border(&cropped, self.border_size, self.border_color)
    }

    /// Decodes `source`, stylizes it and writes a JPEG to `dest`
    pub fn process_file(&self, source: &Path, dest: &Path) -> Result<(), PublishError> {
        let image = ImageReader::open(source)?
            .with_guessed_format()?
            .decode()?
            .to_rgb8();

        let styled = self.apply(&image);

        let mut writer = BufWriter::new(File::create(dest)?);
        let encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
        styled.write_with_encoder(encoder)?;
        Ok(())
    }
}

impl Default for Stylizer {
    fn default() -> Self {
        Self::new(FilterKind::Natural, 20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(rgb))
    }

    #[test]
    fn test_filter_kind_parsing() {
        assert_eq!("natural".parse::<FilterKind>().unwrap(), FilterKind::Natural);
        assert_eq!(" Warm ".parse::<FilterKind>().unwrap(), FilterKind::Warm);
        let err = "sepia".parse::<FilterKind>().unwrap_err();
        assert!(err.contains("sepia"));
        for kind in FilterKind::ALL {
            assert_eq!(kind.to_string().parse::<FilterKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_is_image_path() {
        assert!(is_image_path(Path::new("a/b/IMG_01.JPG")));
        assert!(is_image_path(Path::new("scan.tiff")));
        assert!(!is_image_path(Path::new("正文.txt")));
        assert!(!is_image_path(Path::new("noext")));
    }

    #[test]
    fn test_negative() {
        let out = apply_filter(&solid(2, 2, [10, 20, 30]), FilterKind::Negative);
        assert_eq!(out.get_pixel(1, 1).0, [245, 235, 225]);
    }

    #[test]
    fn test_bright_saturates() {
        let out = apply_filter(&solid(1, 1, [100, 250, 0]), FilterKind::Bright);
        assert_eq!(out.get_pixel(0, 0).0, [120, 255, 10]);
    }

    #[test]
    fn test_warm_lifts_red_channel() {
        let out = apply_filter(&solid(1, 1, [100, 100, 100]), FilterKind::Warm);
        assert_eq!(out.get_pixel(0, 0).0, [120, 115, 115]);
    }

    #[test]
    fn test_cool_lifts_blue_channel() {
        let out = apply_filter(&solid(1, 1, [100, 100, 252]), FilterKind::Cool);
        assert_eq!(out.get_pixel(0, 0).0, [100, 100, 255]);
    }

    #[test]
    fn test_grayscale_uses_luma() {
        let out = apply_filter(&solid(1, 1, [255, 0, 0]), FilterKind::Grayscale);
        assert_eq!(out.get_pixel(0, 0).0, [76, 76, 76]);
    }

    #[test]
    fn test_natural_adds_saturation_to_gray() {
        let out = apply_filter(&solid(1, 1, [100, 100, 100]), FilterKind::Natural);
        // contrast 1.1 -> 110, then saturation 10/255 at hue 0
        assert_eq!(out.get_pixel(0, 0).0, [110, 106, 106]);
    }

    #[test]
    fn test_convolution_filters_keep_flat_images() {
        let flat = solid(5, 4, [80, 120, 160]);
        assert_eq!(apply_filter(&flat, FilterKind::Clarity), flat);
        assert_eq!(apply_filter(&flat, FilterKind::Soft), flat);
    }

    #[test]
    fn test_clarity_sharpens_edges() {
        let mut image = solid(3, 3, [100, 100, 100]);
        image.put_pixel(1, 1, Rgb([120, 120, 120]));
        let out = apply_filter(&image, FilterKind::Clarity);
        // 9 * 120 - 8 * 100
        assert_eq!(out.get_pixel(1, 1).0, [255, 255, 255]);
        // top row reflects onto row 1, so the bright pixel counts twice
        assert_eq!(out.get_pixel(1, 0).0, [60, 60, 60]);
    }

    #[test]
    fn test_reflect101() {
        assert_eq!(reflect101(-1, 5), 1);
        assert_eq!(reflect101(5, 5), 3);
        assert_eq!(reflect101(2, 5), 2);
        assert_eq!(reflect101(-1, 1), 0);
    }

    #[test]
    fn test_crop_bottom_keeps_nineteen_twentieths() {
        assert_eq!(crop_bottom(&solid(20, 40, [0; 3])).dimensions(), (20, 38));
        assert_eq!(crop_bottom(&solid(3, 25, [0; 3])).dimensions(), (3, 23));
        assert_eq!(crop_bottom(&solid(3, 1, [0; 3])).dimensions(), (3, 1));
    }

    #[test]
    fn test_add_border() {
        let out = add_border(&solid(4, 3, [1, 2, 3]), 20, WHITE);
        assert_eq!(out.dimensions(), (44, 43));
        assert_eq!(out.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(out.get_pixel(43, 42).0, [255, 255, 255]);
        assert_eq!(out.get_pixel(20, 20).0, [1, 2, 3]);
        assert_eq!(out.get_pixel(23, 22).0, [1, 2, 3]);
    }

    #[test]
    fn test_process_file_writes_jpeg() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("photo.png");
        solid(40, 20, [200, 150, 100]).save(&source).unwrap();

        let dest = dir.path().join("photo.jpg");
        Stylizer::new(FilterKind::Natural, 10)
            .process_file(&source, &dest)
            .unwrap();

        let written = image::open(&dest).unwrap();
        assert_eq!(
            image::guess_format(&std::fs::read(&dest).unwrap()).unwrap(),
            image::ImageFormat::Jpeg
        );
        // 20 * 19 / 20 = 19 rows kept, plus 10px on each side
        assert_eq!((written.width(), written.height()), (60, 39));
    }

    #[test]
    fn test_process_file_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("broken.jpg");
        std::fs::write(&source, b"not an image").unwrap();
        let result = Stylizer::default().process_file(&source, &dir.path().join("out.jpg"));
        assert!(result.is_err());
    }
}
