//! OCR 前的图片预处理：解码、灰度化、缩放，再统一编码为 PNG

use crate::config::PreprocessConfig;
use crate::error::{KeyscanError, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageOutputFormat};
use std::io::Cursor;

/// 交给 OCR 引擎的图片（PNG 编码）
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

pub fn prepare(bytes: &[u8], config: &PreprocessConfig) -> Result<PreparedImage> {
    let img = image::load_from_memory(bytes)?;
    tracing::debug!(
        "图片解码成功: {}x{} {:?}",
        img.width(),
        img.height(),
        img.color()
    );

    let img = if config.enabled {
        transform(img, config)
    } else {
        img
    };

    Ok(PreparedImage {
        png: encode_png(&img)?,
        width: img.width(),
        height: img.height(),
    })
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)
        .map_err(KeyscanError::Encode)?;
    Ok(png)
}

fn transform(img: DynamicImage, config: &PreprocessConfig) -> DynamicImage {
    let img = if config.grayscale { img.grayscale() } else { img };

    match scaled_size(img.width(), img.height(), config) {
        Some((w, h)) => {
            tracing::debug!("缩放图片: {}x{} -> {}x{}", img.width(), img.height(), w, h);
            img.resize_exact(w, h, FilterType::CatmullRom)
        }
        None => img,
    }
}

/// 计算目标尺寸；无需缩放时返回 None
///
/// 窄图放大到 `target_width`，但总像素不超过 `max_pixels`；
/// 超过 `max_pixels` 的大图等比缩小。
fn scaled_size(width: u32, height: u32, config: &PreprocessConfig) -> Option<(u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }

    let pixels = width as f64 * height as f64;
    let max_pixels = config.max_pixels.max(1) as f64;
    let pixel_cap = (max_pixels / pixels).sqrt();

    let scale = if width < config.target_width {
        (config.target_width as f64 / width as f64).min(pixel_cap)
    } else if pixels > max_pixels {
        pixel_cap
    } else {
        return None;
    };

    if (scale - 1.0).abs() < 0.01 {
        return None;
    }

    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);
    Some((w, h))
}
