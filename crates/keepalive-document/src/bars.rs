// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Color-bar raster: solid swatches, a hue gradient, fine-line patterns and
// optional per-channel tonal ramps. Every ink channel gets exercised.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use tracing::debug;

/// Cyan, magenta, yellow, black, then the RGB primaries and paper white.
pub const SWATCHES: [[u8; 3]; 8] = [
    [0, 255, 255],
    [255, 0, 255],
    [255, 255, 0],
    [0, 0, 0],
    [255, 0, 0],
    [0, 255, 0],
    [0, 0, 255],
    [255, 255, 255],
];

const RAMP_STEPS: u32 = 10;

/// Builder for the color-bar strip placed near the top of every page.
#[derive(Debug, Clone, Copy)]
pub struct ColorBarStrip {
    pub width: u32,
    pub height: u32,
    /// Add stepped CMYK ramps below the swatches (the `color_bars` template).
    pub tonal_ramps: bool,
}

impl ColorBarStrip {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(SWATCHES.len() as u32),
            height: height.max(8),
            tonal_ramps: false,
        }
    }

    pub fn with_tonal_ramps(mut self) -> Self {
        self.tonal_ramps = true;
        self
    }

    pub fn render(&self) -> RgbImage {
        let mut img = RgbImage::from_pixel(self.width, self.height, Rgb([255, 255, 255]));

        // Band heights as fractions of the strip.
        let (swatch_h, gradient_h, ramp_h) = if self.tonal_ramps {
            (self.height * 30 / 100, self.height * 20 / 100, self.height * 30 / 100)
        } else {
            (self.height * 45 / 100, self.height * 30 / 100, 0)
        };

        let mut top = 0;
        self.draw_swatches(&mut img, top, swatch_h);
        top += swatch_h;
        self.draw_gradient(&mut img, top, gradient_h);
        top += gradient_h;
        if ramp_h > 0 {
            self.draw_ramps(&mut img, top, ramp_h);
            top += ramp_h;
        }
        self.draw_fine_lines(&mut img, top, self.height.saturating_sub(top));

        debug!(
            width = self.width,
            height = self.height,
            tonal_ramps = self.tonal_ramps,
            "color bar strip rendered"
        );
        img
    }

    fn draw_swatches(&self, img: &mut RgbImage, top: u32, height: u32) {
        if height == 0 {
            return;
        }
        let bar_w = self.width / SWATCHES.len() as u32;
        for (i, color) in SWATCHES.iter().enumerate() {
            let left = i as u32 * bar_w;
            draw_filled_rect_mut(
                img,
                Rect::at(left as i32, top as i32).of_size(bar_w.max(1), height),
                Rgb(*color),
            );
        }
    }

    fn draw_gradient(&self, img: &mut RgbImage, top: u32, height: u32) {
        if height == 0 {
            return;
        }
        let span = (self.width.saturating_sub(1)).max(1) as f32;
        for x in 0..self.width {
            let ratio = x as f32 / span;
            let r = (255.0 * ratio) as u8;
            let g = (255.0 * (1.0 - ratio)) as u8;
            let b = (127.0 + 128.0 * (0.5 - (ratio - 0.5).abs())) as u8;
            draw_filled_rect_mut(
                img,
                Rect::at(x as i32, top as i32).of_size(1, height),
                Rgb([r, g, b]),
            );
        }
    }

    /// One row per CMYK channel, stepping from full ink to paper.
    fn draw_ramps(&self, img: &mut RgbImage, top: u32, height: u32) {
        let channels: [[u8; 3]; 4] = [SWATCHES[0], SWATCHES[1], SWATCHES[2], SWATCHES[3]];
        let row_h = (height / channels.len() as u32).max(1);
        let step_w = (self.width / RAMP_STEPS).max(1);
        for (row, ink) in channels.iter().enumerate() {
            for step in 0..RAMP_STEPS {
                let tint = step as f32 / RAMP_STEPS as f32;
                let mix = |c: u8| (c as f32 + (255.0 - c as f32) * tint) as u8;
                draw_filled_rect_mut(
                    img,
                    Rect::at((step * step_w) as i32, (top + row as u32 * row_h) as i32)
                        .of_size(step_w, row_h),
                    Rgb([mix(ink[0]), mix(ink[1]), mix(ink[2])]),
                );
            }
        }
    }

    fn draw_fine_lines(&self, img: &mut RgbImage, top: u32, height: u32) {
        if height < 2 {
            return;
        }
        let bottom = (top + height - 1) as f32;
        let right = (self.width - 1) as f32;
        for y in (top..top + height).step_by(4) {
            draw_line_segment_mut(img, (0.0, y as f32), (right, y as f32), Rgb([0, 0, 0]));
        }
        for x in (0..self.width).step_by(6) {
            draw_line_segment_mut(img, (x as f32, top as f32), (x as f32, bottom), Rgb([80, 80, 80]));
        }
    }
}
