// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Maintenance page renderer. Lays out a single A4 page with `printpdf` 0.8.
//
// Page content is built as a list of styled lines first (pure, testable), then
// converted to `Op` lists. The color-bar strip is rasterised separately and
// embedded as an image XObject.

use std::sync::Arc;

use printpdf::{
    BuiltinFont, Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Point, Pt, RawImage,
    RawImageData, RawImageFormat, TextItem, XObjectTransform,
};
use tracing::{debug, info, instrument};

use keepalive_core::config::PrinterConfig;
use keepalive_core::error::{KeepaliveError, Result};
use keepalive_core::render::{PrintContext, RenderedPage, TemplateRenderer};
use keepalive_core::types::{DocumentFormat, Template};

use crate::bars::ColorBarStrip;
use crate::entities::{EntitySnapshot, EntitySource, detect_weather_entity, select_entity_ids};

const PAGE_W_MM: f32 = 210.0;
const PAGE_H_MM: f32 = 297.0;
const MARGIN_MM: f32 = 18.0;
const FOOTER_MM: f32 = 14.0;
const STRIP_DPI: f32 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Title,
    Heading,
    Body,
    Muted,
}

impl LineStyle {
    fn font(&self) -> BuiltinFont {
        match self {
            Self::Title | Self::Heading => BuiltinFont::HelveticaBold,
            Self::Body | Self::Muted => BuiltinFont::Helvetica,
        }
    }

    fn size_pt(&self) -> f32 {
        match self {
            Self::Title => 22.0,
            Self::Heading => 13.0,
            Self::Body => 10.5,
            Self::Muted => 9.0,
        }
    }

    fn leading_pt(&self) -> f32 {
        self.size_pt() * 1.35
    }
}

/// One line of page text before layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLine {
    pub style: LineStyle,
    pub text: String,
}

impl PageLine {
    fn new(style: LineStyle, text: impl Into<String>) -> Self {
        Self {
            style,
            text: text.into(),
        }
    }
}

fn heading(text: impl Into<String>) -> PageLine {
    PageLine::new(LineStyle::Heading, text)
}

fn body(text: impl Into<String>) -> PageLine {
    PageLine::new(LineStyle::Body, text)
}

fn muted(text: impl Into<String>) -> PageLine {
    PageLine::new(LineStyle::Muted, text)
}

/// Renders the closed set of maintenance templates to PDF.
pub struct PageRenderer {
    entities: Arc<dyn EntitySource>,
}

impl PageRenderer {
    pub fn new(entities: Arc<dyn EntitySource>) -> Self {
        Self { entities }
    }

    /// Header lines shared by every template.
    fn header_lines(printer: &PrinterConfig, template: Template, ctx: &PrintContext) -> Vec<PageLine> {
        vec![
            PageLine::new(LineStyle::Title, printer.title.clone()),
            muted(format!("Printer: {}", printer.name)),
            muted(format!("Template: {template}")),
            muted(format!("Generated: {}", ctx.printed_at)),
        ]
    }

    /// Context block plus the template-specific section.
    pub fn body_lines(
        &self,
        printer: &PrinterConfig,
        template: Template,
        ctx: &PrintContext,
    ) -> Vec<PageLine> {
        let mut lines = vec![heading("Keepalive Context")];
        lines.extend(ctx.lines().into_iter().map(body));
        lines.push(body(""));

        let all = self.entities.entities();
        match template {
            Template::ColorBars => {
                lines.push(heading("Nozzles are being exercised with color and fine-line patterns."));
                lines.push(body(
                    "This maintenance page includes CMYK swatches, tonal ramps, gradients, and fine \
                     line patterns to keep print systems active.",
                ));
            }
            Template::HomeSummary => {
                lines.push(heading("Home Assistant Summary"));
                let unavailable = all.iter().filter(|e| e.is_unavailable()).count();
                let active_binary = all
                    .iter()
                    .filter(|e| e.domain() == "binary_sensor" && e.state == "on")
                    .count();
                lines.push(body(format!("Total entities: {}", all.len())));
                lines.push(body(format!("Unavailable/unknown entities: {unavailable}")));
                lines.push(body(format!("Active binary sensors: {active_binary}")));
                lines.push(body(""));
                lines.push(heading("Key Entity States"));
                lines.extend(entity_lines(printer, &all, 8));
            }
            Template::WeatherSnapshot => {
                lines.push(heading("Weather Snapshot"));
                match weather(printer, &all) {
                    Some(w) => {
                        lines.push(body(format!("Entity: {}", w.entity_id)));
                        lines.push(body(format!("Condition: {}", w.state)));
                        lines.push(body(temperature_line(w)));
                        lines.push(body(format!("Humidity: {}%", w.attribute_text("humidity"))));
                        lines.push(body(format!("Wind Speed: {}", w.attribute_text("wind_speed"))));
                        lines.push(body(format!("Pressure: {}", w.attribute_text("pressure"))));
                    }
                    None => lines.push(muted(
                        "Weather entity unavailable. Configure weather_entity or install a weather integration.",
                    )),
                }
                let tracked = entity_lines(printer, &all, 6);
                if !tracked.is_empty() {
                    lines.push(body(""));
                    lines.push(heading("Tracked Entities"));
                    lines.extend(tracked);
                }
            }
            Template::EntityReport => {
                lines.push(heading("Home Assistant Entity Report"));
                let rows = entity_lines(printer, &all, 12);
                if rows.is_empty() {
                    lines.push(muted(
                        "No entities configured. Add entity IDs in printer configuration to render \
                         instance-specific status rows.",
                    ));
                } else {
                    lines.extend(rows);
                }
            }
            Template::Hybrid => {
                lines.push(heading("Hybrid Summary (Weather + Entities)"));
                match weather(printer, &all) {
                    Some(w) => {
                        lines.push(body(format!("Weather ({}): {}", w.entity_id, w.state)));
                        lines.push(body(temperature_line(w)));
                        lines.push(body(format!("Humidity: {}%", w.attribute_text("humidity"))));
                    }
                    None => lines.push(muted("Weather entity unavailable.")),
                }
                lines.push(body(""));
                lines.extend(entity_lines(printer, &all, 6));
            }
        }
        lines
    }

    #[instrument(skip_all, fields(printer = %printer.id, template = %template))]
    fn render_pdf(&self, printer: &PrinterConfig, template: Template, ctx: &PrintContext) -> Result<Vec<u8>> {
        let page_w = Mm(PAGE_W_MM);
        let page_h = Mm(PAGE_H_MM);
        let page_h_pt = page_h.into_pt().0;
        let margin_pt = Mm(MARGIN_MM).into_pt().0;
        let usable_w_mm = PAGE_W_MM - 2.0 * MARGIN_MM;
        let floor_pt = Mm(MARGIN_MM + FOOTER_MM).into_pt().0;

        let mut doc = PdfDocument::new(&printer.title);
        let mut ops: Vec<Op> = Vec::new();
        let mut y = page_h_pt - margin_pt;

        for line in Self::header_lines(printer, template, ctx) {
            y -= line.style.leading_pt();
            push_text(&mut ops, margin_pt, y, &line);
        }

        // Color-bar strip, full usable width.
        let strip_w_px = (usable_w_mm / 25.4 * STRIP_DPI) as u32;
        let strip_h_mm = if template == Template::ColorBars { 75.0 } else { 50.0 };
        let strip_h_px = (strip_h_mm / 25.4 * STRIP_DPI) as u32;
        let mut strip = ColorBarStrip::new(strip_w_px, strip_h_px);
        if template == Template::ColorBars {
            strip = strip.with_tonal_ramps();
        }
        let rgb = strip.render();
        let (img_w, img_h) = rgb.dimensions();
        let raw = RawImage {
            pixels: RawImageData::U8(rgb.into_raw()),
            width: img_w as usize,
            height: img_h as usize,
            data_format: RawImageFormat::RGB8,
            tag: Vec::new(),
        };
        let xobject_id = doc.add_image(&raw);

        let strip_h_pt = img_h as f32 / STRIP_DPI * 72.0;
        y -= 10.0 + strip_h_pt;
        ops.push(Op::UseXobject {
            id: xobject_id,
            transform: XObjectTransform {
                translate_x: Some(Pt(margin_pt)),
                translate_y: Some(Pt(y)),
                scale_x: Some(1.0),
                scale_y: Some(1.0),
                dpi: Some(STRIP_DPI),
                rotate: None,
            },
        });
        y -= 14.0;

        let mut truncated = false;
        'lines: for line in self.body_lines(printer, template, ctx) {
            let max_chars = max_chars_per_line(usable_w_mm, line.style.size_pt());
            for wrapped in wrap_text(&line.text, max_chars) {
                let next = y - line.style.leading_pt();
                if next < floor_pt {
                    truncated = true;
                    break 'lines;
                }
                y = next;
                push_text(&mut ops, margin_pt, y, &PageLine::new(line.style, wrapped));
            }
        }

        push_text(
            &mut ops,
            margin_pt,
            Mm(MARGIN_MM).into_pt().0,
            &muted(printer.footer.clone()),
        );

        doc.with_pages(vec![PdfPage::new(page_w, page_h, ops)]);

        let mut warnings: Vec<PdfWarnMsg> = Vec::new();
        let output = doc.save(&PdfSaveOptions::default(), &mut warnings);
        if output.is_empty() {
            return Err(KeepaliveError::Render("PDF serialisation produced no bytes".into()));
        }

        debug!(bytes = output.len(), truncated, warnings = warnings.len(), "page laid out");
        Ok(output)
    }
}

impl TemplateRenderer for PageRenderer {
    fn render(
        &self,
        printer: &PrinterConfig,
        template: Template,
        context: &PrintContext,
    ) -> Result<RenderedPage> {
        let bytes = self.render_pdf(printer, template, context)?;
        info!(printer = %printer.id, %template, bytes = bytes.len(), "maintenance page rendered");
        Ok(RenderedPage {
            bytes,
            format: DocumentFormat::Pdf,
        })
    }
}

fn weather<'a>(printer: &PrinterConfig, all: &'a [EntitySnapshot]) -> Option<&'a EntitySnapshot> {
    let id = detect_weather_entity(printer.weather_entity.as_deref(), all)?;
    all.iter().find(|e| e.entity_id == id)
}

fn temperature_line(w: &EntitySnapshot) -> String {
    let unit = w
        .attributes
        .get("temperature_unit")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    format!("Temperature: {} {unit}", w.attribute_text("temperature"))
        .trim_end()
        .to_owned()
}

fn entity_lines(printer: &PrinterConfig, all: &[EntitySnapshot], limit: usize) -> Vec<PageLine> {
    select_entity_ids(&printer.entity_ids, all, limit)
        .into_iter()
        .map(|id| match all.iter().find(|e| e.entity_id == id) {
            Some(entity) => body(entity.display_line()),
            None => muted(format!("{id}: unavailable")),
        })
        .collect()
}

fn push_text(ops: &mut Vec<Op>, x_pt: f32, y_pt: f32, line: &PageLine) {
    if line.text.is_empty() {
        return;
    }
    let font = line.style.font();
    ops.push(Op::StartTextSection);
    ops.push(Op::SetTextCursor {
        pos: Point {
            x: Pt(x_pt),
            y: Pt(y_pt),
        },
    });
    ops.push(Op::SetFontSizeBuiltinFont {
        size: Pt(line.style.size_pt()),
        font,
    });
    ops.push(Op::WriteTextBuiltinFont {
        items: vec![TextItem::Text(line.text.clone())],
        font,
    });
    ops.push(Op::EndTextSection);
}

/// Approximate characters per line for Helvetica at `size_pt`.
/// Average glyph width is roughly half the font size (1pt = 0.3528mm).
fn max_chars_per_line(width_mm: f32, size_pt: f32) -> usize {
    let avg_char_mm = 0.50 * size_pt * 0.3528;
    ((width_mm / avg_char_mm) as usize).max(1)
}

/// Greedy word wrap. Words longer than a line are force-broken on character
/// boundaries. An empty input yields one empty line.
pub fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let max_width = max_width.max(1);
    let mut result = Vec::new();

    for paragraph in text.split('\n') {
        let mut current = String::new();
        let mut current_len = 0usize;

        for word in paragraph.split_whitespace() {
            let word_len = word.chars().count();
            if word_len > max_width {
                if !current.is_empty() {
                    result.push(std::mem::take(&mut current));
                }
                let chars: Vec<char> = word.chars().collect();
                let mut chunks = chars.chunks(max_width).peekable();
                while let Some(chunk) = chunks.next() {
                    let piece: String = chunk.iter().collect();
                    if chunks.peek().is_some() {
                        result.push(piece);
                    } else {
                        current_len = chunk.len();
                        current = piece;
                    }
                }
            } else if current.is_empty() {
                current.push_str(word);
                current_len = word_len;
            } else if current_len + 1 + word_len <= max_width {
                current.push(' ');
                current.push_str(word);
                current_len += 1 + word_len;
            } else {
                result.push(std::mem::replace(&mut current, word.to_owned()));
                current_len = word_len;
            }
        }

        result.push(current);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{NoEntities, StaticEntities};
    use chrono::{TimeZone, Utc};
    use keepalive_core::decision::evaluate;
    use keepalive_core::types::{DeviceClass, PrintSource, PrinterState};

    fn printer() -> PrinterConfig {
        PrinterConfig::new("office", "ipp://office/ipp/print", DeviceClass::Inkjet)
    }

    fn context() -> PrintContext {
        let t0 = Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap();
        let state = PrinterState::new(t0);
        let now = t0 + chrono::Duration::hours(170);
        PrintContext::new(PrintSource::Scheduler, true, &evaluate(&printer(), &state, now), now)
    }

    #[test]
    fn every_template_renders_a_pdf() {
        let renderer = PageRenderer::new(Arc::new(NoEntities));
        for template in Template::ALL {
            let page = renderer.render(&printer(), template, &context()).unwrap();
            assert_eq!(page.format, DocumentFormat::Pdf);
            assert!(page.bytes.starts_with(b"%PDF"), "{template} did not produce a PDF");
        }
    }

    #[test]
    fn entity_report_lists_tracked_entities() {
        let source = StaticEntities::new(vec![
            EntitySnapshot::new("sensor.garage_temp", "7").with_attribute("unit_of_measurement", "°C"),
        ]);
        let renderer = PageRenderer::new(Arc::new(source));
        let mut p = printer();
        p.entity_ids = vec!["sensor.garage_temp".into(), "sensor.gone".into()];

        let lines = renderer.body_lines(&p, Template::EntityReport, &context());
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert!(texts.contains(&"sensor.garage_temp: 7 °C"));
        assert!(texts.contains(&"sensor.gone: unavailable"));
        assert!(texts.iter().any(|t| t.starts_with("Reason: Keepalive was overdue")));
    }

    #[test]
    fn weather_snapshot_falls_back_to_placeholder() {
        let renderer = PageRenderer::new(Arc::new(NoEntities));
        let lines = renderer.body_lines(&printer(), Template::WeatherSnapshot, &context());
        assert!(lines.iter().any(|l| l.text.starts_with("Weather entity unavailable")));
    }

    #[test]
    fn wrap_text_breaks_on_words_and_long_tokens() {
        assert_eq!(wrap_text("alpha beta gamma", 10), vec!["alpha beta", "gamma"]);
        assert_eq!(wrap_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap_text("", 10), vec![String::new()]);
        assert_eq!(wrap_text("ünïcødé wörds", 7), vec!["ünïcødé", "wörds"]);
    }
}
