// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// keepalive-document: maintenance page rendering for Printer Keepalive.
//
// Provides the color-bar raster, hub entity snapshots for the summary
// templates, and `PageRenderer`, which implements the core `TemplateRenderer`
// seam and produces single-page PDFs.

pub mod bars;
pub mod entities;
pub mod page;

pub use bars::ColorBarStrip;
pub use entities::{EntitySnapshot, EntitySource, NoEntities, StaticEntities};
pub use page::PageRenderer;
