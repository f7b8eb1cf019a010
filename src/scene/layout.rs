//! Result-screen layout table.
//!
//! Every crop rectangle and colour threshold the result analysis uses lives
//! here, so a different screen layout is a data change. Rectangles inside an
//! entry are relative to the entry's top-left corner. Defaults describe the
//! 1280x720 individual result screen.

use std::path::Path;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::frame::Rect;

/// A field whose horizontal position depends on whether the entry is the
/// local player's (highlighted rows are laid out differently).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRect {
    pub x_self: u32,
    pub x_other: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FieldRect {
    pub const fn new(x_self: u32, x_other: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x_self,
            x_other,
            y,
            width,
            height,
        }
    }

    pub const fn fixed(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self::new(x, x, y, width, height)
    }

    pub fn rect(&self, is_self: bool) -> Rect {
        let x = if is_self { self.x_self } else { self.x_other };
        Rect::new(x, self.y, self.width, self.height)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultLayout {
    /// Region the coarse screen matcher is evaluated on.
    pub screen: Rect,
    /// Region compared between ticks for the stability check.
    pub stability: Rect,
    /// Minimum white-mask delta counted as a changed pixel.
    pub stability_min_delta: u8,

    pub entry_left: u32,
    pub entry_width: u32,
    pub entry_height: u32,
    /// Top edge of every entry, in display order.
    pub entry_tops: Vec<u32>,
    /// Entries per team. The first `team_size` entries are team 1.
    pub team_size: usize,

    /// Columns inspected for the local-player highlight.
    pub self_probe: Rect,
    /// Grey level a pixel must exceed to count as bright.
    pub bright_threshold: u8,
    /// Bright fraction above which the entry is the local player's.
    pub self_min_fraction: f32,

    pub rank: FieldRect,
    pub weapon: FieldRect,
    pub name: FieldRect,
    pub score: FieldRect,
    /// The "p" suffix shown next to turf scores.
    pub score_suffix: FieldRect,
    pub kills: FieldRect,
    pub deaths: FieldRect,

    /// Rows at the top of the name crop holding the festival title.
    pub fes_title_height: u32,
    /// Inclusive hue range of the festival title colour.
    pub fes_hue: (u8, u8),
    pub fes_value_min: u8,
    /// Title-mask fraction above which the entry shows a festival title.
    pub fes_min_fraction: f32,
    /// Narrower titles are rejected.
    pub fes_min_extent: u32,
    /// Width of the gender glyph at the right end of the title.
    pub fes_gender_width: u32,
    /// Width of the level glyph at the left end of the title.
    pub fes_level_width: u32,
    /// Bright fraction of the score suffix below which the battle is ranked.
    pub ranked_max_fraction: f32,

    /// Single-pixel team colour probes: upper team, lower team.
    pub team_color_probes: [(u32, u32); 2],
}

impl Default for ResultLayout {
    fn default() -> Self {
        Self {
            screen: Rect::new(651, 47, 99, 33),
            stability: Rect::new(640, 0, 640, 720),
            stability_min_delta: 32,

            entry_left: 610,
            entry_width: 610,
            entry_height: 45,
            entry_tops: vec![101, 166, 231, 296, 431, 496, 561, 626],
            team_size: 4,

            self_probe: Rect::new(0, 0, 43, 45),
            bright_threshold: 230,
            self_min_fraction: 0.1,

            rank: FieldRect::new(2, 43, 20, 43, 25),
            weapon: FieldRect::new(109, 150, 0, 47, 45),
            name: FieldRect::new(160, 199, 0, 180, 45),
            score: FieldRect::fixed(385, 0, 115, 45),
            score_suffix: FieldRect::fixed(500, 0, 20, 45),
            kills: FieldRect::fixed(575, 0, 31, 21),
            deaths: FieldRect::fixed(575, 21, 31, 21),

            fes_title_height: 22,
            fes_hue: (30, 34),
            fes_value_min: 240,
            fes_min_fraction: 16.0 / 255.0,
            fes_min_extent: 4,
            fes_gender_width: 36,
            fes_level_width: 52,
            ranked_max_fraction: 16.0 / 255.0,

            team_color_probes: [(1228, 115), (1228, 452)],
        }
    }
}

impl ResultLayout {
    /// Load a layout table from JSON, or TOML when the extension is `.toml`.
    /// Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read layout {}: {}", path.display(), e))?;
        let layout: Self = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&raw)
                .map_err(|e| anyhow!("invalid layout {}: {}", path.display(), e))?
        } else {
            serde_json::from_str(&raw)
                .map_err(|e| anyhow!("invalid layout {}: {}", path.display(), e))?
        };
        layout.validate()?;
        Ok(layout)
    }

    pub fn validate(&self) -> Result<()> {
        if self.entry_tops.is_empty() {
            return Err(anyhow!("layout needs at least one entry"));
        }
        if self.team_size == 0 || self.team_size > usize::from(u8::MAX) {
            return Err(anyhow!("team_size must be between 1 and {}", u8::MAX));
        }
        if self.entry_tops.len() != 2 * self.team_size {
            return Err(anyhow!(
                "layout has {} entries but two teams of {} need {}",
                self.entry_tops.len(),
                self.team_size,
                2 * self.team_size
            ));
        }
        for field in [
            self.rank,
            self.weapon,
            self.name,
            self.score,
            self.score_suffix,
            self.kills,
            self.deaths,
        ] {
            for rect in [field.rect(true), field.rect(false)] {
                if !rect.fits_within(self.entry_width, self.entry_height) {
                    return Err(anyhow!("field {:?} leaves the entry", rect));
                }
            }
        }
        Ok(())
    }

    /// Absolute rectangle of entry `index`.
    pub fn entry_rect(&self, index: usize) -> Option<Rect> {
        self.entry_tops
            .get(index)
            .map(|&top| Rect::new(self.entry_left, top, self.entry_width, self.entry_height))
    }

    pub fn entry_count(&self) -> usize {
        self.entry_tops.len()
    }

    /// Team number (1-based) and rank within the team for entry `index`.
    /// The first half of the entries is team 1. Expects a validated layout.
    pub fn team_slot(&self, index: usize) -> (u8, u8) {
        let team_size = self.team_size.max(1);
        let team = u8::try_from(index / team_size + 1).unwrap_or(u8::MAX);
        let rank = u8::try_from(index % team_size + 1).unwrap_or(u8::MAX);
        (team, rank)
    }
}
