//! Result-screen analysis.
//!
//! Turns one settled result-screen frame into a [`ResultContext`]:
//! - partition the frame into entries using the [`ResultLayout`] table
//! - per entry: self highlight, festival title, battle kind, recognizer calls
//! - aggregate: won flag from the self entry, team colours, festival flag
//!
//! Each recognizer call is fallible on its own. A failure leaves that field
//! empty and is recorded in [`PlayerEntry::failures`]; it never aborts the
//! entry or the record.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use image::{GrayImage, Luma, RgbImage};
use serde::Serialize;

use crate::detect::{DigitRecognizer, GlyphLabels, GlyphRecognizer, RecognizerSet, TemplateMatcher};
use crate::frame::{self, Rect};
use crate::scene::layout::ResultLayout;

/// Offsets tried by the automatic offset search, in priority order.
pub const OFFSET_CANDIDATES: [i32; 11] = [0, -5, -4, -3, -2, -1, 1, 2, 3, 4, 5];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleKind {
    Turf,
    Ranked,
    Festival,
}

/// A field whose recognizer was invoked but produced no value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryField {
    Rank,
    RankLetter,
    Kills,
    Deaths,
    Score,
    Weapon,
    FesGender,
    FesLevel,
}

impl fmt::Display for EntryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryField::Rank => "rank",
            EntryField::RankLetter => "rank_letter",
            EntryField::Kills => "kills",
            EntryField::Deaths => "deaths",
            EntryField::Score => "score",
            EntryField::Weapon => "weapon",
            EntryField::FesGender => "fes_gender",
            EntryField::FesLevel => "fes_level",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlayerEntry {
    /// Position on screen, 0-based.
    pub index: usize,
    pub team: u8,
    pub rank_in_team: u8,
    pub is_self: bool,
    pub battle: BattleKind,
    pub rank: Option<u32>,
    pub rank_letter: Option<String>,
    pub kills: Option<u32>,
    pub deaths: Option<u32>,
    pub score: Option<u32>,
    pub weapon: Option<String>,
    pub gender: Option<String>,
    pub gender_en: Option<String>,
    pub prefix: Option<String>,
    pub prefix_en: Option<String>,
    pub failures: Vec<EntryField>,
}

impl PlayerEntry {
    fn blank(index: usize, team: u8, rank_in_team: u8, is_self: bool, battle: BattleKind) -> Self {
        Self {
            index,
            team,
            rank_in_team,
            is_self,
            battle,
            rank: None,
            rank_letter: None,
            kills: None,
            deaths: None,
            score: None,
            weapon: None,
            gender: None,
            gender_en: None,
            prefix: None,
            prefix_en: None,
            failures: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TeamColor {
    pub rgb: [u8; 3],
    /// Hue in `0..180`, saturation and value in `0..=255`.
    pub hsv: [u8; 3],
}

impl TeamColor {
    pub fn from_rgb(rgb: [u8; 3]) -> Self {
        Self {
            rgb,
            hsv: frame::rgb_to_hsv(rgb),
        }
    }
}

/// Output of one confirmed detection. Built once, then shared read-only.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ResultContext {
    pub players: Vec<PlayerEntry>,
    /// `None` when no entry is flagged as the local player.
    pub won: Option<bool>,
    pub my_team_color: Option<TeamColor>,
    pub counter_team_color: Option<TeamColor>,
    pub is_fes: bool,
    /// Geometric correction applied before analysis.
    pub offset: (i32, i32),
}

impl ResultContext {
    pub fn self_entry(&self) -> Option<&PlayerEntry> {
        self.players.iter().rev().find(|e| e.is_self)
    }
}

// ----------------------------------------------------------------------------
// Whole-frame analysis
// ----------------------------------------------------------------------------

/// Analyse a settled result screen. Entries whose rectangle leaves the frame
/// are skipped with a warning.
pub fn analyze(image: &RgbImage, layout: &ResultLayout, recognizers: &RecognizerSet) -> ResultContext {
    let mut players = Vec::with_capacity(layout.entry_count());
    let mut won = None;

    for index in 0..layout.entry_count() {
        let Some(rect) = layout.entry_rect(index) else {
            continue;
        };
        let entry_img = match frame::crop(image, rect) {
            Ok(img) => img,
            Err(e) => {
                log::warn!("entry {}: {}", index, e);
                continue;
            }
        };
        let entry = analyze_entry(&entry_img, index, layout, recognizers);
        if entry.is_self {
            won = Some(index < layout.team_size);
        }
        players.push(entry);
    }

    let (my_team_color, counter_team_color) = sample_team_colors(image, layout, won);
    let is_fes = players.first().is_some_and(|e| e.prefix.is_some());

    ResultContext {
        players,
        won,
        my_team_color,
        counter_team_color,
        is_fes,
        offset: (0, 0),
    }
}

/// Extract one entry from its cropped image.
pub fn analyze_entry(
    entry_img: &RgbImage,
    index: usize,
    layout: &ResultLayout,
    recognizers: &RecognizerSet,
) -> PlayerEntry {
    let is_self = is_self_entry(entry_img, layout);
    let (team, rank_in_team) = layout.team_slot(index);

    let name_img = frame::crop(entry_img, layout.name.rect(is_self)).ok();
    let title_mask = name_img
        .as_ref()
        .and_then(|name| fes_title_mask(name, layout));
    let is_fes = title_mask
        .as_ref()
        .is_some_and(|mask| frame::coverage(mask) > layout.fes_min_fraction);

    let battle = if is_fes {
        BattleKind::Festival
    } else if is_ranked(entry_img, layout) {
        BattleKind::Ranked
    } else {
        BattleKind::Turf
    };

    let mut entry = PlayerEntry::blank(index, team, rank_in_team, is_self, battle);
    let mut probe = FieldProbe {
        index,
        failures: &mut entry.failures,
    };

    if let Some(mask) = title_mask.filter(|_| is_fes) {
        if let Some((gender_img, level_img)) = fes_title_regions(&mask, layout) {
            if let Some(labels) = probe.glyph(
                recognizers.fes_gender.as_ref(),
                Ok(gender_img),
                EntryField::FesGender,
            ) {
                entry.gender = labels.get("ja").map(str::to_string);
                entry.gender_en = labels.get("en").map(str::to_string);
            }
            if let Some(labels) = probe.glyph(
                recognizers.fes_level.as_ref(),
                Ok(level_img),
                EntryField::FesLevel,
            ) {
                entry.prefix = labels.get("ja").map(str::to_string);
                entry.prefix_en = labels.get("en").map(str::to_string);
            }
        }
    }

    let score_rect = layout.score.rect(is_self);
    if battle == BattleKind::Ranked {
        entry.rank_letter = probe
            .glyph(
                recognizers.rank_letter.as_ref(),
                frame::crop(entry_img, score_rect),
                EntryField::RankLetter,
            )
            .and_then(|labels| labels.primary().map(str::to_uppercase));
    }

    let digits = recognizers.digits.as_ref();
    entry.rank = probe.digits(
        digits,
        frame::crop(entry_img, layout.rank.rect(is_self)),
        EntryField::Rank,
    );
    entry.kills = probe.digits(
        digits,
        frame::crop(entry_img, layout.kills.rect(is_self)),
        EntryField::Kills,
    );
    entry.deaths = probe.digits(
        digits,
        frame::crop(entry_img, layout.deaths.rect(is_self)),
        EntryField::Deaths,
    );
    if battle == BattleKind::Turf {
        entry.score = probe.digits(digits, frame::crop(entry_img, score_rect), EntryField::Score);
    }

    entry.weapon = probe
        .glyph(
            recognizers.weapon.as_ref(),
            frame::crop(entry_img, layout.weapon.rect(is_self)),
            EntryField::Weapon,
        )
        .and_then(|labels| labels.primary().map(str::to_string));

    entry
}

/// Runs one recognizer call and records its failure.
struct FieldProbe<'a> {
    index: usize,
    failures: &'a mut Vec<EntryField>,
}

impl FieldProbe<'_> {
    fn digits(
        &mut self,
        recognizer: Option<&Arc<dyn DigitRecognizer>>,
        region: Result<RgbImage>,
        field: EntryField,
    ) -> Option<u32> {
        let recognizer = recognizer?;
        let outcome = region.and_then(|img| recognizer.match_digits(&img));
        self.settle(outcome, field)
    }

    fn glyph(
        &mut self,
        recognizer: Option<&Arc<dyn GlyphRecognizer>>,
        region: Result<RgbImage>,
        field: EntryField,
    ) -> Option<GlyphLabels> {
        let recognizer = recognizer?;
        let outcome = region.and_then(|img| recognizer.classify(&img));
        self.settle(outcome, field)
    }

    fn settle<T>(&mut self, outcome: Result<Option<T>>, field: EntryField) -> Option<T> {
        match outcome {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                self.failures.push(field);
                None
            }
            Err(e) => {
                log::debug!("entry {}: {} recognition failed: {:#}", self.index, field, e);
                self.failures.push(field);
                None
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Heuristics
// ----------------------------------------------------------------------------

fn bright_fraction(img: &RgbImage, threshold: u8) -> f32 {
    frame::coverage(&frame::threshold(&frame::to_gray(img), threshold))
}

/// The local player's row is highlighted: many bright pixels in the probe.
pub fn is_self_entry(entry_img: &RgbImage, layout: &ResultLayout) -> bool {
    match frame::crop(entry_img, layout.self_probe) {
        Ok(probe) => bright_fraction(&probe, layout.bright_threshold) > layout.self_min_fraction,
        Err(_) => false,
    }
}

/// Turf scores carry a bright "p" suffix; ranked battles show none.
fn is_ranked(entry_img: &RgbImage, layout: &ResultLayout) -> bool {
    match frame::crop(entry_img, layout.score_suffix.rect(false)) {
        Ok(suffix) => {
            bright_fraction(&suffix, layout.bright_threshold) < layout.ranked_max_fraction
        }
        Err(_) => false,
    }
}

/// Mask of festival-title coloured pixels in the top rows of a name crop.
pub fn fes_title_mask(name_img: &RgbImage, layout: &ResultLayout) -> Option<GrayImage> {
    let rows = layout.fes_title_height.min(name_img.height());
    let title = frame::crop(name_img, Rect::new(0, 0, name_img.width(), rows)).ok()?;
    let (hue_lo, hue_hi) = layout.fes_hue;
    Some(GrayImage::from_fn(title.width(), title.height(), |x, y| {
        let [h, _, v] = frame::rgb_to_hsv(title.get_pixel(x, y).0);
        if (hue_lo..=hue_hi).contains(&h) && v >= layout.fes_value_min {
            Luma([255])
        } else {
            Luma([0])
        }
    }))
}

/// Gender and level glyph crops of a festival title mask.
///
/// The title's horizontal extent comes from the columns holding any mask
/// pixel. The gender glyph ends at the right edge of the title; the level
/// glyph starts at the left edge of the crop.
pub fn fes_title_regions(mask: &GrayImage, layout: &ResultLayout) -> Option<(RgbImage, RgbImage)> {
    let occupied: Vec<u32> = (0..mask.width())
        .filter(|&x| (0..mask.height()).any(|y| mask.get_pixel(x, y).0[0] > 0))
        .collect();
    let (&x1, &x2) = (occupied.first()?, occupied.last()?);
    if x2 - x1 < layout.fes_min_extent {
        return None;
    }

    let gender_x = x2.saturating_sub(layout.fes_gender_width);
    let gender = frame::crop_gray(mask, Rect::new(gender_x, 0, x2 - gender_x, mask.height())).ok()?;
    let level_width = layout.fes_level_width.min(mask.width());
    let level = frame::crop_gray(mask, Rect::new(0, 0, level_width, mask.height())).ok()?;

    Some((gray_to_rgb(&gender), gray_to_rgb(&level)))
}

fn gray_to_rgb(mask: &GrayImage) -> RgbImage {
    RgbImage::from_fn(mask.width(), mask.height(), |x, y| {
        let v = mask.get_pixel(x, y).0[0];
        image::Rgb([v, v, v])
    })
}

/// Sample both team colours. The winners are shown on top, so the probe
/// assignment follows the won flag; without one nothing is sampled.
pub fn sample_team_colors(
    image: &RgbImage,
    layout: &ResultLayout,
    won: Option<bool>,
) -> (Option<TeamColor>, Option<TeamColor>) {
    let sample = |(x, y): (u32, u32)| {
        (x < image.width() && y < image.height())
            .then(|| TeamColor::from_rgb(image.get_pixel(x, y).0))
    };
    let [upper, lower] = layout.team_color_probes;
    match won {
        Some(true) => (sample(upper), sample(lower)),
        Some(false) => (sample(lower), sample(upper)),
        None => (None, None),
    }
}

// ----------------------------------------------------------------------------
// Automatic offset
// ----------------------------------------------------------------------------

/// Find the offset under which the screen matcher scores best.
///
/// Every `(dx, dy)` pair from [`OFFSET_CANDIDATES`] is scored; only matching
/// candidates count and ties keep the earlier one, so `(0, 0)` wins unless
/// something strictly better exists. Scoring crops the source at the
/// inversely shifted rectangle, which equals cropping the offset-corrected
/// frame as long as the rectangle stays clear of the border.
pub fn find_offset(image: &RgbImage, matcher: &dyn TemplateMatcher, screen: Rect) -> (i32, i32) {
    let mut best = ((0, 0), 0.0_f32);
    for &dx in OFFSET_CANDIDATES.iter() {
        for &dy in OFFSET_CANDIDATES.iter() {
            let Some(rect) = screen.shifted(-dx, -dy) else {
                continue;
            };
            let Ok(region) = frame::crop(image, rect) else {
                continue;
            };
            match matcher.match_region(&region) {
                Ok(result) if result.matched && result.score > best.1 => {
                    best = ((dx, dy), result.score);
                }
                Ok(_) => {}
                Err(e) => log::debug!("offset ({}, {}): {:#}", dx, dy, e),
            }
        }
    }
    best.0
}

/// Offset-corrected copy of `image` and the offset that was applied.
pub fn auto_offset(
    image: &RgbImage,
    matcher: &dyn TemplateMatcher,
    screen: Rect,
) -> (RgbImage, (i32, i32)) {
    let (dx, dy) = find_offset(image, matcher, screen);
    let mut corrected = image.clone();
    if (dx, dy) != (0, 0) {
        log::info!("offset detected: ({}, {})", dx, dy);
        frame::apply_offset(&mut corrected, dx, dy);
    }
    (corrected, (dx, dy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{FixedDigits, FixedGlyph, MaskMatcher};
    use image::Rgb;

    const ROW_BG: Rgb<u8> = Rgb([40, 40, 60]);
    const WHITE: Rgb<u8> = Rgb([250, 250, 250]);
    // Hue 32 in the 0..180 convention, full value.
    const TITLE_YELLOW: Rgb<u8> = Rgb([238, 255, 0]);

    fn fill(img: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
        for y in rect.y..rect.bottom() {
            for x in rect.x..rect.right() {
                img.put_pixel(x, y, color);
            }
        }
    }

    fn entry(is_self: bool, turf: bool) -> RgbImage {
        let layout = ResultLayout::default();
        let mut img = RgbImage::from_pixel(layout.entry_width, layout.entry_height, ROW_BG);
        if is_self {
            fill(&mut img, layout.self_probe, WHITE);
        }
        if turf {
            fill(&mut img, layout.score_suffix.rect(false), WHITE);
        }
        img
    }

    #[test]
    fn self_highlight_is_detected() {
        let layout = ResultLayout::default();
        assert!(is_self_entry(&entry(true, true), &layout));
        assert!(!is_self_entry(&entry(false, true), &layout));
    }

    #[test]
    fn turf_entry_reads_score_and_skips_rank_letter() {
        let layout = ResultLayout::default();
        let recognizers = RecognizerSet::new()
            .with_digits(FixedDigits::new(Some(12)))
            .with_rank_letter(FixedGlyph::label("en", "a+"))
            .with_weapon(FixedGlyph::label("en", "splattershot"));

        let e = analyze_entry(&entry(false, true), 5, &layout, &recognizers);
        assert_eq!(e.battle, BattleKind::Turf);
        assert_eq!((e.team, e.rank_in_team), (2, 2));
        assert_eq!(e.score, Some(12));
        assert_eq!(e.kills, Some(12));
        assert_eq!(e.rank_letter, None);
        assert_eq!(e.weapon.as_deref(), Some("splattershot"));
        assert!(e.failures.is_empty());
    }

    #[test]
    fn ranked_entry_upper_cases_rank_letter() {
        let layout = ResultLayout::default();
        let recognizers = RecognizerSet::new()
            .with_digits(FixedDigits::new(Some(3)))
            .with_rank_letter(FixedGlyph::label("en", "a+"));

        let e = analyze_entry(&entry(false, false), 0, &layout, &recognizers);
        assert_eq!(e.battle, BattleKind::Ranked);
        assert_eq!(e.rank_letter.as_deref(), Some("A+"));
        assert_eq!(e.score, None);
    }

    #[test]
    fn recognizer_failure_leaves_other_fields_intact() {
        let layout = ResultLayout::default();
        let recognizers = RecognizerSet::new()
            .with_digits(FixedDigits::failing())
            .with_weapon(FixedGlyph::label("en", "roller"));

        let e = analyze_entry(&entry(true, true), 1, &layout, &recognizers);
        assert!(e.is_self);
        assert_eq!(e.rank, None);
        assert_eq!(e.weapon.as_deref(), Some("roller"));
        assert_eq!(
            e.failures,
            vec![
                EntryField::Rank,
                EntryField::Kills,
                EntryField::Deaths,
                EntryField::Score
            ]
        );
    }

    #[test]
    fn festival_title_fills_gender_and_prefix() {
        let layout = ResultLayout::default();
        let mut img = entry(false, true);
        let name = layout.name.rect(false);
        fill(&mut img, Rect::new(name.x + 10, 4, 80, 12), TITLE_YELLOW);

        let recognizers = RecognizerSet::new()
            .with_fes_gender(FixedGlyph::new(Some(
                GlyphLabels::new().with("ja", "ガール").with("en", "girl"),
            )))
            .with_fes_level(FixedGlyph::new(Some(
                GlyphLabels::new().with("ja", "まことの").with("en", "true"),
            )));

        let e = analyze_entry(&img, 0, &layout, &recognizers);
        assert_eq!(e.battle, BattleKind::Festival);
        assert_eq!(e.gender.as_deref(), Some("ガール"));
        assert_eq!(e.gender_en.as_deref(), Some("girl"));
        assert_eq!(e.prefix.as_deref(), Some("まことの"));
        assert_eq!(e.prefix_en.as_deref(), Some("true"));
    }

    #[test]
    fn narrow_title_is_rejected() {
        let layout = ResultLayout::default();
        let mut mask = GrayImage::new(180, 22);
        for y in 0..22 {
            mask.put_pixel(10, y, Luma([255]));
            mask.put_pixel(12, y, Luma([255]));
        }
        assert!(fes_title_regions(&mask, &layout).is_none());

        mask.put_pixel(60, 0, Luma([255]));
        let (gender, level) = fes_title_regions(&mask, &layout).unwrap();
        assert_eq!(gender.width(), 36);
        assert_eq!(level.width(), 52);
    }

    #[test]
    fn team_colors_follow_won_flag() {
        let layout = ResultLayout::default();
        let mut img = RgbImage::new(1280, 720);
        img.put_pixel(1228, 115, Rgb([255, 0, 0]));
        img.put_pixel(1228, 452, Rgb([0, 0, 255]));

        let (mine, theirs) = sample_team_colors(&img, &layout, Some(false));
        assert_eq!(mine.unwrap().rgb, [0, 0, 255]);
        assert_eq!(theirs.unwrap().hsv, [0, 255, 255]);
        assert_eq!(sample_team_colors(&img, &layout, None), (None, None));
    }

    #[test]
    fn offset_search_recovers_shift() {
        let screen = Rect::new(40, 30, 20, 10);
        let mut mask = GrayImage::new(20, 10);
        for y in 2..8 {
            for x in 3..17 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let matcher = MaskMatcher::new("screen", mask).with_threshold(0.99);

        // Glyph drawn 2 px left and 3 px below where the layout expects it.
        let mut img = RgbImage::from_pixel(120, 80, ROW_BG);
        fill(&mut img, Rect::new(41, 35, 14, 6), WHITE);

        assert_eq!(find_offset(&img, &matcher, screen), (2, -3));
        let (corrected, offset) = auto_offset(&img, &matcher, screen);
        assert_eq!(offset, (2, -3));
        assert_eq!(*corrected.get_pixel(43, 32), WHITE);
    }
}
