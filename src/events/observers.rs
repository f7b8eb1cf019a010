//! Built-in observers.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::events::{EventContext, Observer, EVENT_INDIVIDUAL_RESULT};
use crate::scene::{PlayerEntry, ResultContext};
use crate::TimestampMs;

/// Logs a human-readable dump of every new result.
#[derive(Debug, Default)]
pub struct LogObserver;

impl LogObserver {
    pub fn new() -> Self {
        Self
    }
}

impl Observer for LogObserver {
    fn name(&self) -> &str {
        "log"
    }

    fn on_event(&mut self, event: &str, ctx: &EventContext) -> Result<()> {
        if event != EVENT_INDIVIDUAL_RESULT {
            return Ok(());
        }
        for line in format_result(&ctx.result) {
            log::info!("{}", line);
        }
        Ok(())
    }
}

/// Header line, separator, one line per entry, separator.
pub fn format_result(result: &ResultContext) -> Vec<String> {
    let outcome = match result.won {
        Some(true) => "win",
        Some(false) => "lose",
        None => "unknown",
    };
    let mut lines = Vec::with_capacity(result.players.len() + 3);
    lines.push(format!("result {} fes {}", outcome, result.is_fes));
    lines.push("--------".to_string());
    lines.extend(result.players.iter().map(format_entry));
    lines.push("--------".to_string());
    lines
}

fn format_entry(e: &PlayerEntry) -> String {
    fn opt<T: ToString>(v: &Option<T>) -> String {
        v.as_ref().map_or_else(|| "-".to_string(), T::to_string)
    }
    let title = match (&e.prefix, &e.gender) {
        (Some(prefix), Some(gender)) => format!(" {}{}", prefix.replace('の', ""), gender),
        (Some(prefix), None) => format!(" {}", prefix.replace('の', "")),
        _ => String::new(),
    };
    format!(
        "team {} rank_in_team {} rank {} rank_letter {} {}/{} weapon {} score {}{}{}",
        e.team,
        e.rank_in_team,
        opt(&e.rank),
        opt(&e.rank_letter),
        opt(&e.kills),
        opt(&e.deaths),
        opt(&e.weapon),
        opt(&e.score),
        title,
        if e.is_self { " *" } else { "" },
    )
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    event: &'a str,
    scene: &'a str,
    timestamp_ms: TimestampMs,
    frame_width: u32,
    frame_height: u32,
    result: &'a ResultContext,
}

/// Writes one JSON document per new result, one per line.
pub struct JsonLinesObserver<W: Write + Send> {
    writer: W,
    written: u64,
}

impl JsonLinesObserver<BufWriter<File>> {
    /// Append to `path`, creating it if needed.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open results file {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send> JsonLinesObserver<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> Observer for JsonLinesObserver<W> {
    fn name(&self) -> &str {
        "json-lines"
    }

    fn on_event(&mut self, event: &str, ctx: &EventContext) -> Result<()> {
        if event != EVENT_INDIVIDUAL_RESULT {
            return Ok(());
        }
        let record = JsonRecord {
            event,
            scene: &ctx.scene,
            timestamp_ms: ctx.timestamp_ms,
            frame_width: ctx.frame_width,
            frame_height: ctx.frame_height,
            result: &ctx.result,
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::test_support::context;
    use crate::events::EVENT_RESULT_DETAIL;
    use crate::scene::BattleKind;

    fn entry(index: usize, is_self: bool) -> PlayerEntry {
        PlayerEntry {
            index,
            team: 1,
            rank_in_team: (index + 1) as u8,
            is_self,
            battle: BattleKind::Turf,
            rank: Some(20),
            rank_letter: None,
            kills: Some(5),
            deaths: Some(2),
            score: Some(1234),
            weapon: Some("roller".to_string()),
            gender: None,
            gender_en: None,
            prefix: None,
            prefix_en: None,
            failures: Vec::new(),
        }
    }

    #[test]
    fn dump_marks_self_and_outcome() {
        let result = ResultContext {
            players: vec![entry(0, false), entry(1, true)],
            won: Some(true),
            ..ResultContext::default()
        };
        let lines = format_result(&result);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "result win fes false");
        assert_eq!(
            lines[3],
            "team 1 rank_in_team 2 rank 20 rank_letter - 5/2 weapon roller score 1234 *"
        );
        assert!(!lines[2].ends_with('*'));
    }

    #[test]
    fn json_lines_writes_one_line_per_result() {
        let mut observer = JsonLinesObserver::new(Vec::new());
        let ctx = context(ResultContext {
            players: vec![entry(0, true)],
            won: Some(false),
            ..ResultContext::default()
        });

        observer.on_event(EVENT_RESULT_DETAIL, &ctx).unwrap();
        observer.on_event(EVENT_INDIVIDUAL_RESULT, &ctx).unwrap();
        assert_eq!(observer.written(), 1);

        let out = String::from_utf8(observer.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 1);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["event"], EVENT_INDIVIDUAL_RESULT);
        assert_eq!(value["result"]["won"], false);
        assert_eq!(value["result"]["players"][0]["battle"], "turf");
        assert_eq!(value["result"]["players"][0]["kills"], 5);
    }
}
