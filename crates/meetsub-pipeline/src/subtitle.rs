//! Subtitle I/O: a narrow SRT reader for pre-existing tracks, and SRT/WebVTT/plain-text writers.

use crate::error::{PipelineError, PipelineResult};
use crate::segment::Segment;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

static TIME_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d{1,2}):(\d{2}):(\d{2})[,.](\d{3})\s*-->\s*(\d{1,2}):(\d{2}):(\d{2})[,.](\d{3})")
        .expect("time line pattern is valid")
});

/// Output format for the final transcript.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    #[default]
    Srt,
    Vtt,
    Txt,
}

impl SubtitleFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::Vtt => "vtt",
            SubtitleFormat::Txt => "txt",
        }
    }

    /// Render `segments` (already sorted) in this format.
    pub fn render(&self, segments: &[Segment]) -> String {
        match self {
            SubtitleFormat::Srt => to_srt(segments),
            SubtitleFormat::Vtt => to_vtt(segments),
            SubtitleFormat::Txt => to_txt(segments),
        }
    }
}

impl fmt::Display for SubtitleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for SubtitleFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "srt" => Ok(SubtitleFormat::Srt),
            "vtt" | "webvtt" => Ok(SubtitleFormat::Vtt),
            "txt" | "text" => Ok(SubtitleFormat::Txt),
            other => Err(PipelineError::Subtitle(format!("unknown subtitle format {other:?}"))),
        }
    }
}

fn seconds(h: &str, m: &str, s: &str, ms: &str) -> f64 {
    let n = |v: &str| v.parse::<u32>().unwrap_or(0) as f64;
    n(h) * 3600.0 + n(m) * 60.0 + n(s) + n(ms) / 1000.0
}

/// Parse an SRT track. Blocks are separated by blank (or whitespace-only) lines; each needs a
/// `HH:MM:SS,mmm --> HH:MM:SS,mmm` line, and the lines after it are joined with spaces as the
/// cue text. Blocks without a time line or without text are skipped.
pub fn parse_srt(content: &str) -> Vec<Segment> {
    let mut blocks: Vec<Vec<&str>> = vec![Vec::new()];
    for line in content.lines() {
        if line.trim().is_empty() {
            if blocks.last().is_some_and(|b| !b.is_empty()) {
                blocks.push(Vec::new());
            }
        } else if let Some(block) = blocks.last_mut() {
            block.push(line);
        }
    }
    let mut segments = Vec::new();
    for lines in &blocks {
        let Some(pos) = lines.iter().position(|l| TIME_LINE.is_match(l)) else {
            continue;
        };
        let Some(caps) = TIME_LINE.captures(lines[pos]) else {
            continue;
        };
        let start = seconds(&caps[1], &caps[2], &caps[3], &caps[4]);
        let end = seconds(&caps[5], &caps[6], &caps[7], &caps[8]);
        let text = lines[pos + 1..]
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if text.is_empty() {
            continue;
        }
        segments.push(Segment::new(start, end, text));
    }
    debug!("Pipeline: parsed {} existing subtitle cue(s)", segments.len());
    segments
}

fn split_millis(secs: f64) -> (u64, u64, u64, u64) {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_s = total_ms / 1000;
    (total_s / 3600, (total_s % 3600) / 60, total_s % 60, ms)
}

/// `HH:MM:SS,mmm`
pub fn srt_timestamp(secs: f64) -> String {
    let (h, m, s, ms) = split_millis(secs);
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

/// `HH:MM:SS.mmm`
pub fn vtt_timestamp(secs: f64) -> String {
    let (h, m, s, ms) = split_millis(secs);
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}

pub fn to_srt(segments: &[Segment]) -> String {
    segments
        .iter()
        .enumerate()
        .map(|(i, seg)| {
            format!(
                "{}\n{} --> {}\n{}\n\n",
                i + 1,
                srt_timestamp(seg.start),
                srt_timestamp(seg.end),
                seg.text.trim()
            )
        })
        .collect()
}

pub fn to_vtt(segments: &[Segment]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for seg in segments {
        out.push_str(&format!(
            "{} --> {}\n{}\n\n",
            vtt_timestamp(seg.start),
            vtt_timestamp(seg.end),
            seg.text.trim()
        ));
    }
    out
}

/// One `[MM:SS] text` line per segment; minutes are not wrapped at the hour.
pub fn to_txt(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|seg| {
            let total = seg.start.max(0.0) as u64;
            format!("[{:02}:{:02}] {}\n", total / 60, total % 60, seg.text.trim())
        })
        .collect()
}

/// Write `segments` to `output_dir/<stem>.<ext>`, creating the directory if needed.
pub fn write_subtitle(
    segments: &[Segment],
    output_dir: &Path,
    stem: &str,
    format: SubtitleFormat,
) -> PipelineResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("{}.{}", stem, format.extension()));
    std::fs::write(&path, format.render(segments))?;
    info!("Pipeline: wrote {} cue(s) to {}", segments.len(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = "1\n00:00:10,000 --> 00:00:12,500\nfirst line\nsecond line\n\n2\n00:01:00,000 --> 00:01:02,000\n次の字幕\n";

    #[test]
    fn parses_blocks_and_joins_lines() {
        let segs = parse_srt(LEGACY);
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].start, 10.0);
        assert_eq!(segs[0].end, 12.5);
        assert_eq!(segs[0].text, "first line second line");
        assert_eq!(segs[1].start, 60.0);
        assert_eq!(segs[1].text, "次の字幕");
    }

    #[test]
    fn tolerates_crlf_and_junk_blocks() {
        let input = "garbage\r\n\r\n1\r\n00:00:01,000 --> 00:00:02,000\r\nhello\r\n\r\n2\r\n00:00:03,000 --> 00:00:04,000\r\n\r\n";
        let segs = parse_srt(input);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].text, "hello");
    }

    #[test]
    fn whitespace_only_line_separates_blocks() {
        let input = "1\n00:00:01,000 --> 00:00:02,000\nhello\n \t\n2\n00:00:03,000 --> 00:00:04,000\nworld\n";
        let segs = parse_srt(input);
        assert_eq!(texts_of(&segs), vec!["hello", "world"]);
        assert_eq!(segs[1].start, 3.0);
    }

    fn texts_of(segs: &[Segment]) -> Vec<&str> {
        segs.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn timestamps_round_to_millis() {
        assert_eq!(srt_timestamp(3661.5), "01:01:01,500");
        assert_eq!(vtt_timestamp(0.0004), "00:00:00.000");
        assert_eq!(srt_timestamp(59.9996), "00:01:00,000");
    }

    #[test]
    fn renders_each_format() {
        let segs = vec![Segment::new(1.0, 2.5, " hi "), Segment::new(65.0, 66.0, "there")];
        assert_eq!(
            to_srt(&segs),
            "1\n00:00:01,000 --> 00:00:02,500\nhi\n\n2\n00:01:05,000 --> 00:01:06,000\nthere\n\n"
        );
        assert!(to_vtt(&segs).starts_with("WEBVTT\n\n00:00:01.000 --> 00:00:02.500\nhi\n"));
        assert_eq!(to_txt(&segs), "[00:01] hi\n[01:05] there\n");
    }

    #[test]
    fn srt_output_parses_back() {
        let segs = vec![Segment::new(0.0, 1.25, "a"), Segment::new(1.25, 3.0, "b")];
        assert_eq!(parse_srt(&to_srt(&segs)), segs);
    }

    #[test]
    fn format_names() {
        assert_eq!("VTT".parse::<SubtitleFormat>().unwrap(), SubtitleFormat::Vtt);
        assert!("ass".parse::<SubtitleFormat>().is_err());
        assert_eq!(SubtitleFormat::default().to_string(), "srt");
    }
}
