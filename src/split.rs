use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::ops::Range;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{debug, error, info, warn};

use crate::captions::{load_caption_file, sidecar_path};
use crate::{CaptionEntry, SplitInformation};

/// Captions starting less than this long after the previous caption ended are folded into it
pub const MERGE_GAP_MS: u64 = 300;
/// Extra audio kept after each caption
pub const TRAILING_PAD_MS: u64 = 200;
pub const DEFAULT_RESULT_FILE: &str = "result.json";

const CHUNK_FRAMES: usize = 1024;

/// A caption that survived merging and gets its own segment file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSegment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// A wav file with a caption sidecar of the same name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitJob {
    pub item_name: String,
    pub wav_path: PathBuf,
    pub caption_path: PathBuf,
}

/// Decide which captions start a new segment.
///
/// A caption starting within [`MERGE_GAP_MS`] of the previous caption's end emits nothing, but
/// still moves the end forward. The segment already emitted is not extended.
pub fn plan_segments(entries: &[CaptionEntry]) -> Vec<PlannedSegment> {
    let mut planned = Vec::new();
    let mut prev_end = 0u64;

    for entry in entries {
        let end = entry.end_ms();
        if entry.start_ms < prev_end.saturating_add(MERGE_GAP_MS) {
            prev_end = end;
            continue;
        }

        planned.push(PlannedSegment {
            start_ms: entry.start_ms,
            end_ms: end,
            text: entry.text.clone(),
        });
        prev_end = end;
    }

    planned
}

/// Bytes of a frame: every channel's sample, rounded up to whole bytes
pub fn block_align(spec: &WavSpec) -> u64 {
    spec.channels as u64 * (spec.bits_per_sample as u64).div_ceil(8)
}

/// Whole bytes per millisecond of audio
pub fn byte_rate(spec: &WavSpec) -> u64 {
    spec.sample_rate as u64 * block_align(spec) / 1000
}

/// Byte range of the audio data a segment covers, trailing padding included
pub fn segment_byte_range(byte_rate: u64, segment: &PlannedSegment) -> Range<u64> {
    let end_ms = segment.end_ms.saturating_add(TRAILING_PAD_MS);
    byte_rate.saturating_mul(segment.start_ms)..byte_rate.saturating_mul(end_ms)
}

/// Cut `wav_path` into one file per planned segment under `output_dir`, appending to `results`
pub fn split_item(
    item_name: &str,
    wav_path: &Path,
    caption_path: &Path,
    output_dir: &Path,
    mut results: Vec<SplitInformation>,
) -> Result<Vec<SplitInformation>> {
    let entries = load_caption_file(caption_path)?;
    let planned = plan_segments(&entries);

    let mut reader = WavReader::open(wav_path).wrap_err_with(|| format!("failed to open {}", wav_path.display()))?;
    let spec = reader.spec();
    let align = block_align(&spec);
    let rate = byte_rate(&spec);
    let total_frames = reader.duration() as u64;
    debug!(
        "{item_name}: {} Hz, {} ch, {} bit, {rate} bytes/ms, {} captions, {} segments",
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample,
        entries.len(),
        planned.len()
    );

    let mut step = 1;
    for segment in &planned {
        let range = segment_byte_range(rate, segment);
        let start_frame = range.start / align;
        let end_frame = (range.end / align).min(total_frames);
        if start_frame >= end_frame {
            warn!("{item_name}: caption at {}ms is past the end of the audio, skipped", segment.start_ms);
            continue;
        }

        let file_name = format!("{item_name}_step{step}.wav");
        let path = output_dir.join(&file_name);
        write_segment(&mut reader, spec, &path, start_frame as u32, (end_frame - start_frame) as usize)?;
        debug!("Wrote {} (bytes {}..{})", path.display(), range.start, range.end);

        results.push(SplitInformation {
            file: recorded_path(output_dir, &file_name),
            text: segment.text.clone(),
        });
        step += 1;
    }

    info!("{item_name}: {} segments from {} captions", step - 1, entries.len());
    Ok(results)
}

/// Path stored in the result file; segments in the current directory are stored by bare name
fn recorded_path(output_dir: &Path, file_name: &str) -> String {
    if output_dir.as_os_str().is_empty() || output_dir == Path::new(".") {
        file_name.to_string()
    } else {
        output_dir.join(file_name).to_string_lossy().into_owned()
    }
}

fn write_segment(
    reader: &mut WavReader<BufReader<File>>,
    spec: WavSpec,
    path: &Path,
    start_frame: u32,
    frames: usize,
) -> Result<()> {
    let mut writer = WavWriter::create(path, spec).wrap_err_with(|| format!("failed to create {}", path.display()))?;
    reader.seek(start_frame)?;

    let samples = frames * spec.channels as usize;
    match spec.sample_format {
        SampleFormat::Float => copy_samples::<f32>(reader, &mut writer, samples, spec.channels)?,
        SampleFormat::Int => copy_samples::<i32>(reader, &mut writer, samples, spec.channels)?,
    }

    writer.finalize()?;
    Ok(())
}

fn copy_samples<S: hound::Sample + Copy>(
    reader: &mut WavReader<BufReader<File>>,
    writer: &mut WavWriter<BufWriter<File>>,
    mut remaining: usize,
    channels: u16,
) -> Result<()> {
    let chunk_len = CHUNK_FRAMES * channels as usize;
    let mut buffer: Vec<S> = Vec::with_capacity(chunk_len);
    let mut samples = reader.samples::<S>();

    while remaining > 0 {
        buffer.clear();
        for sample in samples.by_ref().take(remaining.min(chunk_len)) {
            buffer.push(sample?);
        }
        if buffer.is_empty() {
            break;
        }
        for &sample in &buffer {
            writer.write_sample(sample)?;
        }
        remaining -= buffer.len();
    }

    Ok(())
}

/// Every `*.wav` in `dir` that has a matching `.xml` sidecar, sorted by file name
pub fn find_jobs(dir: &Path) -> Result<Vec<SplitJob>> {
    let mut jobs = Vec::new();
    for entry in std::fs::read_dir(dir).wrap_err_with(|| format!("failed to read directory {}", dir.display()))? {
        let path = entry?.path();
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if !is_wav || !path.is_file() {
            continue;
        }

        let Some(item_name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        let caption_path = sidecar_path(dir, &item_name);
        if caption_path.exists() {
            jobs.push(SplitJob {
                item_name,
                wav_path: path,
                caption_path,
            });
        } else {
            debug!("No caption sidecar for {}", path.display());
        }
    }

    jobs.sort_by(|a, b| a.wav_path.cmp(&b.wav_path));
    Ok(jobs)
}

/// Split every job in `dir`, rewriting the result file after each one
pub fn split_directory(
    dir: &Path,
    output_dir: &Path,
    result_path: &Path,
    mut results: Vec<SplitInformation>,
) -> Result<Vec<SplitInformation>> {
    let jobs = find_jobs(dir)?;
    info!("{} wav files with captions in {}", jobs.len(), dir.display());

    std::fs::create_dir_all(output_dir).wrap_err_with(|| format!("failed to create {}", output_dir.display()))?;

    for job in &jobs {
        results = split_item(&job.item_name, &job.wav_path, &job.caption_path, output_dir, results)?;
        save_results(result_path, &results)?;
    }

    Ok(results)
}

/// Load results of earlier runs; a missing file is an empty list
pub fn load_results(path: &Path) -> Result<Vec<SplitInformation>> {
    if !path.exists() {
        debug!("No previous results at {}", path.display());
        return Ok(Vec::new());
    }

    let data = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read {}", path.display()))
        .inspect_err(|e| error!("{e:#}"))?;
    let results: Vec<SplitInformation> = serde_json::from_str(&data)
        .wrap_err_with(|| format!("invalid result file {}", path.display()))
        .inspect_err(|e| error!("{e:#}"))?;
    debug!("Loaded {} previous results from {}", results.len(), path.display());
    Ok(results)
}

pub fn save_results(path: &Path, results: &[SplitInformation]) -> Result<()> {
    let data = serde_json::to_string_pretty(results)?;
    std::fs::write(path, data).wrap_err_with(|| format!("failed to write {}", path.display()))?;
    debug!("Saved {} results to {}", results.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(start_ms: u64, duration_ms: u64, text: &str) -> CaptionEntry {
        CaptionEntry {
            start_ms,
            duration_ms,
            text: text.to_string(),
        }
    }

    fn mono_16k() -> WavSpec {
        WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        }
    }

    /// Mono 16 kHz wav whose n-th sample has value n (wrapping)
    fn write_wav(path: &Path, frames: usize) {
        let mut writer = WavWriter::create(path, mono_16k()).unwrap();
        for n in 0..frames {
            writer.write_sample(n as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn write_captions(path: &Path, entries: &[(u64, u64, &str)]) {
        let body: String = entries
            .iter()
            .map(|(t, d, text)| format!("<p t=\"{t}\" d=\"{d}\">{text}</p>\n"))
            .collect();
        std::fs::write(path, format!("<timedtext format=\"3\"><body>\n{body}</body></timedtext>")).unwrap();
    }

    #[test]
    fn test_merge_short_gap() {
        let planned = plan_segments(&[entry(1000, 0, "a"), entry(1250, 0, "b")]);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].text, "a");
    }

    #[test]
    fn test_no_merge_long_gap() {
        let planned = plan_segments(&[entry(1000, 0, "a"), entry(1400, 0, "b")]);
        assert_eq!(planned.len(), 2);
        assert_eq!(planned[1].start_ms, 1400);
    }

    #[test]
    fn test_gap_measured_from_previous_end() {
        // first caption ends at 1500; 1750 is 250ms later
        let planned = plan_segments(&[entry(1000, 500, "a"), entry(1750, 500, "b"), entry(2600, 100, "c")]);
        let texts: Vec<_> = planned.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "c"]);
    }

    #[test]
    fn test_merged_caption_advances_end_but_not_segment() {
        let planned = plan_segments(&[entry(1000, 1000, "a"), entry(2100, 1000, "b"), entry(3300, 500, "c")]);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].end_ms, 2000);
    }

    #[test]
    fn test_caption_near_start_is_merged() {
        let planned = plan_segments(&[entry(100, 500, "a"), entry(1000, 500, "b")]);
        let texts: Vec<_> = planned.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["b"]);
    }

    #[test]
    fn test_byte_rate() {
        assert_eq!(byte_rate(&mono_16k()), 32);
        let stereo_44k = WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        assert_eq!(block_align(&stereo_44k), 4);
        assert_eq!(byte_rate(&stereo_44k), 176);
    }

    #[test]
    fn test_segment_byte_range() {
        let segment = PlannedSegment {
            start_ms: 1000,
            end_ms: 1500,
            text: String::new(),
        };
        assert_eq!(segment_byte_range(32, &segment), 32_000..54_400);
    }

    #[test]
    fn test_overflowing_timings_saturate() {
        let planned = plan_segments(&[entry(u64::MAX - 10, 100, "far")]);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].end_ms, u64::MAX);
        assert_eq!(segment_byte_range(32, &planned[0]), u64::MAX..u64::MAX);
    }

    #[test]
    fn test_split_item_rejects_overflowing_caption() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("clip.wav");
        let xml = dir.path().join("clip.xml");
        write_wav(&wav, 16_000);
        write_captions(&xml, &[(u64::MAX - 10, 100, "far")]);

        assert!(split_item("clip", &wav, &xml, dir.path(), Vec::new()).is_err());
        assert!(!dir.path().join("clip_step1.wav").exists());
    }

    #[test]
    fn test_recorded_path_in_current_dir() {
        assert_eq!(recorded_path(Path::new("."), "clip_step1.wav"), "clip_step1.wav");
        assert_eq!(recorded_path(Path::new(""), "clip_step1.wav"), "clip_step1.wav");
        assert_eq!(
            recorded_path(Path::new("segments"), "clip_step1.wav"),
            Path::new("segments").join("clip_step1.wav").to_string_lossy()
        );
    }

    #[test]
    fn test_split_item_writes_segments() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("clip.wav");
        let xml = dir.path().join("clip.xml");
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();

        // 3 seconds of audio
        write_wav(&wav, 48_000);
        write_captions(&xml, &[(1000, 500, "first"), (1600, 100, "merged"), (2500, 1000, "second"), (4000, 500, "too late")]);

        let results = split_item("clip", &wav, &xml, &out, Vec::new()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "first");
        assert_eq!(results[1].text, "second");

        let first = out.join("clip_step1.wav");
        assert_eq!(results[0].file, first.to_string_lossy());
        let mut reader = WavReader::open(&first).unwrap();
        assert_eq!(reader.spec(), mono_16k());
        // bytes 32000..54400 are frames 16000..27200
        assert_eq!(reader.duration(), 11_200);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples[0], 16_000);
        assert_eq!(samples[samples.len() - 1], 27_199);

        // 2500ms..3900ms clamps to the end of the audio
        let second = WavReader::open(out.join("clip_step2.wav")).unwrap();
        assert_eq!(second.duration(), 8_000);

        assert!(!out.join("clip_step3.wav").exists());
    }

    #[test]
    fn test_split_item_keeps_prior_results() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("clip.wav");
        let xml = dir.path().join("clip.xml");
        write_wav(&wav, 32_000);
        write_captions(&xml, &[(500, 300, "hello")]);

        let prior = vec![SplitInformation {
            file: "old_step1.wav".to_string(),
            text: "old".to_string(),
        }];
        let results = split_item("clip", &wav, &xml, dir.path(), prior).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "old");
        assert_eq!(results[1].text, "hello");
    }

    #[test]
    fn test_find_jobs_requires_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("b.wav"), 10);
        write_wav(&dir.path().join("a.wav"), 10);
        write_wav(&dir.path().join("orphan.wav"), 10);
        write_captions(&dir.path().join("a.xml"), &[]);
        write_captions(&dir.path().join("b.xml"), &[]);
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let jobs = find_jobs(dir.path()).unwrap();
        let names: Vec<_> = jobs.iter().map(|j| j.item_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(jobs[0].caption_path, dir.path().join("a.xml"));
    }

    #[test]
    fn test_results_accumulate_across_runs() {
        let root = tempfile::tempdir().unwrap();
        let first_dir = root.path().join("first");
        let second_dir = root.path().join("second");
        let out = root.path().join("segments");
        let result_path = root.path().join(DEFAULT_RESULT_FILE);
        for dir in [&first_dir, &second_dir] {
            std::fs::create_dir_all(dir).unwrap();
        }
        write_wav(&first_dir.join("one.wav"), 32_000);
        write_captions(&first_dir.join("one.xml"), &[(500, 300, "from one")]);
        write_wav(&second_dir.join("two.wav"), 32_000);
        write_captions(&second_dir.join("two.xml"), &[(500, 300, "from two")]);

        let results = load_results(&result_path).unwrap();
        assert!(results.is_empty());
        split_directory(&first_dir, &out, &result_path, results).unwrap();

        let results = load_results(&result_path).unwrap();
        assert_eq!(results.len(), 1);
        split_directory(&second_dir, &out, &result_path, results).unwrap();

        let saved = load_results(&result_path).unwrap();
        let texts: Vec<_> = saved.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["from one", "from two"]);
        assert!(out.join("one_step1.wav").exists());
        assert!(out.join("two_step1.wav").exists());
    }

    #[test]
    fn test_results_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        let results = vec![
            SplitInformation {
                file: "a_step1.wav".to_string(),
                text: "first line".to_string(),
            },
            SplitInformation {
                file: "a_step2.wav".to_string(),
                text: "second \"quoted\" line".to_string(),
            },
        ];
        save_results(&path, &results).unwrap();
        assert_eq!(load_results(&path).unwrap(), results);
    }

    #[test]
    fn test_result_json_shape() {
        let json = serde_json::to_value(vec![SplitInformation {
            file: "x_step1.wav".to_string(),
            text: "hi".to_string(),
        }])
        .unwrap();
        assert_eq!(json, serde_json::json!([{"file": "x_step1.wav", "text": "hi"}]));
    }

    #[test]
    fn test_load_invalid_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_results(&path).is_err());
    }
}
