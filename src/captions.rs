use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr, bail};
use log::{debug, info};

use crate::CaptionEntry;

/// Auto-generated English captions in srv3 timed-text markup
pub fn caption_url(video_id: &str) -> String {
    format!("https://www.youtube.com/api/timedtext?asr_langs=en&v={video_id}&xorp=True&key=yttt1&caps=asr&lang=en&fmt=srv3")
}

/// Request caption markup, retrying once with an explicit track name when the first body is empty.
///
/// Returns `None` when both requests come back empty.
pub async fn fetch_caption_markup<F, Fut>(video_id: &str, get: F) -> Result<Option<String>>
where
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = Result<String>>,
{
    let url = caption_url(video_id);
    let body = get(url.clone()).await?;
    if !body.trim().is_empty() {
        return Ok(Some(body));
    }

    debug!("{video_id}: empty caption response, retrying with track name");
    let body = get(format!("{url}&name=English")).await?;
    if !body.trim().is_empty() {
        return Ok(Some(body));
    }

    Ok(None)
}

/// Fetch captions for `video_id` and write them to `{output_dir}/{file_stem}.xml`
///
/// Returns the sidecar path, or `None` if no captions were found.
pub async fn download_captions(
    client: &reqwest::Client,
    video_id: &str,
    output_dir: &Path,
    file_stem: &str,
) -> Result<Option<PathBuf>> {
    let markup = fetch_caption_markup(video_id, |url| async move {
        debug!("Fetching captions: {url}");
        let text = client.get(&url).send().await?.error_for_status()?.text().await?;
        Ok(text)
    })
    .await?;

    match markup {
        Some(markup) => Ok(Some(write_sidecar(output_dir, file_stem, &markup)?)),
        None => {
            info!("{video_id} caption not found");
            Ok(None)
        }
    }
}

pub fn sidecar_path(output_dir: &Path, file_stem: &str) -> PathBuf {
    output_dir.join(format!("{file_stem}.xml"))
}

fn write_sidecar(output_dir: &Path, file_stem: &str, markup: &str) -> Result<PathBuf> {
    let path = sidecar_path(output_dir, file_stem);
    std::fs::write(&path, markup).wrap_err_with(|| format!("failed to write {}", path.display()))?;
    debug!("Wrote caption sidecar {}", path.display());
    Ok(path)
}

/// Parse srv3 timed-text markup into caption entries, in document order.
///
/// Each `<p t=".." d="..">` becomes one entry; its text is everything inside the element,
/// including nested `<s>` word spans.
pub fn parse_caption_markup(xml: &str) -> Result<Vec<CaptionEntry>> {
    use quick_xml::Reader;
    use quick_xml::events::{BytesStart, Event};

    fn timing(e: &BytesStart) -> Result<(u64, u64)> {
        let mut start = None;
        let mut dur = None;
        for attr in e.attributes().flatten() {
            match attr.key.as_ref() {
                b"t" => start = Some(parse_ms(&attr.value, "t")?),
                b"d" => dur = Some(parse_ms(&attr.value, "d")?),
                _ => {}
            }
        }
        match (start, dur) {
            (Some(start), Some(dur)) if start.checked_add(dur).is_some() => Ok((start, dur)),
            (Some(start), Some(dur)) => bail!("caption entry t={start} d={dur} ends past the representable range"),
            _ => bail!("caption entry is missing its t or d attribute"),
        }
    }

    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut current: Option<(u64, u64, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"p" => {
                let (start, dur) = timing(e)?;
                current = Some((start, dur, String::new()));
            }
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"p" => {
                let (start, dur) = timing(e)?;
                entries.push(CaptionEntry {
                    start_ms: start,
                    duration_ms: dur,
                    text: String::new(),
                });
            }
            Ok(Event::Text(ref e)) => {
                if let Some((_, _, ref mut text)) = current {
                    let raw_text = e.unescape().unwrap_or_default().to_string();
                    text.push_str(&html_escape::decode_html_entities(&raw_text));
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some((_, _, ref mut text)) = current {
                    text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"p" => {
                if let Some((start, dur, text)) = current.take() {
                    entries.push(CaptionEntry {
                        start_ms: start,
                        duration_ms: dur,
                        text: text.trim().to_string(),
                    });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("error parsing caption XML at position {}: {e}", reader.error_position()),
            _ => {}
        }
    }

    Ok(entries)
}

fn parse_ms(value: &[u8], name: &str) -> Result<u64> {
    let s = String::from_utf8_lossy(value);
    s.trim()
        .parse::<u64>()
        .wrap_err_with(|| format!("invalid caption attribute {name}=\"{s}\""))
}

/// Read and parse a caption sidecar
pub fn load_caption_file(path: &Path) -> Result<Vec<CaptionEntry>> {
    let xml = std::fs::read_to_string(path).wrap_err_with(|| format!("failed to read {}", path.display()))?;
    parse_caption_markup(&xml).wrap_err_with(|| format!("invalid caption file {}", path.display()))
}
