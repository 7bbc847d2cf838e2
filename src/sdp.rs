//! SDP codec filtering.
//!
//! Rewrites a session description so that each audio/video media section
//! keeps only one codec (plus the retransmission/FEC payloads bound to it via
//! `apt=`), optionally merging extra format parameters into its `a=fmtp` line.
//! The transform is purely textual: line endings and every untouched line are
//! preserved byte for byte.

use crate::result::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Codec restriction for one media kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecFilter {
    /// Codec name as found in `a=rtpmap` (case-insensitive). Empty = no filter.
    pub codec_name: String,
    /// Extra `fmtp` parameters merged into the kept codec.
    pub extra_params: BTreeMap<String, String>,
}

impl CodecFilter {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn codec(name: impl Into<String>) -> Self {
        Self {
            codec_name: name.into(),
            extra_params: BTreeMap::new(),
        }
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.extra_params = params;
        self
    }

    pub fn is_active(&self) -> bool {
        !self.codec_name.is_empty()
    }
}

/// Parse `"key=value;key2=value2"` into a parameter map.
pub fn parse_params(encoded: &str) -> Result<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    for item in encoded.split(';') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| Error::InvalidParameter(format!("malformed codec parameter '{}'", item)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::InvalidParameter(format!(
                "empty codec parameter name in '{}'",
                item
            )));
        }
        params.insert(key.to_string(), value.trim().to_string());
    }
    Ok(params)
}

/// Check that `s` is a non-empty SDP `token` (RFC 4566).
pub fn is_valid_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^'
                        | b'_' | b'`' | b'{' | b'|' | b'}' | b'~'
                )
        })
}

/// Apply per-kind codec filters to a session description.
pub fn force_codecs(sdp: &str, audio: &CodecFilter, video: &CodecFilter) -> String {
    if !audio.is_active() && !video.is_active() {
        return sdp.to_string();
    }

    let lines: Vec<&str> = sdp.split_inclusive('\n').collect();
    let mut out = String::with_capacity(sdp.len());
    let mut start = 0;
    while start < lines.len() {
        let mut end = start + 1;
        while end < lines.len() && !lines[end].starts_with("m=") {
            end += 1;
        }
        let section = &lines[start..end];
        let filter = section.first().and_then(|first| media_kind(first)).and_then(|kind| match kind {
            "audio" => Some(audio),
            "video" => Some(video),
            _ => None,
        });
        match filter {
            Some(filter) if filter.is_active() => filter_section(section, filter, &mut out),
            _ => section.iter().for_each(|l| out.push_str(l)),
        }
        start = end;
    }
    out
}

fn media_kind(line: &str) -> Option<&str> {
    line.strip_prefix("m=")?.split_whitespace().next()
}

/// Split a line into its content and its original terminator.
fn split_ending(line: &str) -> (&str, &str) {
    let content = line.trim_end_matches(['\r', '\n']);
    (content, &line[content.len()..])
}

/// Parse `a=<attr>:<pt> <rest>` into `(pt, rest)`.
fn attribute<'a>(content: &'a str, attr: &str) -> Option<(&'a str, &'a str)> {
    let body = content.strip_prefix("a=")?.strip_prefix(attr)?.strip_prefix(':')?;
    Some(body.split_once(' ').unwrap_or((body, "")))
}

fn filter_section(section: &[&str], filter: &CodecFilter, out: &mut String) {
    let (m_line, m_ending) = split_ending(section[0]);
    let fields: Vec<&str> = m_line.split(' ').collect();
    if fields.len() < 4 {
        section.iter().for_each(|l| out.push_str(l));
        return;
    }

    let mut rtpmap: HashMap<&str, &str> = HashMap::new();
    let mut fmtp: HashMap<&str, &str> = HashMap::new();
    for line in &section[1..] {
        let (content, _) = split_ending(line);
        if let Some((pt, rest)) = attribute(content, "rtpmap") {
            rtpmap.insert(pt, rest.split('/').next().unwrap_or(rest));
        } else if let Some((pt, rest)) = attribute(content, "fmtp") {
            fmtp.insert(pt, rest);
        }
    }

    let primary: HashSet<&str> = fields[3..]
        .iter()
        .copied()
        .filter(|pt| {
            rtpmap
                .get(pt)
                .map_or(false, |name| name.eq_ignore_ascii_case(&filter.codec_name))
        })
        .collect();
    if primary.is_empty() {
        log::debug!("codec '{}' not offered in section, leaving it unchanged", filter.codec_name);
        section.iter().for_each(|l| out.push_str(l));
        return;
    }

    // rtx/FEC payloads declare the payload they protect with apt=<pt>.
    let mut keep = primary.clone();
    for (pt, params) in &fmtp {
        let bound = params
            .split(';')
            .filter_map(|p| p.trim().strip_prefix("apt="))
            .any(|apt| primary.contains(apt));
        if bound {
            keep.insert(*pt);
        }
    }

    let kept_pts: Vec<&str> = fields[3..].iter().copied().filter(|pt| keep.contains(pt)).collect();
    out.push_str(&fields[..3].join(" "));
    for pt in &kept_pts {
        out.push(' ');
        out.push_str(pt);
    }
    out.push_str(m_ending);

    let merge = !filter.extra_params.is_empty();
    for line in &section[1..] {
        let (content, ending) = split_ending(line);
        let payload_attr = ["rtpmap", "fmtp", "rtcp-fb"]
            .iter()
            .find_map(|attr| attribute(content, attr).map(|(pt, rest)| (*attr, pt, rest)));

        match payload_attr {
            Some((_, pt, _)) if pt != "*" && !keep.contains(pt) => {}
            Some(("fmtp", pt, rest)) if merge && primary.contains(pt) => {
                out.push_str(&format!("a=fmtp:{} {}", pt, merge_params(rest, &filter.extra_params)));
                out.push_str(ending);
            }
            Some(("rtpmap", pt, _)) if merge && primary.contains(pt) && !fmtp.contains_key(pt) => {
                let eol = if ending.is_empty() { "\r\n" } else { ending };
                out.push_str(content);
                out.push_str(eol);
                out.push_str(&format!("a=fmtp:{} {}", pt, merge_params("", &filter.extra_params)));
                out.push_str(eol);
            }
            _ => out.push_str(line),
        }
    }
}

/// Merge `extra` into an existing `k=v;k=v` list. Existing keys keep their
/// position; new keys are appended in sorted order.
fn merge_params(existing: &str, extra: &BTreeMap<String, String>) -> String {
    let mut items: Vec<String> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for item in existing.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        match item.split_once('=') {
            Some((key, value)) => {
                let key = key.trim();
                let value = extra.get(key).map(String::as_str).unwrap_or(value.trim());
                seen.insert(key);
                items.push(format!("{}={}", key, value));
            }
            None => items.push(item.to_string()),
        }
    }
    for (key, value) in extra {
        if !seen.contains(key.as_str()) {
            items.push(format!("{}={}", key, value));
        }
    }
    items.join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111 103 9\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=rtcp-fb:111 transport-cc\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n\
a=rtpmap:103 ISAC/16000\r\n\
a=rtpmap:9 G722/8000\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97 98 99\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:1\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtcp-fb:96 nack\r\n\
a=rtpmap:97 rtx/90000\r\n\
a=fmtp:97 apt=96\r\n\
a=rtpmap:98 H264/90000\r\n\
a=rtcp-fb:98 nack\r\n\
a=fmtp:98 profile-level-id=42e01f\r\n\
a=rtpmap:99 rtx/90000\r\n\
a=fmtp:99 apt=98\r\n";

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_no_filter_is_identity() {
        let out = force_codecs(OFFER, &CodecFilter::none(), &CodecFilter::none());
        assert_eq!(out, OFFER);
    }

    #[test]
    fn test_video_filter_keeps_codec_and_rtx() {
        let out = force_codecs(OFFER, &CodecFilter::none(), &CodecFilter::codec("h264"));
        assert!(out.contains("m=video 9 UDP/TLS/RTP/SAVPF 98 99\r\n"));
        assert!(out.contains("a=fmtp:99 apt=98\r\n"));
        assert!(out.contains("a=rtcp-fb:98 nack\r\n"));
        assert!(!out.contains("VP8"));
        assert!(!out.contains("a=fmtp:97"));
        assert!(!out.contains("a=rtcp-fb:96"));
        // audio section untouched
        let audio_start = OFFER.find("m=audio").unwrap();
        let video_start = OFFER.find("m=video").unwrap();
        assert!(out.contains(&OFFER[audio_start..video_start]));
    }

    #[test]
    fn test_audio_params_merge_in_place() {
        let filter = CodecFilter::codec("OPUS").with_params(params(&[("useinbandfec", "0"), ("stereo", "1")]));
        let out = force_codecs(OFFER, &filter, &CodecFilter::none());
        assert!(out.contains("m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n"));
        assert!(out.contains("a=fmtp:111 minptime=10;useinbandfec=0;stereo=1\r\n"));
        assert!(!out.contains("ISAC"));
        assert!(!out.contains("G722"));
    }

    #[test]
    fn test_missing_fmtp_is_created_after_rtpmap() {
        let filter = CodecFilter::codec("G722").with_params(params(&[("bitrate", "64000")]));
        let out = force_codecs(OFFER, &filter, &CodecFilter::none());
        assert!(out.contains("a=rtpmap:9 G722/8000\r\na=fmtp:9 bitrate=64000\r\n"));
        assert!(out.contains("m=audio 9 UDP/TLS/RTP/SAVPF 9\r\n"));
    }

    #[test]
    fn test_created_fmtp_after_unterminated_last_line() {
        let sdp = "v=0\r\nm=audio 9 RTP/AVP 9\r\na=rtpmap:9 G722/8000";
        let filter = CodecFilter::codec("G722").with_params(params(&[("bitrate", "64000")]));
        let out = force_codecs(sdp, &filter, &CodecFilter::none());
        assert_eq!(
            out,
            "v=0\r\nm=audio 9 RTP/AVP 9\r\na=rtpmap:9 G722/8000\r\na=fmtp:9 bitrate=64000\r\n"
        );
    }

    #[test]
    fn test_unknown_codec_leaves_section_unchanged() {
        let out = force_codecs(OFFER, &CodecFilter::codec("AV1"), &CodecFilter::codec("nonexistent"));
        assert_eq!(out, OFFER);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let audio = CodecFilter::codec("opus").with_params(params(&[("stereo", "1")]));
        let video = CodecFilter::codec("VP8");
        let once = force_codecs(OFFER, &audio, &video);
        let twice = force_codecs(&once, &audio, &video);
        assert_eq!(once, twice);

        let created = CodecFilter::codec("ISAC").with_params(params(&[("b", "2"), ("a", "1")]));
        let once = force_codecs(OFFER, &created, &video);
        assert_eq!(once, force_codecs(&once, &created, &video));
    }

    #[test]
    fn test_bare_newlines_are_preserved() {
        let lf = OFFER.replace("\r\n", "\n");
        let out = force_codecs(&lf, &CodecFilter::none(), &CodecFilter::codec("VP8"));
        assert!(!out.contains('\r'));
        assert!(out.contains("m=video 9 UDP/TLS/RTP/SAVPF 96 97\n"));
    }

    #[test]
    fn test_parse_params() {
        let p = parse_params("stereo=1; maxaveragebitrate=128000;").unwrap();
        assert_eq!(p.get("stereo").map(String::as_str), Some("1"));
        assert_eq!(p.get("maxaveragebitrate").map(String::as_str), Some("128000"));
        assert!(parse_params("").unwrap().is_empty());
        assert!(parse_params("novalue").is_err());
        assert!(parse_params("=1").is_err());
    }

    #[test]
    fn test_token_validation() {
        assert!(is_valid_token("video_track-1"));
        assert!(is_valid_token("a.b~c"));
        assert!(!is_valid_token(""));
        assert!(!is_valid_token("has space"));
        assert!(!is_valid_token("semi;colon"));
        assert!(!is_valid_token("caf\u{e9}"));
    }
}
