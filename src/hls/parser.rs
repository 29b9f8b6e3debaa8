//! HLS playlist parser.
//!
//! Single forward pass, line by line. A one-slot lookback holds the most
//! recently seen tag that must be paired with the following URI line
//! (`#EXT-X-STREAM-INF` or `#EXTINF`); segment-scoped tags (KEY, MAP,
//! BYTERANGE, DISCONTINUITY, PROGRAM-DATE-TIME) accumulate until the next
//! segment URI claims them.

use thiserror::Error;

use super::playlist::*;
use super::tags::*;

/// Typed parse failures.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("missing #EXTM3U header")]
    MissingHeader,
    #[error("line {line}: URI without a preceding EXTINF or EXT-X-STREAM-INF tag")]
    UriWithoutTag { line: usize },
    #[error("line {line}: invalid {field}: {value:?}")]
    InvalidNumber {
        line: usize,
        field: &'static str,
        value: String,
    },
    #[error("line {line}: missing {attr} attribute in {tag}")]
    MissingAttribute {
        line: usize,
        attr: &'static str,
        tag: &'static str,
    },
}

/// Tag waiting for its URI line.
enum Pending {
    StreamInf(AttributeList),
    Inf { duration: f64, title: Option<String> },
}

/// Segment-scoped tags seen since the previous segment URI.
#[derive(Default)]
struct SegmentState {
    key: Option<Key>,
    map: Option<Map>,
    byte_range: Option<String>,
    discontinuity: bool,
    program_date_time: Option<String>,
}

/// Parse a playlist from text.
///
/// The first non-empty line must be `#EXTM3U`. Empty lines are retained in
/// the raw-lines buffer but skipped semantically; unknown tags are retained
/// there verbatim.
pub fn parse(input: &str) -> Result<Playlist, ParseError> {
    let mut playlist = Playlist {
        version: 1,
        ..Default::default()
    };
    let mut pending: Option<Pending> = None;
    let mut segment_state = SegmentState::default();
    let mut saw_header = false;

    for (idx, raw) in input.lines().enumerate() {
        let line_no = idx + 1;
        playlist.raw_lines.push(raw.to_string());

        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if !saw_header {
            if line != TAG_EXTM3U {
                return Err(ParseError::MissingHeader);
            }
            saw_header = true;
            continue;
        }

        if line.starts_with('#') {
            parse_tag(
                &mut playlist,
                &mut pending,
                &mut segment_state,
                line,
                line_no,
            )?;
        } else {
            match pending.take() {
                Some(Pending::StreamInf(attrs)) => {
                    let variant = build_variant(line, attrs, line_no)?;
                    playlist.master.variants.push(variant);
                    playlist.kind = PlaylistKind::Master;
                }
                Some(Pending::Inf { duration, title }) => {
                    let state = std::mem::take(&mut segment_state);
                    playlist.media.segments.push(Segment {
                        uri: line.to_string(),
                        duration,
                        title,
                        byte_range: state.byte_range,
                        discontinuity: state.discontinuity,
                        program_date_time: state.program_date_time,
                        key: state.key,
                        map: state.map,
                    });
                    playlist.kind = PlaylistKind::Media;
                }
                None => return Err(ParseError::UriWithoutTag { line: line_no }),
            }
        }
    }

    if !saw_header {
        return Err(ParseError::MissingHeader);
    }

    // Final classification for playlists whose tags never settled it.
    if playlist.kind == PlaylistKind::Unknown {
        if !playlist.master.variants.is_empty() {
            playlist.kind = PlaylistKind::Master;
        } else if !playlist.media.segments.is_empty() {
            playlist.kind = PlaylistKind::Media;
        }
    }

    Ok(playlist)
}

fn parse_tag(
    playlist: &mut Playlist,
    pending: &mut Option<Pending>,
    segment_state: &mut SegmentState,
    line: &str,
    line_no: usize,
) -> Result<(), ParseError> {
    let (name, value) = match line.find(':') {
        Some(i) => (&line[..i], &line[i + 1..]),
        None => (line, ""),
    };

    match name {
        TAG_VERSION => {
            playlist.version = parse_number(value, "version", line_no)?;
        }
        TAG_TARGET_DURATION => {
            playlist.media.target_duration = parse_number(value, "target duration", line_no)?;
            playlist.kind = PlaylistKind::Media;
        }
        TAG_MEDIA_SEQUENCE => {
            playlist.media.media_sequence = parse_number(value, "media sequence", line_no)?;
            playlist.kind = PlaylistKind::Media;
        }
        TAG_DISCONTINUITY_SEQUENCE => {
            playlist.media.discontinuity_sequence =
                parse_number(value, "discontinuity sequence", line_no)?;
            playlist.kind = PlaylistKind::Media;
        }
        TAG_END_LIST => {
            playlist.media.end_list = true;
            playlist.kind = PlaylistKind::Media;
        }
        TAG_ALLOW_CACHE => {
            playlist.media.allow_cache = value != "NO";
            playlist.kind = PlaylistKind::Media;
        }
        TAG_PLAYLIST_TYPE => {
            playlist.media.playlist_type = value.to_string();
            playlist.kind = PlaylistKind::Media;
        }
        TAG_IFRAMES_ONLY => {
            playlist.media.iframes_only = true;
            playlist.kind = PlaylistKind::Media;
        }
        TAG_INDEPENDENT_SEGMENTS => {
            if playlist.kind == PlaylistKind::Media {
                playlist.media.independent_segments = true;
            } else {
                playlist.master.independent_segments = true;
            }
        }
        TAG_INF => {
            let (duration, title) = parse_inf_value(value, line_no)?;
            *pending = Some(Pending::Inf { duration, title });
            playlist.kind = PlaylistKind::Media;
        }
        TAG_STREAM_INF => {
            *pending = Some(Pending::StreamInf(parse_attributes(value)));
            playlist.kind = PlaylistKind::Master;
        }
        TAG_MEDIA => {
            let group = build_media_group(parse_attributes(value), line_no)?;
            playlist
                .master
                .media_groups
                .entry(group.kind.clone())
                .or_default()
                .push(group);
            playlist.kind = PlaylistKind::Master;
        }
        TAG_IFRAME_STREAM_INF => {
            let iframe = build_iframe_variant(parse_attributes(value), line_no)?;
            playlist.master.iframe_variants.push(iframe);
            playlist.kind = PlaylistKind::Master;
        }
        TAG_SESSION_DATA => {
            let data = build_session_data(parse_attributes(value), line_no)?;
            playlist.master.session_data.push(data);
            playlist.kind = PlaylistKind::Master;
        }
        TAG_KEY => {
            let attrs = parse_attributes(value);
            segment_state.key = Some(Key {
                method: attrs.get(ATTR_METHOD).map(str::to_string),
                uri: attrs.get(ATTR_URI).map(str::to_string),
                attrs,
            });
            playlist.kind = PlaylistKind::Media;
        }
        TAG_MAP => {
            let attrs = parse_attributes(value);
            segment_state.map = Some(Map {
                uri: attrs.get(ATTR_URI).unwrap_or_default().to_string(),
                byte_range: attrs.get(ATTR_BYTERANGE).map(str::to_string),
                attrs,
            });
            playlist.kind = PlaylistKind::Media;
        }
        TAG_BYTE_RANGE => {
            segment_state.byte_range = Some(value.to_string());
            playlist.kind = PlaylistKind::Media;
        }
        TAG_DISCONTINUITY => {
            segment_state.discontinuity = true;
            playlist.kind = PlaylistKind::Media;
        }
        TAG_PROGRAM_DATE_TIME => {
            segment_state.program_date_time = Some(value.to_string());
            playlist.kind = PlaylistKind::Media;
        }
        // Unknown tags and comments stay in the raw-lines buffer only.
        _ => {}
    }

    Ok(())
}

fn build_variant(uri: &str, attrs: AttributeList, line_no: usize) -> Result<Variant, ParseError> {
    let bandwidth = require_number(&attrs, ATTR_BANDWIDTH, TAG_STREAM_INF, "bandwidth", line_no)?;

    Ok(Variant {
        uri: uri.to_string(),
        bandwidth,
        average_bandwidth: attrs
            .get(ATTR_AVERAGE_BANDWIDTH)
            .and_then(|v| v.parse().ok()),
        codecs: attrs.get(ATTR_CODECS).map(str::to_string),
        resolution: attrs.get(ATTR_RESOLUTION).map(str::to_string),
        frame_rate: attrs.get(ATTR_FRAME_RATE).and_then(|v| v.parse().ok()),
        hdcp_level: attrs.get(ATTR_HDCP_LEVEL).map(str::to_string),
        audio: attrs.get(ATTR_AUDIO).map(str::to_string),
        video: attrs.get(ATTR_VIDEO).map(str::to_string),
        subtitles: attrs.get(ATTR_SUBTITLES).map(str::to_string),
        closed_captions: attrs.get(ATTR_CLOSED_CAPTIONS).map(str::to_string),
        attrs,
    })
}

fn build_iframe_variant(attrs: AttributeList, line_no: usize) -> Result<IFrameVariant, ParseError> {
    let uri = attrs
        .get(ATTR_URI)
        .ok_or(ParseError::MissingAttribute {
            line: line_no,
            attr: ATTR_URI,
            tag: TAG_IFRAME_STREAM_INF,
        })?
        .to_string();
    let bandwidth = require_number(
        &attrs,
        ATTR_BANDWIDTH,
        TAG_IFRAME_STREAM_INF,
        "bandwidth",
        line_no,
    )?;

    Ok(IFrameVariant {
        uri,
        bandwidth,
        average_bandwidth: attrs
            .get(ATTR_AVERAGE_BANDWIDTH)
            .and_then(|v| v.parse().ok()),
        codecs: attrs.get(ATTR_CODECS).map(str::to_string),
        resolution: attrs.get(ATTR_RESOLUTION).map(str::to_string),
        hdcp_level: attrs.get(ATTR_HDCP_LEVEL).map(str::to_string),
        video: attrs.get(ATTR_VIDEO).map(str::to_string),
        attrs,
    })
}

fn build_media_group(attrs: AttributeList, line_no: usize) -> Result<MediaGroup, ParseError> {
    let kind = attrs
        .get(ATTR_TYPE)
        .ok_or(ParseError::MissingAttribute {
            line: line_no,
            attr: ATTR_TYPE,
            tag: TAG_MEDIA,
        })?
        .to_string();
    let group_id = attrs
        .get(ATTR_GROUP_ID)
        .ok_or(ParseError::MissingAttribute {
            line: line_no,
            attr: ATTR_GROUP_ID,
            tag: TAG_MEDIA,
        })?
        .to_string();

    Ok(MediaGroup {
        kind,
        group_id,
        name: attrs.get(ATTR_NAME).map(str::to_string),
        uri: attrs.get(ATTR_URI).map(str::to_string),
        language: attrs.get(ATTR_LANGUAGE).map(str::to_string),
        assoc_language: attrs.get(ATTR_ASSOC_LANGUAGE).map(str::to_string),
        default: attrs.get(ATTR_DEFAULT) == Some("YES"),
        autoselect: attrs.get(ATTR_AUTOSELECT) == Some("YES"),
        forced: attrs.get(ATTR_FORCED) == Some("YES"),
        instream_id: attrs.get(ATTR_INSTREAM_ID).map(str::to_string),
        characteristics: attrs.get(ATTR_CHARACTERISTICS).map(str::to_string),
        channels: attrs.get(ATTR_CHANNELS).map(str::to_string),
        attrs,
    })
}

fn build_session_data(attrs: AttributeList, line_no: usize) -> Result<SessionData, ParseError> {
    let data_id = attrs
        .get(ATTR_DATA_ID)
        .ok_or(ParseError::MissingAttribute {
            line: line_no,
            attr: ATTR_DATA_ID,
            tag: TAG_SESSION_DATA,
        })?
        .to_string();

    Ok(SessionData {
        data_id,
        value: attrs.get(ATTR_VALUE).map(str::to_string),
        uri: attrs.get(ATTR_URI).map(str::to_string),
        language: attrs.get(ATTR_LANGUAGE).map(str::to_string),
        attrs,
    })
}

/// Tokenize a comma-separated attribute string into an ordered list.
///
/// A value is either a double-quoted string (which may contain commas,
/// quotes stripped) or an unquoted run of non-comma characters.
fn parse_attributes(input: &str) -> AttributeList {
    let mut attrs = AttributeList::new();
    let bytes = input.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        // Skip separators and whitespace between attributes.
        while pos < bytes.len() && (bytes[pos] == b',' || bytes[pos] == b' ') {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }

        let name_start = pos;
        while pos < bytes.len() && bytes[pos] != b'=' && bytes[pos] != b',' {
            pos += 1;
        }
        if pos >= bytes.len() || bytes[pos] != b'=' {
            // Stray token without '='; skip past it.
            continue;
        }
        let name = &input[name_start..pos];
        pos += 1; // consume '='

        if pos < bytes.len() && bytes[pos] == b'"' {
            pos += 1;
            let value_start = pos;
            while pos < bytes.len() && bytes[pos] != b'"' {
                pos += 1;
            }
            let value = &input[value_start..pos];
            if pos < bytes.len() {
                pos += 1; // closing quote
            }
            attrs.push(name, value, true);
        } else {
            let value_start = pos;
            while pos < bytes.len() && bytes[pos] != b',' {
                pos += 1;
            }
            attrs.push(name, &input[value_start..pos], false);
        }
    }

    attrs
}

/// Parse the `#EXTINF` value: `<duration>,[<title>]`.
fn parse_inf_value(value: &str, line_no: usize) -> Result<(f64, Option<String>), ParseError> {
    let (duration_str, title) = match value.find(',') {
        Some(i) => (&value[..i], &value[i + 1..]),
        None => (value, ""),
    };

    let duration = duration_str
        .trim()
        .parse()
        .map_err(|_| ParseError::InvalidNumber {
            line: line_no,
            field: "segment duration",
            value: duration_str.to_string(),
        })?;

    let title = if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    };

    Ok((duration, title))
}

fn parse_number<T: std::str::FromStr>(
    value: &str,
    field: &'static str,
    line_no: usize,
) -> Result<T, ParseError> {
    value.trim().parse().map_err(|_| ParseError::InvalidNumber {
        line: line_no,
        field,
        value: value.to_string(),
    })
}

fn require_number(
    attrs: &AttributeList,
    attr: &'static str,
    tag: &'static str,
    field: &'static str,
    line_no: usize,
) -> Result<u64, ParseError> {
    let value = attrs.get(attr).ok_or(ParseError::MissingAttribute {
        line: line_no,
        attr,
        tag,
    })?;
    parse_number(value, field, line_no)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U\n\
#EXT-X-VERSION:4\n\
#EXT-X-INDEPENDENT-SEGMENTS\n\
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"English\",LANGUAGE=\"en\",DEFAULT=YES,URI=\"audio/en.m3u8\"\n\
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360,CODECS=\"avc1.4d401f,mp4a.40.2\",AUDIO=\"aud\"\n\
low.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=2400000,RESOLUTION=1280x720,AUDIO=\"aud\"\n\
mid.m3u8\n\
#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=120000,URI=\"iframe.m3u8\"\n";

    const MEDIA: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:6\n\
#EXT-X-MEDIA-SEQUENCE:100\n\
#EXTINF:5.967,\n\
seg100.ts\n\
#EXTINF:5.967,\n\
seg101.ts\n\
#EXT-X-ENDLIST\n";

    #[test]
    fn parses_master_playlist() {
        let playlist = parse(MASTER).unwrap();

        assert!(playlist.is_master());
        assert_eq!(playlist.version, 4);
        assert!(playlist.master.independent_segments);
        assert_eq!(playlist.master.variants.len(), 2);
        assert_eq!(playlist.master.iframe_variants.len(), 1);

        let low = &playlist.master.variants[0];
        assert_eq!(low.uri, "low.m3u8");
        assert_eq!(low.bandwidth, 800000);
        assert_eq!(low.resolution.as_deref(), Some("640x360"));
        assert_eq!(low.codecs.as_deref(), Some("avc1.4d401f,mp4a.40.2"));
        assert_eq!(low.audio.as_deref(), Some("aud"));

        let groups = &playlist.master.media_groups["AUDIO"];
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group_id, "aud");
        assert_eq!(groups[0].uri.as_deref(), Some("audio/en.m3u8"));
        assert!(groups[0].default);
    }

    #[test]
    fn parses_media_playlist() {
        let playlist = parse(MEDIA).unwrap();

        assert!(playlist.is_media());
        assert_eq!(playlist.media.target_duration, 6.0);
        assert_eq!(playlist.media.media_sequence, 100);
        assert!(playlist.media.end_list);
        assert_eq!(playlist.media.segments.len(), 2);
        assert_eq!(playlist.media.segments[0].uri, "seg100.ts");
        assert_eq!(playlist.media.segments[0].duration, 5.967);
    }

    #[test]
    fn missing_header_is_a_hard_error() {
        let err = parse("#EXT-X-VERSION:3\n").unwrap_err();
        assert!(matches!(err, ParseError::MissingHeader));

        let err = parse("").unwrap_err();
        assert!(matches!(err, ParseError::MissingHeader));
    }

    #[test]
    fn header_may_follow_blank_lines() {
        let playlist = parse("\n\n#EXTM3U\n#EXT-X-TARGETDURATION:6\n").unwrap();
        assert!(playlist.is_media());
    }

    #[test]
    fn uri_without_tag_is_rejected() {
        let err = parse("#EXTM3U\nseg0.ts\n").unwrap_err();
        assert!(matches!(err, ParseError::UriWithoutTag { line: 2 }));
    }

    #[test]
    fn non_numeric_values_are_rejected() {
        assert!(matches!(
            parse("#EXTM3U\n#EXT-X-VERSION:abc\n").unwrap_err(),
            ParseError::InvalidNumber { .. }
        ));
        assert!(matches!(
            parse("#EXTM3U\n#EXTINF:abc,\nseg.ts\n").unwrap_err(),
            ParseError::InvalidNumber { .. }
        ));
        assert!(matches!(
            parse("#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=abc\nlow.m3u8\n").unwrap_err(),
            ParseError::InvalidNumber { .. }
        ));
    }

    #[test]
    fn stream_inf_requires_bandwidth() {
        let err = parse("#EXTM3U\n#EXT-X-STREAM-INF:RESOLUTION=640x360\nlow.m3u8\n").unwrap_err();
        assert!(matches!(err, ParseError::MissingAttribute { .. }));
    }

    #[test]
    fn quoted_attribute_values_may_contain_commas() {
        let attrs = parse_attributes("BANDWIDTH=800000,CODECS=\"avc1.4d401f,mp4a.40.2\"");
        assert_eq!(attrs.get("BANDWIDTH"), Some("800000"));
        assert_eq!(attrs.get("CODECS"), Some("avc1.4d401f,mp4a.40.2"));
    }

    #[test]
    fn segment_scoped_tags_attach_to_next_segment() {
        let input = "#EXTM3U\n\
#EXT-X-TARGETDURATION:6\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x1234\n\
#EXT-X-MAP:URI=\"init.mp4\"\n\
#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:00Z\n\
#EXT-X-DISCONTINUITY\n\
#EXT-X-BYTERANGE:75232@0\n\
#EXTINF:6.000,\n\
seg0.ts\n\
#EXTINF:6.000,\n\
seg1.ts\n";
        let playlist = parse(input).unwrap();
        let first = &playlist.media.segments[0];
        let second = &playlist.media.segments[1];

        assert_eq!(first.key.as_ref().unwrap().uri.as_deref(), Some("key.bin"));
        assert_eq!(first.map.as_ref().unwrap().uri, "init.mp4");
        assert_eq!(
            first.program_date_time.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
        assert!(first.discontinuity);
        assert_eq!(first.byte_range.as_deref(), Some("75232@0"));

        // The accumulated tags must not leak into the next segment.
        assert!(second.key.is_none());
        assert!(second.map.is_none());
        assert!(!second.discontinuity);
    }

    #[test]
    fn unknown_tags_are_kept_in_raw_lines() {
        let input = "#EXTM3U\n#EXT-X-CUSTOM:foo\n#EXT-X-TARGETDURATION:6\n";
        let playlist = parse(input).unwrap();
        assert!(playlist.raw_lines.iter().any(|l| l == "#EXT-X-CUSTOM:foo"));
    }

    #[test]
    fn round_trip_preserves_media_playlist() {
        let playlist = parse(MEDIA).unwrap();
        let rendered = playlist.render();
        let reparsed = parse(&rendered).unwrap();

        assert_eq!(
            reparsed.media.target_duration,
            playlist.media.target_duration
        );
        assert_eq!(reparsed.media.media_sequence, playlist.media.media_sequence);
        assert_eq!(reparsed.media.end_list, playlist.media.end_list);
        assert_eq!(reparsed.media.segments.len(), playlist.media.segments.len());
        for (a, b) in reparsed
            .media
            .segments
            .iter()
            .zip(playlist.media.segments.iter())
        {
            assert_eq!(a.uri, b.uri);
            assert_eq!(a.duration, b.duration);
        }

        // A second render must be byte-identical.
        assert_eq!(parse(&rendered).unwrap().render(), rendered);
    }

    #[test]
    fn round_trip_preserves_master_playlist() {
        let playlist = parse(MASTER).unwrap();
        let rendered = playlist.render();
        let reparsed = parse(&rendered).unwrap();

        assert_eq!(
            reparsed.master.variants.len(),
            playlist.master.variants.len()
        );
        for (a, b) in reparsed
            .master
            .variants
            .iter()
            .zip(playlist.master.variants.iter())
        {
            assert_eq!(a.uri, b.uri);
            assert_eq!(a.bandwidth, b.bandwidth);
            assert_eq!(a.attrs, b.attrs);
        }
        assert_eq!(
            reparsed.master.iframe_variants[0].uri,
            playlist.master.iframe_variants[0].uri
        );
        assert_eq!(parse(&rendered).unwrap().render(), rendered);
    }
}
