//! HLS playlist model and serializer.
//!
//! A [`Playlist`] is built by [`crate::hls::parser::parse`], mutated in place
//! by the rewriter, serialized with [`Playlist::render`], and then discarded.
//! Attribute-bearing tags keep their attributes as an ordered
//! [`AttributeList`] so anything the model does not name explicitly survives
//! the round trip in its original position and quoting.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::tags::*;

/// Playlist classification, inferred from the tags observed while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaylistKind {
    #[default]
    Unknown,
    Master,
    Media,
}

/// A parsed HLS playlist, master or media.
#[derive(Debug, Default)]
pub struct Playlist {
    pub kind: PlaylistKind,
    pub version: i32,
    /// Every input line, verbatim, in order. Unknown tags live only here.
    pub raw_lines: Vec<String>,
    pub master: MasterPlaylist,
    pub media: MediaPlaylist,
}

#[derive(Debug, Default)]
pub struct MasterPlaylist {
    pub variants: Vec<Variant>,
    pub iframe_variants: Vec<IFrameVariant>,
    /// Media groups keyed by group kind (AUDIO, VIDEO, SUBTITLES, CLOSED-CAPTIONS).
    pub media_groups: BTreeMap<String, Vec<MediaGroup>>,
    pub session_data: Vec<SessionData>,
    pub independent_segments: bool,
}

#[derive(Debug)]
pub struct MediaPlaylist {
    pub target_duration: f64,
    pub media_sequence: u64,
    pub discontinuity_sequence: u64,
    pub allow_cache: bool,
    /// VOD, EVENT, or empty.
    pub playlist_type: String,
    pub iframes_only: bool,
    pub end_list: bool,
    pub independent_segments: bool,
    pub segments: Vec<Segment>,
}

impl Default for MediaPlaylist {
    fn default() -> Self {
        Self {
            target_duration: 0.0,
            media_sequence: 0,
            discontinuity_sequence: 0,
            allow_cache: true,
            playlist_type: String::new(),
            iframes_only: false,
            end_list: false,
            independent_segments: false,
            segments: Vec::new(),
        }
    }
}

/// One rendition in a master playlist (`#EXT-X-STREAM-INF` + URI line).
#[derive(Debug, Clone)]
pub struct Variant {
    pub uri: String,
    pub bandwidth: u64,
    pub average_bandwidth: Option<u64>,
    pub codecs: Option<String>,
    pub resolution: Option<String>,
    pub frame_rate: Option<f64>,
    pub hdcp_level: Option<String>,
    pub audio: Option<String>,
    pub video: Option<String>,
    pub subtitles: Option<String>,
    pub closed_captions: Option<String>,
    /// Ordered attribute list as parsed, for round-tripping.
    pub attrs: AttributeList,
}

/// `#EXT-X-I-FRAME-STREAM-INF` entry; its URI lives in the attribute list.
#[derive(Debug, Clone)]
pub struct IFrameVariant {
    pub uri: String,
    pub bandwidth: u64,
    pub average_bandwidth: Option<u64>,
    pub codecs: Option<String>,
    pub resolution: Option<String>,
    pub hdcp_level: Option<String>,
    pub video: Option<String>,
    pub attrs: AttributeList,
}

impl IFrameVariant {
    /// Update the URI both in the typed field and in the serialized attributes.
    pub fn set_uri(&mut self, uri: String) {
        self.attrs.set(ATTR_URI, &uri, true);
        self.uri = uri;
    }
}

/// `#EXT-X-MEDIA` entry. `uri` is `None` for in-stream renditions.
#[derive(Debug, Clone)]
pub struct MediaGroup {
    pub kind: String,
    pub group_id: String,
    pub name: Option<String>,
    pub uri: Option<String>,
    pub language: Option<String>,
    pub assoc_language: Option<String>,
    pub default: bool,
    pub autoselect: bool,
    pub forced: bool,
    pub instream_id: Option<String>,
    pub characteristics: Option<String>,
    pub channels: Option<String>,
    pub attrs: AttributeList,
}

impl MediaGroup {
    pub fn set_uri(&mut self, uri: String) {
        self.attrs.set(ATTR_URI, &uri, true);
        self.uri = Some(uri);
    }
}

/// `#EXT-X-SESSION-DATA` entry.
#[derive(Debug, Clone)]
pub struct SessionData {
    pub data_id: String,
    pub value: Option<String>,
    pub uri: Option<String>,
    pub language: Option<String>,
    pub attrs: AttributeList,
}

/// One media segment (`#EXTINF` + URI line plus any segment-scoped tags).
#[derive(Debug, Clone, Default)]
pub struct Segment {
    pub uri: String,
    pub duration: f64,
    pub title: Option<String>,
    pub byte_range: Option<String>,
    pub discontinuity: bool,
    pub program_date_time: Option<String>,
    pub key: Option<Key>,
    pub map: Option<Map>,
}

/// `#EXT-X-KEY` descriptor attached to the following segments.
#[derive(Debug, Clone)]
pub struct Key {
    pub method: Option<String>,
    pub uri: Option<String>,
    pub attrs: AttributeList,
}

impl Key {
    pub fn set_uri(&mut self, uri: String) {
        self.attrs.set(ATTR_URI, &uri, true);
        self.uri = Some(uri);
    }
}

/// `#EXT-X-MAP` initialization-section descriptor.
#[derive(Debug, Clone)]
pub struct Map {
    pub uri: String,
    pub byte_range: Option<String>,
    pub attrs: AttributeList,
}

impl Map {
    pub fn set_uri(&mut self, uri: String) {
        self.attrs.set(ATTR_URI, &uri, true);
        self.uri = uri;
    }
}

/// A single `NAME=VALUE` attribute. `quoted` records whether the value was
/// double-quoted in the input so serialization can reproduce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    pub quoted: bool,
}

/// Ordered attribute mapping for one tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeList(Vec<Attribute>);

impl AttributeList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: &str, value: &str, quoted: bool) {
        self.0.push(Attribute {
            name: name.to_string(),
            value: value.to_string(),
            quoted,
        });
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Replace the value of `name` in place, or append it.
    pub fn set(&mut self, name: &str, value: &str, quoted: bool) {
        match self.0.iter_mut().find(|a| a.name == name) {
            Some(attr) => {
                attr.value = value.to_string();
                attr.quoted = quoted;
            }
            None => self.push(name, value, quoted),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.0.iter()
    }

    /// Serialize back to the comma-separated `NAME=VALUE` form.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, attr) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&attr.name);
            out.push('=');
            if attr.quoted {
                out.push('"');
                out.push_str(&attr.value);
                out.push('"');
            } else {
                out.push_str(&attr.value);
            }
        }
        out
    }
}

impl Playlist {
    pub fn is_master(&self) -> bool {
        self.kind == PlaylistKind::Master
    }

    pub fn is_media(&self) -> bool {
        self.kind == PlaylistKind::Media
    }

    /// Serialize the playlist deterministically.
    ///
    /// Emits the magic header, version, the kind-specific global tags, then
    /// variants or segments in original order. Segment-scoped tags keep the
    /// order KEY, MAP, PROGRAM-DATE-TIME, DISCONTINUITY, BYTERANGE, EXTINF.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(1024);
        out.push_str(TAG_EXTM3U);
        out.push('\n');
        let _ = writeln!(out, "{}:{}", TAG_VERSION, self.version);

        match self.kind {
            PlaylistKind::Master => self.render_master(&mut out),
            PlaylistKind::Media => self.render_media(&mut out),
            PlaylistKind::Unknown => {}
        }

        out
    }

    fn render_master(&self, out: &mut String) {
        let m = &self.master;

        if m.independent_segments {
            out.push_str(TAG_INDEPENDENT_SEGMENTS);
            out.push('\n');
        }

        for groups in m.media_groups.values() {
            for group in groups {
                let _ = writeln!(out, "{}:{}", TAG_MEDIA, group.attrs.render());
            }
        }

        for data in &m.session_data {
            let _ = writeln!(out, "{}:{}", TAG_SESSION_DATA, data.attrs.render());
        }

        for variant in &m.variants {
            let _ = writeln!(out, "{}:{}", TAG_STREAM_INF, variant.attrs.render());
            out.push_str(&variant.uri);
            out.push('\n');
        }

        for iframe in &m.iframe_variants {
            let _ = writeln!(out, "{}:{}", TAG_IFRAME_STREAM_INF, iframe.attrs.render());
        }
    }

    fn render_media(&self, out: &mut String) {
        let m = &self.media;

        if m.independent_segments {
            out.push_str(TAG_INDEPENDENT_SEGMENTS);
            out.push('\n');
        }

        let _ = writeln!(out, "{}:{}", TAG_TARGET_DURATION, m.target_duration as i64);
        let _ = writeln!(out, "{}:{}", TAG_MEDIA_SEQUENCE, m.media_sequence);

        if m.discontinuity_sequence > 0 {
            let _ = writeln!(
                out,
                "{}:{}",
                TAG_DISCONTINUITY_SEQUENCE, m.discontinuity_sequence
            );
        }

        if !m.allow_cache {
            let _ = writeln!(out, "{}:NO", TAG_ALLOW_CACHE);
        }

        if !m.playlist_type.is_empty() {
            let _ = writeln!(out, "{}:{}", TAG_PLAYLIST_TYPE, m.playlist_type);
        }

        if m.iframes_only {
            out.push_str(TAG_IFRAMES_ONLY);
            out.push('\n');
        }

        for segment in &m.segments {
            if let Some(key) = &segment.key {
                let _ = writeln!(out, "{}:{}", TAG_KEY, key.attrs.render());
            }
            if let Some(map) = &segment.map {
                let _ = writeln!(out, "{}:{}", TAG_MAP, map.attrs.render());
            }
            if let Some(pdt) = &segment.program_date_time {
                let _ = writeln!(out, "{}:{}", TAG_PROGRAM_DATE_TIME, pdt);
            }
            if segment.discontinuity {
                out.push_str(TAG_DISCONTINUITY);
                out.push('\n');
            }
            if let Some(range) = &segment.byte_range {
                let _ = writeln!(out, "{}:{}", TAG_BYTE_RANGE, range);
            }
            match &segment.title {
                Some(title) => {
                    let _ = writeln!(out, "{}:{:.3},{}", TAG_INF, segment.duration, title);
                }
                None => {
                    let _ = writeln!(out, "{}:{:.3},", TAG_INF, segment.duration);
                }
            }
            out.push_str(&segment.uri);
            out.push('\n');
        }

        if m.end_list {
            out.push_str(TAG_END_LIST);
            out.push('\n');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_list_preserves_order_and_quoting() {
        let mut attrs = AttributeList::new();
        attrs.push("BANDWIDTH", "800000", false);
        attrs.push("CODECS", "avc1.4d401f,mp4a.40.2", true);
        attrs.push("RESOLUTION", "640x360", false);

        assert_eq!(
            attrs.render(),
            "BANDWIDTH=800000,CODECS=\"avc1.4d401f,mp4a.40.2\",RESOLUTION=640x360"
        );
    }

    #[test]
    fn attribute_set_replaces_in_place() {
        let mut attrs = AttributeList::new();
        attrs.push("URI", "old.m3u8", true);
        attrs.push("BANDWIDTH", "100", false);

        attrs.set("URI", "new.m3u8", true);

        assert_eq!(attrs.get("URI"), Some("new.m3u8"));
        assert_eq!(attrs.render(), "URI=\"new.m3u8\",BANDWIDTH=100");
    }

    #[test]
    fn empty_media_playlist_renders_header_and_version() {
        let playlist = Playlist {
            kind: PlaylistKind::Media,
            version: 3,
            ..Default::default()
        };

        let text = playlist.render();
        assert!(text.starts_with("#EXTM3U\n#EXT-X-VERSION:3\n"));
    }

    #[test]
    fn segment_duration_uses_three_decimals() {
        let mut playlist = Playlist {
            kind: PlaylistKind::Media,
            version: 3,
            ..Default::default()
        };
        playlist.media.target_duration = 6.0;
        playlist.media.segments.push(Segment {
            uri: "seg0.ts".to_string(),
            duration: 5.9667,
            ..Default::default()
        });

        let text = playlist.render();
        assert!(text.contains("#EXTINF:5.967,\nseg0.ts\n"), "got:\n{text}");
    }

    #[test]
    fn segment_tag_order_is_stable() {
        let mut playlist = Playlist {
            kind: PlaylistKind::Media,
            version: 5,
            ..Default::default()
        };
        playlist.media.target_duration = 6.0;

        let mut key_attrs = AttributeList::new();
        key_attrs.push("METHOD", "AES-128", false);
        key_attrs.push("URI", "key.bin", true);
        let mut map_attrs = AttributeList::new();
        map_attrs.push("URI", "init.mp4", true);

        playlist.media.segments.push(Segment {
            uri: "seg0.ts".to_string(),
            duration: 6.0,
            byte_range: Some("75232@0".to_string()),
            discontinuity: true,
            program_date_time: Some("2024-01-01T00:00:00Z".to_string()),
            key: Some(Key {
                method: Some("AES-128".to_string()),
                uri: Some("key.bin".to_string()),
                attrs: key_attrs,
            }),
            map: Some(Map {
                uri: "init.mp4".to_string(),
                byte_range: None,
                attrs: map_attrs,
            }),
            title: None,
        });

        let text = playlist.render();
        let key_pos = text.find("#EXT-X-KEY").unwrap();
        let map_pos = text.find("#EXT-X-MAP").unwrap();
        let pdt_pos = text.find("#EXT-X-PROGRAM-DATE-TIME").unwrap();
        let disc_pos = text.find("#EXT-X-DISCONTINUITY\n").unwrap();
        let range_pos = text.find("#EXT-X-BYTERANGE").unwrap();
        let inf_pos = text.find("#EXTINF").unwrap();
        let uri_pos = text.find("seg0.ts").unwrap();

        assert!(key_pos < map_pos);
        assert!(map_pos < pdt_pos);
        assert!(pdt_pos < disc_pos);
        assert!(disc_pos < range_pos);
        assert!(range_pos < inf_pos);
        assert!(inf_pos < uri_pos);
    }
}
