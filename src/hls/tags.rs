//! HLS tag and attribute name constants.

pub const TAG_EXTM3U: &str = "#EXTM3U";
pub const TAG_VERSION: &str = "#EXT-X-VERSION";

// Master playlist tags
pub const TAG_STREAM_INF: &str = "#EXT-X-STREAM-INF";
pub const TAG_MEDIA: &str = "#EXT-X-MEDIA";
pub const TAG_IFRAME_STREAM_INF: &str = "#EXT-X-I-FRAME-STREAM-INF";
pub const TAG_SESSION_DATA: &str = "#EXT-X-SESSION-DATA";
pub const TAG_INDEPENDENT_SEGMENTS: &str = "#EXT-X-INDEPENDENT-SEGMENTS";

// Media playlist tags
pub const TAG_TARGET_DURATION: &str = "#EXT-X-TARGETDURATION";
pub const TAG_INF: &str = "#EXTINF";
pub const TAG_MEDIA_SEQUENCE: &str = "#EXT-X-MEDIA-SEQUENCE";
pub const TAG_DISCONTINUITY_SEQUENCE: &str = "#EXT-X-DISCONTINUITY-SEQUENCE";
pub const TAG_BYTE_RANGE: &str = "#EXT-X-BYTERANGE";
pub const TAG_DISCONTINUITY: &str = "#EXT-X-DISCONTINUITY";
pub const TAG_KEY: &str = "#EXT-X-KEY";
pub const TAG_MAP: &str = "#EXT-X-MAP";
pub const TAG_PROGRAM_DATE_TIME: &str = "#EXT-X-PROGRAM-DATE-TIME";
pub const TAG_END_LIST: &str = "#EXT-X-ENDLIST";
pub const TAG_ALLOW_CACHE: &str = "#EXT-X-ALLOW-CACHE";
pub const TAG_PLAYLIST_TYPE: &str = "#EXT-X-PLAYLIST-TYPE";
pub const TAG_IFRAMES_ONLY: &str = "#EXT-X-I-FRAMES-ONLY";

// Stream information attributes
pub const ATTR_BANDWIDTH: &str = "BANDWIDTH";
pub const ATTR_AVERAGE_BANDWIDTH: &str = "AVERAGE-BANDWIDTH";
pub const ATTR_CODECS: &str = "CODECS";
pub const ATTR_RESOLUTION: &str = "RESOLUTION";
pub const ATTR_FRAME_RATE: &str = "FRAME-RATE";
pub const ATTR_HDCP_LEVEL: &str = "HDCP-LEVEL";
pub const ATTR_AUDIO: &str = "AUDIO";
pub const ATTR_VIDEO: &str = "VIDEO";
pub const ATTR_SUBTITLES: &str = "SUBTITLES";
pub const ATTR_CLOSED_CAPTIONS: &str = "CLOSED-CAPTIONS";
pub const ATTR_URI: &str = "URI";

// Key attributes
pub const ATTR_METHOD: &str = "METHOD";
pub const ATTR_BYTERANGE: &str = "BYTERANGE";

// Media group attributes
pub const ATTR_TYPE: &str = "TYPE";
pub const ATTR_GROUP_ID: &str = "GROUP-ID";
pub const ATTR_LANGUAGE: &str = "LANGUAGE";
pub const ATTR_ASSOC_LANGUAGE: &str = "ASSOC-LANGUAGE";
pub const ATTR_NAME: &str = "NAME";
pub const ATTR_DEFAULT: &str = "DEFAULT";
pub const ATTR_AUTOSELECT: &str = "AUTOSELECT";
pub const ATTR_FORCED: &str = "FORCED";
pub const ATTR_INSTREAM_ID: &str = "INSTREAM-ID";
pub const ATTR_CHARACTERISTICS: &str = "CHARACTERISTICS";
pub const ATTR_CHANNELS: &str = "CHANNELS";

// Session data attributes
pub const ATTR_DATA_ID: &str = "DATA-ID";
pub const ATTR_VALUE: &str = "VALUE";
