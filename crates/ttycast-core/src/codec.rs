//! Newline-delimited cast file encoding.
//!
//! Wire format:
//!   line 1:  `{"version": 2, "width": 80, "height": 24, "timestamp": 1700000000, "command": "/bin/bash", "env": {...}}`
//!   line n:  `[1.234, "o", "hello\r\n"]`
//!
//! Lines use the `", "` and `": "` separators and escape every non-ASCII
//! character as `\uXXXX`, which is what existing cast tooling writes.
//! Event timestamps always carry exactly three decimals. Readers skip event
//! kinds they do not know, so consumers unaware of `e` keep working.

use crate::error::{CastError, CastResult};
use crate::event::{Event, EventKind, Timestamp, WindowSize};
use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

/// The only cast format version written and accepted.
pub const CAST_VERSION: u8 = 2;

/// First record of every cast file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u8,
    pub width: u16,
    pub height: u16,
    /// Session start, seconds since the Unix epoch.
    pub timestamp: u64,
    pub command: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Header {
    pub fn new(
        size: WindowSize,
        timestamp: u64,
        command: impl Into<String>,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            version: CAST_VERSION,
            width: size.cols,
            height: size.rows,
            timestamp,
            command: command.into(),
            env,
        }
    }

    pub fn size(&self) -> WindowSize {
        WindowSize::new(self.height, self.width)
    }
}

/// Spaced separators and ASCII-only strings.
struct CastFormatter;

impl Formatter for CastFormatter {
    fn begin_array_value<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        let mut start = 0;
        for (idx, ch) in fragment.char_indices() {
            if ch.is_ascii() {
                continue;
            }
            writer.write_all(fragment[start..idx].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = idx + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

fn to_line<T: Serialize + ?Sized>(value: &T) -> CastResult<String> {
    let mut out = Vec::with_capacity(128);
    let mut ser = serde_json::Serializer::with_formatter(&mut out, CastFormatter);
    value.serialize(&mut ser)?;
    String::from_utf8(out).map_err(|e| CastError::Codec(e.to_string()))
}

/// Encode the header as a single line (without the trailing newline).
pub fn encode_header(header: &Header) -> CastResult<String> {
    to_line(header)
}

/// Encode one event as a single line (without the trailing newline).
pub fn encode_event(event: &Event) -> CastResult<String> {
    let kind = to_line(event.kind.code())?;
    let payload = to_line(&event.payload)?;
    Ok(format!("[{}, {kind}, {payload}]", event.time))
}

/// Decode a header line, rejecting unsupported versions.
pub fn decode_header(line: &str) -> CastResult<Header> {
    let header: Header = serde_json::from_str(line.trim())?;
    if header.version != CAST_VERSION {
        return Err(CastError::Codec(format!(
            "unsupported cast version: {}",
            header.version
        )));
    }
    Ok(header)
}

/// Decode one event line.
///
/// Returns `Ok(None)` for well-formed events of an unknown kind.
pub fn decode_event(line: &str) -> CastResult<Option<Event>> {
    let (secs, code, payload): (f64, String, String) = serde_json::from_str(line.trim())?;
    let Some(kind) = EventKind::from_code(&code) else {
        return Ok(None);
    };
    Ok(Some(Event::new(Timestamp::from_secs_f64(secs)?, kind, payload)))
}

/// A parsed cast file.
#[derive(Debug, Clone, PartialEq)]
pub struct Cast {
    pub header: Header,
    pub events: Vec<Event>,
    /// Lines that were well-formed but carried an unknown event kind.
    pub skipped: usize,
}

/// Read a whole cast file: header, then one event per non-blank line.
///
/// Malformed event lines are an error; unknown kinds are counted and skipped.
pub fn read_cast<R: BufRead>(reader: R) -> CastResult<Cast> {
    let mut lines = reader.lines();

    let header = loop {
        match lines.next() {
            Some(line) => {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                break decode_header(&line)?;
            }
            None => return Err(CastError::Codec("empty cast file".into())),
        }
    };

    let mut events = Vec::new();
    let mut skipped = 0;
    for (idx, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match decode_event(&line) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => skipped += 1,
            Err(e) => {
                return Err(CastError::Codec(format!("line {}: {e}", idx + 2)));
            }
        }
    }

    Ok(Cast {
        header,
        events,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        let mut env = BTreeMap::new();
        env.insert("SHELL".to_string(), "/bin/bash".to_string());
        env.insert("TERM".to_string(), "xterm-256color".to_string());
        Header::new(WindowSize::new(24, 80), 1_700_000_000, "/bin/bash", env)
    }

    #[test]
    fn header_field_order_and_shape() {
        let line = encode_header(&sample_header()).unwrap();
        assert_eq!(
            line,
            r#"{"version": 2, "width": 80, "height": 24, "timestamp": 1700000000, "command": "/bin/bash", "env": {"SHELL": "/bin/bash", "TERM": "xterm-256color"}}"#
        );
    }

    #[test]
    fn non_ascii_is_escaped_like_existing_tooling() {
        let ev = Event::new(Timestamp::from_millis(2), EventKind::Output, "naïve ✓ 😀");
        let line = encode_event(&ev).unwrap();
        assert_eq!(line, r#"[0.002, "o", "na\u00efve \u2713 \ud83d\ude00"]"#);
        assert!(line.is_ascii());
        assert_eq!(decode_event(&line).unwrap(), Some(ev));

        let header = Header::new(WindowSize::new(24, 80), 0, "vim café.txt", BTreeMap::new());
        let line = encode_header(&header).unwrap();
        assert!(line.contains(r#""command": "vim caf\u00e9.txt""#));
        assert_eq!(decode_header(&line).unwrap(), header);
    }

    #[test]
    fn event_line_has_three_decimals() {
        let ev = Event::new(Timestamp::from_millis(1500), EventKind::Output, "hi\r\n");
        assert_eq!(encode_event(&ev).unwrap(), r#"[1.500, "o", "hi\r\n"]"#);

        let ev = Event::resize(Timestamp::ZERO, WindowSize::new(30, 100));
        assert_eq!(encode_event(&ev).unwrap(), r#"[0.000, "r", "30x100"]"#);
    }

    #[test]
    fn control_bytes_are_escaped() {
        let ev = Event::new(Timestamp::from_millis(7), EventKind::Input, "\u{3}\u{1b}[A");
        let line = encode_event(&ev).unwrap();
        assert_eq!(line, r#"[0.007, "i", "\u0003\u001b[A"]"#);
        assert_eq!(decode_event(&line).unwrap(), Some(ev));
    }

    #[test]
    fn written_cast_reads_back_identically() {
        let header = sample_header();
        let events = vec![
            Event::new(Timestamp::from_millis(0), EventKind::Output, "$ "),
            Event::new(Timestamp::from_millis(812), EventKind::Input, "l"),
            Event::new(Timestamp::from_millis(813), EventKind::Output, "l"),
            Event::new(Timestamp::from_millis(2_040), EventKind::Error, "ls: nope\n"),
            Event::resize(Timestamp::from_millis(2_100), WindowSize::new(30, 100)),
            Event::marker(Timestamp::from_millis(9_999), "activity_resumed_after_7.9s"),
            Event::new(Timestamp::from_millis(9_999), EventKind::Output, "naïve ✓"),
        ];

        let mut text = encode_header(&header).unwrap();
        text.push('\n');
        for ev in &events {
            text.push_str(&encode_event(ev).unwrap());
            text.push('\n');
        }

        let cast = read_cast(text.as_bytes()).unwrap();
        assert_eq!(cast.header, header);
        assert_eq!(cast.events, events);
        assert_eq!(cast.skipped, 0);
    }

    #[test]
    fn unknown_kinds_and_blank_lines_are_skipped() {
        let text = format!(
            "{}\n[0.100, \"o\", \"a\"]\n\n[0.200, \"x\", \"future\"]\n[0.300, \"e\", \"b\"]\n",
            encode_header(&sample_header()).unwrap()
        );
        let cast = read_cast(text.as_bytes()).unwrap();
        assert_eq!(cast.events.len(), 2);
        assert_eq!(cast.skipped, 1);
        assert_eq!(cast.events[1].kind, EventKind::Error);
    }

    #[test]
    fn rejects_other_versions() {
        let line = r#"{"version":1,"width":80,"height":24,"timestamp":0,"command":"sh"}"#;
        assert!(matches!(decode_header(line), Err(CastError::Codec(_))));
    }

    #[test]
    fn malformed_event_reports_line() {
        let text = format!("{}\n[0.1, \"o\"]\n", encode_header(&sample_header()).unwrap());
        let err = read_cast(text.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn empty_file_is_an_error() {
        assert!(read_cast(&b""[..]).is_err());
    }
}
