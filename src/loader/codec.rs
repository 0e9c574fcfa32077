use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

const MAX_LINE_LENGTH: usize = 4096;

/// Splits tool output into lines on `\n` or `\r`.
///
/// Progress indicators redraw themselves with a bare carriage return, so
/// both terminators end a line. Empty lines are dropped.
#[derive(Debug, Default)]
pub struct LineCodec;

impl LineCodec {
    pub fn new() -> Self {
        Self
    }

    fn take_line(buf: &mut BytesMut, len: usize) -> String {
        let line = buf.split_to(len);
        String::from_utf8_lossy(&line).trim_end().to_string()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            let Some(end) = buf.iter().position(|&b| b == b'\n' || b == b'\r') else {
                // May cut a UTF-8 sequence in two; the lossy decode turns
                // the halves into replacement characters.
                if buf.len() > MAX_LINE_LENGTH {
                    return Ok(Some(Self::take_line(buf, MAX_LINE_LENGTH)));
                }
                return Ok(None);
            };

            let line = Self::take_line(buf, end);
            buf.advance(1);
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let len = buf.len();
        let line = Self::take_line(buf, len);
        Ok((!line.is_empty()).then_some(line))
    }
}

/// A line of `esptool` output the loader reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum EsptoolLine {
    Chip(String),
    Mac(String),
    Erasing,
    Writing { address: u32, percent: f64 },
    Wrote { bytes: u64, address: u32 },
    HashVerified,
    Fatal(String),
    Other,
}

impl EsptoolLine {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();

        if let Some(rest) = line
            .strip_prefix("Chip is ")
            .or_else(|| line.strip_prefix("Chip type:"))
        {
            return EsptoolLine::Chip(rest.trim().to_string());
        }
        if let Some(rest) = line.strip_prefix("MAC:") {
            return EsptoolLine::Mac(rest.trim().to_string());
        }
        if line.starts_with("Erasing flash") {
            return EsptoolLine::Erasing;
        }
        if let Some(rest) = line.strip_prefix("Writing at ") {
            if let (Some(address), Some(percent)) = (leading_hex(rest), percent_of(rest)) {
                return EsptoolLine::Writing { address, percent };
            }
        }
        if let Some(rest) = line.strip_prefix("Wrote ") {
            let bytes = rest
                .split_whitespace()
                .next()
                .and_then(|n| n.parse().ok());
            let address = rest
                .find(" at ")
                .and_then(|i| leading_hex(&rest[i + 4..]));
            if let (Some(bytes), Some(address)) = (bytes, address) {
                return EsptoolLine::Wrote { bytes, address };
            }
        }
        if line.starts_with("Hash of data verified") {
            return EsptoolLine::HashVerified;
        }
        if let Some(rest) = line.strip_prefix("A fatal error occurred:") {
            return EsptoolLine::Fatal(rest.trim().to_string());
        }
        EsptoolLine::Other
    }
}

/// Parses a `0x`-prefixed hex number at the start of `s`.
fn leading_hex(s: &str) -> Option<u32> {
    let digits = s.trim_start().strip_prefix("0x")?;
    let end = digits
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(digits.len());
    u32::from_str_radix(&digits[..end], 16).ok()
}

/// The number right before the first `%` sign, e.g. `(14 %)` or `14.3%`.
fn percent_of(s: &str) -> Option<f64> {
    let head = s[..s.find('%')?].trim_end();
    let start = head
        .rfind(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map_or(0, |i| i + 1);
    head[start..].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Vec<String> {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(input);
        let mut lines = Vec::new();
        while let Some(line) = codec.decode(&mut buf).unwrap() {
            lines.push(line);
        }
        if let Some(line) = codec.decode_eof(&mut buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn splits_on_carriage_returns() {
        let lines = decode_all(
            b"Compressed 17568 bytes to 11450...\r\nWriting at 0x00001000... (14 %)\rWriting at 0x00004000... (100 %)\nWrote 17568",
        );
        assert_eq!(
            lines,
            vec![
                "Compressed 17568 bytes to 11450...",
                "Writing at 0x00001000... (14 %)",
                "Writing at 0x00004000... (100 %)",
                "Wrote 17568",
            ]
        );
    }

    #[test]
    fn waits_for_terminator() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"Writing at 0x0000"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"1000... (5 %)\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some("Writing at 0x00001000... (5 %)")
        );
    }

    #[test]
    fn parses_chip_lines() {
        assert_eq!(
            EsptoolLine::parse("Chip is ESP32-D0WD-V3 (revision v3.1)"),
            EsptoolLine::Chip("ESP32-D0WD-V3 (revision v3.1)".into())
        );
        assert_eq!(
            EsptoolLine::parse("Chip type:          ESP32-S3 (QFN56) (revision v0.2)"),
            EsptoolLine::Chip("ESP32-S3 (QFN56) (revision v0.2)".into())
        );
        assert_eq!(
            EsptoolLine::parse("MAC: 24:0a:c4:00:01:02"),
            EsptoolLine::Mac("24:0a:c4:00:01:02".into())
        );
    }

    #[test]
    fn parses_write_progress() {
        assert_eq!(
            EsptoolLine::parse("Writing at 0x00010000... (12 %)"),
            EsptoolLine::Writing {
                address: 0x10000,
                percent: 12.0
            }
        );
        assert_eq!(
            EsptoolLine::parse("Writing at 0x0000e000 [=====>    ]  54.5% 4096/8192 bytes..."),
            EsptoolLine::Writing {
                address: 0xe000,
                percent: 54.5
            }
        );
        assert_eq!(
            EsptoolLine::parse(
                "Wrote 17568 bytes (11450 compressed) at 0x00001000 in 0.3 seconds (effective 510.8 kbit/s)..."
            ),
            EsptoolLine::Wrote {
                bytes: 17568,
                address: 0x1000
            }
        );
        assert_eq!(
            EsptoolLine::parse("Wrote 3072 bytes at 0x00008000 in 0.1 seconds"),
            EsptoolLine::Wrote {
                bytes: 3072,
                address: 0x8000
            }
        );
    }

    #[test]
    fn parses_status_lines() {
        assert_eq!(EsptoolLine::parse("Hash of data verified."), EsptoolLine::HashVerified);
        assert_eq!(
            EsptoolLine::parse("Erasing flash (this may take a while)..."),
            EsptoolLine::Erasing
        );
        assert_eq!(
            EsptoolLine::parse(
                "A fatal error occurred: Failed to connect to ESP32: No serial data received."
            ),
            EsptoolLine::Fatal("Failed to connect to ESP32: No serial data received.".into())
        );
        assert_eq!(EsptoolLine::parse("Stub running..."), EsptoolLine::Other);
        assert_eq!(EsptoolLine::parse("Writing at 0x00001000..."), EsptoolLine::Other);
    }

    #[test]
    fn overlong_line_is_cut() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&vec![b'.'; MAX_LINE_LENGTH + 10][..]);
        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.len(), MAX_LINE_LENGTH);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"\nStub running...\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(".........."));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("Stub running..."));
    }
}
