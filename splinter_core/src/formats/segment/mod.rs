//! Segment-based model for JPEG seeds.
//!
//! A seed is split at the first start-of-scan marker. The header region is
//! walked segment by segment (marker, big-endian length counting itself,
//! content) and dispatched into typed tables; the scan region yields the scan
//! header and the opaque entropy-coded body up to the final end marker.

mod ops;
mod serialize;

use crate::formats::FormatError;
use crate::mutator::{Operation, StructuralModel};
use rand_core::RngCore;
use regex::bytes::Regex;
use std::sync::LazyLock;

pub const SOI: u16 = 0xFFD8;
pub const EOI: u16 = 0xFFD9;
pub const SOS: u16 = 0xFFDA;
pub const DHT: u16 = 0xFFC4;
pub const DQT: u16 = 0xFFDB;
pub const DRI: u16 = 0xFFDD;
pub const COM: u16 = 0xFFFE;
pub const SOF0: u16 = 0xFFC0;
pub const APP0: u16 = 0xFFE0;

/// Every marker the header scan recognises.
static MARKER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)\xFF[\xD8\xD9\xDA\xC4\xDB\xDD\xFE\xC0-\xC3\xC5-\xC7\xC9-\xCB\xCD-\xCF\xE0-\xEF]")
        .expect("marker pattern is a valid constant regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    StartOfImage,
    EndOfImage,
    StartOfScan,
    Huffman,
    Quantization,
    RestartInterval,
    Comment,
    /// Start of frame; carries the low byte of the marker (`C0`..`CF`).
    Frame(u8),
    /// Application segment; carries the index `n` of `APPn`.
    App(u8),
}

impl Marker {
    pub fn from_code(code: u16) -> Option<Self> {
        let [high, low] = code.to_be_bytes();
        if high != 0xFF {
            return None;
        }
        Some(match code {
            SOI => Marker::StartOfImage,
            EOI => Marker::EndOfImage,
            SOS => Marker::StartOfScan,
            DHT => Marker::Huffman,
            DQT => Marker::Quantization,
            DRI => Marker::RestartInterval,
            COM => Marker::Comment,
            _ => match low {
                0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => Marker::Frame(low),
                0xE0..=0xEF => Marker::App(low - 0xE0),
                _ => return None,
            },
        })
    }

    pub fn code(&self) -> u16 {
        match self {
            Marker::StartOfImage => SOI,
            Marker::EndOfImage => EOI,
            Marker::StartOfScan => SOS,
            Marker::Huffman => DHT,
            Marker::Quantization => DQT,
            Marker::RestartInterval => DRI,
            Marker::Comment => COM,
            Marker::Frame(low) => 0xFF00 | u16::from(*low),
            Marker::App(index) => APP0 + u16::from(*index & 0x0F),
        }
    }

    pub fn bytes(&self) -> [u8; 2] {
        self.code().to_be_bytes()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSegment {
    /// `n` in `APPn`, `0..=15`.
    pub index: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizationTable {
    /// 0 for 8-bit entries, 1 for 16-bit entries.
    pub precision: u8,
    pub id: u8,
    /// 64 or 128 raw bytes depending on `precision`.
    pub values: Vec<u8>,
}

impl QuantizationTable {
    pub fn value_len(precision: u8) -> usize {
        if precision == 0 { 64 } else { 128 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuffmanTable {
    pub class: u8,
    pub destination: u8,
    /// Number of codes of each bit length 1..=16.
    pub counts: [u8; 16],
    pub symbols: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Component {
    pub id: u8,
    pub horizontal: u8,
    pub vertical: u8,
    pub quant_table: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Low byte of the SOF marker the frame was read from.
    pub kind: u8,
    pub precision: u8,
    pub height: u16,
    pub width: u16,
    /// Declared count. Kept apart from `components` so a mutation can make
    /// the two disagree.
    pub component_count: u8,
    pub components: Vec<Component>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanComponent {
    pub id: u8,
    pub dc_table: u8,
    pub ac_table: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanHeader {
    pub component_count: u8,
    pub components: Vec<ScanComponent>,
    pub spectral_start: u8,
    pub spectral_end: u8,
    pub approximation: u8,
}

/// A parsed JPEG seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDocument {
    pub app_segments: Vec<AppSegment>,
    pub comments: Vec<Vec<u8>>,
    pub quant_tables: Vec<QuantizationTable>,
    pub frame: Option<Frame>,
    pub huffman_tables: Vec<HuffmanTable>,
    pub restart_interval: Option<u16>,
    pub scan: ScanHeader,
    pub body: Vec<u8>,
}

fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn need(segment: &'static str, content: &[u8], needed: usize) -> Result<(), FormatError> {
    if content.len() < needed {
        Err(FormatError::Truncated {
            segment,
            needed,
            available: content.len(),
        })
    } else {
        Ok(())
    }
}

/// Slices the content of the length-prefixed segment whose marker starts at
/// `offset`. Returns the content and the offset just past it.
fn segment_content(seed: &[u8], offset: usize) -> Result<(&[u8], usize), FormatError> {
    let marker = read_u16(seed, offset).unwrap_or_default();
    let length_at = offset + 2;
    let declared = read_u16(seed, length_at).ok_or(FormatError::Truncated {
        segment: "segment length",
        needed: 2,
        available: seed.len().saturating_sub(length_at),
    })? as usize;
    let available = seed.len() - length_at;
    if declared > available {
        return Err(FormatError::SegmentOverrun {
            marker,
            offset,
            declared,
            available,
        });
    }
    let start = length_at + declared.min(2);
    let end = length_at + declared;
    Ok((&seed[start..end], end))
}

fn parse_quant_tables(mut content: &[u8]) -> Result<Vec<QuantizationTable>, FormatError> {
    let mut tables = Vec::new();
    while !content.is_empty() {
        let precision = content[0] >> 4;
        let id = content[0] & 0x0F;
        let len = QuantizationTable::value_len(precision);
        need("quantization table", content, 1 + len)?;
        tables.push(QuantizationTable {
            precision,
            id,
            values: content[1..1 + len].to_vec(),
        });
        content = &content[1 + len..];
    }
    Ok(tables)
}

fn parse_huffman_tables(mut content: &[u8]) -> Result<Vec<HuffmanTable>, FormatError> {
    let mut tables = Vec::new();
    while !content.is_empty() {
        need("huffman table", content, 17)?;
        let mut counts = [0u8; 16];
        counts.copy_from_slice(&content[1..17]);
        let total: usize = counts.iter().map(|c| usize::from(*c)).sum();
        need("huffman table", content, 17 + total)?;
        tables.push(HuffmanTable {
            class: content[0] >> 4,
            destination: content[0] & 0x0F,
            counts,
            symbols: content[17..17 + total].to_vec(),
        });
        content = &content[17 + total..];
    }
    Ok(tables)
}

fn parse_frame(kind: u8, content: &[u8]) -> Result<Frame, FormatError> {
    need("frame", content, 6)?;
    let component_count = content[5];
    need("frame", content, 6 + 3 * usize::from(component_count))?;
    let components = content[6..6 + 3 * usize::from(component_count)]
        .chunks_exact(3)
        .map(|c| Component {
            id: c[0],
            horizontal: c[1] >> 4,
            vertical: c[1] & 0x0F,
            quant_table: c[2],
        })
        .collect();
    Ok(Frame {
        kind,
        precision: content[0],
        height: u16::from_be_bytes([content[1], content[2]]),
        width: u16::from_be_bytes([content[3], content[4]]),
        component_count,
        components,
    })
}

fn parse_scan_header(content: &[u8]) -> Result<ScanHeader, FormatError> {
    need("scan header", content, 1)?;
    let component_count = content[0];
    let selectors = 1 + 2 * usize::from(component_count);
    need("scan header", content, selectors + 3)?;
    let components = content[1..selectors]
        .chunks_exact(2)
        .map(|c| ScanComponent {
            id: c[0],
            dc_table: c[1] >> 4,
            ac_table: c[1] & 0x0F,
        })
        .collect();
    Ok(ScanHeader {
        component_count,
        components,
        spectral_start: content[selectors],
        spectral_end: content[selectors + 1],
        approximation: content[selectors + 2],
    })
}

impl SegmentDocument {
    pub fn parse_image(seed: &[u8]) -> Result<Self, FormatError> {
        if read_u16(seed, 0) != Some(SOI) {
            return Err(FormatError::MissingStartMarker);
        }

        let mut doc = SegmentDocument {
            app_segments: Vec::new(),
            comments: Vec::new(),
            quant_tables: Vec::new(),
            frame: None,
            huffman_tables: Vec::new(),
            restart_interval: None,
            scan: ScanHeader {
                component_count: 0,
                components: Vec::new(),
                spectral_start: 0,
                spectral_end: 0,
                approximation: 0,
            },
            body: Vec::new(),
        };

        let mut pos = 2;
        let scan_offset = loop {
            let found = MARKER_PATTERN
                .find_at(seed, pos)
                .ok_or(FormatError::MissingStartOfScan)?;
            let offset = found.start();
            let code = u16::from_be_bytes([seed[offset], seed[offset + 1]]);
            let Some(marker) = Marker::from_code(code) else {
                pos = found.end();
                continue;
            };

            match marker {
                Marker::StartOfScan => break offset,
                Marker::StartOfImage | Marker::EndOfImage => pos = found.end(),
                Marker::RestartInterval => {
                    let interval =
                        read_u16(seed, found.end()).ok_or(FormatError::Truncated {
                            segment: "restart interval",
                            needed: 2,
                            available: seed.len() - found.end(),
                        })?;
                    doc.restart_interval = Some(interval);
                    pos = found.end() + 2;
                }
                _ => {
                    let (content, next) = segment_content(seed, offset)?;
                    match marker {
                        Marker::App(index) => doc.app_segments.push(AppSegment {
                            index,
                            data: content.to_vec(),
                        }),
                        Marker::Comment => doc.comments.push(content.to_vec()),
                        Marker::Quantization => {
                            doc.quant_tables.extend(parse_quant_tables(content)?)
                        }
                        Marker::Huffman => {
                            doc.huffman_tables.extend(parse_huffman_tables(content)?)
                        }
                        Marker::Frame(kind) => doc.frame = Some(parse_frame(kind, content)?),
                        _ => {}
                    }
                    pos = next;
                }
            }
        };

        let (scan_content, body_start) = segment_content(seed, scan_offset)?;
        doc.scan = parse_scan_header(scan_content)?;

        let eoi = EOI.to_be_bytes();
        let body_len = seed[body_start..]
            .windows(2)
            .rposition(|w| w == eoi)
            .ok_or(FormatError::MissingEndMarker)?;
        doc.body = seed[body_start..body_start + body_len].to_vec();

        Ok(doc)
    }
}

impl StructuralModel for SegmentDocument {
    fn parse(seed: &[u8]) -> Result<Self, FormatError> {
        Self::parse_image(seed)
    }

    fn serialize(&self, _rng: &mut dyn RngCore) -> Vec<u8> {
        self.to_bytes()
    }

    fn operations() -> Vec<Operation<Self>> {
        ops::registry()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    fn segment(code: u16, content: &[u8]) -> Vec<u8> {
        let mut out = code.to_be_bytes().to_vec();
        out.extend_from_slice(&((content.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(content);
        out
    }

    /// A small baseline image: JFIF header, comment, one DQT segment holding
    /// two tables, a 3-component frame, one DHT segment holding two tables,
    /// a restart interval, a scan header and a short body.
    pub(crate) fn sample_image() -> Vec<u8> {
        let mut image = SOI.to_be_bytes().to_vec();
        image.extend(segment(APP0, b"JFIF\0\x01\x01\0\0\x01\0\x01\0\0"));
        image.extend(segment(COM, b"made by hand"));

        let mut dqt = vec![0x00];
        dqt.extend((1..=64u8).collect::<Vec<_>>());
        dqt.push(0x01);
        dqt.extend(std::iter::repeat_n(0x63u8, 64));
        image.extend(segment(DQT, &dqt));

        image.extend(segment(
            SOF0,
            &[8, 0, 16, 0, 24, 3, 1, 0x22, 0, 2, 0x11, 1, 3, 0x11, 1],
        ));

        let mut dht = vec![0x00];
        let mut counts = [0u8; 16];
        counts[1] = 3;
        dht.extend(counts);
        dht.extend([0x00, 0x01, 0x02]);
        dht.push(0x10);
        let mut counts = [0u8; 16];
        counts[0] = 2;
        dht.extend(counts);
        dht.extend([0x01, 0x11]);
        image.extend(segment(DHT, &dht));

        image.extend(DRI.to_be_bytes());
        image.extend(0x0010u16.to_be_bytes());

        image.extend(segment(SOS, &[3, 1, 0x00, 2, 0x11, 3, 0x11, 0, 63, 0]));
        image.extend([0x12, 0x34, 0xFF, 0x00, 0x56, 0x78, 0x9A]);
        image.extend(EOI.to_be_bytes());
        image
    }

    /// Walks the header of a serialized image and returns each segment's
    /// marker with its declared length and actual content length.
    fn header_segments(image: &[u8]) -> Vec<(u16, usize, usize)> {
        let mut out = Vec::new();
        let mut pos = 2;
        loop {
            let code = read_u16(image, pos).unwrap();
            if code == DRI {
                pos += 4;
                continue;
            }
            let declared = read_u16(image, pos + 2).unwrap() as usize;
            let (content, next) = segment_content(image, pos).unwrap();
            out.push((code, declared, content.len()));
            if code == SOS {
                return out;
            }
            pos = next;
        }
    }

    #[test]
    fn parses_every_table_and_segment() {
        let doc = SegmentDocument::parse(&sample_image()).unwrap();
        assert_eq!(doc.app_segments.len(), 1);
        assert_eq!(doc.app_segments[0].index, 0);
        assert_eq!(doc.comments, vec![b"made by hand".to_vec()]);
        assert_eq!(doc.quant_tables.len(), 2);
        assert_eq!(doc.quant_tables[1].id, 1);
        assert_eq!(doc.quant_tables[1].values.len(), 64);
        assert_eq!(doc.huffman_tables.len(), 2);
        assert_eq!(doc.huffman_tables[1].class, 1);
        assert_eq!(doc.huffman_tables[0].symbols, vec![0, 1, 2]);
        assert_eq!(doc.restart_interval, Some(0x10));

        let frame = doc.frame.as_ref().unwrap();
        assert_eq!((frame.height, frame.width), (16, 24));
        assert_eq!(frame.components.len(), 3);
        assert_eq!(frame.components[0].horizontal, 2);
        assert_eq!(frame.components[0].vertical, 2);

        assert_eq!(doc.scan.component_count, 3);
        assert_eq!(doc.scan.components[1].dc_table, 1);
        assert_eq!(doc.scan.spectral_end, 63);
        assert_eq!(doc.body, vec![0x12, 0x34, 0xFF, 0x00, 0x56, 0x78, 0x9A]);
    }

    #[test]
    fn serialization_preserves_tables_and_framing() {
        let mut rng = ChaCha8Rng::from_seed([0u8; 32]);
        let doc = SegmentDocument::parse(&sample_image()).unwrap();
        let out = doc.serialize(&mut rng);

        assert!(out.starts_with(&SOI.to_be_bytes()));
        assert!(out.ends_with(&EOI.to_be_bytes()));
        assert_eq!(SegmentDocument::parse(&out).unwrap(), doc);

        for (code, declared, content_len) in header_segments(&out) {
            assert_eq!(declared, content_len + 2, "bad length for {code:#06x}");
        }
    }

    #[test]
    fn split_tables_are_emitted_one_per_segment() {
        let mut rng = ChaCha8Rng::from_seed([1u8; 32]);
        let out = SegmentDocument::parse(&sample_image())
            .unwrap()
            .serialize(&mut rng);
        let codes: Vec<u16> = header_segments(&out).iter().map(|s| s.0).collect();
        assert_eq!(codes, vec![APP0, COM, DQT, DQT, SOF0, DHT, DHT, SOS]);
    }

    #[test]
    fn embedded_markers_inside_segments_are_skipped() {
        let mut image = SOI.to_be_bytes().to_vec();
        // An APP1 payload that carries a whole thumbnail, markers included.
        let mut thumbnail = b"Exif\0\0".to_vec();
        thumbnail.extend([0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x43, 0xFF, 0xDA, 0xFF, 0xD9]);
        image.extend(segment(APP0 + 1, &thumbnail));
        image.extend_from_slice(&sample_image()[2..]);

        let doc = SegmentDocument::parse(&image).unwrap();
        assert_eq!(doc.app_segments.len(), 2);
        assert_eq!(doc.app_segments[0].index, 1);
        assert_eq!(doc.app_segments[0].data, thumbnail);
        assert_eq!(doc.quant_tables.len(), 2);
    }

    #[test]
    fn sixteen_bit_quantization_tables_are_supported() {
        let mut image = SOI.to_be_bytes().to_vec();
        let mut dqt = vec![0x12];
        dqt.extend(std::iter::repeat_n(0x01u8, 128));
        image.extend(segment(DQT, &dqt));
        image.extend(segment(SOS, &[1, 1, 0x00, 0, 63, 0]));
        image.extend(EOI.to_be_bytes());

        let doc = SegmentDocument::parse(&image).unwrap();
        assert_eq!(doc.quant_tables.len(), 1);
        assert_eq!(doc.quant_tables[0].precision, 1);
        assert_eq!(doc.quant_tables[0].id, 2);
        assert_eq!(doc.quant_tables[0].values.len(), 128);
        assert!(doc.frame.is_none());
    }

    #[test]
    fn parse_failures_are_reported() {
        assert_eq!(
            SegmentDocument::parse(b"not an image"),
            Err(FormatError::MissingStartMarker)
        );

        let image = sample_image();
        let sos = image
            .windows(2)
            .position(|w| w == SOS.to_be_bytes())
            .unwrap();
        assert_eq!(
            SegmentDocument::parse(&image[..sos]),
            Err(FormatError::MissingStartOfScan)
        );
        assert_eq!(
            SegmentDocument::parse(&image[..image.len() - 2]),
            Err(FormatError::MissingEndMarker)
        );

        let mut overrun = SOI.to_be_bytes().to_vec();
        overrun.extend([0xFF, 0xFE, 0x40, 0x00, b'x']);
        assert!(matches!(
            SegmentDocument::parse(&overrun),
            Err(FormatError::SegmentOverrun { marker: COM, .. })
        ));
    }

    #[test]
    fn marker_codes_round_trip() {
        for code in [SOI, EOI, SOS, DHT, DQT, DRI, COM, SOF0, 0xFFC2, 0xFFCF, APP0, 0xFFEF] {
            assert_eq!(Marker::from_code(code).unwrap().code(), code);
        }
        assert_eq!(Marker::from_code(0xFFC4), Some(Marker::Huffman));
        assert_eq!(Marker::from_code(0xFFC8), None);
        assert_eq!(Marker::from_code(0x00D8), None);
    }
}
