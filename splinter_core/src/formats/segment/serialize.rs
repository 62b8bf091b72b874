use super::{
    COM, DHT, DQT, DRI, EOI, Frame, HuffmanTable, Marker, QuantizationTable, SOI, SOS,
    ScanHeader, SegmentDocument,
};

/// Largest content a single segment can carry: the length field is a `u16`
/// that also counts its own two bytes.
pub const MAX_SEGMENT_CONTENT: usize = 0xFFFF - 2;

/// Appends `marker + length + content`, truncating oversized content so the
/// length stays representable.
fn emit_segment(out: &mut Vec<u8>, code: u16, content: &[u8]) {
    let content = &content[..content.len().min(MAX_SEGMENT_CONTENT)];
    out.extend_from_slice(&code.to_be_bytes());
    out.extend_from_slice(&((content.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(content);
}

fn quant_content(table: &QuantizationTable) -> Vec<u8> {
    let mut content = Vec::with_capacity(1 + table.values.len());
    content.push((table.precision << 4) | (table.id & 0x0F));
    content.extend_from_slice(&table.values);
    content
}

fn huffman_content(table: &HuffmanTable) -> Vec<u8> {
    let mut content = Vec::with_capacity(17 + table.symbols.len());
    content.push((table.class << 4) | (table.destination & 0x0F));
    content.extend_from_slice(&table.counts);
    content.extend_from_slice(&table.symbols);
    content
}

fn frame_content(frame: &Frame) -> Vec<u8> {
    let mut content = Vec::with_capacity(6 + 3 * frame.components.len());
    content.push(frame.precision);
    content.extend_from_slice(&frame.height.to_be_bytes());
    content.extend_from_slice(&frame.width.to_be_bytes());
    content.push(frame.component_count);
    for c in &frame.components {
        content.push(c.id);
        content.push((c.horizontal << 4) | (c.vertical & 0x0F));
        content.push(c.quant_table);
    }
    content
}

fn scan_content(scan: &ScanHeader) -> Vec<u8> {
    let mut content = Vec::with_capacity(4 + 2 * scan.components.len());
    content.push(scan.component_count);
    for c in &scan.components {
        content.push(c.id);
        content.push((c.dc_table << 4) | (c.ac_table & 0x0F));
    }
    content.push(scan.spectral_start);
    content.push(scan.spectral_end);
    content.push(scan.approximation);
    content
}

impl SegmentDocument {
    /// Canonical serialization: start marker, application segments,
    /// comments, quantization tables, frame, Huffman tables, restart
    /// interval, scan header, body, end marker. Every table is emitted as its
    /// own segment with a freshly computed length.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 1024);
        out.extend_from_slice(&SOI.to_be_bytes());

        for app in &self.app_segments {
            emit_segment(&mut out, Marker::App(app.index).code(), &app.data);
        }
        for comment in &self.comments {
            emit_segment(&mut out, COM, comment);
        }
        for table in &self.quant_tables {
            emit_segment(&mut out, DQT, &quant_content(table));
        }
        if let Some(frame) = &self.frame {
            emit_segment(&mut out, Marker::Frame(frame.kind).code(), &frame_content(frame));
        }
        for table in &self.huffman_tables {
            emit_segment(&mut out, DHT, &huffman_content(table));
        }
        if let Some(interval) = self.restart_interval {
            out.extend_from_slice(&DRI.to_be_bytes());
            out.extend_from_slice(&interval.to_be_bytes());
        }
        emit_segment(&mut out, SOS, &scan_content(&self.scan));

        out.extend_from_slice(&self.body);
        out.extend_from_slice(&EOI.to_be_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_content_is_truncated_to_fit_the_length_field() {
        let mut out = Vec::new();
        emit_segment(&mut out, COM, &vec![b'c'; 70_000]);
        assert_eq!(out.len(), 2 + 2 + MAX_SEGMENT_CONTENT);
        assert_eq!(&out[2..4], &[0xFF, 0xFF]);
    }

    #[test]
    fn component_nibbles_are_packed_high_then_low() {
        let frame = Frame {
            kind: 0xC0,
            precision: 8,
            height: 1,
            width: 2,
            component_count: 1,
            components: vec![super::super::Component {
                id: 1,
                horizontal: 2,
                vertical: 1,
                quant_table: 0,
            }],
        };
        assert_eq!(frame_content(&frame), vec![8, 0, 1, 0, 2, 1, 1, 0x21, 0]);
    }
}
