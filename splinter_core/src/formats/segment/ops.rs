use super::{APP0, COM, DHT, DQT, DRI, EOI, SOF0, SOI, SOS};
use super::{HuffmanTable, QuantizationTable, SegmentDocument};
use crate::mutator::{self, Mutation, Operation, replace_all};
use rand::Rng;
use rand_core::RngCore;

type Op = Operation<SegmentDocument>;
type Edit = Mutation<SegmentDocument>;

/// Representative bytes of each marker kind, used by the raw marker edits.
const MARKERS: [u16; 9] = [SOI, SOF0, DHT, DQT, DRI, SOS, APP0, COM, EOI];

/// Header of a JFIF image: SOI, APP0, length 16, "JFIF\0", version 1.
const JPEG_MAGIC: &[u8] = b"\xff\xd8\xff\xe0\x00\x10\x4a\x46\x49\x46\x00\x01";

/// Leading signatures of other file types.
const MAGICS: [&[u8]; 10] = [
    b"",
    JPEG_MAGIC,
    b"\x47\x49\x46\x38\x37\x61",
    b"\x46\x4f\x52\x4d\xde\xad\xbe\xef\x41\x49\x46\x46",
    b"\x25\x50\x44\x46\x2d",
    b"\x52\x49\x46\x46\xde\xad\xbe\xef\x57\x41\x56\x45",
    b"\x50\x4b\x03\x04",
    b"\xff\xfb",
    b"\x89\x50\x4e\x47\x0d\x0a\x1a\x0a",
    b"\x7f\x45\x4c\x46",
];

/// Raw edits keep the first bytes of the image intact.
const PROTECTED_PREFIX: usize = JPEG_MAGIC.len();

fn random_marker(rng: &mut dyn RngCore) -> [u8; 2] {
    MARKERS[rng.random_range(0..MARKERS.len())].to_be_bytes()
}

/// Random offset past the protected prefix, or the end of a short seed.
fn offset_after_prefix(seed: &[u8], rng: &mut dyn RngCore) -> usize {
    if seed.len() > PROTECTED_PREFIX {
        rng.random_range(PROTECTED_PREFIX..seed.len())
    } else {
        seed.len()
    }
}

fn random_bytes(len: usize, rng: &mut dyn RngCore) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    bytes
}

fn swap_markers(_: &SegmentDocument, seed: &[u8], rng: &mut dyn RngCore) -> Edit {
    let from = random_marker(rng);
    let to = random_marker(rng);
    Mutation::Raw(replace_all(seed, &from, &to))
}

fn remove_markers(_: &SegmentDocument, seed: &[u8], rng: &mut dyn RngCore) -> Edit {
    Mutation::Raw(replace_all(seed, &random_marker(rng), b""))
}

fn change_magic(_: &SegmentDocument, seed: &[u8], rng: &mut dyn RngCore) -> Edit {
    let magic = MAGICS[rng.random_range(0..MAGICS.len())];
    let tail = seed.get(PROTECTED_PREFIX..).unwrap_or_default();
    Mutation::Raw([magic, tail].concat())
}

fn insert_false_marker(_: &SegmentDocument, seed: &[u8], rng: &mut dyn RngCore) -> Edit {
    let at = offset_after_prefix(seed, rng);
    Mutation::Raw([&seed[..at], &[0xFFu8][..], &seed[at..]].concat())
}

/// Reverses one contiguous, possibly empty, byte range.
fn reverse(_: &SegmentDocument, seed: &[u8], rng: &mut dyn RngCore) -> Edit {
    let mut bytes = seed.to_vec();
    if !bytes.is_empty() {
        let start = rng.random_range(0..bytes.len());
        let len = rng.random_range(0..bytes.len() - start);
        bytes[start..start + len].reverse();
    }
    Mutation::Raw(bytes)
}

fn insert_random_bytes(_: &SegmentDocument, seed: &[u8], rng: &mut dyn RngCore) -> Edit {
    let at = offset_after_prefix(seed, rng);
    Mutation::Raw(mutator::insert_random_bytes(seed, Some(2), Some(at), rng))
}

/// Drops every occurrence of one random byte value.
fn remove_random_bytes(_: &SegmentDocument, seed: &[u8], rng: &mut dyn RngCore) -> Edit {
    let victim = rng.random::<u8>();
    Mutation::Raw(seed.iter().copied().filter(|b| *b != victim).collect())
}

fn just_magic(_: &SegmentDocument, _: &[u8], _: &mut dyn RngCore) -> Edit {
    Mutation::Raw([JPEG_MAGIC, &EOI.to_be_bytes()[..]].concat())
}

fn eoi_before(_: &SegmentDocument, seed: &[u8], _: &mut dyn RngCore) -> Edit {
    Mutation::Raw([&EOI.to_be_bytes()[..], seed].concat())
}

fn swap_magic(_: &SegmentDocument, seed: &[u8], _: &mut dyn RngCore) -> Edit {
    let tail = seed.get(PROTECTED_PREFIX..).unwrap_or_default();
    Mutation::Raw([&EOI.to_be_bytes()[..], tail, JPEG_MAGIC].concat())
}

/// Overwrites the length field of the first Huffman segment with `0x00EE`.
fn len_hf(_: &SegmentDocument, seed: &[u8], _: &mut dyn RngCore) -> Edit {
    let mut bytes = seed.to_vec();
    let dht = DHT.to_be_bytes();
    if let Some(at) = seed.windows(2).position(|w| w == dht)
        && at + 4 <= bytes.len()
    {
        bytes[at + 2..at + 4].copy_from_slice(&[0x00, 0xEE]);
    }
    Mutation::Raw(bytes)
}

fn remove_end(_: &SegmentDocument, seed: &[u8], _: &mut dyn RngCore) -> Edit {
    let eoi = EOI.to_be_bytes();
    Mutation::Raw(seed.strip_suffix(&eoi[..]).unwrap_or(seed).to_vec())
}

fn remove_start(_: &SegmentDocument, seed: &[u8], _: &mut dyn RngCore) -> Edit {
    Mutation::Raw(replace_all(seed, JPEG_MAGIC, b""))
}

fn remove_magic(_: &SegmentDocument, seed: &[u8], _: &mut dyn RngCore) -> Edit {
    let stripped = replace_all(seed, JPEG_MAGIC, b"");
    Mutation::Raw(replace_all(&stripped, &EOI.to_be_bytes(), b""))
}

/// Appends an 8-bit quantization table filled with random values.
fn qt_new(doc: &SegmentDocument, _: &[u8], rng: &mut dyn RngCore) -> Edit {
    let mut doc = doc.clone();
    let id = ((doc.quant_tables.len() + 1) & 0x0F) as u8;
    doc.quant_tables.push(QuantizationTable {
        precision: 0,
        id,
        values: random_bytes(QuantizationTable::value_len(0), rng),
    });
    Mutation::Model(doc)
}

/// Refills one existing quantization table with random values of the same
/// shape.
fn qt_random(doc: &SegmentDocument, _: &[u8], rng: &mut dyn RngCore) -> Edit {
    let mut doc = doc.clone();
    if !doc.quant_tables.is_empty() {
        let idx = rng.random_range(0..doc.quant_tables.len());
        let table = &mut doc.quant_tables[idx];
        table.values = random_bytes(table.values.len(), rng);
    }
    Mutation::Model(doc)
}

/// Replaces one Huffman table with a random one whose code counts are all
/// non-zero.
fn hf(doc: &SegmentDocument, _: &[u8], rng: &mut dyn RngCore) -> Edit {
    let mut doc = doc.clone();
    if !doc.huffman_tables.is_empty() {
        let idx = rng.random_range(0..doc.huffman_tables.len());
        let mut counts = [0u8; 16];
        for count in counts.iter_mut() {
            *count = rng.random_range(1..=0xFFu8);
        }
        let total = counts.iter().map(|c| usize::from(*c)).sum();
        doc.huffman_tables[idx] = HuffmanTable {
            class: rng.random_range(0..=1u8),
            destination: rng.random_range(0..=1u8),
            counts,
            symbols: random_bytes(total, rng),
        };
    }
    Mutation::Model(doc)
}

fn sof(doc: &SegmentDocument, _: &[u8], rng: &mut dyn RngCore) -> Edit {
    let mut doc = doc.clone();
    if let Some(frame) = doc.frame.as_mut() {
        frame.height = rng.random::<u16>();
        frame.width = rng.random::<u16>();
    }
    Mutation::Model(doc)
}

/// Reverses the body as a bit string.
fn body(doc: &SegmentDocument, _: &[u8], _: &mut dyn RngCore) -> Edit {
    let mut doc = doc.clone();
    doc.body = doc.body.iter().rev().map(|b| b.reverse_bits()).collect();
    Mutation::Model(doc)
}

fn sos(doc: &SegmentDocument, _: &[u8], rng: &mut dyn RngCore) -> Edit {
    let mut doc = doc.clone();
    let scan = &mut doc.scan;
    scan.component_count = rng.random_range(0..0xFFu8);
    for c in scan.components.iter_mut() {
        c.id = rng.random_range(0..0x0Fu8);
        c.dc_table = rng.random_range(0..0x0Fu8);
        c.ac_table = rng.random_range(0..0x0Fu8);
    }
    scan.spectral_start = rng.random_range(0..0xFFu8);
    scan.spectral_end = rng.random_range(0..0xFFu8);
    scan.approximation = rng.random_range(0..0xFFu8);
    Mutation::Model(doc)
}

/// Repeats one frame component and bumps the declared count.
fn duplicate_component(doc: &SegmentDocument, _: &[u8], rng: &mut dyn RngCore) -> Edit {
    let mut doc = doc.clone();
    if let Some(frame) = doc.frame.as_mut()
        && !frame.components.is_empty()
    {
        let idx = rng.random_range(0..frame.components.len());
        let copy = frame.components[idx];
        frame.components.insert(idx + 1, copy);
        frame.component_count = frame.component_count.wrapping_add(1);
    }
    Mutation::Model(doc)
}

/// Sets the frame height or width to a smaller random value.
fn shrink_dimension(doc: &SegmentDocument, _: &[u8], rng: &mut dyn RngCore) -> Edit {
    let mut doc = doc.clone();
    if let Some(frame) = doc.frame.as_mut() {
        let dimension = if rng.random_bool(0.5) {
            &mut frame.height
        } else {
            &mut frame.width
        };
        *dimension = rng.random_range(0..(*dimension).max(1));
    }
    Mutation::Model(doc)
}

pub(super) fn registry() -> Vec<Op> {
    vec![
        Op::new("swap_markers", swap_markers),
        Op::new("remove_markers", remove_markers),
        Op::new("change_magic", change_magic),
        Op::new("insert_false_marker", insert_false_marker),
        Op::new("reverse", reverse),
        Op::new("insert_random_bytes", insert_random_bytes),
        Op::new("remove_random_bytes", remove_random_bytes),
        Op::new("just_magic", just_magic),
        Op::new("eoi_before", eoi_before),
        Op::new("swap_magic", swap_magic),
        Op::new("len_hf", len_hf),
        Op::new("remove_end", remove_end),
        Op::new("remove_start", remove_start),
        Op::new("remove_magic", remove_magic),
        Op::new("qt_new", qt_new),
        Op::new("qt_random", qt_random),
        Op::new("hf", hf),
        Op::new("sof", sof),
        Op::new("body", body),
        Op::new("sos", sos),
        Op::new("duplicate_component", duplicate_component),
        Op::new("shrink_dimension", shrink_dimension),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::segment::tests::sample_image;
    use crate::mutator::StructuralModel;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    fn model_of(m: Mutation<SegmentDocument>) -> SegmentDocument {
        match m {
            Mutation::Model(doc) => doc,
            Mutation::Raw(_) => panic!("expected a model edit"),
        }
    }

    fn raw_of(m: Mutation<SegmentDocument>) -> Vec<u8> {
        match m {
            Mutation::Raw(bytes) => bytes,
            Mutation::Model(_) => panic!("expected raw bytes"),
        }
    }

    #[test]
    fn registry_matches_the_documented_names() {
        let names: Vec<_> = registry().iter().map(|op| op.name).collect();
        assert_eq!(names.len(), 22);
        assert!(names.contains(&"duplicate_component"));
        assert!(names.contains(&"len_hf"));
    }

    #[test]
    fn model_edits_keep_untouched_tables_and_framing() {
        let seed = sample_image();
        let doc = SegmentDocument::parse(&seed).unwrap();
        let mut rng = ChaCha8Rng::from_seed([7u8; 32]);
        for op in registry() {
            let Mutation::Model(mutated) = (op.apply)(&doc, &seed, &mut rng) else {
                continue;
            };
            let bytes = mutated.serialize(&mut rng);
            assert!(bytes.starts_with(&SOI.to_be_bytes()), "{}", op.name);
            assert!(bytes.ends_with(&EOI.to_be_bytes()), "{}", op.name);
            if op.name != "sos" {
                let reparsed = SegmentDocument::parse(&bytes).unwrap();
                assert_eq!(reparsed.app_segments, doc.app_segments, "{}", op.name);
                assert_eq!(reparsed.comments, doc.comments, "{}", op.name);
            }
        }
    }

    #[test]
    fn qt_operations_keep_the_table_shape() {
        let seed = sample_image();
        let doc = SegmentDocument::parse(&seed).unwrap();
        let mut rng = ChaCha8Rng::from_seed([8u8; 32]);

        let grown = model_of(qt_new(&doc, &seed, &mut rng));
        assert_eq!(grown.quant_tables.len(), 3);
        assert_eq!(grown.quant_tables[2].values.len(), 64);

        let refilled = model_of(qt_random(&doc, &seed, &mut rng));
        assert_eq!(refilled.quant_tables.len(), 2);
        for (before, after) in doc.quant_tables.iter().zip(&refilled.quant_tables) {
            assert_eq!(before.id, after.id);
            assert_eq!(before.values.len(), after.values.len());
        }
    }

    #[test]
    fn hf_builds_a_consistent_table() {
        let seed = sample_image();
        let doc = SegmentDocument::parse(&seed).unwrap();
        let mut rng = ChaCha8Rng::from_seed([9u8; 32]);
        let mutated = model_of(hf(&doc, &seed, &mut rng));
        let reparsed = SegmentDocument::parse(&mutated.to_bytes()).unwrap();
        assert_eq!(reparsed.huffman_tables, mutated.huffman_tables);
        assert!(
            reparsed
                .huffman_tables
                .iter()
                .any(|t| t.counts.iter().all(|c| *c > 0))
        );
    }

    #[test]
    fn frame_edits() {
        let seed = sample_image();
        let doc = SegmentDocument::parse(&seed).unwrap();
        let frame = doc.frame.clone().unwrap();
        let mut rng = ChaCha8Rng::from_seed([10u8; 32]);

        let duplicated = model_of(duplicate_component(&doc, &seed, &mut rng));
        let dup_frame = duplicated.frame.unwrap();
        assert_eq!(dup_frame.components.len(), frame.components.len() + 1);
        assert_eq!(dup_frame.component_count, frame.component_count + 1);

        for _ in 0..10 {
            let shrunk = model_of(shrink_dimension(&doc, &seed, &mut rng)).frame.unwrap();
            assert!(
                (shrunk.height < frame.height && shrunk.width == frame.width)
                    || (shrunk.width < frame.width && shrunk.height == frame.height)
            );
        }
    }

    #[test]
    fn body_reversal_is_an_involution() {
        let seed = sample_image();
        let doc = SegmentDocument::parse(&seed).unwrap();
        let mut rng = ChaCha8Rng::from_seed([11u8; 32]);
        let once = model_of(body(&doc, &seed, &mut rng));
        assert_ne!(once.body, doc.body);
        let twice = model_of(body(&once, &seed, &mut rng));
        assert_eq!(twice.body, doc.body);
    }

    #[test]
    fn raw_edits_follow_their_recipes() {
        let seed = sample_image();
        let doc = SegmentDocument::parse(&seed).unwrap();
        let mut rng = ChaCha8Rng::from_seed([12u8; 32]);
        let eoi = EOI.to_be_bytes();

        assert_eq!(raw_of(remove_end(&doc, &seed, &mut rng)), &seed[..seed.len() - 2]);
        assert!(raw_of(eoi_before(&doc, &seed, &mut rng)).starts_with(&eoi));
        assert_eq!(
            raw_of(just_magic(&doc, &seed, &mut rng)),
            [JPEG_MAGIC, &eoi[..]].concat()
        );

        let swapped = raw_of(swap_magic(&doc, &seed, &mut rng));
        assert!(swapped.starts_with(&eoi));
        assert!(swapped.ends_with(JPEG_MAGIC));
        assert_eq!(swapped.len(), seed.len() - PROTECTED_PREFIX + 2 + JPEG_MAGIC.len());

        let false_marker = raw_of(insert_false_marker(&doc, &seed, &mut rng));
        assert_eq!(false_marker.len(), seed.len() + 1);
        assert_eq!(&false_marker[..PROTECTED_PREFIX], &seed[..PROTECTED_PREFIX]);

        let inserted = raw_of(insert_random_bytes(&doc, &seed, &mut rng));
        assert_eq!(inserted.len(), seed.len() + 2);

        let len_patched = raw_of(len_hf(&doc, &seed, &mut rng));
        let at = seed.windows(2).position(|w| w == DHT.to_be_bytes()).unwrap();
        assert_eq!(&len_patched[at + 2..at + 4], &[0x00, 0xEE]);
        assert_eq!(len_patched.len(), seed.len());

        for _ in 0..20 {
            let reversed = raw_of(reverse(&doc, &seed, &mut rng));
            let mut sorted_in = seed.clone();
            let mut sorted_out = reversed.clone();
            sorted_in.sort_unstable();
            sorted_out.sort_unstable();
            assert_eq!(sorted_in, sorted_out);
        }
    }
}
