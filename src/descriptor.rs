//! HID report-descriptor parsing
//!
//! A report descriptor is a stream of self-describing *items*. Each item's
//! prefix byte encodes a tag, an item type (main/global/local) and a payload
//! size. Global items (usage page, report size, report count, report ID)
//! persist until overridden; local items (usage) reset at every main item.
//! `Collection` / `End Collection` main items describe a tree of functional
//! groupings, and `Input` / `Output` / `Feature` main items declare the
//! report payloads themselves.
//!
//! The parser walks the stream once, keeping the global/local state and an
//! explicit stack of indices into a collection arena. The nested
//! [`ReportCollection`](crate::types::ReportCollection) tree is only
//! materialized once the whole stream has been consumed, so a malformed
//! descriptor never yields a partial tree.

use thiserror::Error;
use tracing::trace;

use crate::types::{ReportCollection, ReportTypes};

/// Item type codes from the prefix byte (bits 3..2).
mod item_type {
    pub const MAIN: u8 = 0;
    pub const GLOBAL: u8 = 1;
    pub const LOCAL: u8 = 2;
}

/// Main item tags (prefix bits 7..4).
mod main_tag {
    pub const INPUT: u8 = 0x8;
    pub const OUTPUT: u8 = 0x9;
    pub const COLLECTION: u8 = 0xA;
    pub const FEATURE: u8 = 0xB;
    pub const END_COLLECTION: u8 = 0xC;
}

/// Global item tags.
mod global_tag {
    pub const USAGE_PAGE: u8 = 0x0;
    pub const REPORT_SIZE: u8 = 0x7;
    pub const REPORT_ID: u8 = 0x8;
    pub const REPORT_COUNT: u8 = 0x9;
}

/// Local item tags.
mod local_tag {
    pub const USAGE: u8 = 0x0;
}

/// Prefix byte reserved for long items (tag 0xF, type 0b11, size 0b10).
const LONG_ITEM_PREFIX: u8 = 0xFE;

/// Structural failures while decoding a report descriptor.
///
/// Any of these means the descriptor as a whole is rejected; the parser never
/// returns a truncated collection tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The stream ended inside an item's declared payload.
    #[error("truncated item at offset {offset}: needs {needed} payload bytes, {remaining} left")]
    TruncatedItem {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    /// `End Collection` with no open collection.
    #[error("unmatched End Collection at offset {offset}")]
    UnmatchedEndCollection { offset: usize },

    /// The stream ended with collections still open.
    #[error("{open} collection(s) left open at end of descriptor")]
    UnclosedCollections { open: usize },
}

/// Everything extracted from one report descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDescriptor {
    /// Top-level collections, in declaration order.
    pub collections: Vec<ReportCollection>,
    /// True if any `Report ID` item appeared in the stream.
    pub has_report_id: bool,
    /// Largest input report, in bytes (0 if no input reports).
    pub max_input_report_size: u32,
    /// Largest output report, in bytes.
    pub max_output_report_size: u32,
    /// Largest feature report, in bytes.
    pub max_feature_report_size: u32,
}

/// Global item state. Persists across items until overridden.
#[derive(Debug, Clone, Copy, Default)]
struct GlobalItems {
    usage_page: u32,
    report_size: u32,
    report_count: u32,
}

/// Arena node for one collection. Children are arena indices, materialized
/// into the nested tree only after the full stream has been consumed.
#[derive(Debug, Clone, Default)]
struct CollectionNode {
    usage_page: u32,
    usage: u32,
    report_types: ReportTypes,
    children: Vec<usize>,
}

/// Decode little-endian item payloads of 0, 1, 2 or 4 bytes.
fn payload_value(payload: &[u8]) -> u32 {
    let mut value: u32 = 0;
    for (i, byte) in payload.iter().enumerate() {
        value |= u32::from(*byte) << (8 * i);
    }
    value
}

/// Parse a raw report descriptor.
///
/// The input must be consumed exactly; a trailing incomplete item is a
/// [`ParseError::TruncatedItem`]. An empty descriptor is valid and yields an
/// empty tree with all sizes zero.
///
/// The parser is pure: identical bytes always produce an identical
/// [`ParsedDescriptor`].
pub fn parse(bytes: &[u8]) -> Result<ParsedDescriptor, ParseError> {
    let mut global = GlobalItems::default();
    let mut has_report_id = false;
    // Local usage, reset at each main item. A 4-byte usage carries the page
    // in its high word and overrides the global usage page for that item.
    let mut local_usage: Option<(usize, u32)> = None;

    // Accumulated report bits per type across the whole descriptor.
    let mut input_bits: u32 = 0;
    let mut output_bits: u32 = 0;
    let mut feature_bits: u32 = 0;

    let mut arena: Vec<CollectionNode> = Vec::new();
    let mut stack: Vec<usize> = Vec::new();
    let mut roots: Vec<usize> = Vec::new();

    let mut pos = 0;
    while pos < bytes.len() {
        let prefix = bytes[pos];

        if prefix == LONG_ITEM_PREFIX {
            // Long item: [0xFE, data_size, long_tag, data...]. No long tags
            // are defined for report descriptors; skip the payload.
            if pos + 3 > bytes.len() {
                return Err(ParseError::TruncatedItem {
                    offset: pos,
                    needed: 2,
                    remaining: bytes.len() - pos - 1,
                });
            }
            let data_size = bytes[pos + 1] as usize;
            let end = pos + 3 + data_size;
            if end > bytes.len() {
                return Err(ParseError::TruncatedItem {
                    offset: pos,
                    needed: 2 + data_size,
                    remaining: bytes.len() - pos - 1,
                });
            }
            trace!(offset = pos, data_size, "skipping long item");
            pos = end;
            continue;
        }

        let payload_size = match prefix & 0x03 {
            3 => 4,
            n => n as usize,
        };
        let tag = prefix >> 4;
        let kind = (prefix >> 2) & 0x03;

        if pos + 1 + payload_size > bytes.len() {
            return Err(ParseError::TruncatedItem {
                offset: pos,
                needed: payload_size,
                remaining: bytes.len() - pos - 1,
            });
        }
        let payload = &bytes[pos + 1..pos + 1 + payload_size];
        let value = payload_value(payload);

        match kind {
            item_type::MAIN => {
                match tag {
                    main_tag::COLLECTION => {
                        // An extended (4-byte) usage carries its own page.
                        let (usage_page, usage) = match local_usage {
                            Some((4, extended)) => (extended >> 16, extended & 0xFFFF),
                            Some((_, usage)) => (global.usage_page, usage),
                            None => (global.usage_page, 0),
                        };
                        let index = arena.len();
                        arena.push(CollectionNode {
                            usage_page,
                            usage,
                            ..Default::default()
                        });
                        match stack.last() {
                            Some(&parent) => arena[parent].children.push(index),
                            None => roots.push(index),
                        }
                        stack.push(index);
                    }
                    main_tag::END_COLLECTION => {
                        if stack.pop().is_none() {
                            return Err(ParseError::UnmatchedEndCollection { offset: pos });
                        }
                    }
                    main_tag::INPUT | main_tag::OUTPUT | main_tag::FEATURE => {
                        let bits = global.report_size.saturating_mul(global.report_count);
                        let (total, mark): (&mut u32, fn(&mut ReportTypes)) = match tag {
                            main_tag::INPUT => (&mut input_bits, |t| t.input = true),
                            main_tag::OUTPUT => (&mut output_bits, |t| t.output = true),
                            _ => (&mut feature_bits, |t| t.feature = true),
                        };
                        *total = total.saturating_add(bits);
                        // Report payloads belong to the enclosing top-level
                        // collection, not the innermost nesting level.
                        if let Some(&top_level) = stack.first() {
                            mark(&mut arena[top_level].report_types);
                        }
                    }
                    _ => {}
                }
                local_usage = None;
            }
            item_type::GLOBAL => match tag {
                global_tag::USAGE_PAGE => global.usage_page = value,
                global_tag::REPORT_SIZE => global.report_size = value,
                global_tag::REPORT_COUNT => global.report_count = value,
                global_tag::REPORT_ID => has_report_id = true,
                _ => {}
            },
            item_type::LOCAL => {
                if tag == local_tag::USAGE {
                    local_usage = Some((payload_size, value));
                }
            }
            _ => {}
        }

        pos += 1 + payload_size;
    }

    if !stack.is_empty() {
        return Err(ParseError::UnclosedCollections { open: stack.len() });
    }

    let report_id_overhead = |bits: u32| -> u32 {
        let bytes = bits.div_ceil(8);
        // The report-ID prefix byte only applies to report types the device
        // actually defines.
        if has_report_id && bytes > 0 {
            bytes + 1
        } else {
            bytes
        }
    };

    Ok(ParsedDescriptor {
        collections: roots
            .iter()
            .map(|&root| materialize(&arena, root))
            .collect(),
        has_report_id,
        max_input_report_size: report_id_overhead(input_bits),
        max_output_report_size: report_id_overhead(output_bits),
        max_feature_report_size: report_id_overhead(feature_bits),
    })
}

/// Build the nested tree for one arena node and its descendants.
fn materialize(arena: &[CollectionNode], index: usize) -> ReportCollection {
    let node = &arena[index];
    ReportCollection {
        usage_page: node.usage_page,
        usage: node.usage,
        report_types: node.report_types,
        children: node
            .children
            .iter()
            .map(|&child| materialize(arena, child))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Generic Desktop / Mouse application collection with one 8-bit x 1
    /// input field and no report ID.
    const SIMPLE_MOUSE: &[u8] = &[
        0x05, 0x01, // Usage Page (Generic Desktop)
        0x09, 0x02, // Usage (Mouse)
        0xA1, 0x01, // Collection (Application)
        0x75, 0x08, //   Report Size (8)
        0x95, 0x01, //   Report Count (1)
        0x81, 0x02, //   Input (Data, Var, Abs)
        0xC0, //       End Collection
    ];

    #[test]
    fn test_empty_descriptor_is_valid() {
        let parsed = parse(&[]).unwrap();
        assert!(parsed.collections.is_empty());
        assert!(!parsed.has_report_id);
        assert_eq!(parsed.max_input_report_size, 0);
        assert_eq!(parsed.max_output_report_size, 0);
        assert_eq!(parsed.max_feature_report_size, 0);
    }

    #[test]
    fn test_simple_input_report() {
        let parsed = parse(SIMPLE_MOUSE).unwrap();
        assert_eq!(parsed.collections.len(), 1);
        let root = &parsed.collections[0];
        assert_eq!(root.usage_page, 0x01);
        assert_eq!(root.usage, 0x02);
        assert!(root.report_types.input);
        assert!(!root.report_types.output);
        assert!(!root.report_types.feature);
        assert!(!parsed.has_report_id);
        assert_eq!(parsed.max_input_report_size, 1);
        assert_eq!(parsed.max_output_report_size, 0);
        assert_eq!(parsed.max_feature_report_size, 0);
    }

    #[test]
    fn test_report_id_adds_one_byte() {
        let mut with_id = SIMPLE_MOUSE.to_vec();
        // Insert Report ID (1) before the Input item.
        let input_at = with_id.len() - 3;
        with_id.splice(input_at..input_at, [0x85, 0x01]);

        let parsed = parse(&with_id).unwrap();
        assert!(parsed.has_report_id);
        assert_eq!(parsed.max_input_report_size, 2);
        // No output/feature reports, so no report-ID byte for those types.
        assert_eq!(parsed.max_output_report_size, 0);
        assert_eq!(parsed.max_feature_report_size, 0);
    }

    #[test]
    fn test_unmatched_end_collection_fails() {
        assert!(matches!(
            parse(&[0xC0]),
            Err(ParseError::UnmatchedEndCollection { offset: 0 })
        ));

        let mut doubled = SIMPLE_MOUSE.to_vec();
        doubled.push(0xC0);
        assert!(matches!(
            parse(&doubled),
            Err(ParseError::UnmatchedEndCollection { .. })
        ));
    }

    #[test]
    fn test_unclosed_collection_fails() {
        assert!(matches!(
            parse(&[0xA1, 0x01]),
            Err(ParseError::UnclosedCollections { open: 1 })
        ));
    }

    #[test]
    fn test_truncated_payload_fails() {
        // Prefix declares a 1-byte payload, stream ends.
        assert!(matches!(
            parse(&[0x05]),
            Err(ParseError::TruncatedItem {
                offset: 0,
                needed: 1,
                remaining: 0
            })
        ));

        // Truncation anywhere in the stream fails, not just at offset 0.
        let mut cut = SIMPLE_MOUSE.to_vec();
        cut.pop();
        cut.pop(); // chop the Input item's payload and the End Collection
        assert!(matches!(cut.last(), Some(0x81)));
        assert!(matches!(parse(&cut), Err(ParseError::TruncatedItem { .. })));
    }

    #[test]
    fn test_nested_collections() {
        let bytes: &[u8] = &[
            0x05, 0x01, // Usage Page (Generic Desktop)
            0x09, 0x06, // Usage (Keyboard)
            0xA1, 0x01, // Collection (Application)
            0x09, 0x01, //   Usage (Pointer)
            0xA1, 0x00, //   Collection (Physical)
            0x75, 0x01, //     Report Size (1)
            0x95, 0x08, //     Report Count (8)
            0x81, 0x02, //     Input
            0xC0, //         End Collection
            0xC0, //       End Collection
        ];
        let parsed = parse(bytes).unwrap();
        assert_eq!(parsed.collections.len(), 1);
        let root = &parsed.collections[0];
        assert_eq!((root.usage_page, root.usage), (0x01, 0x06));
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].usage, 0x01);
        // Input inside the nested collection is credited to the top level.
        assert!(root.report_types.input);
        assert!(!root.children[0].report_types.input);
        assert_eq!(parsed.max_input_report_size, 1);
    }

    #[test]
    fn test_sizes_accumulate_per_type_and_round_up() {
        let bytes: &[u8] = &[
            0x05, 0x01, // Usage Page
            0x09, 0x02, // Usage
            0xA1, 0x01, // Collection
            0x75, 0x01, //   Report Size (1)
            0x95, 0x03, //   Report Count (3)
            0x81, 0x02, //   Input -> 3 bits
            0x75, 0x08, //   Report Size (8)
            0x95, 0x02, //   Report Count (2)
            0x91, 0x02, //   Output -> 16 bits
            0xB1, 0x02, //   Feature -> 16 bits
            0x75, 0x05, //   Report Size (5)
            0x95, 0x01, //   Report Count (1)
            0x81, 0x02, //   Input -> 5 more bits, 8 total
            0xC0,
        ];
        let parsed = parse(bytes).unwrap();
        assert_eq!(parsed.max_input_report_size, 1); // 8 bits
        assert_eq!(parsed.max_output_report_size, 2);
        assert_eq!(parsed.max_feature_report_size, 2);
        let types = parsed.collections[0].report_types;
        assert!(types.input && types.output && types.feature);
    }

    #[test]
    fn test_report_id_only_pads_types_with_reports() {
        let bytes: &[u8] = &[
            0x05, 0x01, // Usage Page
            0x09, 0x02, // Usage
            0xA1, 0x01, // Collection
            0x85, 0x01, //   Report ID (1)
            0x75, 0x08, //   Report Size (8)
            0x95, 0x01, //   Report Count (1)
            0x81, 0x02, //   Input
            0x91, 0x02, //   Output
            0xC0,
        ];
        let parsed = parse(bytes).unwrap();
        assert!(parsed.has_report_id);
        assert_eq!(parsed.max_input_report_size, 2);
        assert_eq!(parsed.max_output_report_size, 2);
        assert_eq!(parsed.max_feature_report_size, 0);
    }

    #[test]
    fn test_extended_usage_carries_its_own_page() {
        let bytes: &[u8] = &[
            0x05, 0x01, // Usage Page (Generic Desktop)
            0x0B, 0x02, 0x02, 0x55, 0xFF, // Usage (page 0xFF55, usage 0x0202)
            0xA1, 0x01, // Collection
            0xC0,
        ];
        let parsed = parse(bytes).unwrap();
        let root = &parsed.collections[0];
        assert_eq!(root.usage_page, 0xFF55);
        assert_eq!(root.usage, 0x0202);
    }

    #[test]
    fn test_long_items_are_skipped() {
        let mut bytes = vec![0xFE, 0x02, 0x00, 0xAA, 0xBB];
        bytes.extend_from_slice(SIMPLE_MOUSE);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.max_input_report_size, 1);

        // A truncated long item is a structural failure.
        assert!(matches!(
            parse(&[0xFE, 0x04, 0x00, 0xAA]),
            Err(ParseError::TruncatedItem { .. })
        ));
    }

    #[test]
    fn test_sibling_top_level_collections() {
        let mut bytes = SIMPLE_MOUSE.to_vec();
        bytes.extend_from_slice(&[
            0x05, 0x0C, // Usage Page (Consumer)
            0x09, 0x01, // Usage (Consumer Control)
            0xA1, 0x01, // Collection (Application)
            0xB1, 0x02, //   Feature (8x1 sizes still in effect)
            0xC0,
        ]);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.collections.len(), 2);
        assert_eq!(parsed.collections[1].usage_page, 0x0C);
        assert!(parsed.collections[1].report_types.feature);
        assert!(!parsed.collections[1].report_types.input);
        assert_eq!(parsed.max_feature_report_size, 1);
    }

    #[test]
    fn test_identical_input_yields_identical_output() {
        assert_eq!(parse(SIMPLE_MOUSE).unwrap(), parse(SIMPLE_MOUSE).unwrap());
    }
}
