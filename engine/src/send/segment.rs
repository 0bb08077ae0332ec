//! SMS message segmentation.
//!
//! Carriers bill per segment: GSM-7 messages fit 160 characters in a
//! single segment, 153 per segment when concatenated; any character
//! outside the GSM-7 tables forces UCS-2 at 70/67. GSM-7 extension
//! characters occupy two septets.

use serde::Serialize;

/// Basic GSM 03.38 character set.
const GSM7_BASIC: &str = "@£$¥èéùìòÇ\nØø\rÅåΔ_ΦΓΛΩΠΨΣΘΞÆæßÉ !\"#¤%&'()*+,-./0123456789:;<=>?¡ABCDEFGHIJKLMNOPQRSTUVWXYZÄÖÑÜ§¿abcdefghijklmnopqrstuvwxyzäöñüà";

/// Extension table characters, each encoded as an escape plus a septet.
const GSM7_EXTENSION: &str = "^{}\\[~]|€\u{c}";

const GSM7_SINGLE: usize = 160;
const GSM7_MULTI: usize = 153;
const UCS2_SINGLE: usize = 70;
const UCS2_MULTI: usize = 67;

/// Encoding a message body will be transmitted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SmsEncoding {
    Gsm7,
    Ucs2,
}

/// Segmentation result, derivable before (and independent of) any send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentInfo {
    pub encoding: SmsEncoding,
    /// Billable length: septets for GSM-7, UTF-16 code units for UCS-2
    pub length: usize,
    pub segments: usize,
}

/// Compute the segment count for a message body.
///
/// An empty body still occupies one segment.
pub fn calculate_segments(text: &str) -> SegmentInfo {
    match gsm7_length(text) {
        Some(length) => SegmentInfo {
            encoding: SmsEncoding::Gsm7,
            length,
            segments: segments_for(length, GSM7_SINGLE, GSM7_MULTI),
        },
        None => {
            let length = text.encode_utf16().count();
            SegmentInfo {
                encoding: SmsEncoding::Ucs2,
                length,
                segments: segments_for(length, UCS2_SINGLE, UCS2_MULTI),
            }
        }
    }
}

/// Septet length of the text, or None if any character falls outside GSM-7.
fn gsm7_length(text: &str) -> Option<usize> {
    let mut length = 0usize;
    for c in text.chars() {
        if GSM7_BASIC.contains(c) {
            length += 1;
        } else if GSM7_EXTENSION.contains(c) {
            length += 2;
        } else {
            return None;
        }
    }
    Some(length)
}

fn segments_for(length: usize, single: usize, multi: usize) -> usize {
    if length <= single {
        1
    } else {
        length.div_ceil(multi)
    }
}
