//! Content chunking for embedding and ranking.

/// Split text into overlapping byte windows of `max_len` with step
/// `max_len - overlap`. The last window is truncated at the end of the text.
///
/// Every byte of the input lies in at least one window, and consecutive
/// windows overlap by exactly `overlap` bytes except possibly the last.
/// Windows that split a multi-byte character are recovered lossily.
pub fn chunk_text(text: &str, max_len: usize, overlap: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let bytes = text.as_bytes();
    let step = max_len - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < bytes.len() {
        let end = (start + max_len).min(bytes.len());
        chunks.push(String::from_utf8_lossy(&bytes[start..end]).into_owned());
        if end == bytes.len() {
            break;
        }
        start += step;
    }

    chunks
}

/// A chunk is worth embedding when it has at least 100 characters after
/// trimming and more than 40% of them are ASCII letters.
pub fn is_high_quality_chunk(chunk: &str) -> bool {
    let trimmed = chunk.trim();
    if trimmed.len() < 100 {
        return false;
    }

    let letters = trimmed.chars().filter(|c| c.is_ascii_alphabetic()).count();
    letters as f64 / trimmed.len() as f64 > 0.4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("hello", 1500, 100);
        assert_eq!(chunks, vec!["hello".to_string()]);
    }

    #[test]
    fn every_byte_is_covered() {
        let text = "a".repeat(4000);
        let chunks = chunk_text(&text, 1500, 100);

        let step = 1500 - 100;
        let mut covered = 0usize;
        for (i, chunk) in chunks.iter().enumerate() {
            let start = i * step;
            assert!(start <= covered, "gap before chunk {i}");
            covered = covered.max(start + chunk.len());
        }
        assert_eq!(covered, text.len());
    }

    #[test]
    fn consecutive_chunks_overlap_exactly() {
        let text: String = (0..3200).map(|i| (b'a' + (i % 26) as u8) as char).collect();
        let chunks = chunk_text(&text, 1500, 100);
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].len(), 1500);
        assert_eq!(chunks[1].len(), 1500);
        assert_eq!(&chunks[0][1400..], &chunks[1][..100]);
    }

    #[test]
    fn last_chunk_is_truncated() {
        let text = "y".repeat(1600);
        let chunks = chunk_text(&text, 1500, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].len(), 1600 - 1400);
    }

    #[test]
    fn multibyte_boundaries_do_not_panic() {
        let text = "é".repeat(2000);
        let chunks = chunk_text(&text, 1500, 100);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn quality_filter_rejects_short_chunks() {
        assert!(!is_high_quality_chunk("too short"));
        assert!(!is_high_quality_chunk(&" ".repeat(200)));
    }

    #[test]
    fn quality_filter_rejects_low_letter_ratio() {
        let noisy = "1234567890 ".repeat(20);
        assert!(!is_high_quality_chunk(&noisy));
    }

    #[test]
    fn quality_filter_accepts_prose() {
        let prose = "The quick brown fox jumps over the lazy dog and keeps running. ".repeat(3);
        assert!(is_high_quality_chunk(&prose));
    }

    #[test]
    fn quality_filter_boundary_is_exclusive() {
        // exactly 40% letters must fail; the ratio has to exceed 0.4
        let s: String = "aaaa******".repeat(10);
        assert_eq!(s.len(), 100);
        assert!(!is_high_quality_chunk(&s));
    }
}
