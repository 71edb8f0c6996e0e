pub const LINE_PREVIEW_LIMIT: usize = 256;

/// Splits every newline-terminated line off the front of `buffer`, leaving any partial tail.
pub(crate) fn drain_complete_lines(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    let mut start = 0usize;

    for (idx, byte) in buffer.iter().enumerate() {
        if *byte == b'\n' {
            let line = buffer[start..idx].to_vec();
            lines.push(line);
            start = idx + 1;
        }
    }

    if start > 0 {
        buffer.drain(0..start);
    }

    lines
}

pub(crate) fn trim_line_bytes(mut line: Vec<u8>) -> Vec<u8> {
    while line.last().map(|b| *b == b'\r' || *b == b' ') == Some(true) {
        line.pop();
    }
    line
}

/// Creates a preview string from a line, truncating at `limit` characters with an ellipsis.
pub(crate) fn line_preview(line: &str, limit: usize) -> String {
    let mut preview = String::new();
    for (idx, ch) in line.chars().enumerate() {
        if idx >= limit {
            preview.push('…');
            return preview;
        }
        preview.push(ch);
    }
    preview
}
